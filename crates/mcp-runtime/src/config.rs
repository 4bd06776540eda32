//! Runtime constants for the MCP server.

/// Protocol constants.
pub mod protocol {
    /// Protocol revision this server speaks by default.
    pub const VERSION: &str = "2024-11-05";

    /// Older revisions the server will echo back if a client asks for them.
    pub const SUPPORTED_VERSIONS: &[&str] = &["2024-11-05", "2024-10-07"];
}

/// Transport constants.
pub mod transport {
    use std::time::Duration;

    /// Cookie carrying the session id on the HTTP transports.
    pub const SESSION_COOKIE: &str = "mcp_session_id";

    /// Header accepted as an alternate session binding on the WebSocket
    /// transport.
    pub const SESSION_HEADER: &str = "X-MCP-Session-ID";

    /// Capacity of each client's outbound message channel.
    pub const CLIENT_OUTBOX_CAPACITY: usize = 64;

    /// SSE keep-alive interval.
    pub const SSE_KEEPALIVE: Duration = Duration::from_secs(15);

    /// Interval between server-side WebSocket pings.
    pub const WS_PING_INTERVAL: Duration = Duration::from_secs(30);

    /// A WebSocket client is considered dead if no frame arrives for this
    /// long.
    pub const WS_READ_DEADLINE: Duration = Duration::from_secs(60);

    /// Per-frame write timeout on the WebSocket transport.
    pub const WS_WRITE_TIMEOUT: Duration = Duration::from_secs(10);
}

/// Session store constants.
pub mod session {
    use std::time::Duration;

    /// Sessions idle longer than this are swept by the cleanup task.
    pub const STALE_TIMEOUT: Duration = Duration::from_secs(3600);

    /// Cleanup sweep interval.
    pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
}

/// Tool pipeline constants.
pub mod tools {
    /// Cap applied to text content by the truncation middleware.
    pub const MAX_TEXT_BYTES: usize = 63_488;
}
