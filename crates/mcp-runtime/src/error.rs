//! Error types for the MCP runtime.
//!
//! Uses `thiserror` for structured error handling. `RpcError` is the wire
//! taxonomy (JSON-RPC 2.0 codes); `ProviderError` and `ToolError` are the
//! layered errors that handlers and providers raise internally.

use axum::http::StatusCode;

/// JSON-RPC 2.0 error codes reserved by the runtime.
pub mod codes {
    /// Invalid JSON was received.
    pub const PARSE: i32 = -32700;
    /// The JSON sent is not a valid request object.
    pub const INVALID_REQUEST: i32 = -32600;
    /// The method does not exist.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL: i32 = -32603;
    /// The transport itself is broken (short write, reset).
    pub const TRANSPORT: i32 = -32500;
    /// The request exceeded its deadline.
    pub const TIMEOUT: i32 = -32501;
    /// No registered provider knows the requested tool.
    pub const TOOL_NOT_FOUND: i32 = -32000;
    /// No registered provider knows the requested prompt.
    pub const PROMPT_NOT_FOUND: i32 = -32001;
    /// No registered provider knows the requested resource.
    pub const RESOURCE_NOT_FOUND: i32 = -32002;
    /// The operation is declared by the protocol but not wired on this server.
    pub const NOT_IMPLEMENTED: i32 = -32003;
}

/// Protocol-level errors carried in `Response.error`.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// Invalid JSON payload
    #[error("parse error: {0}")]
    Parse(String),

    /// Envelope is not a valid JSON-RPC 2.0 request
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown method
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// Parameters failed validation
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// Handler panic or unexpected failure
    #[error("internal error: {0}")]
    Internal(String),

    /// The byte carrier itself failed
    #[error("transport error: {0}")]
    Transport(String),

    /// Deadline exceeded
    #[error("request timed out: {0}")]
    Timeout(String),

    /// All tool providers returned "not found"
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// All prompt providers returned "not found"
    #[error("prompt not found: {0}")]
    PromptNotFound(String),

    /// All resource providers returned "not found"
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// Declared by the protocol, not wired on this server
    #[error("not implemented: {0}")]
    NotImplemented(String),
}

impl RpcError {
    /// Create a parse error.
    #[must_use]
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Create an invalid-request error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Create a method-not-found error for `method`.
    #[must_use]
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::MethodNotFound(method.into())
    }

    /// Create an invalid-params error.
    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams(message.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// The JSON-RPC error code for this kind.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::Parse(_) => codes::PARSE,
            Self::InvalidRequest(_) => codes::INVALID_REQUEST,
            Self::MethodNotFound(_) => codes::METHOD_NOT_FOUND,
            Self::InvalidParams(_) => codes::INVALID_PARAMS,
            Self::Internal(_) => codes::INTERNAL,
            Self::Transport(_) => codes::TRANSPORT,
            Self::Timeout(_) => codes::TIMEOUT,
            Self::ToolNotFound(_) => codes::TOOL_NOT_FOUND,
            Self::PromptNotFound(_) => codes::PROMPT_NOT_FOUND,
            Self::ResourceNotFound(_) => codes::RESOURCE_NOT_FOUND,
            Self::NotImplemented(_) => codes::NOT_IMPLEMENTED,
        }
    }

    /// HTTP status to use when a transport must answer with one.
    #[must_use]
    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::Parse(_) | Self::InvalidRequest(_) | Self::InvalidParams(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::MethodNotFound(_) => StatusCode::NOT_FOUND,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns true for the domain "not found" kinds in the server range.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ToolNotFound(_) | Self::PromptNotFound(_) | Self::ResourceNotFound(_)
        )
    }
}

/// Errors raised by prompt/resource/tool providers.
///
/// `NotFound` is the registry's signal to try the next provider in
/// registration order; everything else stops the resolution chain.
#[derive(thiserror::Error, Debug)]
pub enum ProviderError {
    /// This provider does not know the requested name or URI
    #[error("not found: {0}")]
    NotFound(String),

    /// Provider-internal failure
    #[error("provider error: {0}")]
    Internal(String),

    /// The provider understood the request but cannot serve it
    #[error("not supported: {0}")]
    NotSupported(String),
}

impl ProviderError {
    /// Create a not-found outcome for `name`.
    #[must_use]
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound(name.into())
    }

    /// Create a provider-internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if the registry should keep iterating providers.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Errors raised inside tool execution.
///
/// These become `CallToolResult { isError: true }` on the wire, never
/// JSON-RPC errors; only pipeline failures (validation, resolution) escalate
/// to `RpcError`.
#[derive(thiserror::Error, Debug)]
pub enum ToolError {
    /// Input failed the tool's own checks (beyond schema validation)
    #[error("validation error: {message}")]
    Validation {
        /// Field that failed validation
        field: String,
        /// Validation error message
        message: String,
    },

    /// JSON serialization error while shaping output
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The tool was cancelled mid-flight
    #[error("cancelled")]
    Cancelled,

    /// Internal tool logic error
    #[error("internal error: {0}")]
    Internal(String),
}

impl ToolError {
    /// Create a validation error.
    #[must_use]
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation { field: field.into(), message: message.into() }
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Convert to a user-facing message for the tool result content.
    #[must_use]
    pub fn to_user_message(&self) -> String {
        match self {
            Self::Validation { field, message } => {
                format!("Invalid input for '{field}': {message}")
            }
            _ => self.to_string(),
        }
    }
}

impl From<ProviderError> for RpcError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound(name) => Self::MethodNotFound(name),
            ProviderError::NotSupported(what) => Self::NotImplemented(what),
            ProviderError::Internal(message) => Self::Internal(message),
        }
    }
}
