//! Error types and JSON-RPC error codes.
//!
//! Two tiers: [`McpError`] covers protocol-level faults that surface as `Err`
//! to callers (and as JSON-RPC error replies on the wire), while [`ToolError`]
//! covers in-band tool failures that the dispatcher always folds into a
//! success-shaped `{"error": message}` payload.

use super::message::{JsonRpcError, JsonRpcErrorObject, RequestId, JSONRPC_VERSION};

/// Standard JSON-RPC 2.0 error codes.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

/// Protocol-specific error codes.
pub mod mcp_error_codes {
    pub const REQUEST_TIMEOUT: i32 = -32800;
    pub const TOOL_NOT_FOUND: i32 = -32803;
    pub const NOT_INITIALIZED: i32 = -32002;
    pub const TRANSPORT_ERROR: i32 = -32850;
    pub const PROTOCOL_ERROR: i32 = -32851;
    pub const SPAWN_FAILED: i32 = -32852;

    /// Server: Unauthorized (missing or invalid token).
    pub const UNAUTHORIZED: i32 = -32900;
}

/// All protocol-level errors.
#[derive(thiserror::Error, Debug)]
pub enum McpError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Unknown tool: {0}")]
    ToolNotFound(String),

    /// A call was attempted before the handshake reached `Ready`.
    #[error("Session not initialized (state: {state})")]
    NotInitialized { state: String },

    /// No reply arrived before the call's deadline.
    #[error("Request '{method}' timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    /// Malformed envelope or handshake violation.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Broken byte stream.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote side answered with a JSON-RPC error object.
    #[error("Server error [{code}]: {message}")]
    Server { code: i32, message: String },

    #[error("Failed to spawn '{command}': {reason}")]
    Spawn { command: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Missing or invalid access token.
    #[error("Unauthorized")]
    Unauthorized,
}

impl McpError {
    pub fn code(&self) -> i32 {
        use error_codes::*;
        use mcp_error_codes::*;
        match self {
            McpError::ParseError(_) => PARSE_ERROR,
            McpError::InvalidRequest(_) => INVALID_REQUEST,
            McpError::MethodNotFound(_) => METHOD_NOT_FOUND,
            McpError::InvalidParams(_) => INVALID_PARAMS,
            McpError::InternalError(_) | McpError::Config(_) => INTERNAL_ERROR,
            McpError::ToolNotFound(_) => TOOL_NOT_FOUND,
            McpError::NotInitialized { .. } => NOT_INITIALIZED,
            McpError::Timeout { .. } => REQUEST_TIMEOUT,
            McpError::Protocol(_) => PROTOCOL_ERROR,
            McpError::Transport(_) | McpError::Io(_) => TRANSPORT_ERROR,
            McpError::Server { code, .. } => *code,
            McpError::Spawn { .. } => SPAWN_FAILED,
            McpError::Json(_) => PARSE_ERROR,
            McpError::Unauthorized => UNAUTHORIZED,
        }
    }

    /// Transport and protocol faults tear the session down; everything else
    /// resolves only the affected call.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            McpError::Transport(_) | McpError::Io(_) | McpError::Protocol(_)
        )
    }

    pub fn to_json_rpc_error(&self, id: RequestId) -> JsonRpcError {
        JsonRpcError {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error: JsonRpcErrorObject {
                code: self.code(),
                message: self.to_string(),
                data: None,
            },
        }
    }
}

impl From<JsonRpcErrorObject> for McpError {
    fn from(e: JsonRpcErrorObject) -> Self {
        McpError::Server {
            code: e.code,
            message: e.message,
        }
    }
}

pub type McpResult<T> = Result<T, McpError>;

/// In-band tool failures. Never surfaced as a protocol error.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Mutation not allowed: server is in readonly mode")]
    ReadOnlyViolation,

    #[error("{0}")]
    Handler(String),
}

impl ToolError {
    pub fn handler(message: impl std::fmt::Display) -> Self {
        ToolError::Handler(message.to_string())
    }
}
