//! Error types for conduit-mcp
//!
//! ## JSON-RPC Error Codes
//!
//! Standard JSON-RPC 2.0 error codes are defined in the specification:
//! <https://www.jsonrpc.org/specification#error_object>
//!
//! | Code   | Message          | Meaning                                  |
//! |--------|------------------|------------------------------------------|
//! | -32700 | Parse error      | Invalid JSON was received                |
//! | -32600 | Invalid Request  | The JSON sent is not a valid Request     |
//! | -32601 | Method not found | The method does not exist / is not available |
//! | -32602 | Invalid params   | Invalid method parameter(s)              |
//! | -32603 | Internal error   | Internal JSON-RPC error                  |
//!
//! ## MCP-Specific Error Codes
//!
//! MCP uses the server error range (-32000 to -32099) for protocol-specific
//! errors:
//!
//! | Code   | Name            | Meaning                                  |
//! |--------|-----------------|------------------------------------------|
//! | -32001 | RequestTimeout  | Outbound request exceeded timeout        |
//! | -32002 | ResourceNotFound| Resource not found                       |

use serde::{Deserialize, Serialize};

/// Type-erased error type used at API boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Standard JSON-RPC error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    /// Invalid JSON was received
    ParseError = -32700,
    /// The JSON sent is not a valid Request object
    InvalidRequest = -32600,
    /// The method does not exist / is not available
    MethodNotFound = -32601,
    /// Invalid method parameter(s)
    InvalidParams = -32602,
    /// Internal JSON-RPC error
    InternalError = -32603,
}

/// MCP-specific error codes (in the -32000 to -32099 range)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum McpErrorCode {
    /// Outbound request exceeded its timeout
    RequestTimeout = -32001,
    /// Resource not found
    ResourceNotFound = -32002,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl McpErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParseError, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            ErrorCode::MethodNotFound,
            format!("Method not found: {}", method),
        )
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Create an MCP-specific error
    pub fn mcp_error(code: McpErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    /// Resource not found. Carries the URI in `data` so clients can
    /// distinguish which lookup failed.
    pub fn resource_not_found(uri: &str) -> Self {
        Self::mcp_error(
            McpErrorCode::ResourceNotFound,
            format!("Resource not found: {}", uri),
        )
        .with_data(serde_json::Value::String(uri.to_string()))
    }

    /// Outbound request timed out
    pub fn request_timeout(message: impl Into<String>) -> Self {
        Self::mcp_error(McpErrorCode::RequestTimeout, message)
    }
}

/// conduit-mcp error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A typed JSON-RPC error produced by this server (method errors,
    /// invalid params, and so on). Forwarded to the wire as-is.
    #[error("JSON-RPC error: {0:?}")]
    JsonRpc(JsonRpcError),

    /// An error response received from the client for an outbound request.
    #[error("client error {}: {}", .0.code, .0.message)]
    Client(JsonRpcError),

    /// An outbound request hit the configured timeout before a response
    /// arrived.
    #[error("request {id} timed out")]
    Timeout { id: i64 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to the JSON-RPC error object written to the wire.
    ///
    /// Typed JSON-RPC errors pass through unchanged; everything else
    /// collapses to `-32603` with the error's display text.
    pub fn into_jsonrpc(self) -> JsonRpcError {
        match self {
            Error::JsonRpc(err) => err,
            Error::Client(err) => err,
            Error::Timeout { id } => {
                JsonRpcError::request_timeout(format!("Request {} timed out", id))
            }
            other => JsonRpcError::internal_error(other.to_string()),
        }
    }
}

impl From<JsonRpcError> for Error {
    fn from(err: JsonRpcError) -> Self {
        Error::JsonRpc(err)
    }
}

/// Result type alias for conduit-mcp
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ErrorCode::ParseError.code(), -32700);
        assert_eq!(ErrorCode::InvalidRequest.code(), -32600);
        assert_eq!(ErrorCode::MethodNotFound.code(), -32601);
        assert_eq!(ErrorCode::InvalidParams.code(), -32602);
        assert_eq!(ErrorCode::InternalError.code(), -32603);
        assert_eq!(McpErrorCode::ResourceNotFound.code(), -32002);
    }

    #[test]
    fn test_resource_not_found_carries_uri() {
        let err = JsonRpcError::resource_not_found("file:///missing.txt");
        assert_eq!(err.code, -32002);
        assert_eq!(
            err.data,
            Some(serde_json::Value::String("file:///missing.txt".into()))
        );
    }

    #[test]
    fn test_error_data_skipped_when_absent() {
        let err = JsonRpcError::invalid_params("bad");
        let json = serde_json::to_value(&err).unwrap();
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_into_jsonrpc_passthrough() {
        let err = Error::JsonRpc(JsonRpcError::invalid_params("nope"));
        assert_eq!(err.into_jsonrpc().code, -32602);
    }

    #[test]
    fn test_into_jsonrpc_internal_fallback() {
        let err = Error::Transport("pipe closed".into());
        let rpc = err.into_jsonrpc();
        assert_eq!(rpc.code, -32603);
        assert!(rpc.message.contains("pipe closed"));
    }

    #[test]
    fn test_timeout_maps_to_request_timeout() {
        let rpc = Error::Timeout { id: 7 }.into_jsonrpc();
        assert_eq!(rpc.code, -32001);
    }
}
