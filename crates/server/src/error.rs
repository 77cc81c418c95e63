//! Errors raised by the tool layer before the cache is involved.

use permacache_client::fetch::UrlError;
use rmcp::model::{ErrorCode, ErrorData as McpError};

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Malformed tool arguments.
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// A result could not be rendered as JSON.
    #[error("SERIALIZATION: {0}")]
    Serialization(String),
}

impl From<UrlError> for ToolError {
    fn from(err: UrlError) -> Self {
        ToolError::InvalidInput(err.to_string())
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        ToolError::Serialization(err.to_string())
    }
}

impl From<ToolError> for McpError {
    fn from(err: ToolError) -> Self {
        let code = match &err {
            ToolError::InvalidInput(_) => -32602,
            ToolError::Serialization(_) => -32603,
        };

        McpError { code: ErrorCode(code), message: err.to_string().into(), data: None }
    }
}
