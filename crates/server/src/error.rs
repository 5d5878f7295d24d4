//! Structured errors for tool-level failures not covered by the core error.

use rmcp::model::{ErrorCode, ErrorData as McpError};

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// No progress record exists for the session.
    #[error("SESSION_NOT_FOUND: {0}")]
    SessionNotFound(String),

    /// Tool output could not be encoded.
    #[error("SERIALIZE_FAILED: {0}")]
    Serialize(String),
}

impl From<ToolError> for McpError {
    fn from(err: ToolError) -> Self {
        let code = match &err {
            ToolError::SessionNotFound(_) => -32602,
            ToolError::Serialize(_) => -32603,
        };

        McpError { code: ErrorCode(code), message: err.to_string().into(), data: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_not_found_maps_to_invalid_params() {
        let err: McpError = ToolError::SessionNotFound("abc".into()).into();
        assert_eq!(err.code, ErrorCode(-32602));
        assert!(err.message.contains("SESSION_NOT_FOUND"));
    }
}
