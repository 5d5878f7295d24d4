//! Source connector error types.

use serde::Deserialize;

use fieldtally_core::Error;

/// Errors from the source connectors.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Credential for the source not configured.
    #[error("missing credential: {0} not set")]
    MissingCredential(&'static str),

    /// Base URL cannot be used to build endpoints.
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),

    /// Authentication failed (bad or expired token).
    #[error("authentication failed: status {status}")]
    AuthError { status: u16 },

    /// Rate limited by the API.
    #[error("rate limited: too many requests")]
    RateLimited,

    /// Other HTTP error response, with the API's own message when it sent one.
    #[error("HTTP error: {status}{}", .message.as_deref().map(|m| format!(" ({m})")).unwrap_or_default())]
    HttpError { status: u16, message: Option<String> },

    /// Failure below the HTTP layer.
    #[error(transparent)]
    Transport(#[from] Error),
}

impl From<SourceError> for Error {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::MissingCredential(_) => Error::AuthMissing(err.to_string()),
            SourceError::InvalidBaseUrl(_) => Error::InvalidUrl(err.to_string()),
            SourceError::AuthError { .. } | SourceError::RateLimited | SourceError::HttpError { .. } => {
                Error::HttpError(err.to_string())
            }
            SourceError::Transport(inner) => inner,
        }
    }
}

/// Error envelopes of the two APIs: `{"error": {"message": ..}}` and
/// `{"errors": [{"message": ..}]}`.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<ErrorDetail>,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

/// The API's own error message from an error response body, if any.
pub(crate) fn error_message(body: &[u8]) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_slice(body).ok()?;
    parsed
        .error
        .into_iter()
        .chain(parsed.errors)
        .find_map(|detail| detail.message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SourceError::MissingCredential("FIELDTALLY_TWITTER_BEARER_TOKEN");
        assert!(err.to_string().contains("FIELDTALLY_TWITTER_BEARER_TOKEN"));

        let err = SourceError::HttpError { status: 400, message: Some("Unsupported get request".into()) };
        assert_eq!(err.to_string(), "HTTP error: 400 (Unsupported get request)");

        let err = SourceError::HttpError { status: 502, message: None };
        assert_eq!(err.to_string(), "HTTP error: 502");
    }

    #[test]
    fn test_into_core_error() {
        assert!(matches!(Error::from(SourceError::MissingCredential("X")), Error::AuthMissing(_)));
        assert!(matches!(Error::from(SourceError::RateLimited), Error::HttpError(_)));

        let inner = Error::FetchTimeout("slow".into());
        assert!(matches!(Error::from(SourceError::from(inner)), Error::FetchTimeout(_)));
    }

    #[test]
    fn test_error_message_from_either_envelope() {
        let graph = br#"{"error": {"message": "Invalid OAuth access token.", "code": 190}}"#;
        assert_eq!(error_message(graph).as_deref(), Some("Invalid OAuth access token."));

        let statuses = br#"{"errors": [{"code": 88, "message": "Rate limit exceeded"}]}"#;
        assert_eq!(error_message(statuses).as_deref(), Some("Rate limit exceeded"));

        assert_eq!(error_message(b"<html>bad gateway</html>"), None);
    }
}
