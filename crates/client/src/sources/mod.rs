//! Source connectors.
//!
//! Each connector builds request URLs for one external API and performs the
//! authenticated call. The aggregator only sees them as [`SourceApi`]s.
//!
//! - **facebook**: Graph-style API, access token passed as a query parameter
//!   (stripped from cache keys by the default denylist)
//! - **twitter**: status search API, bearer token in the `Authorization` header
//!
//! Both connectors space their requests with a shared per-connector rate
//! limiter and classify 401/403/429 responses.

pub mod error;
pub mod facebook;
pub mod twitter;

pub use error::SourceError;
pub use facebook::FacebookSource;
pub use twitter::TwitterSource;

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::Mutex;
use url::Url;

use crate::fetch::FetchResponse;
use crate::FetchClient;
use fieldtally_core::{AppConfig, SourceApi};

/// Minimum interval between requests of one connector.
pub const MIN_REQUEST_INTERVAL: Duration = Duration::from_millis(200);

/// Rate limiter to enforce request intervals.
#[derive(Debug)]
pub(crate) struct RateLimiter {
    last_request: Mutex<Instant>,
    min_interval: Duration,
}

impl RateLimiter {
    pub(crate) fn new(min_interval: Duration) -> Self {
        Self {
            last_request: Mutex::new(Instant::now().checked_sub(min_interval).unwrap_or_else(Instant::now)),
            min_interval,
        }
    }

    /// Acquire permission to make a request, waiting if necessary.
    pub(crate) async fn acquire(&self) {
        let mut last = self.last_request.lock().await;
        let elapsed = last.elapsed();
        if elapsed < self.min_interval {
            tokio::time::sleep(self.min_interval - elapsed).await;
        }
        *last = Instant::now();
    }
}

/// Parse a connector base URL.
pub(crate) fn parse_base(base_url: &str) -> Result<Url, SourceError> {
    let url = Url::parse(base_url.trim()).map_err(|e| SourceError::InvalidBaseUrl(format!("{base_url}: {e}")))?;
    if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
        return Err(SourceError::InvalidBaseUrl(base_url.to_string()));
    }
    Ok(url)
}

/// `base` with `segments` appended to its path.
pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

/// Body of a successful response, or the classified failure.
pub(crate) fn check_status(response: FetchResponse) -> Result<Bytes, SourceError> {
    let status = response.status;
    if status.is_success() {
        return Ok(response.bytes);
    }

    match status.as_u16() {
        401 | 403 => Err(SourceError::AuthError { status: status.as_u16() }),
        429 => Err(SourceError::RateLimited),
        code => Err(SourceError::HttpError { status: code, message: error::error_message(&response.bytes) }),
    }
}

/// Connectors for every source whose credential is configured.
///
/// Sources without a credential are skipped with a warning; searches that
/// need them fail with `AUTH_MISSING`.
pub fn configured_sources(config: &AppConfig, client: Arc<FetchClient>) -> Result<Vec<Arc<dyn SourceApi>>, SourceError> {
    let mut sources: Vec<Arc<dyn SourceApi>> = Vec::new();

    match config.require_facebook_access_token() {
        Ok(token) => sources.push(Arc::new(FacebookSource::new(client.clone(), token, &config.facebook_base_url)?)),
        Err(e) => tracing::warn!(error = %e, "facebook source disabled"),
    }

    match config.require_twitter_bearer_token() {
        Ok(token) => sources.push(Arc::new(TwitterSource::new(client, token, &config.twitter_base_url)?)),
        Err(e) => tracing::warn!(error = %e, "twitter source disabled"),
    }

    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FetchConfig;
    use fieldtally_core::Source;
    use reqwest::StatusCode;

    fn response(status: u16, body: &'static str) -> FetchResponse {
        FetchResponse {
            final_url: Url::parse("https://api.example.com/x").unwrap(),
            status: StatusCode::from_u16(status).unwrap(),
            content_type: Some("application/json".into()),
            bytes: Bytes::from_static(body.as_bytes()),
            fetch_ms: 1,
        }
    }

    #[test]
    fn test_check_status_classification() {
        assert_eq!(check_status(response(200, "{}")).unwrap(), Bytes::from_static(b"{}"));
        assert!(matches!(check_status(response(401, "")), Err(SourceError::AuthError { status: 401 })));
        assert!(matches!(check_status(response(429, "")), Err(SourceError::RateLimited)));

        let err = check_status(response(400, r#"{"error": {"message": "bad type"}}"#)).unwrap_err();
        assert!(matches!(err, SourceError::HttpError { status: 400, message: Some(ref m) } if m == "bad type"));
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let base = parse_base("https://api.twitter.com/1.1").unwrap();
        assert_eq!(endpoint(&base, &["search", "tweets.json"]).as_str(), "https://api.twitter.com/1.1/search/tweets.json");

        let base = parse_base("https://graph.facebook.com/").unwrap();
        assert_eq!(endpoint(&base, &["search"]).as_str(), "https://graph.facebook.com/search");
    }

    #[test]
    fn test_parse_base_rejects_non_http() {
        assert!(matches!(parse_base("mailto:someone@example.com"), Err(SourceError::InvalidBaseUrl(_))));
        assert!(matches!(parse_base("ftp://example.com"), Err(SourceError::InvalidBaseUrl(_))));
    }

    #[tokio::test]
    async fn test_rate_limiter_spaces_requests() {
        let limiter = RateLimiter::new(Duration::from_millis(30));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_configured_sources_follow_credentials() {
        let client = Arc::new(FetchClient::new(FetchConfig::default()).unwrap());

        let none = configured_sources(&AppConfig::default(), client.clone()).unwrap();
        assert!(none.is_empty());

        let config = AppConfig { twitter_bearer_token: Some("bearer".into()), ..Default::default() };
        let sources = configured_sources(&config, client).unwrap();
        assert_eq!(sources.iter().map(|s| s.source()).collect::<Vec<_>>(), vec![Source::Twitter]);
    }
}
