//! HTTP fetch pipeline.
//!
//! - Only `http` and `https` URLs are fetched
//! - Max redirects: 5
//! - Max body bytes: 5MB (configurable)
//! - Logs name the host and path only; query strings may carry credentials

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode, Url, header};

use fieldtally_core::{AppConfig, Error, RemoteFetch};

/// Configuration for the fetch client.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "fieldtally/0.1")
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 5MB)
    pub max_bytes: usize,

    /// Request timeout (default: 20s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "fieldtally/0.1".to_string(),
            max_bytes: 5 * 1024 * 1024,
            timeout: Duration::from_millis(20000),
            max_redirects: 5,
        }
    }
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            max_bytes: config.max_bytes,
            timeout: config.timeout(),
            ..Default::default()
        }
    }
}

/// Response from a fetch operation. Non-success statuses are returned, not
/// raised; callers decide what a status means.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// The final URL after redirects
    pub final_url: Url,
    /// HTTP status code
    pub status: StatusCode,
    /// Content-Type header
    pub content_type: Option<String>,
    /// Response body bytes
    pub bytes: Bytes,
    /// Time taken to fetch in milliseconds
    pub fetch_ms: u64,
}

/// HTTP fetch client shared by the cache and every source connector.
#[derive(Debug, Clone)]
pub struct FetchClient {
    http: Client,
    config: FetchConfig,
}

impl FetchClient {
    /// Create a new fetch client with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// GET `url_str`, optionally with a bearer token.
    pub async fn send(&self, url_str: &str, bearer: Option<&str>) -> Result<FetchResponse, Error> {
        let start = Instant::now();
        let url = parse_fetch_url(url_str)?;

        let mut request = self
            .http
            .get(url.clone())
            .header(header::ACCEPT, "application/json, */*;q=0.8");
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::FetchTimeout(format!("{} timed out", redacted(&url)))
            } else {
                Error::Network(format!("{}: {}", redacted(&url), e.without_url()))
            }
        })?;

        let status = response.status();

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_bytes
        {
            return Err(Error::FetchTooLarge(format!("{} bytes exceeds {}", len, self.config.max_bytes)));
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                Error::FetchTimeout(format!("{} timed out reading body", redacted(&url)))
            } else {
                Error::Network(format!("failed to read response: {}", e.without_url()))
            }
        })?;

        if bytes.len() > self.config.max_bytes {
            return Err(Error::FetchTooLarge(format!("{} bytes exceeds {}", bytes.len(), self.config.max_bytes)));
        }

        let fetch_ms = start.elapsed().as_millis() as u64;

        tracing::debug!(
            target_url = %redacted(&url),
            status = status.as_u16(),
            elapsed_ms = fetch_ms,
            bytes = bytes.len(),
            "fetched"
        );

        Ok(FetchResponse { final_url, status, content_type, bytes, fetch_ms })
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }
}

#[async_trait]
impl RemoteFetch for FetchClient {
    /// Plain retrieval: any non-success status is an error.
    async fn fetch(&self, url: &str) -> Result<Bytes, Error> {
        let response = self.send(url, None).await?;
        if !response.status.is_success() {
            return Err(Error::HttpError(format!("status {}", response.status.as_u16())));
        }
        Ok(response.bytes)
    }
}

fn parse_fetch_url(url_str: &str) -> Result<Url, Error> {
    let url = Url::parse(url_str.trim()).map_err(|e| Error::InvalidUrl(format!("{url_str:?}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::InvalidUrl(format!("unsupported scheme: {other}"))),
    }
}

/// Host and path of `url`, without query or credentials.
pub(crate) fn redacted(url: &Url) -> String {
    format!("{}{}", url.host_str().unwrap_or_default(), url.path())
}
