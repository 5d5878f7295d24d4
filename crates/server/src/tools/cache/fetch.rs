//! cache_fetch tool implementation.
//!
//! Raw passthrough: fetches any http(s) URL through the response cache.
//! No host allowlist or private-range filtering is applied; the caller is
//! the trusted local stdio client.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use fieldtally_core::{Error, ResponseCache};

use crate::tools::json_result;

/// Parameters for the cache_fetch tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheFetchParams {
    /// URL to fetch.
    pub url: String,

    /// Expiry in minutes; negative never expires. Defaults to the configured TTL.
    #[serde(default)]
    pub ttl_minutes: Option<i64>,
}

/// Output from the cache_fetch tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheFetchOutput {
    /// Cache key the URL resolved to.
    pub canonical_key: String,
    /// Body length in bytes; 0 when the remote answered with nothing.
    pub bytes: usize,
    /// Body as UTF-8 (lossy).
    pub body: Option<String>,
}

pub async fn fetch_impl(
    cache: &ResponseCache, default_ttl_minutes: i64, params: CacheFetchParams,
) -> Result<CallToolResult, McpError> {
    if params.url.trim().is_empty() {
        return Err(Error::InvalidInput("url cannot be empty".into()).into());
    }

    let canonical_key = cache.canonical_key(&params.url)?;
    let body = cache
        .fetch(&params.url, params.ttl_minutes.unwrap_or(default_ttl_minutes))
        .await?;

    json_result(&CacheFetchOutput {
        canonical_key,
        bytes: body.as_ref().map_or(0, |b| b.len()),
        body: body.map(|b| String::from_utf8_lossy(&b).into_owned()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{cache, output};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_fetch_strips_denylisted_params() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir).await;

        let params = CacheFetchParams { url: "https://api.test/x?a=1&access_token=s".into(), ttl_minutes: None };
        let out: CacheFetchOutput = output(&fetch_impl(&cache, 60, params).await.unwrap());

        assert_eq!(out.canonical_key, "https://api.test/x?a=1");
        assert!(out.body.unwrap().contains("access_token=s"));
        assert_eq!(cache.stats().await.unwrap().entries, 1);
    }

    #[tokio::test]
    async fn test_fetch_empty_response() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir).await;

        let params = CacheFetchParams { url: "https://api.test/empty".into(), ttl_minutes: Some(5) };
        let out: CacheFetchOutput = output(&fetch_impl(&cache, 60, params).await.unwrap());

        assert_eq!(out.bytes, 0);
        assert!(out.body.is_none());
        assert_eq!(cache.stats().await.unwrap().entries, 0);
    }

    #[tokio::test]
    async fn test_fetch_rejects_blank_url() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir).await;

        let params = CacheFetchParams { url: " ".into(), ttl_minutes: None };
        assert!(fetch_impl(&cache, 60, params).await.is_err());
    }
}
