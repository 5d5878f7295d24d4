//! Graph-style API connector.
//!
//! - Search: `{base}/search?q=..&type=..&limit=..&access_token=..`
//! - Entity edges: `{base}/{id}/{edge}?limit=..&access_token=..`
//! - Results live under `data`

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use super::{MIN_REQUEST_INTERVAL, RateLimiter, SourceError, check_status, endpoint, parse_base};
use crate::FetchClient;
use fieldtally_core::{Error, RemoteFetch, Source, SourceApi};

/// Connector for the Graph-style API.
#[derive(Debug, Clone)]
pub struct FacebookSource {
    client: Arc<FetchClient>,
    access_token: String,
    base: Url,
    rate_limiter: Arc<RateLimiter>,
}

impl FacebookSource {
    pub fn new(client: Arc<FetchClient>, access_token: &str, base_url: &str) -> Result<Self, SourceError> {
        if access_token.trim().is_empty() {
            return Err(SourceError::MissingCredential("FIELDTALLY_FACEBOOK_ACCESS_TOKEN"));
        }

        Ok(Self {
            client,
            access_token: access_token.trim().to_string(),
            base: parse_base(base_url)?,
            rate_limiter: Arc::new(RateLimiter::new(MIN_REQUEST_INTERVAL)),
        })
    }

    async fn get(&self, url: &str) -> Result<Bytes, SourceError> {
        self.rate_limiter.acquire().await;
        let response = self.client.send(url, None).await?;
        check_status(response)
    }
}

#[async_trait]
impl RemoteFetch for FacebookSource {
    async fn fetch(&self, url: &str) -> Result<Bytes, Error> {
        Ok(self.get(url).await?)
    }
}

impl SourceApi for FacebookSource {
    fn source(&self) -> Source {
        Source::Facebook
    }

    fn search_url(&self, kind: &str, query: &str, limit: u32) -> String {
        let mut url = endpoint(&self.base, &["search"]);
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("type", kind)
            .append_pair("limit", &limit.to_string())
            .append_pair("access_token", &self.access_token);
        url.into()
    }

    fn entity_url(&self, entity_id: &str, edge: &str, limit: u32) -> Option<String> {
        let mut url = endpoint(&self.base, &[entity_id, edge]);
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string())
            .append_pair("access_token", &self.access_token);
        Some(url.into())
    }
}
