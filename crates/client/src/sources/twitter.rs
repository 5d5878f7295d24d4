//! Status search API connector.
//!
//! Search only; results live under `statuses`. Authenticates with an
//! application bearer token.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use super::{MIN_REQUEST_INTERVAL, RateLimiter, SourceError, check_status, endpoint, parse_base};
use crate::FetchClient;
use fieldtally_core::{Error, RemoteFetch, Source, SourceApi};

#[derive(Debug, Clone)]
pub struct TwitterSource {
    client: Arc<FetchClient>,
    bearer_token: String,
    base: Url,
    rate_limiter: Arc<RateLimiter>,
}

impl TwitterSource {
    pub fn new(client: Arc<FetchClient>, bearer_token: &str, base_url: &str) -> Result<Self, SourceError> {
        if bearer_token.trim().is_empty() {
            return Err(SourceError::MissingCredential("FIELDTALLY_TWITTER_BEARER_TOKEN"));
        }

        Ok(Self {
            client,
            bearer_token: bearer_token.trim().to_string(),
            base: parse_base(base_url)?,
            rate_limiter: Arc::new(RateLimiter::new(MIN_REQUEST_INTERVAL)),
        })
    }
}

#[async_trait]
impl RemoteFetch for TwitterSource {
    async fn fetch(&self, url: &str) -> Result<Bytes, Error> {
        self.rate_limiter.acquire().await;
        let response = self.client.send(url, Some(&self.bearer_token)).await?;
        Ok(check_status(response)?)
    }
}

impl SourceApi for TwitterSource {
    fn source(&self) -> Source {
        Source::Twitter
    }

    /// `kind` is the result type, e.g. `recent`.
    fn search_url(&self, kind: &str, query: &str, limit: u32) -> String {
        let mut url = endpoint(&self.base, &["search", "tweets.json"]);
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("result_type", kind)
            .append_pair("count", &limit.to_string());
        url.into()
    }
}
