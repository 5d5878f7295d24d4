//! Seams to the outside world.
//!
//! The core never builds signed API calls itself. A [`RemoteFetch`] performs a
//! plain retrieval for the cache, and a [`SourceApi`] knows how to address one
//! external API and how to authenticate against it.

use async_trait::async_trait;
use bytes::Bytes;

use crate::Error;
use crate::aggregate::Source;

/// Retrieves the body behind a URL.
#[async_trait]
pub trait RemoteFetch: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes, Error>;
}

/// One external API as seen by the aggregator.
///
/// `fetch` receives a URL built by this same connector and is responsible for
/// any authentication or signing the call needs.
#[async_trait]
pub trait SourceApi: RemoteFetch {
    /// Which source this connector serves.
    fn source(&self) -> Source;

    /// URL of a search for `query` restricted to result `kind`.
    fn search_url(&self, kind: &str, query: &str, limit: u32) -> String;

    /// URL of sub-resource `edge` of a discovered entity.
    ///
    /// Sources without second-stage expansion return `None`.
    fn entity_url(&self, _entity_id: &str, _edge: &str, _limit: u32) -> Option<String> {
        None
    }
}
