//! Multi-source search sessions.
//!
//! A session plans its requests, runs them through the shared response cache
//! on a bounded worker pool, then tallies the collated documents. Progress is
//! written by the collector loop only, one update per attempted request.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

use super::plan::{Connectors, Limits, PlannedRequest, SearchPlan, Stage, discover_entities, parse_scope};
use super::tally::{AggregatedMap, RelevanceTable, Tally, document_id};
use crate::{Error, ProgressBoard, ProgressTracker, ResponseCache, SourceApi};

/// Input of one search session.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SearchRequest {
    /// Result limit per request for the facebook source.
    #[serde(default = "default_limit_a")]
    pub limit_a: u32,

    /// Result limit per request for the twitter source.
    #[serde(default = "default_limit_b")]
    pub limit_b: u32,

    /// Category tokens, e.g. "facebook_public_posts" or "twitter_recent".
    pub scope: Vec<String>,

    /// Pre-expanded query variants.
    pub queries: Vec<String>,

    /// Keep only fields named in the relevance table, under their display names.
    #[serde(default)]
    pub relevant_only: bool,

    /// Caller-chosen id under which progress is published.
    pub session_id: String,
}

fn default_limit_a() -> u32 {
    25
}

fn default_limit_b() -> u32 {
    100
}

/// Settings shared by every session of one aggregator.
#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub ttl_minutes: i64,
    pub max_concurrency: usize,
    pub deadline: Option<Duration>,
    pub separator: String,
    pub relevance: RelevanceTable,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            ttl_minutes: 60,
            max_concurrency: 4,
            deadline: None,
            separator: " ".into(),
            relevance: RelevanceTable::default(),
        }
    }
}

/// Request accounting. `completed` counts attempts, successful or not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RequestStats {
    pub planned: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Result of one search session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SearchReport {
    /// field -> value -> {count, ids}.
    pub fields: AggregatedMap,
    /// Documents tallied.
    pub documents: u64,
    pub requests: RequestStats,
    /// The session deadline passed; `fields` holds partial results.
    pub timed_out: bool,
}

/// Runs search sessions against the configured sources.
///
/// Built once at startup around the shared cache and progress board.
pub struct ResultAggregator {
    cache: Arc<ResponseCache>,
    progress: ProgressBoard,
    settings: SearchSettings,
    connectors: Connectors,
}

/// Outcome of every request in one phase, by plan position.
struct PhaseRun {
    documents: Vec<Option<Vec<Value>>>,
    timed_out: bool,
}

impl ResultAggregator {
    pub fn new(cache: Arc<ResponseCache>, progress: ProgressBoard, settings: SearchSettings) -> Self {
        Self { cache, progress, settings, connectors: BTreeMap::new() }
    }

    /// Register the connector for one source, replacing any previous one.
    pub fn with_source(mut self, api: Arc<dyn SourceApi>) -> Self {
        self.connectors.insert(api.source(), api);
        self
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    /// Run one search session.
    ///
    /// Per-request failures are absorbed and counted in the report.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidInput` for an empty query list or a bad session id
    /// - `Error::AuthMissing` if the scope needs an unconfigured source
    /// - `Error::Storage` if the progress record cannot be created
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchReport, Error> {
        let started = std::time::Instant::now();
        let session_id = request.session_id.as_str();

        let queries: Vec<String> = request
            .queries
            .iter()
            .map(|q| q.trim())
            .filter(|q| !q.is_empty())
            .map(str::to_string)
            .collect();
        if queries.is_empty() {
            return Err(Error::InvalidInput("queries cannot be empty".into()));
        }

        let scope = parse_scope(&request.scope);
        let limits = Limits { facebook: request.limit_a, twitter: request.limit_b };
        let plan = SearchPlan::build(&scope, &queries, limits, &self.connectors)?;

        let mut tracker = self.progress.start(session_id).await?;
        note_progress(tracker.set_expected(plan.len() as u64).await, session_id);

        tracing::info!(
            session_id,
            scope = ?scope,
            queries = queries.len(),
            planned = plan.len(),
            "search started"
        );

        if request.relevant_only && self.settings.relevance.is_empty() {
            tracing::warn!(session_id, "relevant_only set with an empty relevance table; every field is discarded");
        }

        let deadline = self.settings.deadline.map(|d| Instant::now() + d);
        let mut stats = RequestStats { planned: plan.len() as u64, ..Default::default() };

        let first = self.run_phase(&plan.requests, deadline, &mut tracker, &mut stats).await;

        let mut second_requests = Vec::new();
        let mut second = PhaseRun { documents: Vec::new(), timed_out: false };
        if !first.timed_out {
            let directories = plan
                .requests
                .iter()
                .zip(&first.documents)
                .filter(|(planned, _)| planned.stage == Stage::Directory)
                .filter_map(|(_, documents)| documents.as_ref())
                .flatten();
            let entities = discover_entities(directories);
            second_requests = SearchPlan::expand(&entities, limits, &self.connectors);

            if !second_requests.is_empty() {
                stats.planned += second_requests.len() as u64;
                note_progress(tracker.add_expected(second_requests.len() as u64).await, session_id);
                tracing::info!(session_id, entities = entities.len(), planned = second_requests.len(), "entity expansion");

                second = self.run_phase(&second_requests, deadline, &mut tracker, &mut stats).await;
            }
        }

        let relevance = request.relevant_only.then_some(&self.settings.relevance);
        let mut tally = Tally::new(&self.settings.separator, relevance);
        let collated = plan
            .requests
            .iter()
            .zip(&first.documents)
            .chain(second_requests.iter().zip(&second.documents))
            .filter(|(planned, _)| planned.stage != Stage::Directory)
            .filter_map(|(_, documents)| documents.as_ref())
            .flatten();
        for (position, document) in collated.enumerate() {
            tally.add_document(&document_id(document, position), document);
        }

        let report = SearchReport {
            documents: tally.documents(),
            fields: tally.finish(),
            requests: stats,
            timed_out: first.timed_out || second.timed_out,
        };

        tracing::info!(
            session_id,
            planned = report.requests.planned,
            completed = report.requests.completed,
            failed = report.requests.failed,
            documents = report.documents,
            fields = report.fields.len(),
            timed_out = report.timed_out,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "search finished"
        );

        Ok(report)
    }

    async fn run_phase(
        &self, requests: &[PlannedRequest], deadline: Option<Instant>, tracker: &mut ProgressTracker,
        stats: &mut RequestStats,
    ) -> PhaseRun {
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrency.max(1)));
        let mut join_set = JoinSet::new();

        for (index, planned) in requests.iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let cache = Arc::clone(&self.cache);
            let api = self.connectors.get(&planned.source).cloned();
            let url = planned.url.clone();
            let results_key = planned.source.results_key();
            let ttl_minutes = self.settings.ttl_minutes;

            join_set.spawn(async move {
                // Held until the fetch finishes; closing never happens.
                let _permit = semaphore.acquire_owned().await;
                let outcome = match api {
                    Some(api) => fetch_documents(&cache, api.as_ref(), &url, ttl_minutes, results_key).await,
                    None => Err(Error::AuthMissing("no connector registered".into())),
                };
                (index, outcome)
            });
        }

        let mut documents: Vec<Option<Vec<Value>>> = (0..requests.len()).map(|_| None).collect();
        let mut timed_out = false;
        let session_id = tracker.session_id().to_string();

        loop {
            let joined = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, join_set.join_next()).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        timed_out = true;
                        break;
                    }
                },
                None => join_set.join_next().await,
            };
            let Some(joined) = joined else {
                break;
            };

            stats.completed += 1;
            note_progress(tracker.increment_completed().await, &session_id);

            match joined {
                Ok((index, Ok(found))) => {
                    tracing::debug!(
                        session_id = %session_id,
                        source = %requests[index].source,
                        label = %requests[index].label,
                        documents = found.len(),
                        "request done"
                    );
                    documents[index] = Some(found);
                }
                Ok((index, Err(e))) => {
                    stats.failed += 1;
                    let planned = &requests[index];
                    if e.is_request_scoped() {
                        tracing::warn!(session_id = %session_id, source = %planned.source, label = %planned.label, error = %e, "request dropped");
                    } else {
                        tracing::error!(session_id = %session_id, source = %planned.source, label = %planned.label, error = %e, "request dropped on storage failure");
                    }
                }
                Err(e) => {
                    stats.failed += 1;
                    tracing::warn!(session_id = %session_id, error = %e, "fetch task aborted");
                }
            }
        }

        if timed_out {
            tracing::warn!(session_id = %session_id, abandoned = join_set.len(), "search deadline passed");
            join_set.shutdown().await;
        }

        PhaseRun { documents, timed_out }
    }
}

async fn fetch_documents(
    cache: &ResponseCache, api: &dyn SourceApi, url: &str, ttl_minutes: i64, results_key: &str,
) -> Result<Vec<Value>, Error> {
    let body = cache
        .fetch_with(url, ttl_minutes, api.fetch(url))
        .await?
        .ok_or_else(|| Error::Network("empty response".into()))?;
    extract_results(&body, results_key)
}

/// Documents of the top-level `results_key` collection of a response body.
///
/// # Errors
///
/// Returns `Error::MalformedResponse` if the body is not JSON or lacks the
/// collection.
pub fn extract_results(body: &[u8], results_key: &str) -> Result<Vec<Value>, Error> {
    let mut value: Value =
        serde_json::from_slice(body).map_err(|e| Error::MalformedResponse(format!("undecodable body: {e}")))?;

    match value.get_mut(results_key).map(Value::take) {
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(Error::MalformedResponse(format!("`{results_key}` is not a list"))),
        None => Err(Error::MalformedResponse(format!("missing `{results_key}` collection"))),
    }
}

/// Progress updates are advisory; a failed write never aborts the session.
fn note_progress(result: Result<(), Error>, session_id: &str) {
    if let Err(e) = result {
        tracing::warn!(session_id, error = %e, "progress update failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Source;
    use crate::cache::CacheSettings;
    use crate::RemoteFetch;
    use async_trait::async_trait;
    use bytes::Bytes;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct FakeApi {
        source: Source,
        responses: HashMap<String, Value>,
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    impl FakeApi {
        fn new(source: Source) -> Self {
            Self { source, responses: HashMap::new(), calls: AtomicUsize::new(0), delay: None }
        }

        fn respond(mut self, url: impl Into<String>, body: Value) -> Self {
            self.responses.insert(url.into(), body);
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RemoteFetch for FakeApi {
        async fn fetch(&self, url: &str) -> Result<Bytes, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match self.responses.get(url) {
                Some(body) => Ok(Bytes::from(body.to_string())),
                None => Err(Error::HttpError(format!("404 for {url}"))),
            }
        }
    }

    impl SourceApi for FakeApi {
        fn source(&self) -> Source {
            self.source
        }

        fn search_url(&self, kind: &str, query: &str, limit: u32) -> String {
            format!("https://{}.test/search?q={query}&type={kind}&limit={limit}&access_token=t", self.source)
        }

        fn entity_url(&self, entity_id: &str, edge: &str, limit: u32) -> Option<String> {
            Some(format!("https://{}.test/{entity_id}/{edge}?limit={limit}&access_token=t", self.source))
        }
    }

    fn fb(path: &str) -> String {
        format!("https://facebook.test/{path}")
    }

    async fn aggregator(dir: &TempDir, apis: &[Arc<FakeApi>], settings: SearchSettings) -> ResultAggregator {
        let settings_cache = CacheSettings { root: dir.path().join("cache"), denylist: vec!["access_token".into()] };
        let fallback: Arc<dyn RemoteFetch> = apis[0].clone();
        let cache = Arc::new(ResponseCache::open(&settings_cache, fallback).await.unwrap());
        let board = ProgressBoard::new(dir.path().join("progress"), "search-");

        apis.iter()
            .fold(ResultAggregator::new(cache, board, settings), |agg, api| agg.with_source(api.clone()))
    }

    fn request(scope: &[&str], session_id: &str) -> SearchRequest {
        SearchRequest {
            limit_a: 25,
            limit_b: 100,
            scope: scope.iter().map(|s| s.to_string()).collect(),
            queries: vec!["rust".into()],
            relevant_only: false,
            session_id: session_id.into(),
        }
    }

    fn facebook_posts() -> FakeApi {
        FakeApi::new(Source::Facebook)
            .respond(fb("search?q=rust&type=post&limit=25&access_token=t"), json!({"data": [{"id": "10", "lang": "en"}]}))
            .respond(fb("search?q=rust&type=place&limit=25&access_token=t"), json!({"data": [{"id": "11", "lang": "en"}]}))
    }

    fn twitter_recent() -> FakeApi {
        FakeApi::new(Source::Twitter).respond(
            "https://twitter.test/search?q=rust&type=recent&limit=100&access_token=t",
            json!({"statuses": [{"id": 12, "lang": "en", "user": {"name": "ada"}}]}),
        )
    }

    #[tokio::test]
    async fn test_tally_across_sources() {
        let dir = TempDir::new().unwrap();
        let agg = aggregator(&dir, &[Arc::new(facebook_posts()), Arc::new(twitter_recent())], Default::default()).await;

        let report = agg.search(&request(&["facebook_public_posts", "twitter_recent"], "s1")).await.unwrap();

        let en = &report.fields["lang"]["en"];
        assert_eq!(en.count, 3);
        assert_eq!(en.ids, vec!["10", "11", "12"]);
        assert_eq!(report.fields["user name"]["ada"].count, 1);
        assert_eq!(report.documents, 3);
        assert_eq!(report.requests, RequestStats { planned: 3, completed: 3, failed: 0 });
        assert!(!report.timed_out);

        let state = agg.progress.read("s1").await.unwrap().unwrap();
        assert_eq!((state.expected, state.completed), (3, 3));
    }

    #[tokio::test]
    async fn test_malformed_response_dropped_but_counted() {
        let dir = TempDir::new().unwrap();
        let api = FakeApi::new(Source::Twitter).respond(
            "https://twitter.test/search?q=rust&type=recent&limit=100&access_token=t",
            json!({"errors": [{"code": 88}]}),
        );
        let agg = aggregator(&dir, &[Arc::new(api)], Default::default()).await;

        let report = agg.search(&request(&["twitter_recent"], "s2")).await.unwrap();

        assert!(report.fields.is_empty());
        assert_eq!(report.requests, RequestStats { planned: 1, completed: 1, failed: 1 });
        let state = agg.progress.read("s2").await.unwrap().unwrap();
        assert!(state.is_complete());
    }

    #[tokio::test]
    async fn test_two_stage_grows_expected() {
        let dir = TempDir::new().unwrap();
        let api = FakeApi::new(Source::Facebook)
            .respond(
                fb("search?q=rust&type=page&limit=25&access_token=t"),
                json!({"data": [{"id": "p1", "name": "Rustaceans"}, {"id": "p2"}]}),
            )
            .respond(fb("search?q=rust&type=group&limit=25&access_token=t"), json!({"data": [{"id": "p1"}]}))
            .respond(fb("p1/feed?limit=25&access_token=t"), json!({"data": [{"id": "m1", "message": "hello"}]}))
            .respond(fb("p1/statuses?limit=25&access_token=t"), json!({"data": []}))
            .respond(fb("p2/feed?limit=25&access_token=t"), json!({"data": [{"id": "m2", "message": "hello"}]}));
        let agg = aggregator(&dir, &[Arc::new(api)], Default::default()).await;

        let report = agg.search(&request(&["facebook_posts_in_pages"], "s3")).await.unwrap();

        // two directories, then two edges for each of p1 and p2; p2/statuses 404s
        assert_eq!(report.requests, RequestStats { planned: 6, completed: 6, failed: 1 });
        assert_eq!(report.fields["message"]["hello"].ids, vec!["m1", "m2"]);
        assert!(!report.fields.contains_key("name"), "directory documents are not tallied");

        let state = agg.progress.read("s3").await.unwrap().unwrap();
        assert_eq!((state.expected, state.completed), (6, 6));
    }

    #[tokio::test]
    async fn test_relevant_only_filters_and_renames() {
        let dir = TempDir::new().unwrap();
        let relevance: RelevanceTable = [("user name".to_string(), "Author".to_string())].into_iter().collect();
        let settings = SearchSettings { relevance, ..Default::default() };
        let agg = aggregator(&dir, &[Arc::new(twitter_recent())], settings).await;

        let mut req = request(&["twitter_recent"], "s4");
        req.relevant_only = true;
        let report = agg.search(&req).await.unwrap();

        assert_eq!(report.fields.keys().collect::<Vec<_>>(), vec!["Author"]);
        assert_eq!(report.fields["Author"]["ada"].ids, vec!["12"]);
    }

    #[tokio::test]
    async fn test_repeat_search_served_from_cache() {
        let dir = TempDir::new().unwrap();
        let api = Arc::new(facebook_posts());
        let agg = aggregator(&dir, &[api.clone()], Default::default()).await;

        let first = agg.search(&request(&["facebook_public_posts"], "a")).await.unwrap();
        let second = agg.search(&request(&["facebook_public_posts"], "b")).await.unwrap();

        assert_eq!(api.calls(), 2);
        assert_eq!(first.fields, second.fields);
    }

    #[tokio::test]
    async fn test_deadline_returns_partial_report() {
        let dir = TempDir::new().unwrap();
        let mut api = facebook_posts();
        api.delay = Some(Duration::from_secs(5));
        let settings = SearchSettings { deadline: Some(Duration::from_millis(50)), ..Default::default() };
        let agg = aggregator(&dir, &[Arc::new(api)], settings).await;

        let report = agg.search(&request(&["facebook_public_posts"], "slow")).await.unwrap();

        assert!(report.timed_out);
        assert_eq!(report.requests.planned, 2);
        assert_eq!(report.requests.completed, 0);
        assert!(report.fields.is_empty());
    }

    #[tokio::test]
    async fn test_missing_connector_and_unknown_scope() {
        let dir = TempDir::new().unwrap();
        let agg = aggregator(&dir, &[Arc::new(facebook_posts())], Default::default()).await;

        let result = agg.search(&request(&["twitter_recent"], "t")).await;
        assert!(matches!(result, Err(Error::AuthMissing(_))));

        let report = agg.search(&request(&["myspace"], "u")).await.unwrap();
        assert_eq!(report.requests, RequestStats::default());
        assert_eq!(agg.progress.read("u").await.unwrap().unwrap().expected, 0);
    }

    #[tokio::test]
    async fn test_empty_queries_rejected() {
        let dir = TempDir::new().unwrap();
        let agg = aggregator(&dir, &[Arc::new(facebook_posts())], Default::default()).await;

        let mut req = request(&["facebook_public_posts"], "v");
        req.queries = vec!["  ".into()];
        assert!(matches!(agg.search(&req).await, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_documents_without_id_use_position() {
        let dir = TempDir::new().unwrap();
        let api = FakeApi::new(Source::Twitter).respond(
            "https://twitter.test/search?q=rust&type=recent&limit=100&access_token=t",
            json!({"statuses": [{"lang": "en"}, {"lang": "en"}]}),
        );
        let agg = aggregator(&dir, &[Arc::new(api)], Default::default()).await;

        let report = agg.search(&request(&["twitter_recent"], "w")).await.unwrap();
        assert_eq!(report.fields["lang"]["en"].ids, vec!["#0", "#1"]);
    }

    #[test]
    fn test_extract_results() {
        let docs = extract_results(br#"{"data": [{"id": 1}, {"id": 2}]}"#, "data").unwrap();
        assert_eq!(docs.len(), 2);

        assert!(matches!(extract_results(br#"{"statuses": []}"#, "data"), Err(Error::MalformedResponse(_))));
        assert!(matches!(extract_results(br#"{"data": {}}"#, "data"), Err(Error::MalformedResponse(_))));
        assert!(matches!(extract_results(b"<html>", "data"), Err(Error::MalformedResponse(_))));
    }
}
