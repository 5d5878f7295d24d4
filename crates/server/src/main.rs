//! fieldtally server entry point.
//!
//! This is the main binary that boots the MCP server on stdio transport.
//! Logging goes to stderr to avoid interfering with the JSON-RPC protocol on stdout.

use std::sync::Arc;

use anyhow::{Context, Result};
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use tracing_subscriber::EnvFilter;

use fieldtally_client::{FetchClient, FetchConfig, configured_sources};
use fieldtally_core::{AppConfig, ProgressBoard, RemoteFetch, ResponseCache, ResultAggregator};

mod error;
mod handler;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load().context("failed to load configuration")?;

    tracing::info!(
        cache_dir = %config.cache_dir.display(),
        progress_dir = %config.progress_dir.display(),
        max_concurrency = config.max_concurrency,
        "Starting fieldtally server on stdio transport"
    );

    let client = Arc::new(FetchClient::new(FetchConfig::from(&config))?);
    let fetcher: Arc<dyn RemoteFetch> = client.clone();
    let cache = Arc::new(
        ResponseCache::open(&config.cache_settings(), fetcher)
            .await
            .context("failed to open response cache")?,
    );
    let progress = ProgressBoard::new(config.progress_dir.clone(), config.progress_prefix.clone());

    let aggregator = configured_sources(&config, client)?
        .into_iter()
        .fold(ResultAggregator::new(cache.clone(), progress.clone(), config.search_settings()), |agg, source| {
            agg.with_source(source)
        });

    let state = handler::AppState { ttl_minutes: config.cache_ttl_minutes, cache, progress, aggregator: Arc::new(aggregator) };

    let handler = handler::FieldTallyServer::new(state);
    let transport = stdio();
    let server = serve_server(handler, transport).await?;

    server.waiting().await?;

    Ok(())
}
