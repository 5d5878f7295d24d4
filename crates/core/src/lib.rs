//! Core types and shared functionality for fieldtally.
//!
//! This crate provides:
//! - Disk-backed response cache with a SQLite index
//! - Per-session progress records for out-of-process pollers
//! - Document flattening, field/value tallying and the multi-source aggregator
//! - Unified error types
//! - Configuration structures

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod error;
pub mod progress;
pub mod remote;

pub use aggregate::{
    AggregatedMap, Category, FieldValueFrequency, RelevanceTable, ResultAggregator, SearchReport, SearchRequest,
    SearchSettings, Source,
};
pub use cache::{CacheDb, CacheEntry, CacheSettings, ResponseCache};
pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use progress::{ProgressBoard, ProgressState, ProgressTracker};
pub use remote::{RemoteFetch, SourceApi};
