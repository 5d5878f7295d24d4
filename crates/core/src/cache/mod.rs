//! Disk-backed response cache with a SQLite index.
//!
//! This module provides a persistent cache of raw remote responses. It
//! supports:
//!
//! - URL canonicalization with denylisted query parameters
//! - TTL expiry from creation timestamps recorded in the index
//! - Content-addressed payload files written via temp-file + rename
//! - Per-key single-flight so concurrent callers trigger one remote fetch
//! - Automatic schema migrations and WAL mode for concurrent processes

pub mod canonical;
pub mod connection;
pub mod flight;
pub mod hash;
pub mod index;
pub mod migrations;
pub mod store;

pub use crate::Error;

pub use canonical::canonical_key;
pub use connection::CacheDb;
pub use index::{CacheEntry, ImportSummary};
pub use store::{CacheSettings, CacheStats, ResponseCache};
