//! Cache-related MCP tools.
//!
//! This module provides tools for interacting with the response cache.

pub mod clear;
pub mod fetch;
pub mod import;

pub use clear::clear_impl;
pub use fetch::{CacheFetchParams, fetch_impl};
pub use import::{CacheImportParams, import_impl};
