//! Client code for fieldtally.
//!
//! This crate provides the HTTP fetch pipeline used by the response cache and
//! the per-API source connectors handed to the aggregator.

pub mod fetch;
pub mod sources;

pub use fetch::{FetchClient, FetchConfig, FetchResponse};
pub use sources::{FacebookSource, SourceError, TwitterSource, configured_sources};
