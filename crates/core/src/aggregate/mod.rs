//! Multi-source search aggregation.
//!
//! - [`plan`]: scope tokens, categories and the two-phase request plan
//! - [`flatten`]: nested documents to path-qualified scalar fields
//! - [`tally`]: field/value frequencies and the relevance table
//! - [`search`]: the session runner tying them to the cache and progress board

pub mod flatten;
pub mod plan;
pub mod search;
pub mod tally;

pub use flatten::flatten;
pub use plan::{Category, Limits, PlannedRequest, SearchPlan, Source, Stage};
pub use search::{RequestStats, ResultAggregator, SearchReport, SearchRequest, SearchSettings, extract_results};
pub use tally::{AggregatedMap, FieldValueFrequency, RelevanceTable};
