//! search tool implementation.
//!
//! Runs one aggregator session and returns its report.

use rmcp::{ErrorData as McpError, model::CallToolResult};

use fieldtally_core::{ResultAggregator, SearchRequest};

use super::json_result;

pub async fn search_impl(aggregator: &ResultAggregator, params: SearchRequest) -> Result<CallToolResult, McpError> {
    let report = aggregator.search(&params).await?;
    json_result(&report)
}
