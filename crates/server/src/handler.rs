//! MCP server handler implementation.
//!
//! This module defines the main server handler that
//! routes tool calls to the appropriate implementations.

use std::sync::Arc;

use fieldtally_core::{ProgressBoard, ResponseCache, ResultAggregator, SearchRequest};
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};

use crate::tools::cache::{CacheFetchParams, CacheImportParams, clear_impl, fetch_impl, import_impl};
use crate::tools::progress::{SearchProgressParams, progress_impl};
use crate::tools::search::search_impl;

/// Shared state built once at startup.
#[derive(Clone)]
pub struct AppState {
    /// Default TTL for `cache_fetch`.
    pub ttl_minutes: i64,
    pub cache: Arc<ResponseCache>,
    pub progress: ProgressBoard,
    pub aggregator: Arc<ResultAggregator>,
}

/// The main MCP server handler for fieldtally.
#[derive(Clone)]
pub struct FieldTallyServer {
    state: AppState,
    tool_router: ToolRouter<Self>,
}

/// Tool router implementation using the #[tool_router] macro.
///
/// This macro generates the routing logic that maps tool names to handler methods.
#[tool_router]
impl FieldTallyServer {
    /// Create a new server handler.
    pub fn new(state: AppState) -> Self {
        Self { state, tool_router: Self::tool_router() }
    }

    #[tool(
        description = "Search the configured sources for every query variant and tally field/value frequencies across the returned documents. Progress is published under session_id; requests.completed counts attempts, including failed ones."
    )]
    async fn search(&self, params: Parameters<SearchRequest>) -> Result<CallToolResult, McpError> {
        search_impl(&self.state.aggregator, params.0).await
    }

    #[tool(description = "Read a search session's progress record: total planned requests and completed attempts.")]
    async fn search_progress(&self, params: Parameters<SearchProgressParams>) -> Result<CallToolResult, McpError> {
        progress_impl(&self.state.progress, params.0).await
    }

    #[tool(description = "Fetch a URL through the response cache and return the raw body.")]
    async fn cache_fetch(&self, params: Parameters<CacheFetchParams>) -> Result<CallToolResult, McpError> {
        fetch_impl(&self.state.cache, self.state.ttl_minutes, params.0).await
    }

    #[tool(description = "Delete every cached response and reset the cache index.")]
    async fn cache_clear(&self) -> Result<CallToolResult, McpError> {
        clear_impl(&self.state.cache).await
    }

    #[tool(description = "Import a line-oriented cache index (<url><delimiter><local file> per line).")]
    async fn cache_import(&self, params: Parameters<CacheImportParams>) -> Result<CallToolResult, McpError> {
        import_impl(&self.state.cache, params.0).await
    }
}

impl ServerHandler for FieldTallyServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "fieldtally".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}
