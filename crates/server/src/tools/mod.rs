//! MCP tool implementations.
//!
//! This module contains all tools exposed by the fieldtally server.

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use serde::Serialize;

use crate::error::ToolError;

pub mod cache;
pub mod progress;
pub mod search;

/// Successful tool result carrying `output` as pretty JSON text.
pub(crate) fn json_result<T: Serialize>(output: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(output).map_err(|e| ToolError::Serialize(e.to_string()))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use async_trait::async_trait;
    use bytes::Bytes;
    use rmcp::model::CallToolResult;
    use serde::de::DeserializeOwned;
    use tempfile::TempDir;

    use fieldtally_core::{CacheSettings, Error, RemoteFetch, ResponseCache};

    /// Serves `{"url": <url>}` for any URL, or an empty body for URLs
    /// containing "empty".
    pub struct EchoFetch;

    #[async_trait]
    impl RemoteFetch for EchoFetch {
        async fn fetch(&self, url: &str) -> Result<Bytes, Error> {
            if url.contains("empty") {
                return Ok(Bytes::new());
            }
            Ok(Bytes::from(serde_json::json!({ "url": url }).to_string()))
        }
    }

    pub async fn cache(dir: &TempDir) -> Arc<ResponseCache> {
        let settings = CacheSettings { root: dir.path().join("cache"), denylist: vec!["access_token".into()] };
        Arc::new(ResponseCache::open(&settings, Arc::new(EchoFetch)).await.unwrap())
    }

    pub fn output<T: DeserializeOwned>(result: &CallToolResult) -> T {
        let content_val = serde_json::to_value(&result.content[0]).unwrap();
        let text = content_val
            .get("text")
            .and_then(|v| v.as_str())
            .expect("Expected text field in content");
        serde_json::from_str(text).unwrap()
    }
}
