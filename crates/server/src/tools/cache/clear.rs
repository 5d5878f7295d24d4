//! cache_clear tool implementation.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use fieldtally_core::ResponseCache;

use crate::tools::json_result;

/// Output from the cache_clear tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheClearOutput {
    /// False when the cache refused to clear its root.
    pub cleared: bool,
    /// Index entries remaining afterwards.
    pub entries: u64,
}

pub async fn clear_impl(cache: &ResponseCache) -> Result<CallToolResult, McpError> {
    let cleared = cache.empty_cache().await?;
    let entries = cache.stats().await?.entries;
    json_result(&CacheClearOutput { cleared, entries })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{cache, output};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_clear_resets_index() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir).await;
        cache.fetch("https://api.test/a", 60).await.unwrap();
        cache.fetch("https://api.test/b", 60).await.unwrap();

        let out: CacheClearOutput = output(&clear_impl(&cache).await.unwrap());
        assert!(out.cleared);
        assert_eq!(out.entries, 0);
    }
}
