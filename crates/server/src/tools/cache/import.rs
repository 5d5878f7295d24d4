//! cache_import tool implementation.
//!
//! Imports a line-oriented `<url><delimiter><local reference>` index.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use fieldtally_core::cache::ImportSummary;
use fieldtally_core::{Error, ResponseCache};

use crate::tools::json_result;

/// Parameters for the cache_import tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheImportParams {
    /// Path of the index file to import.
    pub path: String,

    /// String separating the URL from the local reference on each line.
    pub delimiter: String,
}

pub async fn import_impl(cache: &ResponseCache, params: CacheImportParams) -> Result<CallToolResult, McpError> {
    if params.delimiter.is_empty() {
        return Err(Error::InvalidInput("delimiter cannot be empty".into()).into());
    }

    let summary: ImportSummary = cache.import_legacy_index(&params.path, &params.delimiter).await?;
    json_result(&summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{cache, output};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_import_skips_malformed_lines() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir).await;
        let index = dir.path().join("legacy-index");
        std::fs::write(&index, "https://a.test/x|cache1\n\nnot a line\nhttps://a.test/y|cache2\n").unwrap();

        let params = CacheImportParams { path: index.display().to_string(), delimiter: "|".into() };
        let summary: ImportSummary = output(&import_impl(&cache, params).await.unwrap());

        assert_eq!(summary.imported, 2);
        assert_eq!(summary.skipped, 2);
    }

    #[tokio::test]
    async fn test_import_rejects_empty_delimiter() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir).await;

        let params = CacheImportParams { path: "index".into(), delimiter: String::new() };
        assert!(import_impl(&cache, params).await.is_err());
    }
}
