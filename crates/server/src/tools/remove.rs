//! cache_remove tool implementation.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{CacheGroupOutput, json_result};
use crate::error::ToolError;
use crate::state::{CacheKind, CacheState};

/// Parameters for the cache_remove tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheRemoveParams {
    /// Group to remove. Items shared with other groups stay cached.
    pub group: String,

    #[serde(default)]
    pub kind: CacheKind,
}

/// Implementation of the cache_remove tool.
pub async fn remove_impl(state: &CacheState, params: CacheRemoveParams) -> Result<CallToolResult, McpError> {
    if params.group.trim().is_empty() {
        return Err(ToolError::InvalidInput("group cannot be empty".into()).into());
    }

    let items = state.controller(params.kind).remove(&params.group).await?;
    tracing::info!(group = %params.group, items = items.len(), "removed group");

    json_result(&CacheGroupOutput { group: params.group, items })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::article::{CacheArticleParams, article_impl};
    use crate::tools::testing::{ARTICLE, output, state};

    #[tokio::test]
    async fn test_remove_impl() {
        let (state, _dir) = state().await;
        article_impl(&state, CacheArticleParams { url: ARTICLE.to_string(), group: None })
            .await
            .unwrap();

        let params = CacheRemoveParams { group: ARTICLE.to_string(), kind: CacheKind::Article };
        let result = remove_impl(&state, params).await.unwrap();
        let output: CacheGroupOutput = output(&result);
        assert_eq!(output.items.len(), 1);
        assert!(state.db.cache_group(ARTICLE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_impl_unknown_group() {
        let (state, _dir) = state().await;
        let params = CacheRemoveParams { group: "nonexistent".to_string(), kind: CacheKind::Image };

        let err = remove_impl(&state, params).await.unwrap_err();
        assert_eq!(err.code.0, -32001);
    }

    #[tokio::test]
    async fn test_remove_impl_empty_group() {
        let (state, _dir) = state().await;
        let params = CacheRemoveParams { group: " ".to_string(), kind: CacheKind::Article };

        assert!(remove_impl(&state, params).await.is_err());
    }
}
