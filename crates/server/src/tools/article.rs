//! cache_article tool implementation.
//!
//! Caches an article's HTML plus the resources and images it needs offline.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{CacheGroupOutput, article_group, json_result, parse_url};
use crate::state::CacheState;

/// Parameters for the cache_article tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheArticleParams {
    /// Article URL, e.g. `https://en.wikipedia.org/wiki/Cat`.
    pub url: String,

    /// Group to cache under. Defaults to the article's canonical URL.
    #[serde(default)]
    pub group: Option<String>,
}

/// Implementation of the cache_article tool.
pub async fn article_impl(state: &CacheState, params: CacheArticleParams) -> Result<CallToolResult, McpError> {
    let url = parse_url(&params.url)?;
    let group = article_group(&url, params.group)?;

    let items = state.articles.add(url, &group).await?;
    tracing::info!(%group, items = items.len(), "cached article");

    json_result(&CacheGroupOutput { group, items })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testing::{ARTICLE, output, state};

    #[tokio::test]
    async fn test_article_impl_downloads_html() {
        let (state, _dir) = state().await;
        let params = CacheArticleParams { url: ARTICLE.to_string(), group: None };

        let result = article_impl(&state, params).await.unwrap();
        let output: CacheGroupOutput = output(&result);
        assert_eq!(output.group, ARTICLE);
        assert_eq!(output.items.len(), 1);
    }

    #[tokio::test]
    async fn test_article_impl_twice_is_a_no_op() {
        let (state, _dir) = state().await;
        let params = CacheArticleParams { url: ARTICLE.to_string(), group: None };

        article_impl(&state, params.clone()).await.unwrap();
        let result = article_impl(&state, params).await.unwrap();
        let output: CacheGroupOutput = output(&result);
        assert!(output.items.is_empty());
    }

    #[tokio::test]
    async fn test_article_impl_missing_article() {
        let (state, _dir) = state().await;
        let params = CacheArticleParams { url: "https://en.wikipedia.org/wiki/Dog".to_string(), group: None };

        let result = article_impl(&state, params).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_article_impl_invalid_url() {
        let (state, _dir) = state().await;
        let params = CacheArticleParams { url: "ftp://example.com/file".to_string(), group: None };

        let err = article_impl(&state, params).await.unwrap_err();
        assert_eq!(err.code.0, -32602);
    }
}
