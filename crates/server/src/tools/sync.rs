//! cache_sync tool implementation.
//!
//! Brings a cached group up to date: new resources are downloaded and
//! resources the group no longer references are evicted.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{CacheGroupOutput, article_group, json_result, parse_url};
use crate::state::{CacheKind, CacheState};

/// Parameters for the cache_sync tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheSyncParams {
    /// URL the group was cached from.
    pub url: String,

    /// Group to sync. Defaults to the key `cache_article` or `cache_image` used.
    #[serde(default)]
    pub group: Option<String>,

    #[serde(default)]
    pub kind: CacheKind,
}

/// Implementation of the cache_sync tool.
pub async fn sync_impl(state: &CacheState, params: CacheSyncParams) -> Result<CallToolResult, McpError> {
    let url = parse_url(&params.url)?;
    let group = match params.kind {
        CacheKind::Article => article_group(&url, params.group)?,
        CacheKind::Image => params
            .group
            .filter(|g| !g.trim().is_empty())
            .unwrap_or_else(|| url.to_string()),
    };

    let items = state.controller(params.kind).sync(url, &group).await?;
    tracing::info!(%group, items = items.len(), "synced group");

    json_result(&CacheGroupOutput { group, items })
}
