//! cache_lookup tool implementation.
//!
//! Reports how a URL is keyed and which of its variants are on disk.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{json_result, parse_url};
use crate::error::ToolError;
use crate::state::CacheState;
use permacache_core::PersistItemType;

/// Parameters for the cache_lookup tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheLookupParams {
    pub url: String,

    /// How the URL is keyed.
    pub item_type: PersistItemType,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CachedVariant {
    pub variant: Option<String>,
    pub url: Option<String>,
    pub unique_file_name: String,
    pub updated_at: String,
}

/// Output from the cache_lookup tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheLookupOutput {
    pub key: String,
    pub variant: Option<String>,
    pub unique_file_name: String,
    /// Whether an item row exists for this exact variant.
    pub recorded: bool,
    /// Whether this exact variant's files are written.
    pub downloaded: bool,
    /// Every downloaded variant of the item, most recent first.
    pub downloaded_variants: Vec<CachedVariant>,
}

/// Implementation of the cache_lookup tool.
pub async fn lookup_impl(state: &CacheState, params: CacheLookupParams) -> Result<CallToolResult, McpError> {
    let url = parse_url(&params.url)?;
    let key = state
        .keys
        .item_key_and_variant(&url, params.item_type)
        .ok_or_else(|| ToolError::InvalidInput(format!("cannot derive a cache key for {url}")))?;

    let item = state.db.cache_item(&key).await?;
    let downloaded_variants = state
        .db
        .downloaded_variant_items(&key.key)
        .await?
        .into_iter()
        .map(|item| CachedVariant {
            unique_file_name: item.key_and_variant().unique_file_name(),
            variant: item.variant,
            url: item.url,
            updated_at: item.updated_at,
        })
        .collect();

    let output = CacheLookupOutput {
        unique_file_name: key.unique_file_name(),
        recorded: item.is_some(),
        downloaded: item.is_some_and(|i| i.is_downloaded),
        key: key.key,
        variant: key.variant,
        downloaded_variants,
    };

    json_result(&output)
}
