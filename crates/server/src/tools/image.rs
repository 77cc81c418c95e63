//! cache_image tool implementation.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{CacheGroupOutput, json_result, parse_url};
use crate::state::CacheState;

/// Parameters for the cache_image tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheImageParams {
    /// Image URL, original or thumbnail.
    pub url: String,

    /// Group to cache under. Defaults to the image URL.
    #[serde(default)]
    pub group: Option<String>,
}

/// Implementation of the cache_image tool.
pub async fn image_impl(state: &CacheState, params: CacheImageParams) -> Result<CallToolResult, McpError> {
    let url = parse_url(&params.url)?;
    let group = params
        .group
        .filter(|g| !g.trim().is_empty())
        .unwrap_or_else(|| url.to_string());

    let items = state.images.add(url, &group).await?;
    tracing::info!(%group, items = items.len(), "cached image");

    json_result(&CacheGroupOutput { group, items })
}
