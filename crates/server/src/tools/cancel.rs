//! cache_cancel tool implementation.
//!
//! Cancels in-flight resource lookups and downloads. Items already written
//! stay cached.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::json_result;
use crate::state::{CacheKind, CacheState};

/// Parameters for the cache_cancel tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CacheCancelParams {
    /// Group whose work to cancel. Cancels everything when omitted.
    #[serde(default)]
    pub group: Option<String>,

    /// Limit cancellation to one kind of workflow.
    #[serde(default)]
    pub kind: Option<CacheKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheCancelOutput {
    /// The cancelled group, or `None` when all work was cancelled.
    pub group: Option<String>,
}

/// Implementation of the cache_cancel tool.
pub async fn cancel_impl(state: &CacheState, params: CacheCancelParams) -> Result<CallToolResult, McpError> {
    let kinds = match params.kind {
        Some(kind) => vec![kind],
        None => vec![CacheKind::Article, CacheKind::Image],
    };

    for kind in kinds {
        let controller = state.controller(kind);
        match params.group.as_deref() {
            Some(group) => controller.cancel_tasks(group),
            None => controller.cancel_all_tasks(),
        }
    }
    tracing::info!(group = ?params.group, "cancelled cache tasks");

    json_result(&CacheCancelOutput { group: params.group })
}
