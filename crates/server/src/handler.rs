//! MCP server handler implementation.
//!
//! Routes tool calls to the cache tools over one shared [`CacheState`].
use std::sync::Arc;

use crate::state::CacheState;
use crate::tools::{
    CacheArticleParams, CacheCancelParams, CacheImageParams, CacheLookupParams, CacheRemoveParams, CacheSyncParams,
    article_impl, cancel_impl, image_impl, lookup_impl, remove_impl, sync_impl,
};

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

/// The MCP server handler for the permanent cache.
#[derive(Clone)]
pub struct PermacacheServer {
    state: Arc<CacheState>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl PermacacheServer {
    pub fn new(state: CacheState) -> Self {
        Self { state: Arc::new(state), tool_router: Self::tool_router() }
    }

    #[tool(
        description = "Cache an article for offline reading: its HTML, stylesheets, scripts and images. Returns the files written."
    )]
    async fn cache_article(&self, params: Parameters<CacheArticleParams>) -> Result<CallToolResult, McpError> {
        article_impl(&self.state, params.0).await
    }

    #[tool(description = "Cache a single image. Returns the files written.")]
    async fn cache_image(&self, params: Parameters<CacheImageParams>) -> Result<CallToolResult, McpError> {
        image_impl(&self.state, params.0).await
    }

    #[tool(description = "Re-sync a cached group: download new resources and evict ones no longer referenced.")]
    async fn cache_sync(&self, params: Parameters<CacheSyncParams>) -> Result<CallToolResult, McpError> {
        sync_impl(&self.state, params.0).await
    }

    #[tool(description = "Remove a cached group. Resources shared with other groups are kept.")]
    async fn cache_remove(&self, params: Parameters<CacheRemoveParams>) -> Result<CallToolResult, McpError> {
        remove_impl(&self.state, params.0).await
    }

    #[tool(description = "Cancel in-flight cache work for one group, or for all groups.")]
    async fn cache_cancel(&self, params: Parameters<CacheCancelParams>) -> Result<CallToolResult, McpError> {
        cancel_impl(&self.state, params.0).await
    }

    #[tool(description = "Show the cache key of a URL and which of its variants are stored.")]
    async fn cache_lookup(&self, params: Parameters<CacheLookupParams>) -> Result<CallToolResult, McpError> {
        lookup_impl(&self.state, params.0).await
    }
}

impl ServerHandler for PermacacheServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "permacache".into(),
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
