//! MCP tool implementations.
//!
//! Each tool has a `*_impl` function taking the shared [`CacheState`] so it
//! can be tested without a transport.

pub mod article;
pub mod cancel;
pub mod image;
pub mod lookup;
pub mod remove;
pub mod sync;

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ToolError;
use crate::state::CacheState;
use permacache_client::canonicalize;
use permacache_core::keys::article_database_key;

pub use article::{CacheArticleParams, article_impl};
pub use cancel::{CacheCancelParams, cancel_impl};
pub use image::{CacheImageParams, image_impl};
pub use lookup::{CacheLookupParams, lookup_impl};
pub use remove::{CacheRemoveParams, remove_impl};
pub use sync::{CacheSyncParams, sync_impl};

/// Result of an add, sync or remove workflow.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheGroupOutput {
    /// Group the workflow ran for.
    pub group: String,
    /// Unique file names of the items written or evicted.
    pub items: Vec<String>,
}

pub(crate) fn json_result<T: Serialize>(output: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(output).map_err(ToolError::from)?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

pub(crate) fn parse_url(input: &str) -> Result<Url, ToolError> {
    Ok(canonicalize(input)?)
}

/// Explicit group, or the article's database key.
pub(crate) fn article_group(url: &Url, group: Option<String>) -> Result<String, ToolError> {
    match group {
        Some(group) if !group.trim().is_empty() => Ok(group),
        _ => article_database_key(url).ok_or_else(|| ToolError::InvalidInput(format!("no host in {url}"))),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use serde::de::DeserializeOwned;
    use tempfile::TempDir;

    use super::*;
    use permacache_core::fetch::MediaListItem;
    use permacache_core::{
        AppConfig, CacheDb, DiskFileStore, Error, FetchRequest, FetchResponse, Fetcher, KeyDeriver, ResourceResolver,
    };

    pub const ARTICLE: &str = "https://en.wikipedia.org/wiki/Cat";
    pub const MOBILE_HTML: &str = "https://en.wikipedia.org/api/rest_v1/page/mobile-html/Cat";
    pub const THUMB: &str = "https://upload.wikimedia.org/wikipedia/commons/thumb/a/a9/Cat.jpg/220px-Cat.jpg";

    pub struct StubFetcher {
        bodies: HashMap<String, Bytes>,
        calls: Mutex<HashMap<String, usize>>,
        delay: Duration,
    }

    impl StubFetcher {
        pub fn calls(&self, url: &str) -> usize {
            self.calls.lock().get(url).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, Error> {
            *self.calls.lock().entry(request.url.to_string()).or_default() += 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match self.bodies.get(request.url.as_str()) {
                Some(body) => Ok(FetchResponse {
                    url: request.url.clone(),
                    status: 200,
                    headers: Default::default(),
                    body: body.clone(),
                }),
                None => Err(Error::DoesNotExist(request.url.to_string())),
            }
        }
    }

    /// Articles are their mobile HTML plus the listed images.
    struct StubResolver {
        images: Vec<Url>,
    }

    #[async_trait]
    impl ResourceResolver for StubResolver {
        fn mobile_html_url(&self, article_url: &Url) -> Result<Url, Error> {
            let title = article_url.path().trim_start_matches("/wiki/");
            Url::parse(&format!("https://en.wikipedia.org/api/rest_v1/page/mobile-html/{title}"))
                .map_err(|e| Error::InvalidInput(e.to_string()))
        }

        fn media_list_url(&self, article_url: &Url) -> Result<Url, Error> {
            let title = article_url.path().trim_start_matches("/wiki/");
            Url::parse(&format!("https://en.wikipedia.org/api/rest_v1/page/media-list/{title}"))
                .map_err(|e| Error::InvalidInput(e.to_string()))
        }

        async fn offline_resource_urls(&self, _article_url: &Url) -> Result<Vec<Url>, Error> {
            Ok(Vec::new())
        }

        async fn media_list(&self, _article_url: &Url) -> Result<Vec<MediaListItem>, Error> {
            Ok(self
                .images
                .iter()
                .map(|image| MediaListItem { title: Some("File:Cat.jpg".to_string()), sources: vec![image.clone()] })
                .collect())
        }

        fn image_info_url(&self, _title: &str, _article_url: &Url) -> Option<Url> {
            None
        }
    }

    pub async fn state() -> (CacheState, TempDir) {
        let (state, _fetcher, dir) = state_with(Vec::new(), Duration::ZERO).await;
        (state, dir)
    }

    /// A cache whose articles list `images`, fetching with a fixed delay.
    pub async fn state_with(images: Vec<&str>, delay: Duration) -> (CacheState, Arc<StubFetcher>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(DiskFileStore::new(dir.path()).await.unwrap());
        let db = CacheDb::open_in_memory().await.unwrap();
        let bodies = [(MOBILE_HTML, &b"<html>cat</html>"[..]), (THUMB, &b"jpeg"[..])]
            .into_iter()
            .map(|(url, body)| (url.to_string(), Bytes::from_static(body)))
            .collect();
        let fetcher = Arc::new(StubFetcher { bodies, calls: Mutex::new(HashMap::new()), delay });
        let resolver = Arc::new(StubResolver { images: images.into_iter().map(|u| Url::parse(u).unwrap()).collect() });

        let state =
            CacheState::new(db, store, KeyDeriver::default(), fetcher.clone(), resolver, &AppConfig::default());
        (state, fetcher, dir)
    }

    pub fn output<T: DeserializeOwned>(result: &CallToolResult) -> T {
        let content = serde_json::to_value(&result.content[0]).unwrap();
        let text = content
            .get("text")
            .and_then(|v| v.as_str())
            .expect("Expected text field in content");
        serde_json::from_str(text).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_article_group_defaults_to_database_key() {
        let url = parse_url("EN.wikipedia.org/wiki/Cat?action=view").unwrap();
        assert_eq!(article_group(&url, None).unwrap(), "https://en.wikipedia.org/wiki/Cat");
        assert_eq!(article_group(&url, Some("reading-list".into())).unwrap(), "reading-list");
        assert_eq!(article_group(&url, Some("  ".into())).unwrap(), "https://en.wikipedia.org/wiki/Cat");
    }

    #[test]
    fn test_parse_url_rejects_empty() {
        assert!(matches!(parse_url(""), Err(ToolError::InvalidInput(_))));
    }
}
