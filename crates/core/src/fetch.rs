//! Collaborator seams for network access.
//!
//! The engine never talks HTTP itself. It is handed a [`Fetcher`] that turns
//! a [`FetchRequest`] into a [`FetchResponse`], and a [`ResourceResolver`]
//! that knows which URLs make up an article.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::Error;
use crate::keys::{PERSIST_ITEM_TYPE_HEADER, PersistItemType};

/// Header map as persisted next to cached content.
pub type Headers = BTreeMap<String, String>;

/// Case-insensitive header lookup.
pub fn header_value<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// A resolved request for one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: Url,
    pub item_type: Option<PersistItemType>,
    pub headers: Headers,
}

impl FetchRequest {
    /// Plain request that the permanent cache does not track.
    pub fn new(url: Url) -> Self {
        Self { url, item_type: None, headers: Headers::new() }
    }

    /// Request tagged with the item type used for key derivation.
    pub fn persisted(url: Url, item_type: PersistItemType) -> Self {
        Self::new(url).with_header(PERSIST_ITEM_TYPE_HEADER, item_type.as_header_value())
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.retain(|k, _| !k.eq_ignore_ascii_case(name));
        let value = value.into();
        if name.eq_ignore_ascii_case(PERSIST_ITEM_TYPE_HEADER) {
            self.item_type = PersistItemType::from_header_value(&value);
        }
        self.headers.insert(name.to_string(), value);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }
}

/// A response with its full body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// URL the response was served for.
    pub url: Url,
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

impl FetchResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }

    pub fn etag(&self) -> Option<&str> {
        self.header("etag")
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Generic resource-fetching capability.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform the request.
    ///
    /// Implementations return [`Error::NotModified`] for a 304 answer to a
    /// conditional request and [`Error::DoesNotExist`] for a 404.
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, Error>;
}

/// One entry of an article's media list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaListItem {
    /// File title such as `File:Cat.jpg`.
    pub title: Option<String>,
    /// Every rendition listed for the item, already resolved to absolute URLs.
    pub sources: Vec<Url>,
}

/// Maps an article URL to the endpoints and resource lists that make it up.
#[async_trait]
pub trait ResourceResolver: Send + Sync {
    /// URL of the rendered article HTML.
    fn mobile_html_url(&self, article_url: &Url) -> Result<Url, Error>;

    /// URL of the article's media list endpoint.
    fn media_list_url(&self, article_url: &Url) -> Result<Url, Error>;

    /// Stylesheets, scripts and other resources the rendered HTML needs offline.
    async fn offline_resource_urls(&self, article_url: &Url) -> Result<Vec<Url>, Error>;

    /// Images shown in the article.
    async fn media_list(&self, article_url: &Url) -> Result<Vec<MediaListItem>, Error>;

    /// Metadata URL for one gallery image.
    fn image_info_url(&self, title: &str, article_url: &Url) -> Option<Url>;
}
