//! Wikipedia endpoints that make up an article.
//!
//! - Rendered HTML: `/api/rest_v1/page/mobile-html/{title}`
//! - Offline resources: `/api/rest_v1/page/mobile-html-offline-resources/{title}`
//! - Media list: `/api/rest_v1/page/media-list/{title}`
//! - Gallery metadata: Action API `prop=imageinfo` query per file title
//!
//! Resource lists reference other hosts with protocol-relative URLs; those
//! take the scheme of the list they came from.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::fetch::resolve_resource;
use permacache_core::fetch::MediaListItem;
use permacache_core::{Error, FetchRequest, Fetcher, ResourceResolver};

const REST_PREFIX: &str = "/api/rest_v1/page";
const ARTICLE_PREFIX: &str = "/wiki/";

#[derive(Debug, Deserialize)]
struct MediaList {
    #[serde(default)]
    items: Vec<MediaEntry>,
}

#[derive(Debug, Deserialize)]
struct MediaEntry {
    title: Option<String>,
    #[serde(default)]
    srcset: Vec<MediaSource>,
}

#[derive(Debug, Deserialize)]
struct MediaSource {
    src: String,
}

/// Path-safe title of an article URL (`/wiki/AC/DC` → `AC%2FDC`).
fn article_title(article_url: &Url) -> Result<String, Error> {
    let title = article_url
        .path()
        .strip_prefix(ARTICLE_PREFIX)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::InvalidInput(format!("not an article URL: {article_url}")))?;
    Ok(title.replace('/', "%2F"))
}

/// [`ResourceResolver`] for Wikipedia's REST and Action APIs.
pub struct WikiResolver {
    fetcher: Arc<dyn Fetcher>,
}

impl WikiResolver {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }

    fn rest_url(&self, article_url: &Url, endpoint: &str) -> Result<Url, Error> {
        let host = article_url
            .host_str()
            .ok_or_else(|| Error::InvalidInput(format!("article URL has no host: {article_url}")))?;
        let title = article_title(article_url)?;
        Url::parse(&format!("{}://{host}{REST_PREFIX}/{endpoint}/{title}", article_url.scheme()))
            .map_err(|e| Error::InvalidInput(e.to_string()))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T, Error> {
        let response = self.fetcher.fetch(&FetchRequest::new(url.clone())).await?;
        if !response.is_success() {
            return Err(Error::HttpStatus { status: response.status, url: url.to_string() });
        }
        Ok(serde_json::from_slice(&response.body)?)
    }
}

#[async_trait]
impl ResourceResolver for WikiResolver {
    fn mobile_html_url(&self, article_url: &Url) -> Result<Url, Error> {
        self.rest_url(article_url, "mobile-html")
    }

    fn media_list_url(&self, article_url: &Url) -> Result<Url, Error> {
        self.rest_url(article_url, "media-list")
    }

    async fn offline_resource_urls(&self, article_url: &Url) -> Result<Vec<Url>, Error> {
        let list_url = self.rest_url(article_url, "mobile-html-offline-resources")?;
        let references: Vec<String> = self.get_json(&list_url).await?;

        Ok(references
            .iter()
            .filter_map(|reference| match resolve_resource(&list_url, reference) {
                Ok(url) => Some(url),
                Err(e) => {
                    tracing::warn!(reference, error = %e, "skipping offline resource");
                    None
                }
            })
            .collect())
    }

    async fn media_list(&self, article_url: &Url) -> Result<Vec<MediaListItem>, Error> {
        let list_url = self.media_list_url(article_url)?;
        let list: MediaList = self.get_json(&list_url).await?;

        Ok(list
            .items
            .into_iter()
            .map(|entry| MediaListItem {
                title: entry.title,
                sources: entry
                    .srcset
                    .iter()
                    .filter_map(|source| resolve_resource(&list_url, &source.src).ok())
                    .collect(),
            })
            .filter(|item| !item.sources.is_empty())
            .collect())
    }

    fn image_info_url(&self, title: &str, article_url: &Url) -> Option<Url> {
        let host = article_url.host_str()?;
        let mut url = Url::parse(&format!("{}://{host}/w/api.php", article_url.scheme())).ok()?;
        url.query_pairs_mut()
            .append_pair("action", "query")
            .append_pair("format", "json")
            .append_pair("formatversion", "2")
            .append_pair("prop", "imageinfo")
            .append_pair("iiprop", "url|size|mime|extmetadata")
            .append_pair("titles", title);
        Some(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use permacache_core::FetchResponse;
    use std::collections::HashMap;

    /// Fetcher serving canned JSON bodies.
    struct JsonFetcher {
        bodies: HashMap<String, &'static str>,
    }

    #[async_trait]
    impl Fetcher for JsonFetcher {
        async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, Error> {
            match self.bodies.get(request.url.as_str()) {
                Some(body) => Ok(FetchResponse {
                    url: request.url.clone(),
                    status: 200,
                    headers: Default::default(),
                    body: Bytes::from_static(body.as_bytes()),
                }),
                None => Err(Error::DoesNotExist(request.url.to_string())),
            }
        }
    }

    fn resolver(bodies: &[(&str, &'static str)]) -> WikiResolver {
        let bodies = bodies.iter().map(|(u, b)| (u.to_string(), *b)).collect();
        WikiResolver::new(Arc::new(JsonFetcher { bodies }))
    }

    fn article() -> Url {
        Url::parse("https://en.wikipedia.org/wiki/Cat").unwrap()
    }

    #[test]
    fn test_rest_urls() {
        let r = resolver(&[]);
        assert_eq!(
            r.mobile_html_url(&article()).unwrap().as_str(),
            "https://en.wikipedia.org/api/rest_v1/page/mobile-html/Cat"
        );
        assert_eq!(
            r.media_list_url(&article()).unwrap().as_str(),
            "https://en.wikipedia.org/api/rest_v1/page/media-list/Cat"
        );
    }

    #[test]
    fn test_title_with_slash_is_escaped() {
        let r = resolver(&[]);
        let url = Url::parse("https://en.wikipedia.org/wiki/AC/DC").unwrap();
        assert_eq!(
            r.mobile_html_url(&url).unwrap().as_str(),
            "https://en.wikipedia.org/api/rest_v1/page/mobile-html/AC%2FDC"
        );
    }

    #[test]
    fn test_non_article_url_rejected() {
        let r = resolver(&[]);
        let url = Url::parse("https://en.wikipedia.org/w/index.php?title=Cat").unwrap();
        assert!(matches!(r.mobile_html_url(&url), Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_offline_resources_resolve_scheme() {
        let r = resolver(&[(
            "https://en.wikipedia.org/api/rest_v1/page/mobile-html-offline-resources/Cat",
            r#"["//meta.wikimedia.org/api/rest_v1/data/css/mobile/base", "//en.wikipedia.org/api/rest_v1/data/css/mobile/site"]"#,
        )]);

        let urls = r.offline_resource_urls(&article()).await.unwrap();
        let urls: Vec<&str> = urls.iter().map(Url::as_str).collect();
        assert_eq!(
            urls,
            vec![
                "https://meta.wikimedia.org/api/rest_v1/data/css/mobile/base",
                "https://en.wikipedia.org/api/rest_v1/data/css/mobile/site"
            ]
        );
    }

    #[tokio::test]
    async fn test_media_list_collects_every_source() {
        let r = resolver(&[(
            "https://en.wikipedia.org/api/rest_v1/page/media-list/Cat",
            r#"{"revision":"1","items":[
                {"title":"File:Cat.jpg","type":"image","srcset":[
                    {"src":"//upload.wikimedia.org/wikipedia/commons/thumb/a/a9/Cat.jpg/320px-Cat.jpg","scale":"1x"},
                    {"src":"//upload.wikimedia.org/wikipedia/commons/thumb/a/a9/Cat.jpg/640px-Cat.jpg","scale":"2x"}
                ]},
                {"title":"File:Purr.ogg","type":"audio"}
            ]}"#,
        )]);

        let items = r.media_list(&article()).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title.as_deref(), Some("File:Cat.jpg"));
        assert_eq!(items[0].sources.len(), 2);
        assert_eq!(items[0].sources[1].scheme(), "https");
    }

    #[tokio::test]
    async fn test_missing_media_list_is_does_not_exist() {
        let r = resolver(&[]);
        let result = r.media_list(&article()).await;
        assert!(matches!(result, Err(Error::DoesNotExist(_))));
    }

    #[test]
    fn test_image_info_url() {
        let r = resolver(&[]);
        let url = r.image_info_url("File:Cat.jpg", &article()).unwrap();
        assert_eq!(url.host_str(), Some("en.wikipedia.org"));
        assert_eq!(url.path(), "/w/api.php");
        let pairs: HashMap<String, String> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs.get("prop").map(String::as_str), Some("imageinfo"));
        assert_eq!(pairs.get("titles").map(String::as_str), Some("File:Cat.jpg"));
    }
}
