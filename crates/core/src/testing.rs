//! Test doubles shared by unit tests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use url::Url;

use crate::Error;
use crate::fetch::{FetchRequest, FetchResponse, Fetcher, Headers, MediaListItem, ResourceResolver};

#[derive(Clone)]
enum Reply {
    Response { status: u16, headers: Headers, body: Bytes },
    Failure(Error),
}

/// Fetcher answering from a URL → reply table. Unknown URLs are 404.
#[derive(Default)]
pub(crate) struct MockFetcher {
    replies: Mutex<HashMap<String, Reply>>,
    calls: Mutex<HashMap<String, usize>>,
    requests: Mutex<Vec<FetchRequest>>,
    delay: Option<Duration>,
}

impl MockFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn ok(&self, url: &str, body: &'static [u8]) {
        self.ok_with_headers(url, body, &[("content-type", "application/octet-stream")]);
    }

    pub(crate) fn ok_with_headers(&self, url: &str, body: &'static [u8], headers: &[(&str, &str)]) {
        let headers = headers.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        self.replies
            .lock()
            .insert(url.to_string(), Reply::Response { status: 200, headers, body: Bytes::from_static(body) });
    }

    pub(crate) fn status(&self, url: &str, status: u16) {
        self.replies
            .lock()
            .insert(url.to_string(), Reply::Response { status, headers: Headers::new(), body: Bytes::new() });
    }

    pub(crate) fn fail(&self, url: &str, error: Error) {
        self.replies.lock().insert(url.to_string(), Reply::Failure(error));
    }

    pub(crate) fn calls(&self, url: &str) -> usize {
        self.calls.lock().get(url).copied().unwrap_or(0)
    }

    pub(crate) fn last_request(&self, url: &str) -> Option<FetchRequest> {
        self.requests.lock().iter().rev().find(|r| r.url.as_str() == url).cloned()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, Error> {
        *self.calls.lock().entry(request.url.to_string()).or_default() += 1;
        self.requests.lock().push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let reply = self.replies.lock().get(request.url.as_str()).cloned();
        match reply {
            Some(Reply::Response { status, headers, body }) => {
                Ok(FetchResponse { url: request.url.clone(), status, headers, body })
            }
            Some(Reply::Failure(e)) => Err(e),
            None => Err(Error::DoesNotExist(request.url.to_string())),
        }
    }
}

/// Resolver serving fixed resource lists for any article.
pub(crate) struct MockResolver {
    pub(crate) offline: Mutex<Result<Vec<Url>, Error>>,
    pub(crate) media: Mutex<Result<Vec<MediaListItem>, Error>>,
}

impl MockResolver {
    pub(crate) fn new(offline: Vec<&str>, media: Vec<(&str, Vec<&str>)>) -> Self {
        let resolver = Self { offline: Mutex::new(Ok(Vec::new())), media: Mutex::new(Ok(Vec::new())) };
        resolver.set_resources(offline, media);
        resolver
    }

    pub(crate) fn set_resources(&self, offline: Vec<&str>, media: Vec<(&str, Vec<&str>)>) {
        *self.offline.lock() = Ok(offline.into_iter().map(|u| Url::parse(u).unwrap()).collect());
        *self.media.lock() = Ok(media
            .into_iter()
            .map(|(title, sources)| MediaListItem {
                title: Some(title.to_string()),
                sources: sources.into_iter().map(|u| Url::parse(u).unwrap()).collect(),
            })
            .collect());
    }
}

#[async_trait]
impl ResourceResolver for MockResolver {
    fn mobile_html_url(&self, article_url: &Url) -> Result<Url, Error> {
        let title = article_url.path().trim_start_matches("/wiki/");
        Url::parse(&format!("https://{}/api/rest_v1/page/mobile-html/{title}", article_url.host_str().unwrap_or("")))
            .map_err(|e| Error::InvalidInput(e.to_string()))
    }

    fn media_list_url(&self, article_url: &Url) -> Result<Url, Error> {
        let title = article_url.path().trim_start_matches("/wiki/");
        Url::parse(&format!("https://{}/api/rest_v1/page/media-list/{title}", article_url.host_str().unwrap_or("")))
            .map_err(|e| Error::InvalidInput(e.to_string()))
    }

    async fn offline_resource_urls(&self, _article_url: &Url) -> Result<Vec<Url>, Error> {
        self.offline.lock().clone()
    }

    async fn media_list(&self, _article_url: &Url) -> Result<Vec<MediaListItem>, Error> {
        self.media.lock().clone()
    }

    fn image_info_url(&self, title: &str, article_url: &Url) -> Option<Url> {
        Url::parse(&format!(
            "https://{}/w/api.php?action=query&format=json&prop=imageinfo&titles={title}",
            article_url.host_str()?
        ))
        .ok()
    }
}
