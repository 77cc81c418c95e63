//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tempfile::TempDir;
use url::Url;

use permacache_core::fetch::{Headers, MediaListItem};
use permacache_core::writers::{CacheDbWriting, SyncPlan};
use permacache_core::{
    ArticleDbWriter, CacheController, CacheDb, DiskFileStore, Error, FetchRequest, FetchResponse, Fetcher,
    FileWriter, Gatekeeper, ImageDbWriter, ItemKeyAndVariant, KeyDeriver, PersistItemType, ResourceResolver,
};

pub const ARTICLE: &str = "https://en.wikipedia.org/wiki/Cat";
pub const MOBILE_HTML: &str = "https://en.wikipedia.org/api/rest_v1/page/mobile-html/Cat";
pub const CSS: &str = "https://meta.wikimedia.org/api/rest_v1/data/css/mobile/base";
pub const JS: &str = "https://meta.wikimedia.org/api/rest_v1/data/javascript/mobile/pcs";
pub const THUMB: &str = "https://upload.wikimedia.org/wikipedia/commons/thumb/a/a9/Cat.jpg/";

pub fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

pub fn thumb(size: u32) -> String {
    format!("{THUMB}{size}px-Cat.jpg")
}

/// Fetcher serving a fixed body per URL. Unlisted URLs are 404.
#[derive(Default)]
pub struct StaticFetcher {
    bodies: Mutex<HashMap<String, (Headers, Bytes)>>,
    failing: Mutex<HashMap<String, Error>>,
    calls: Mutex<HashMap<String, usize>>,
    delay: Option<Duration>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self { delay: Some(delay), ..Self::default() }
    }

    pub fn serve(&self, url: &str, body: &[u8]) {
        let headers = [("Content-Type".to_string(), "application/octet-stream".to_string())].into_iter().collect();
        self.serve_with_headers(url, body, headers);
    }

    pub fn serve_with_headers(&self, url: &str, body: &[u8], headers: Headers) {
        self.failing.lock().remove(url);
        self.bodies.lock().insert(url.to_string(), (headers, Bytes::copy_from_slice(body)));
    }

    pub fn fail(&self, url: &str, error: Error) {
        self.failing.lock().insert(url.to_string(), error);
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, Error> {
        *self.calls.lock().entry(request.url.to_string()).or_default() += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.failing.lock().get(request.url.as_str()).cloned() {
            return Err(error);
        }
        let served = self.bodies.lock().get(request.url.as_str()).cloned();
        match served {
            Some((headers, body)) => Ok(FetchResponse { url: request.url.clone(), status: 200, headers, body }),
            None => Err(Error::DoesNotExist(request.url.to_string())),
        }
    }
}

/// Resolver returning the same resources for every article.
pub struct StaticResolver {
    offline: Mutex<Vec<Url>>,
    media: Mutex<Vec<MediaListItem>>,
}

impl StaticResolver {
    pub fn new(offline: &[&str], media: Vec<(&str, Vec<String>)>) -> Self {
        let resolver = Self { offline: Mutex::new(Vec::new()), media: Mutex::new(Vec::new()) };
        resolver.set(offline, media);
        resolver
    }

    pub fn set(&self, offline: &[&str], media: Vec<(&str, Vec<String>)>) {
        *self.offline.lock() = offline.iter().map(|u| url(u)).collect();
        *self.media.lock() = media
            .into_iter()
            .map(|(title, sources)| MediaListItem {
                title: Some(title.to_string()),
                sources: sources.iter().map(|u| url(u)).collect(),
            })
            .collect();
    }
}

#[async_trait]
impl ResourceResolver for StaticResolver {
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
        Ok(self.offline.lock().clone())
    }

    async fn media_list(&self, _article_url: &Url) -> Result<Vec<MediaListItem>, Error> {
        Ok(self.media.lock().clone())
    }

    // No image-info requests, so tests only see the resources they list.
    fn image_info_url(&self, _title: &str, _article_url: &Url) -> Option<Url> {
        None
    }
}

/// Index writer wrapper logging the workflow steps it sees, in order.
pub struct RecordingWriter {
    inner: Arc<dyn CacheDbWriting>,
    pub events: Arc<Mutex<Vec<String>>>,
    remove_delay: Option<Duration>,
}

impl RecordingWriter {
    pub fn new(inner: Arc<dyn CacheDbWriting>) -> Self {
        Self { inner, events: Arc::new(Mutex::new(Vec::new())), remove_delay: None }
    }

    /// Pause between listing a group's items and releasing them.
    pub fn with_remove_delay(mut self, delay: Duration) -> Self {
        self.remove_delay = Some(delay);
        self
    }

    fn log(&self, event: String) {
        self.events.lock().push(event);
    }
}

#[async_trait]
impl CacheDbWriting for RecordingWriter {
    fn item_type(&self) -> PersistItemType {
        self.inner.item_type()
    }

    async fn add(&self, url: &Url, group_key: &str) -> Result<Vec<FetchRequest>, Error> {
        self.log(format!("add:{group_key}"));
        self.inner.add(url, group_key).await
    }

    async fn sync_resources(&self, url: &Url, group_key: &str) -> Result<SyncPlan, Error> {
        self.log(format!("sync:{group_key}"));
        self.inner.sync_resources(url, group_key).await
    }

    async fn mark_downloaded(&self, request: &FetchRequest, response: Option<&FetchResponse>) -> Result<(), Error> {
        let result = self.inner.mark_downloaded(request, response).await;
        self.log(format!("downloaded:{}", request.url));
        result
    }

    async fn remove_item(&self, group_key: &str, key: &ItemKeyAndVariant) -> Result<bool, Error> {
        let result = self.inner.remove_item(group_key, key).await;
        if let Ok(true) = result {
            self.log(format!("released:{key}"));
        }
        result
    }

    async fn remove_group(&self, group_key: &str) -> Result<(), Error> {
        let result = self.inner.remove_group(group_key).await;
        self.log(format!("removed:{group_key}"));
        result
    }

    async fn fetch_keys_to_remove(&self, group_key: &str) -> Result<Vec<ItemKeyAndVariant>, Error> {
        self.log(format!("remove:{group_key}"));
        let keys = self.inner.fetch_keys_to_remove(group_key).await;
        if let Some(delay) = self.remove_delay {
            tokio::time::sleep(delay).await;
        }
        keys
    }

    async fn should_download_variant(&self, request: &FetchRequest) -> Result<bool, Error> {
        self.inner.should_download_variant(request).await
    }

    fn cancel_tasks(&self, group_key: &str) {
        self.inner.cancel_tasks(group_key);
    }

    fn cancel_all_tasks(&self) {
        self.inner.cancel_all_tasks();
    }
}

/// A cache wired to temporary storage.
pub struct Fixture {
    pub db: CacheDb,
    pub store: Arc<DiskFileStore>,
    pub fetcher: Arc<StaticFetcher>,
    pub keys: KeyDeriver,
    pub dir: TempDir,
}

impl Fixture {
    pub async fn new(fetcher: StaticFetcher) -> Self {
        let dir = TempDir::new().unwrap();
        let db = CacheDb::open(dir.path().join("PersistentCache.sqlite")).await.unwrap();
        let store = Arc::new(DiskFileStore::new(dir.path().join("PersistentCache")).await.unwrap());
        Self { db, store, fetcher: Arc::new(fetcher), keys: KeyDeriver::default(), dir }
    }

    pub fn file_writer(&self) -> Arc<FileWriter> {
        Arc::new(FileWriter::new(self.fetcher.clone(), self.store.clone(), self.keys.clone()))
    }

    pub fn controller(&self, writer: Arc<dyn CacheDbWriting>) -> CacheController {
        CacheController::new(writer, self.file_writer(), self.keys.clone(), 4)
    }

    pub fn shared_controller(&self, writer: Arc<dyn CacheDbWriting>, gatekeeper: Arc<Gatekeeper>) -> CacheController {
        CacheController::with_gatekeeper(writer, self.file_writer(), self.keys.clone(), 4, gatekeeper)
    }

    pub fn image_writer(&self, scale: u8) -> Arc<dyn CacheDbWriting> {
        Arc::new(ImageDbWriter::new(self.db.clone(), self.keys.clone(), scale))
    }

    pub fn article_writer(&self, resolver: Arc<StaticResolver>, scale: u8) -> Arc<dyn CacheDbWriting> {
        Arc::new(ArticleDbWriter::new(self.db.clone(), self.keys.clone(), resolver, scale))
    }

    pub fn key(&self, resource: &str, item_type: PersistItemType) -> ItemKeyAndVariant {
        self.keys.item_key_and_variant(&url(resource), item_type).unwrap()
    }

    pub fn file_exists(&self, key: &ItemKeyAndVariant) -> bool {
        self.store.root().join(key.unique_file_name()).exists()
    }
}
