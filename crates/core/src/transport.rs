//! Transport-level cache override.
//!
//! [`PersistentUrlCache`] wraps a [`Fetcher`]. Tagged requests pick up an
//! `If-None-Match` validator from the persisted headers, fresh responses
//! refresh the persisted files when their ETag changed, and failed or
//! not-modified requests are answered from the memory layer, the persisted
//! variant, or another downloaded variant of the same item.

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::Error;
use crate::cache::{CacheDb, CacheItem};
use crate::fetch::{FetchRequest, FetchResponse, Fetcher, header_value};
use crate::files::{FileStore, PersistedResponse, PersistedResponses, WriteMode};
use crate::keys::{ItemKeyAndVariant, KeyDeriver, PersistItemType};
use crate::memory::MemoryCache;

const IF_NONE_MATCH: &str = "If-None-Match";

fn response_cost(response: &FetchResponse) -> usize {
    response.body.len()
}

fn persisted_response(url: &Url, persisted: PersistedResponse) -> FetchResponse {
    FetchResponse { url: url.clone(), status: 200, headers: persisted.headers, body: persisted.body }
}

/// A [`Fetcher`] backed by the permanent cache.
pub struct PersistentUrlCache {
    fetcher: Arc<dyn Fetcher>,
    responses: PersistedResponses,
    db: CacheDb,
    keys: KeyDeriver,
    memory: MemoryCache<FetchResponse>,
}

impl PersistentUrlCache {
    pub fn new(
        fetcher: Arc<dyn Fetcher>, store: Arc<dyn FileStore>, db: CacheDb, keys: KeyDeriver, memory_max_cost: usize,
    ) -> Self {
        Self {
            fetcher,
            responses: PersistedResponses::new(store),
            db,
            keys,
            memory: MemoryCache::new(memory_max_cost, response_cost),
        }
    }

    fn memory_key(&self, request: &FetchRequest) -> String {
        self.keys
            .unique_file_name_for_request(request)
            .unwrap_or_else(|| request.url.to_string())
    }

    /// Copy of `request` carrying the stored ETag as `If-None-Match`.
    ///
    /// Only articles and image info are revalidated.
    pub async fn request_with_validators(&self, request: &FetchRequest) -> Result<FetchRequest, Error> {
        let revalidated = matches!(request.item_type, Some(PersistItemType::Article | PersistItemType::ImageInfo));
        if !revalidated || request.header(IF_NONE_MATCH).is_some() {
            return Ok(request.clone());
        }
        let Some(key) = self.keys.request_key(request) else {
            return Ok(request.clone());
        };

        let etag = match self.memory.get(&key.unique_file_name()) {
            Some(response) => response.etag().map(str::to_string),
            None => self
                .responses
                .read_headers(&key)
                .await?
                .and_then(|headers| header_value(&headers, "etag").map(str::to_string)),
        };

        Ok(match etag {
            Some(etag) => request.clone().with_header(IF_NONE_MATCH, etag),
            None => request.clone(),
        })
    }

    /// Best cached answer for `request`: memory, then the persisted variant,
    /// then another downloaded variant of the same item.
    pub async fn cached_response(&self, request: &FetchRequest) -> Result<Option<FetchResponse>, Error> {
        if let Some(response) = self.memory.get(&self.memory_key(request)) {
            return Ok(Some(response));
        }
        let Some(key) = self.keys.request_key(request) else {
            return Ok(None);
        };

        if let Some(persisted) = self.responses.read(&key).await? {
            let response = persisted_response(&request.url, persisted);
            self.memory.insert(key.unique_file_name(), response.clone());
            return Ok(Some(response));
        }

        self.fallback_response(request, &key).await
    }

    async fn fallback_response(
        &self, request: &FetchRequest, key: &ItemKeyAndVariant,
    ) -> Result<Option<FetchResponse>, Error> {
        let item_type = request.item_type.unwrap_or(PersistItemType::Article);

        for item in self.fallback_items(key, item_type).await? {
            let fallback = item.key_and_variant();
            if let Some(response) = self.memory.get(&fallback.unique_file_name()) {
                return Ok(Some(response));
            }

            // Migrated items have no origin URL.
            let url = item
                .url
                .as_deref()
                .and_then(|u| Url::parse(u).ok())
                .unwrap_or_else(|| request.url.clone());
            if let Some(persisted) = self.responses.read(&fallback).await? {
                tracing::debug!(requested = %key, served = %fallback, "serving fallback variant");
                return Ok(Some(persisted_response(&url, persisted)));
            }
        }
        Ok(None)
    }

    /// Downloaded variants other than `key`, in the order they are tried.
    ///
    /// Images go in plain numeric order of their size variant, so `"0"`
    /// comes first and unsized variants last. Articles and image info go
    /// most recently updated first.
    pub async fn fallback_items(
        &self, key: &ItemKeyAndVariant, item_type: PersistItemType,
    ) -> Result<Vec<CacheItem>, Error> {
        let mut items = self.db.downloaded_variant_items(&key.key).await?;
        items.retain(|item| item.variant != key.variant);
        if item_type == PersistItemType::Image {
            items.sort_by_key(|item| {
                item.variant
                    .as_deref()
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(u64::MAX)
            });
        }
        Ok(items)
    }

    /// Keep a fresh response in memory and overwrite persisted files whose
    /// ETag no longer matches.
    async fn store_response(&self, request: &FetchRequest, response: &FetchResponse) -> Result<(), Error> {
        self.memory.insert(self.memory_key(request), response.clone());

        let Some(key) = self.keys.request_key(request) else {
            return Ok(());
        };
        let Some(stored) = self.responses.read_headers(&key).await? else {
            return Ok(());
        };

        let etag = response.etag();
        if etag.is_some() && header_value(&stored, "etag") != etag {
            self.responses
                .write(&key, &response.headers, response.body.clone(), WriteMode::Replace)
                .await?;
            tracing::debug!(url = %request.url, item = %key, "refreshed persisted response");
        }
        Ok(())
    }

    async fn fall_back(&self, request: &FetchRequest, error: Error) -> Result<FetchResponse, Error> {
        match self.cached_response(request).await {
            Ok(Some(response)) => {
                tracing::debug!(url = %request.url, reason = %error, "answered from cache");
                Ok(response)
            }
            Ok(None) => Err(error),
            Err(e) => {
                tracing::warn!(url = %request.url, error = %e, "cache lookup failed");
                Err(error)
            }
        }
    }
}

#[async_trait]
impl Fetcher for PersistentUrlCache {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, Error> {
        let request = match self.request_with_validators(request).await {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(url = %request.url, error = %e, "could not read stored validators");
                request.clone()
            }
        };

        match self.fetcher.fetch(&request).await {
            Ok(response) if response.is_success() => {
                if let Err(e) = self.store_response(&request, &response).await {
                    tracing::warn!(url = %request.url, error = %e, "failed to refresh cached response");
                }
                Ok(response)
            }
            Ok(response) if response.status == 304 => self.fall_back(&request, Error::NotModified).await,
            Ok(response) => Ok(response),
            Err(e) => self.fall_back(&request, e).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NewItem;
    use crate::fetch::Headers;
    use crate::files::DiskFileStore;
    use crate::testing::MockFetcher;
    use bytes::Bytes;
    use tempfile::TempDir;

    const ARTICLE: &str = "https://en.wikipedia.org/api/rest_v1/page/mobile-html/Cat";
    const THUMB: &str = "https://upload.wikimedia.org/wikipedia/commons/thumb/a/a9/Cat.jpg/";

    struct Harness {
        db: CacheDb,
        responses: PersistedResponses,
        fetcher: Arc<MockFetcher>,
        cache: PersistentUrlCache,
        _dir: TempDir,
    }

    async fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let db = CacheDb::open_in_memory().await.unwrap();
        let store: Arc<dyn FileStore> = Arc::new(DiskFileStore::new(dir.path()).await.unwrap());
        let fetcher = Arc::new(MockFetcher::new());
        let cache = PersistentUrlCache::new(fetcher.clone(), store.clone(), db.clone(), KeyDeriver::default(), 1024);
        Harness { db, responses: PersistedResponses::new(store), fetcher, cache, _dir: dir }
    }

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn image(size: u32) -> FetchRequest {
        FetchRequest::persisted(Url::parse(&format!("{THUMB}{size}px-Cat.jpg")).unwrap(), PersistItemType::Image)
    }

    /// Persist `body` for `request` and mark its row downloaded.
    async fn persist(h: &Harness, request: &FetchRequest, body: &'static [u8], etag: &str) {
        let key = KeyDeriver::default().request_key(request).unwrap();
        h.responses
            .write(&key, &headers(&[("ETag", etag)]), Bytes::from_static(body), WriteMode::Create)
            .await
            .unwrap();
        h.db.record_group_items(
            "g",
            vec![NewItem { key: key.clone(), url: Some(request.url.to_string()), must_have: false }],
        )
        .await
        .unwrap();
        h.db.mark_downloaded(&key, false).await.unwrap();
    }

    #[tokio::test]
    async fn test_cached_response_round_trips_files() {
        let h = harness().await;
        let request = FetchRequest::persisted(Url::parse(ARTICLE).unwrap(), PersistItemType::Article);
        let key = KeyDeriver::default().request_key(&request).unwrap();
        let stored = headers(&[("Content-Type", "text/html"), ("ETag", "\"v1\"")]);
        h.responses
            .write(&key, &stored, Bytes::from_static(b"<html>cat</html>"), WriteMode::Create)
            .await
            .unwrap();

        let response = h.cache.cached_response(&request).await.unwrap().unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.headers, stored);
        assert_eq!(&response.body[..], b"<html>cat</html>");
    }

    #[tokio::test]
    async fn test_network_failure_serves_persisted_variant() {
        let h = harness().await;
        let request = image(220);
        persist(&h, &request, b"small", "a").await;
        h.fetcher.fail(request.url.as_str(), Error::Fetch("offline".into()));

        let response = h.cache.fetch(&request).await.unwrap();
        assert_eq!(&response.body[..], b"small");
    }

    #[tokio::test]
    async fn test_image_fallback_prefers_smallest_variant() {
        let h = harness().await;
        persist(&h, &image(640), b"large", "l").await;
        persist(&h, &image(220), b"small", "s").await;

        let wanted = image(440);
        h.fetcher.fail(wanted.url.as_str(), Error::Fetch("offline".into()));

        let response = h.cache.fetch(&wanted).await.unwrap();
        assert_eq!(&response.body[..], b"small");
        assert_eq!(response.url.as_str(), format!("{THUMB}220px-Cat.jpg"));
    }

    #[tokio::test]
    async fn test_image_fallback_orders_sizes_numerically() {
        let h = harness().await;
        persist(&h, &image(640), b"large", "l").await;
        persist(&h, &image(0), b"zero", "z").await;

        let wanted = image(440);
        let key = KeyDeriver::default().request_key(&wanted).unwrap();
        let variants: Vec<Option<String>> = h
            .cache
            .fallback_items(&key, PersistItemType::Image)
            .await
            .unwrap()
            .into_iter()
            .map(|item| item.variant)
            .collect();
        assert_eq!(variants, vec![Some("0".to_string()), Some("640".to_string())]);

        h.fetcher.fail(wanted.url.as_str(), Error::Fetch("offline".into()));
        let response = h.cache.fetch(&wanted).await.unwrap();
        assert_eq!(&response.body[..], b"zero");
    }

    #[tokio::test]
    async fn test_error_passes_through_without_cached_copy() {
        let h = harness().await;
        let request = image(220);
        h.fetcher.fail(request.url.as_str(), Error::Fetch("offline".into()));

        let result = h.cache.fetch(&request).await;
        assert!(matches!(result, Err(Error::Fetch(_))));
    }

    #[tokio::test]
    async fn test_article_request_carries_stored_etag() {
        let h = harness().await;
        let request = FetchRequest::persisted(Url::parse(ARTICLE).unwrap(), PersistItemType::Article);
        persist(&h, &request, b"<html/>", "\"v1\"").await;
        h.fetcher.fail(ARTICLE, Error::NotModified);

        let response = h.cache.fetch(&request).await.unwrap();
        assert_eq!(&response.body[..], b"<html/>");
        let sent = h.fetcher.last_request(ARTICLE).unwrap();
        assert_eq!(sent.header("if-none-match"), Some("\"v1\""));
    }

    #[tokio::test]
    async fn test_image_request_is_not_revalidated() {
        let h = harness().await;
        let request = image(220);
        persist(&h, &request, b"small", "a").await;

        let sent = h.cache.request_with_validators(&request).await.unwrap();
        assert_eq!(sent.header("if-none-match"), None);
    }

    #[tokio::test]
    async fn test_changed_etag_replaces_persisted_files() {
        let h = harness().await;
        let request = FetchRequest::persisted(Url::parse(ARTICLE).unwrap(), PersistItemType::Article);
        persist(&h, &request, b"old", "\"v1\"").await;
        h.fetcher.ok_with_headers(ARTICLE, b"new", &[("ETag", "\"v2\"")]);

        let response = h.cache.fetch(&request).await.unwrap();
        assert_eq!(&response.body[..], b"new");

        let key = KeyDeriver::default().request_key(&request).unwrap();
        let persisted = h.responses.read(&key).await.unwrap().unwrap();
        assert_eq!(&persisted.body[..], b"new");
        assert_eq!(persisted.etag(), Some("\"v2\""));
    }

    #[tokio::test]
    async fn test_fresh_response_is_not_persisted_when_uncached() {
        let h = harness().await;
        let request = FetchRequest::persisted(Url::parse(ARTICLE).unwrap(), PersistItemType::Article);
        h.fetcher.ok_with_headers(ARTICLE, b"new", &[("ETag", "\"v2\"")]);

        h.cache.fetch(&request).await.unwrap();
        let key = KeyDeriver::default().request_key(&request).unwrap();
        assert!(h.responses.read(&key).await.unwrap().is_none());
    }
}
