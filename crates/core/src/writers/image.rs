//! Index writer for standalone images and the image size policy.

use std::cmp::Ordering;

use async_trait::async_trait;
use url::Url;

use super::resources::{PlannedItem, pending_requests, record_items, should_download_image_variant};
use super::{CacheDbWriting, SyncPlan};
use crate::Error;
use crate::cache::CacheDb;
use crate::fetch::{FetchRequest, FetchResponse};
use crate::keys::{ItemKeyAndVariant, KeyDeriver, PersistItemType};

/// Size rank of a variant. Unsized and `0` variants are the original file,
/// which ranks above every thumbnail.
fn variant_size(variant: Option<&str>) -> u64 {
    match variant.and_then(|v| v.parse::<u64>().ok()) {
        Some(0) | None => u64::MAX,
        Some(size) => size,
    }
}

fn compare_variants(a: &Option<String>, b: &Option<String>) -> Ordering {
    variant_size(a.as_deref())
        .cmp(&variant_size(b.as_deref()))
        .then_with(|| a.cmp(b))
}

/// Whether `variant` is the one to download among every known variant of an
/// item, for a display of `scale`.
///
/// Variants are sorted by size, smallest first. Scale 1 takes the smallest,
/// scale 2 the second smallest, scale 3 the largest. An item with no variant
/// is always downloaded.
pub fn should_download_variant_for_all_variant_items(
    variant: Option<&str>, all_variant_items: &[ItemKeyAndVariant], scale: u8,
) -> bool {
    let Some(variant) = variant else {
        return true;
    };

    let mut variants: Vec<Option<String>> = all_variant_items.iter().map(|k| k.variant.clone()).collect();
    if !variants.iter().any(|v| v.as_deref() == Some(variant)) {
        variants.push(Some(variant.to_string()));
    }
    variants.sort_by(compare_variants);
    variants.dedup();

    let selected = match (scale, variants.len()) {
        (_, 1) | (0..=1, _) => variants.first(),
        (2, _) => variants.get(1),
        _ => variants.last(),
    };
    selected.is_some_and(|v| v.as_deref() == Some(variant))
}

/// Writer for groups made of image URLs.
pub struct ImageDbWriter {
    db: CacheDb,
    keys: KeyDeriver,
    scale: u8,
}

impl ImageDbWriter {
    pub fn new(db: CacheDb, keys: KeyDeriver, scale: u8) -> Self {
        Self { db, keys, scale }
    }

    /// Record a batch of image URLs under one group.
    ///
    /// Requests that cannot be keyed or recorded are dropped. The batch only
    /// fails when none of them could be recorded.
    pub async fn add_urls(&self, urls: &[Url], group_key: &str) -> Result<Vec<FetchRequest>, Error> {
        let items: Vec<PlannedItem> = urls
            .iter()
            .filter_map(|url| match PlannedItem::new(&self.keys, url.clone(), PersistItemType::Image, false) {
                Ok(item) => Some(item),
                Err(e) => {
                    tracing::warn!(%url, error = %e, "skipping image without item key");
                    None
                }
            })
            .collect();
        if items.is_empty() {
            return Err(Error::BatchInsertFailure);
        }

        let recorded = record_items(&self.db, group_key, &items).await?;
        if recorded.iter().all(Option::is_none) {
            return Err(Error::BatchInsertFailure);
        }
        Ok(pending_requests(&items, &recorded))
    }

    fn key(&self, request: &FetchRequest) -> Result<ItemKeyAndVariant, Error> {
        self.keys
            .request_key(request)
            .ok_or_else(|| Error::UnableToDetermineItemKey(request.url.to_string()))
    }
}

#[async_trait]
impl CacheDbWriting for ImageDbWriter {
    fn item_type(&self) -> PersistItemType {
        PersistItemType::Image
    }

    async fn add(&self, url: &Url, group_key: &str) -> Result<Vec<FetchRequest>, Error> {
        self.add_urls(std::slice::from_ref(url), group_key).await
    }

    async fn sync_resources(&self, url: &Url, group_key: &str) -> Result<SyncPlan, Error> {
        Ok(SyncPlan { requests: self.add(url, group_key).await?, evict: Vec::new() })
    }

    async fn mark_downloaded(&self, request: &FetchRequest, _response: Option<&FetchResponse>) -> Result<(), Error> {
        let key = self.key(request)?;
        self.db.mark_downloaded(&key, false).await
    }

    async fn remove_item(&self, group_key: &str, key: &ItemKeyAndVariant) -> Result<bool, Error> {
        self.db.remove_item(group_key, key).await
    }

    async fn remove_group(&self, group_key: &str) -> Result<(), Error> {
        self.db.remove_group(group_key).await
    }

    async fn fetch_keys_to_remove(&self, group_key: &str) -> Result<Vec<ItemKeyAndVariant>, Error> {
        self.db.keys_to_remove(group_key).await
    }

    async fn should_download_variant(&self, request: &FetchRequest) -> Result<bool, Error> {
        should_download_image_variant(&self.db, &self.keys, request, self.scale).await
    }

    // Image adds make no metadata requests, so there is nothing to cancel.
    fn cancel_tasks(&self, _group_key: &str) {}

    fn cancel_all_tasks(&self) {}
}
