//! Helpers shared by the writers: resource lookup, classification and
//! recording.

use std::collections::{BTreeMap, HashMap, HashSet};

use url::Url;

use super::image::should_download_variant_for_all_variant_items;
use crate::Error;
use crate::cache::{CacheDb, CacheItem, NewItem};
use crate::fetch::{FetchRequest, MediaListItem, ResourceResolver};
use crate::keys::{ItemKeyAndVariant, KeyDeriver, PersistItemType};
use crate::tasks::TaskTracker;

/// A request paired with the item it fills.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedItem {
    pub request: FetchRequest,
    pub key: ItemKeyAndVariant,
    pub must_have: bool,
}

impl PlannedItem {
    pub fn new(keys: &KeyDeriver, url: Url, item_type: PersistItemType, must_have: bool) -> Result<Self, Error> {
        let request = FetchRequest::persisted(url, item_type);
        let key = keys
            .request_key(&request)
            .ok_or_else(|| Error::UnableToDetermineItemKey(request.url.to_string()))?;
        Ok(Self { request, key, must_have })
    }

    fn new_item(&self) -> NewItem {
        NewItem { key: self.key.clone(), url: Some(self.request.url.to_string()), must_have: self.must_have }
    }
}

/// What an article is made of, as reported by the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleResources {
    pub mobile_html: Url,
    pub offline: Vec<Url>,
    pub media: Vec<MediaListItem>,
}

/// Look up an article's offline resources and media list in parallel.
///
/// Both lookups run to completion. If both fail, the media list error is
/// reported.
pub async fn resolve_article_resources(
    resolver: &dyn ResourceResolver, tasks: &TaskTracker, group_key: &str, article_url: &Url,
) -> Result<ArticleResources, Error> {
    let mobile_html = resolver.mobile_html_url(article_url)?;

    let (offline, media) = tokio::join!(
        tasks.run(group_key, resolver.offline_resource_urls(article_url)),
        tasks.run(group_key, resolver.media_list(article_url))
    );

    match (offline, media) {
        (_, Err(e)) | (Err(e), Ok(_)) => Err(e),
        (Ok(offline), Ok(media)) => Ok(ArticleResources { mobile_html, offline, media }),
    }
}

/// Classify an article's resources into planned items.
///
/// The rendered HTML and its offline resources are must-have. Media list
/// images and their image-info metadata are nice-to-have. Image sizes are
/// narrowed to the variant the display scale calls for.
pub fn plan_article(
    keys: &KeyDeriver, resolver: &dyn ResourceResolver, article_url: &Url, resources: &ArticleResources, scale: u8,
) -> Vec<PlannedItem> {
    let mut planned = Vec::new();
    let mut push = |url: &Url, item_type: PersistItemType, must_have: bool| {
        match PlannedItem::new(keys, url.clone(), item_type, must_have) {
            Ok(item) => planned.push(item),
            Err(e) => tracing::warn!(%url, error = %e, "skipping resource without item key"),
        }
    };

    push(&resources.mobile_html, PersistItemType::Article, true);
    for url in &resources.offline {
        push(url, PersistItemType::Article, true);
    }
    for source in resources.media.iter().flat_map(|item| &item.sources) {
        push(source, PersistItemType::Image, false);
    }

    let mut titles = HashSet::new();
    for title in resources.media.iter().filter_map(|item| item.title.as_deref()) {
        if titles.insert(title)
            && let Some(url) = resolver.image_info_url(title, article_url)
        {
            push(&url, PersistItemType::ImageInfo, false);
        }
    }

    select_image_variants(dedupe(planned), scale)
}

/// Drop repeated keys, keeping the first request and the strongest tier.
pub fn dedupe(items: Vec<PlannedItem>) -> Vec<PlannedItem> {
    let mut index: HashMap<ItemKeyAndVariant, usize> = HashMap::new();
    let mut unique: Vec<PlannedItem> = Vec::with_capacity(items.len());

    for item in items {
        match index.get(&item.key) {
            Some(&at) => unique[at].must_have |= item.must_have,
            None => {
                index.insert(item.key.clone(), unique.len());
                unique.push(item);
            }
        }
    }
    unique
}

/// Keep one size per image: the one the policy picks among the sizes listed.
pub fn select_image_variants(items: Vec<PlannedItem>, scale: u8) -> Vec<PlannedItem> {
    let mut variants: BTreeMap<String, Vec<ItemKeyAndVariant>> = BTreeMap::new();
    for item in items.iter().filter(|i| i.request.item_type == Some(PersistItemType::Image)) {
        variants.entry(item.key.key.clone()).or_default().push(item.key.clone());
    }

    items
        .into_iter()
        .filter(|item| {
            if item.request.item_type != Some(PersistItemType::Image) {
                return true;
            }
            let all = variants.get(&item.key.key).map(Vec::as_slice).unwrap_or_default();
            should_download_variant_for_all_variant_items(item.key.variant.as_deref(), all, scale)
        })
        .collect()
}

/// Record planned items under a group. Returns one row per item, `None`
/// where a nice-to-have item could not be recorded.
pub async fn record_items(
    db: &CacheDb, group_key: &str, items: &[PlannedItem],
) -> Result<Vec<Option<CacheItem>>, Error> {
    db.record_group_items(group_key, items.iter().map(PlannedItem::new_item).collect())
        .await
}

/// Requests for recorded items that are not downloaded yet.
pub fn pending_requests(items: &[PlannedItem], recorded: &[Option<CacheItem>]) -> Vec<FetchRequest> {
    items
        .iter()
        .zip(recorded)
        .filter_map(|(item, row)| match row {
            Some(row) if !row.is_downloaded => Some(item.request.clone()),
            _ => None,
        })
        .collect()
}

/// Size policy check against every variant the index knows for the item.
pub async fn should_download_image_variant(
    db: &CacheDb, keys: &KeyDeriver, request: &FetchRequest, scale: u8,
) -> Result<bool, Error> {
    if request.item_type != Some(PersistItemType::Image) {
        return Ok(true);
    }
    let key = keys
        .request_key(request)
        .ok_or_else(|| Error::UnableToDetermineItemKey(request.url.to_string()))?;
    if key.variant.is_none() {
        return Ok(true);
    }

    let all = db.all_variant_items(&key.key).await?;
    Ok(should_download_variant_for_all_variant_items(key.variant.as_deref(), &all, scale))
}
