//! Index writer for articles: rendered HTML plus everything it references.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use super::resources::{
    PlannedItem, pending_requests, plan_article, record_items, resolve_article_resources,
    should_download_image_variant,
};
use super::{CacheDbWriting, SyncPlan};
use crate::Error;
use crate::cache::CacheDb;
use crate::fetch::{FetchRequest, FetchResponse, ResourceResolver};
use crate::keys::{ItemKeyAndVariant, KeyDeriver, PersistItemType};
use crate::tasks::TaskTracker;

/// Writer for article groups.
pub struct ArticleDbWriter {
    db: CacheDb,
    keys: KeyDeriver,
    resolver: Arc<dyn ResourceResolver>,
    scale: u8,
    tasks: TaskTracker,
}

impl ArticleDbWriter {
    pub fn new(db: CacheDb, keys: KeyDeriver, resolver: Arc<dyn ResourceResolver>, scale: u8) -> Self {
        Self { db, keys, resolver, scale, tasks: TaskTracker::new() }
    }

    async fn plan(&self, url: &Url, group_key: &str) -> Result<Vec<PlannedItem>, Error> {
        let resources = resolve_article_resources(self.resolver.as_ref(), &self.tasks, group_key, url).await?;
        Ok(plan_article(&self.keys, self.resolver.as_ref(), url, &resources, self.scale))
    }

    fn key(&self, request: &FetchRequest) -> Result<ItemKeyAndVariant, Error> {
        self.keys
            .request_key(request)
            .ok_or_else(|| Error::UnableToDetermineItemKey(request.url.to_string()))
    }
}

#[async_trait]
impl CacheDbWriting for ArticleDbWriter {
    fn item_type(&self) -> PersistItemType {
        PersistItemType::Article
    }

    async fn add(&self, url: &Url, group_key: &str) -> Result<Vec<FetchRequest>, Error> {
        let planned = self.plan(url, group_key).await?;
        let recorded = record_items(&self.db, group_key, &planned).await?;
        let requests = pending_requests(&planned, &recorded);

        tracing::info!(group_key, planned = planned.len(), pending = requests.len(), "recorded article resources");
        Ok(requests)
    }

    /// Diff the article's current resources against what the group has
    /// cached.
    ///
    /// New items are recorded and returned as requests. Items the article
    /// no longer references are returned for eviction; the controller
    /// releases each one and deletes its files only if no other group holds
    /// it.
    async fn sync_resources(&self, url: &Url, group_key: &str) -> Result<SyncPlan, Error> {
        if self.db.cache_group(group_key).await?.is_none() {
            return Err(Error::CannotFindCacheGroup(group_key.to_string()));
        }

        let planned = self.plan(url, group_key).await?;
        let members = self.db.group_members(group_key).await?;
        let downloaded: HashSet<ItemKeyAndVariant> = members
            .iter()
            .filter(|m| m.item.is_downloaded)
            .map(|m| m.item.key_and_variant())
            .collect();

        let mut keep: HashSet<ItemKeyAndVariant> = planned.iter().map(|p| p.key.clone()).collect();
        let media_list_url = self.resolver.media_list_url(url)?;
        if let Some(key) = self.keys.item_key_and_variant(&media_list_url, PersistItemType::Article) {
            keep.insert(key);
        }

        let evict: Vec<ItemKeyAndVariant> = members
            .into_iter()
            .map(|m| m.item.key_and_variant())
            .filter(|key| !keep.contains(key))
            .collect();

        let new_items: Vec<PlannedItem> = planned.into_iter().filter(|p| !downloaded.contains(&p.key)).collect();
        let recorded = record_items(&self.db, group_key, &new_items).await?;
        let requests = pending_requests(&new_items, &recorded);

        tracing::info!(group_key, added = requests.len(), evicted = evict.len(), "synced article resources");
        Ok(SyncPlan { requests, evict })
    }

    async fn mark_downloaded(&self, request: &FetchRequest, _response: Option<&FetchResponse>) -> Result<(), Error> {
        let key = self.key(request)?;
        self.db.mark_downloaded(&key, true).await
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

    fn cancel_tasks(&self, group_key: &str) {
        self.tasks.cancel(group_key);
    }

    fn cancel_all_tasks(&self) {
        self.tasks.cancel_all();
    }
}
