//! Index-side bookkeeping for the cache workflows.
//!
//! A writer decides which URLs belong to a group, records their rows, and
//! says which variants are worth downloading. Article and image writers
//! share the helpers in [`resources`] rather than a common base.

pub mod article;
pub mod image;
pub mod resources;

use async_trait::async_trait;
use url::Url;

use crate::Error;
use crate::fetch::{FetchRequest, FetchResponse};
use crate::keys::{ItemKeyAndVariant, PersistItemType};

pub use article::ArticleDbWriter;
pub use image::{ImageDbWriter, should_download_variant_for_all_variant_items};

/// Result of diffing a group's desired resources against its cached ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Requests whose items are not downloaded yet.
    pub requests: Vec<FetchRequest>,
    /// Items the group no longer references. Each is released from the
    /// group; its files go once no other group holds it.
    pub evict: Vec<ItemKeyAndVariant>,
}

/// Index writer for one resource type.
#[async_trait]
pub trait CacheDbWriting: Send + Sync {
    /// Resource type this writer records.
    fn item_type(&self) -> PersistItemType;

    /// Record the group's items and return the requests still needing content.
    async fn add(&self, url: &Url, group_key: &str) -> Result<Vec<FetchRequest>, Error>;

    /// Record the current resource set and work out what to fetch and evict.
    async fn sync_resources(&self, url: &Url, group_key: &str) -> Result<SyncPlan, Error>;

    /// Flag the request's item as downloaded once its files are written.
    async fn mark_downloaded(&self, request: &FetchRequest, response: Option<&FetchResponse>) -> Result<(), Error>;

    /// Unlink an item from the group, deleting the row if nothing else holds it.
    ///
    /// Returns whether the row was deleted, in which case the item's files
    /// must go too.
    async fn remove_item(&self, group_key: &str, key: &ItemKeyAndVariant) -> Result<bool, Error>;

    async fn remove_group(&self, group_key: &str) -> Result<(), Error>;

    /// Items to release from the group before it is deleted.
    async fn fetch_keys_to_remove(&self, group_key: &str) -> Result<Vec<ItemKeyAndVariant>, Error>;

    /// Whether this request's variant is the one to download.
    async fn should_download_variant(&self, request: &FetchRequest) -> Result<bool, Error>;

    fn cancel_tasks(&self, group_key: &str);

    fn cancel_all_tasks(&self);
}
