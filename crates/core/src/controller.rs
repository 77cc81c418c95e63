//! Public entry point of the permanent cache.
//!
//! A [`CacheController`] runs the add, sync and remove workflows for one
//! resource type. Every workflow is admitted by the [`Gatekeeper`]: adds and
//! removes of the same group never overlap, concurrent calls of the same
//! workflow on a group share one run, and each unique key is downloaded by
//! one task at a time. Controllers built over one store share a gatekeeper.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::{Semaphore, oneshot};
use tokio::task::JoinSet;
use url::Url;

use crate::Error;
use crate::fetch::FetchRequest;
use crate::files::FileWriter;
use crate::gatekeeper::{
    Admission, FinalGroupResult, FinalItemResult, Gatekeeper, GroupWaiter, ItemCompletion, ItemObserver,
};
use crate::keys::{ItemKeyAndVariant, KeyDeriver, PersistItemType, UniqueKey};
use crate::writers::CacheDbWriting;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AddKind {
    Add,
    Sync,
}

impl AddKind {
    fn workflow(self, item_type: PersistItemType) -> String {
        format!("{}:{self:?}", item_type.as_header_value())
    }
}

struct ControllerInner {
    gatekeeper: Arc<Gatekeeper>,
    db_writer: Arc<dyn CacheDbWriting>,
    file_writer: Arc<FileWriter>,
    keys: KeyDeriver,
    downloads: Arc<Semaphore>,
}

/// Orchestrates one writer and the file writer behind the gatekeeper.
#[derive(Clone)]
pub struct CacheController {
    inner: Arc<ControllerInner>,
}

impl CacheController {
    pub fn new(
        db_writer: Arc<dyn CacheDbWriting>, file_writer: Arc<FileWriter>, keys: KeyDeriver,
        max_concurrent_downloads: usize,
    ) -> Self {
        Self::with_gatekeeper(db_writer, file_writer, keys, max_concurrent_downloads, Arc::new(Gatekeeper::new()))
    }

    /// A controller admitted by a gatekeeper shared with other controllers
    /// over the same index and store.
    pub fn with_gatekeeper(
        db_writer: Arc<dyn CacheDbWriting>, file_writer: Arc<FileWriter>, keys: KeyDeriver,
        max_concurrent_downloads: usize, gatekeeper: Arc<Gatekeeper>,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                gatekeeper,
                db_writer,
                file_writer,
                keys,
                downloads: Arc::new(Semaphore::new(max_concurrent_downloads.max(1))),
            }),
        }
    }

    /// Cache everything `url` is made of under `group_key`.
    pub async fn add(&self, url: Url, group_key: &str) -> FinalGroupResult {
        self.add_observed(url, group_key, None).await
    }

    /// [`CacheController::add`], reporting each item outcome to `observer`.
    pub async fn add_observed(&self, url: Url, group_key: &str, observer: Option<ItemObserver>) -> FinalGroupResult {
        let (waiter, done) = waiter(group_key, observer);
        self.inner.enter_add(url, group_key.to_string(), AddKind::Add, waiter);
        done.await
    }

    /// Bring a cached group in line with the resources `url` lists now.
    ///
    /// A sync never shares a run with an add of the group; it waits for
    /// the add to finish and then runs on its own.
    pub async fn sync(&self, url: Url, group_key: &str) -> FinalGroupResult {
        self.sync_observed(url, group_key, None).await
    }

    pub async fn sync_observed(&self, url: Url, group_key: &str, observer: Option<ItemObserver>) -> FinalGroupResult {
        let (waiter, done) = waiter(group_key, observer);
        self.inner.enter_add(url, group_key.to_string(), AddKind::Sync, waiter);
        done.await
    }

    /// Evict a group. Items other groups still hold are only unlinked.
    pub async fn remove(&self, group_key: &str) -> FinalGroupResult {
        self.remove_observed(group_key, None).await
    }

    pub async fn remove_observed(&self, group_key: &str, observer: Option<ItemObserver>) -> FinalGroupResult {
        let (waiter, done) = waiter(group_key, observer);
        self.inner.enter_remove(group_key.to_string(), waiter);
        done.await
    }

    /// Cancel the group's resource lookups and downloads.
    pub fn cancel_tasks(&self, group_key: &str) {
        self.inner.cancel_tasks(group_key);
    }

    pub fn cancel_all_tasks(&self) {
        self.inner.db_writer.cancel_all_tasks();
        self.inner.file_writer.cancel_all_tasks();
    }

    pub fn file_writer(&self) -> &FileWriter {
        &self.inner.file_writer
    }
}

/// Waiter whose group outcome resolves the returned future.
fn waiter(
    group_key: &str, observer: Option<ItemObserver>,
) -> (GroupWaiter, impl Future<Output = FinalGroupResult> + use<>) {
    let (tx, rx) = oneshot::channel();
    let completion = Box::new(move |result: FinalGroupResult| {
        let _ = tx.send(result);
    });
    let group_key = group_key.to_string();
    let done = async move { rx.await.unwrap_or_else(|_| Err(Error::Cancelled(group_key))) };
    (GroupWaiter::observed(completion, observer), done)
}

fn aggregate(outcomes: Vec<(UniqueKey, FinalItemResult)>, failure: Error) -> FinalGroupResult {
    let total = outcomes.len();
    let mut keys: Vec<UniqueKey> = outcomes.into_iter().filter_map(|(_, result)| result.ok()).collect();
    if keys.len() < total {
        return Err(failure);
    }
    keys.sort();
    Ok(keys)
}

impl ControllerInner {
    fn cancel_tasks(&self, group_key: &str) {
        self.db_writer.cancel_tasks(group_key);
        self.file_writer.cancel_tasks(group_key);
    }

    fn enter_add(self: &Arc<Self>, url: Url, group_key: String, kind: AddKind, waiter: GroupWaiter) {
        let workflow = kind.workflow(self.db_writer.item_type());
        let admission = self.gatekeeper.admit_add(&group_key, &workflow, waiter, |waiter| {
            let inner = self.clone();
            let url = url.clone();
            let group_key = group_key.clone();
            Box::new(move || inner.enter_add(url, group_key, kind, waiter))
        });

        match admission {
            Admission::Leader => {
                tokio::spawn(self.clone().run_add(url, group_key, kind));
            }
            Admission::Joined => tracing::debug!(group_key, workflow, "joined in-flight add"),
            Admission::Deferred => tracing::debug!(group_key, workflow, "add queued behind running workflow"),
        }
    }

    fn enter_remove(self: &Arc<Self>, group_key: String, waiter: GroupWaiter) {
        let admission = self.gatekeeper.admit_remove(&group_key, waiter, |waiter| {
            let inner = self.clone();
            let group_key = group_key.clone();
            Box::new(move || inner.enter_remove(group_key, waiter))
        });

        match admission {
            Admission::Leader => {
                tokio::spawn(self.clone().run_remove(group_key));
            }
            Admission::Joined => tracing::debug!(group_key, "joined in-flight remove"),
            Admission::Deferred => tracing::debug!(group_key, "remove queued behind add"),
        }
    }

    async fn run_add(self: Arc<Self>, url: Url, group_key: String, kind: AddKind) {
        let result = match kind {
            AddKind::Add => self.add_group(&url, &group_key).await,
            AddKind::Sync => self.sync_group(&url, &group_key).await,
        };

        match &result {
            Ok(keys) => tracing::info!(group_key, ?kind, items = keys.len(), "group cached"),
            Err(e) => tracing::error!(group_key, ?kind, error = %e, "group add failed"),
        }
        self.gatekeeper.finish_add(&group_key, result);
    }

    async fn run_remove(self: Arc<Self>, group_key: String) {
        let result = self.remove_group(&group_key).await;

        match &result {
            Ok(keys) => tracing::info!(group_key, items = keys.len(), "group removed"),
            Err(e) => tracing::error!(group_key, error = %e, "group remove failed"),
        }
        self.gatekeeper.finish_remove(&group_key, result);
    }

    async fn add_group(self: &Arc<Self>, url: &Url, group_key: &str) -> FinalGroupResult {
        let requests = self.db_writer.add(url, group_key).await?;
        let outcomes = self.download_all(group_key, requests).await;
        aggregate(outcomes, Error::AtLeastOneItemFailedInFileWriter)
    }

    async fn sync_group(self: &Arc<Self>, url: &Url, group_key: &str) -> FinalGroupResult {
        let plan = self.db_writer.sync_resources(url, group_key).await?;

        let mut evicted_ok = true;
        for key in &plan.evict {
            let unique_key = key.unique_file_name();
            match self.evict(group_key, key).await {
                Ok(false) => {}
                Ok(true) => self.gatekeeper.notify_item(group_key, &unique_key, &Ok(unique_key.clone())),
                Err(e) => {
                    tracing::warn!(group_key, item = %key, error = %e, "failed to evict stale item");
                    self.gatekeeper.notify_item(group_key, &unique_key, &Err(e));
                    evicted_ok = false;
                }
            }
        }

        let outcomes = self.download_all(group_key, plan.requests).await;
        let downloaded = aggregate(outcomes, Error::AtLeastOneItemFailedInSync)?;
        if evicted_ok { Ok(downloaded) } else { Err(Error::AtLeastOneItemFailedInSync) }
    }

    /// Release every item from the group, then delete the group itself.
    ///
    /// Returns the items whose files were deleted. If an item cannot be
    /// released the group row is kept so the remove can be retried.
    async fn remove_group(&self, group_key: &str) -> FinalGroupResult {
        self.cancel_tasks(group_key);
        let keys = self.db_writer.fetch_keys_to_remove(group_key).await?;

        let mut outcomes = Vec::with_capacity(keys.len());
        for key in &keys {
            let unique_key = key.unique_file_name();
            let result = match self.evict(group_key, key).await {
                Ok(false) => continue,
                Ok(true) => Ok(unique_key.clone()),
                Err(e) => {
                    tracing::warn!(group_key, item = %key, error = %e, "failed to remove item");
                    Err(e)
                }
            };
            self.gatekeeper.notify_item(group_key, &unique_key, &result);
            outcomes.push((unique_key, result));
        }

        let removed = aggregate(outcomes, Error::AtLeastOneItemFailedInFileWriter)?;
        self.db_writer.remove_group(group_key).await?;
        Ok(removed)
    }

    /// Release one item from the group. Returns whether it was deleted.
    ///
    /// The index decides, in one transaction, whether another group still
    /// holds the item; files are deleted only after the row is gone. The
    /// item lock keeps a download for a re-created row from running until
    /// the files are gone.
    async fn evict(&self, group_key: &str, key: &ItemKeyAndVariant) -> Result<bool, Error> {
        let _lock = self.gatekeeper.lock_item(&key.unique_file_name()).await;
        if !self.db_writer.remove_item(group_key, key).await? {
            return Ok(false);
        }
        if let Err(e) = self.file_writer.remove(key).await {
            tracing::warn!(group_key, item = %key, error = %e, "item row deleted but files remain");
            return Err(e);
        }
        Ok(true)
    }

    /// Download every request, at most one task per unique key across all
    /// groups. Returns each item's outcome once all have resolved.
    async fn download_all(
        self: &Arc<Self>, group_key: &str, requests: Vec<FetchRequest>,
    ) -> Vec<(UniqueKey, FinalItemResult)> {
        let mut join_set = JoinSet::new();
        let mut pending = FuturesUnordered::new();
        let mut outcomes = Vec::with_capacity(requests.len());

        for request in requests {
            let Some(unique_key) = self.keys.unique_file_name_for_request(&request) else {
                tracing::warn!(group_key, url = %request.url, "request has no item key");
                let key = request.url.to_string();
                let result = Err(Error::UnableToDetermineItemKey(key.clone()));
                self.gatekeeper.notify_item(group_key, &key, &result);
                outcomes.push((key, result));
                continue;
            };

            let (tx, rx) = oneshot::channel();
            let completion: ItemCompletion = Box::new(move |result: FinalItemResult| {
                let _ = tx.send(result);
            });

            if self.gatekeeper.queue_individual_completion(&unique_key, completion) {
                join_set.spawn(self.clone().download(group_key.to_string(), request, unique_key.clone()));
            } else {
                tracing::debug!(group_key, unique_key, "joined in-flight download");
            }

            let cancelled = Error::Cancelled(group_key.to_string());
            pending.push(async move {
                let result = rx.await.unwrap_or(Err(cancelled));
                (unique_key, result)
            });
        }

        while let Some((unique_key, result)) = pending.next().await {
            self.gatekeeper.notify_item(group_key, &unique_key, &result);
            outcomes.push((unique_key, result));
        }
        while join_set.join_next().await.is_some() {}
        outcomes
    }

    /// Fetch, persist and mark one item, then release everyone waiting on it.
    async fn download(self: Arc<Self>, group_key: String, request: FetchRequest, unique_key: UniqueKey) {
        let result = match self.downloads.clone().acquire_owned().await {
            Ok(_permit) => self
                .download_item(&group_key, &request, &unique_key)
                .await
                .map(|()| unique_key.clone()),
            Err(_) => Err(Error::Cancelled(group_key.clone())),
        };

        match &result {
            Ok(_) => tracing::debug!(group_key, url = %request.url, unique_key, "item cached"),
            Err(e) => tracing::warn!(group_key, url = %request.url, unique_key, error = %e, "item failed"),
        }
        self.gatekeeper.run_and_remove_individual_completions(&unique_key, result);
    }

    async fn download_item(&self, group_key: &str, request: &FetchRequest, unique_key: &str) -> Result<(), Error> {
        let _lock = self.gatekeeper.lock_item(unique_key).await;
        if !self.db_writer.should_download_variant(request).await? {
            tracing::debug!(group_key, url = %request.url, "variant not selected, skipping download");
            return Ok(());
        }

        let response = self.file_writer.add(group_key, request).await?;
        self.db_writer.mark_downloaded(request, Some(&response)).await
    }
}
