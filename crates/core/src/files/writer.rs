//! Network fetch plus file persistence for one item variant.

use std::sync::Arc;

use crate::Error;
use crate::fetch::{FetchRequest, FetchResponse, Fetcher};
use crate::files::{FileStore, PersistedResponses, WriteMode};
use crate::keys::{ItemKeyAndVariant, KeyDeriver};
use crate::tasks::TaskTracker;

/// Downloads tagged requests and writes them to the file store.
pub struct FileWriter {
    fetcher: Arc<dyn Fetcher>,
    responses: PersistedResponses,
    keys: KeyDeriver,
    tasks: TaskTracker,
}

impl FileWriter {
    pub fn new(fetcher: Arc<dyn Fetcher>, store: Arc<dyn FileStore>, keys: KeyDeriver) -> Self {
        Self { fetcher, responses: PersistedResponses::new(store), keys, tasks: TaskTracker::new() }
    }

    pub fn responses(&self) -> &PersistedResponses {
        &self.responses
    }

    /// Fetch `request` and persist its headers and body.
    ///
    /// A fresh response replaces whatever half of the pair is already on
    /// disk. A 304 answer resolves to the response already there. The
    /// returned response is the one that was persisted.
    pub async fn add(&self, group_key: &str, request: &FetchRequest) -> Result<FetchResponse, Error> {
        let key = self
            .keys
            .request_key(request)
            .ok_or_else(|| Error::UnableToDetermineItemKey(request.url.to_string()))?;

        let fetched = self.tasks.run(group_key, self.fetcher.fetch(request)).await;

        match fetched {
            Ok(response) if response.is_success() => {
                self.responses
                    .write(&key, &response.headers, response.body.clone(), WriteMode::Replace)
                    .await?;
                tracing::debug!(url = %request.url, item = %key, bytes = response.body.len(), "persisted response");
                Ok(response)
            }
            Ok(response) => Err(Error::HttpStatus { status: response.status, url: request.url.to_string() }),
            Err(Error::NotModified) => {
                let persisted = self
                    .responses
                    .read(&key)
                    .await?
                    .ok_or_else(|| Error::CannotFindCacheItem(key.to_string()))?;
                tracing::debug!(url = %request.url, item = %key, "not modified, using persisted response");
                Ok(FetchResponse { url: request.url.clone(), status: 200, headers: persisted.headers, body: persisted.body })
            }
            Err(e) => Err(e),
        }
    }

    /// Delete both files of an item variant.
    pub async fn remove(&self, key: &ItemKeyAndVariant) -> Result<(), Error> {
        self.responses.remove(key).await
    }

    pub fn cancel_tasks(&self, group_key: &str) {
        self.tasks.cancel(group_key);
    }

    pub fn cancel_all_tasks(&self) {
        self.tasks.cancel_all();
    }
}
