//! Cancellable in-flight work tagged by group key.

use std::collections::HashMap;
use std::future::Future;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::Error;

/// Registry of cancellation tokens for in-flight work, keyed by group.
#[derive(Debug, Default)]
pub struct TaskTracker {
    groups: Mutex<HashMap<String, HashMap<Uuid, CancellationToken>>>,
}

/// Registration of one task. Dropping it unregisters the task.
pub struct TrackedTask<'a> {
    tracker: &'a TaskTracker,
    group_key: String,
    id: Uuid,
    token: CancellationToken,
}

impl TrackedTask<'_> {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for TrackedTask<'_> {
    fn drop(&mut self) {
        let mut groups = self.tracker.groups.lock();
        if let Some(tasks) = groups.get_mut(&self.group_key) {
            tasks.remove(&self.id);
            if tasks.is_empty() {
                groups.remove(&self.group_key);
            }
        }
    }
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, group_key: &str) -> TrackedTask<'_> {
        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        self.groups
            .lock()
            .entry(group_key.to_string())
            .or_default()
            .insert(id, token.clone());
        TrackedTask { tracker: self, group_key: group_key.to_string(), id, token }
    }

    /// Run `fut` under the group's cancellation.
    ///
    /// Returns [`Error::Cancelled`] if the group is cancelled first; the
    /// future is dropped at its next suspension point.
    pub async fn run<T, F>(&self, group_key: &str, fut: F) -> Result<T, Error>
    where
        F: Future<Output = Result<T, Error>>,
    {
        let task = self.track(group_key);
        tokio::select! {
            _ = task.token().cancelled() => Err(Error::Cancelled(group_key.to_string())),
            result = fut => result,
        }
    }

    /// Cancel every in-flight task of a group.
    pub fn cancel(&self, group_key: &str) {
        let tasks = self.groups.lock().remove(group_key);
        if let Some(tasks) = tasks {
            tracing::debug!(group_key, count = tasks.len(), "cancelling group tasks");
            for token in tasks.into_values() {
                token.cancel();
            }
        }
    }

    pub fn cancel_all(&self) {
        let groups = std::mem::take(&mut *self.groups.lock());
        for token in groups.into_values().flat_map(HashMap::into_values) {
            token.cancel();
        }
    }

    pub fn in_flight(&self, group_key: &str) -> usize {
        self.groups.lock().get(group_key).map_or(0, HashMap::len)
    }
}
