//! Coalescing and ordering of concurrent add/remove workflows.
//!
//! All bookkeeping lives behind one mutex, separate from the index
//! connection. Completions and queued thunks are always taken out under the
//! lock and invoked after it is released, so a completion may re-enter the
//! gatekeeper.
//!
//! One gatekeeper is shared by every controller over the same index and
//! store: group ordering, download deduplication and item locks then hold
//! across resource types.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;

use crate::Error;
use crate::keys::{GroupKey, UniqueKey};

/// Outcome of one item: its unique key on success.
pub type FinalItemResult = Result<UniqueKey, Error>;

/// Outcome of a whole group workflow.
pub type FinalGroupResult = Result<Vec<UniqueKey>, Error>;

pub type ItemCompletion = Box<dyn FnOnce(FinalItemResult) + Send>;
pub type GroupCompletion = Box<dyn FnOnce(FinalGroupResult) + Send>;
pub type Thunk = Box<dyn FnOnce() + Send>;

/// Callback for each item outcome of a group workflow.
pub type ItemObserver = Arc<dyn Fn(&UniqueKey, &FinalItemResult) + Send + Sync>;

/// Identity of an add-side workflow, e.g. an article add or an image sync.
/// Calls share a run only when their workflows are equal.
pub type Workflow = String;

/// A caller waiting on a group workflow.
pub struct GroupWaiter {
    pub completion: GroupCompletion,
    pub observer: Option<ItemObserver>,
}

impl GroupWaiter {
    pub fn new(completion: GroupCompletion) -> Self {
        Self { completion, observer: None }
    }

    pub fn observed(completion: GroupCompletion, observer: Option<ItemObserver>) -> Self {
        Self { completion, observer }
    }
}

/// How an incoming workflow was admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Another workflow holds the group; the call was queued.
    Deferred,
    /// The same workflow is already running; the caller waits on its result.
    Joined,
    /// The caller runs the workflow.
    Leader,
}

/// Raw gatekeeper state. Every method is a plain map/set operation.
#[derive(Default)]
pub struct GatekeeperState {
    individual_completions: HashMap<UniqueKey, Vec<ItemCompletion>>,
    group_completions: HashMap<GroupKey, Vec<GroupCompletion>>,
    item_observers: HashMap<GroupKey, Vec<ItemObserver>>,
    queued_adds_while_removing: HashMap<GroupKey, VecDeque<(Workflow, Thunk)>>,
    queued_adds_while_adding: HashMap<GroupKey, VecDeque<(Workflow, Thunk)>>,
    queued_removes_while_adding: HashMap<GroupKey, VecDeque<Thunk>>,
    currently_adding: HashMap<GroupKey, Workflow>,
    currently_removing: HashSet<GroupKey>,
}

impl GatekeeperState {
    pub fn should_queue_add_completion(&self, group_key: &str) -> bool {
        self.currently_removing.contains(group_key)
    }

    /// Whether a different add-side workflow holds the group.
    pub fn is_adding_other(&self, group_key: &str, workflow: &str) -> bool {
        self.currently_adding.get(group_key).is_some_and(|running| running != workflow)
    }

    pub fn should_queue_remove_completion(&self, group_key: &str) -> bool {
        self.currently_adding.contains_key(group_key)
    }

    /// Returns whether this is the first completion waiting on the group.
    pub fn queue_group_completion(&mut self, group_key: &str, completion: GroupCompletion) -> bool {
        let waiting = self.group_completions.entry(group_key.to_string()).or_default();
        waiting.push(completion);
        waiting.len() == 1
    }

    /// Returns whether this is the first completion waiting on the item.
    pub fn queue_individual_completion(&mut self, unique_key: &str, completion: ItemCompletion) -> bool {
        let waiting = self.individual_completions.entry(unique_key.to_string()).or_default();
        waiting.push(completion);
        waiting.len() == 1
    }

    pub fn observe_items(&mut self, group_key: &str, observer: ItemObserver) {
        self.item_observers.entry(group_key.to_string()).or_default().push(observer);
    }

    pub fn add_currently_adding_group_key(&mut self, group_key: &str, workflow: &str) {
        self.currently_adding.insert(group_key.to_string(), workflow.to_string());
    }

    pub fn remove_currently_adding_group_key(&mut self, group_key: &str) {
        self.currently_adding.remove(group_key);
    }

    pub fn add_currently_removing_group_key(&mut self, group_key: &str) {
        self.currently_removing.insert(group_key.to_string());
    }

    pub fn remove_currently_removing_group_key(&mut self, group_key: &str) {
        self.currently_removing.remove(group_key);
    }

    pub fn queue_add(&mut self, group_key: &str, workflow: &str, thunk: Thunk) {
        self.queued_adds_while_removing
            .entry(group_key.to_string())
            .or_default()
            .push_back((workflow.to_string(), thunk));
    }

    pub fn queue_add_behind_add(&mut self, group_key: &str, workflow: &str, thunk: Thunk) {
        self.queued_adds_while_adding
            .entry(group_key.to_string())
            .or_default()
            .push_back((workflow.to_string(), thunk));
    }

    pub fn queue_remove(&mut self, group_key: &str, thunk: Thunk) {
        self.queued_removes_while_adding.entry(group_key.to_string()).or_default().push_back(thunk);
    }

    fn take_group_completions(&mut self, group_key: &str) -> Vec<GroupCompletion> {
        self.item_observers.remove(group_key);
        self.group_completions.remove(group_key).unwrap_or_default()
    }

    /// Queue a waiter. Returns whether it is the first on the group.
    fn queue_waiter(&mut self, group_key: &str, waiter: GroupWaiter) -> bool {
        if let Some(observer) = waiter.observer {
            self.observe_items(group_key, observer);
        }
        self.queue_group_completion(group_key, waiter.completion)
    }

    fn take_individual_completions(&mut self, unique_key: &str) -> Vec<ItemCompletion> {
        self.individual_completions.remove(unique_key).unwrap_or_default()
    }

    fn take_queued_adds(&mut self, group_key: &str) -> VecDeque<(Workflow, Thunk)> {
        self.queued_adds_while_removing.remove(group_key).unwrap_or_default()
    }

    fn take_queued_adds_behind_add(&mut self, group_key: &str) -> VecDeque<(Workflow, Thunk)> {
        self.queued_adds_while_adding.remove(group_key).unwrap_or_default()
    }

    fn take_queued_removes(&mut self, group_key: &str) -> VecDeque<Thunk> {
        self.queued_removes_while_adding.remove(group_key).unwrap_or_default()
    }
}

type ItemMutex = Arc<tokio::sync::Mutex<()>>;

/// Exclusive hold on one unique key, released on drop.
pub struct ItemLock<'a> {
    locks: &'a Mutex<HashMap<UniqueKey, ItemMutex>>,
    unique_key: UniqueKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ItemLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock();
        if locks.get(&self.unique_key).is_some_and(|mutex| Arc::strong_count(mutex) == 1) {
            locks.remove(&self.unique_key);
        }
    }
}

/// Serialization point for add/remove workflows.
#[derive(Default)]
pub struct Gatekeeper {
    state: Mutex<GatekeeperState>,
    item_locks: Mutex<HashMap<UniqueKey, ItemMutex>>,
}

impl Gatekeeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit an add-side `workflow` for `group_key`.
    ///
    /// While a remove of the group runs, or a different workflow adds to
    /// it, the call is queued as the thunk built by `defer` and re-admitted
    /// once that finishes. Otherwise the group is marked as adding and
    /// `waiter` waits on the group.
    pub fn admit_add(
        &self, group_key: &str, workflow: &str, waiter: GroupWaiter, defer: impl FnOnce(GroupWaiter) -> Thunk,
    ) -> Admission {
        let mut state = self.state.lock();
        if state.should_queue_add_completion(group_key) {
            state.queue_add(group_key, workflow, defer(waiter));
            return Admission::Deferred;
        }
        if state.is_adding_other(group_key, workflow) {
            state.queue_add_behind_add(group_key, workflow, defer(waiter));
            return Admission::Deferred;
        }
        state.add_currently_adding_group_key(group_key, workflow);
        if state.queue_waiter(group_key, waiter) { Admission::Leader } else { Admission::Joined }
    }

    /// Admit a remove for `group_key`. Mirror of [`Gatekeeper::admit_add`].
    pub fn admit_remove(
        &self, group_key: &str, waiter: GroupWaiter, defer: impl FnOnce(GroupWaiter) -> Thunk,
    ) -> Admission {
        let mut state = self.state.lock();
        if state.should_queue_remove_completion(group_key) {
            state.queue_remove(group_key, defer(waiter));
            return Admission::Deferred;
        }
        state.add_currently_removing_group_key(group_key);
        if state.queue_waiter(group_key, waiter) { Admission::Leader } else { Admission::Joined }
    }

    /// Report one item outcome to every observer of the group.
    pub fn notify_item(&self, group_key: &str, unique_key: &UniqueKey, result: &FinalItemResult) {
        let observers = self.state.lock().item_observers.get(group_key).cloned().unwrap_or_default();
        for observer in observers {
            observer(unique_key, result);
        }
    }

    /// Register interest in an item download. Returns whether the caller
    /// should perform it.
    pub fn queue_individual_completion(&self, unique_key: &str, completion: ItemCompletion) -> bool {
        self.state.lock().queue_individual_completion(unique_key, completion)
    }

    /// Fan one item outcome out to every waiter.
    pub fn run_and_remove_individual_completions(&self, unique_key: &str, result: FinalItemResult) {
        let completions = self.state.lock().take_individual_completions(unique_key);
        for completion in completions {
            completion(result.clone());
        }
    }

    /// Wait for exclusive use of an item's files and row.
    ///
    /// Downloads and evictions of the same unique key hold this lock, so an
    /// eviction never deletes files a download just wrote for a re-created
    /// row.
    pub async fn lock_item(&self, unique_key: &str) -> ItemLock<'_> {
        let mutex = self.item_locks.lock().entry(unique_key.to_string()).or_default().clone();
        let mut lock = ItemLock { locks: &self.item_locks, unique_key: unique_key.to_string(), guard: None };
        lock.guard = Some(mutex.lock_owned().await);
        lock
    }

    /// Conclude an add: release its waiters, then hand the group to the
    /// calls queued behind it. Removes go first; other workflows follow.
    ///
    /// The next holder is marked in the same critical section that clears
    /// the adding mark, so nothing can slip in between.
    pub fn finish_add(&self, group_key: &str, result: FinalGroupResult) {
        let (completions, removes, adds) = {
            let mut state = self.state.lock();
            let completions = state.take_group_completions(group_key);
            state.remove_currently_adding_group_key(group_key);
            let removes = state.take_queued_removes(group_key);
            let adds = state.take_queued_adds_behind_add(group_key);
            if !removes.is_empty() {
                state.add_currently_removing_group_key(group_key);
            } else if let Some((workflow, _)) = adds.front() {
                state.add_currently_adding_group_key(group_key, workflow);
            }
            (completions, removes, adds)
        };

        for completion in completions {
            completion(result.clone());
        }
        if !removes.is_empty() || !adds.is_empty() {
            tracing::debug!(group_key, removes = removes.len(), adds = adds.len(), "releasing calls queued behind add");
        }
        removes.into_iter().for_each(|thunk| thunk());
        adds.into_iter().for_each(|(_, thunk)| thunk());
    }

    /// Conclude a remove. Mirror of [`Gatekeeper::finish_add`].
    pub fn finish_remove(&self, group_key: &str, result: FinalGroupResult) {
        let (completions, adds) = {
            let mut state = self.state.lock();
            let completions = state.take_group_completions(group_key);
            state.remove_currently_removing_group_key(group_key);
            let adds = state.take_queued_adds(group_key);
            if let Some((workflow, _)) = adds.front() {
                state.add_currently_adding_group_key(group_key, workflow);
            }
            (completions, adds)
        };

        for completion in completions {
            completion(result.clone());
        }
        if !adds.is_empty() {
            tracing::debug!(group_key, count = adds.len(), "releasing adds queued behind remove");
        }
        adds.into_iter().for_each(|(_, thunk)| thunk());
    }

    pub fn is_adding(&self, group_key: &str) -> bool {
        self.state.lock().currently_adding.contains_key(group_key)
    }

    pub fn is_removing(&self, group_key: &str) -> bool {
        self.state.lock().currently_removing.contains(group_key)
    }
}
