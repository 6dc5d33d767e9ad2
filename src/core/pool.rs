//! # Worker pool: id → handle table.
//!
//! Holds exactly the workers whose exit has not been handled yet. An entry is
//! inserted by `fork_worker` as soon as the process is spawned and removed by the
//! worker's monitor as the first step of exit handling.
//!
//! The table sits behind a `std::sync::RwLock`: it is read from synchronous bus
//! handlers, and no critical section spans an `.await`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use super::worker::{WorkerHandle, WorkerStatus};
use crate::process::WorkerId;

#[derive(Default)]
pub struct WorkerPool {
    workers: RwLock<HashMap<WorkerId, Arc<WorkerHandle>>>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a worker. Returns `false` if the id was already present (the old
    /// entry is kept).
    pub fn insert(&self, handle: Arc<WorkerHandle>) -> bool {
        let mut workers = self.write();
        if workers.contains_key(&handle.id()) {
            return false;
        }
        workers.insert(handle.id(), handle);
        true
    }

    pub fn remove(&self, id: WorkerId) -> Option<Arc<WorkerHandle>> {
        self.write().remove(&id)
    }

    pub fn get(&self, id: WorkerId) -> Option<Arc<WorkerHandle>> {
        self.read().get(&id).cloned()
    }

    /// All tracked handles, ordered by id.
    pub fn snapshot(&self) -> Vec<Arc<WorkerHandle>> {
        let mut handles: Vec<_> = self.read().values().cloned().collect();
        handles.sort_unstable_by_key(|h| h.id());
        handles
    }

    /// Sorted list of tracked ids.
    pub fn ids(&self) -> Vec<WorkerId> {
        let mut ids: Vec<_> = self.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn statuses(&self) -> BTreeMap<WorkerId, WorkerStatus> {
        self.read()
            .values()
            .map(|h| (h.id(), h.status()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<WorkerId, Arc<WorkerHandle>>> {
        self.workers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<WorkerId, Arc<WorkerHandle>>> {
        self.workers.write().unwrap_or_else(PoisonError::into_inner)
    }
}
