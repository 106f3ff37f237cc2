//! Keyed one-shot delayed tasks on the tokio runtime.
//!
//! Scheduling under a key that already has a pending task aborts the stale
//! task first, so at most one task per key is ever alive.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::AbortHandle;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskKey {
    Save,
    Settlement(String),
}

type TaskMap = HashMap<TaskKey, (u64, AbortHandle)>;

#[derive(Debug, Default)]
pub struct Scheduler {
    tasks: Arc<Mutex<TaskMap>>,
    next_id: AtomicU64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay` under `key`. Must be called inside a tokio
    /// runtime.
    pub fn schedule<F>(&self, key: TaskKey, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let tasks = Arc::clone(&self.tasks);
        let own_key = key.clone();

        // Held across spawn so the task cannot deregister before it is
        // registered.
        let mut map = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
            let mut map = tasks.lock().unwrap_or_else(PoisonError::into_inner);
            if map.get(&own_key).is_some_and(|(entry, _)| *entry == id) {
                map.remove(&own_key);
            }
        });
        if let Some((_, stale)) = map.insert(key.clone(), (id, handle.abort_handle())) {
            debug!(?key, "replacing stale scheduled task");
            stale.abort();
        }
    }

    /// Abort the task under `key`. Returns whether one was pending.
    pub fn cancel(&self, key: &TaskKey) -> bool {
        let removed = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        match removed {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, key: &TaskKey) -> bool {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn pending(&self) -> Vec<TaskKey> {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn cancel_all(&self) {
        let drained: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (key, (_, handle)) in drained {
            debug!(?key, "cancelling scheduled task");
            handle.abort();
        }
    }
}
