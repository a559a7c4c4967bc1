use super::{DelayScheduler, Task, TaskHandle};
use crate::util::lock;
use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{runtime, task::AbortHandle};

/// A [DelayScheduler] spawning each task on the Tokio runtime it was created
/// in. Cancellation aborts the task at its next await point.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    runtime: runtime::Handle,
    next_id: Arc<AtomicU64>,
    pending: Arc<Mutex<HashMap<u64, AbortHandle>>>,
}

impl TokioScheduler {
    /// Must be called from within a Tokio runtime.
    pub fn new() -> Result<TokioScheduler> {
        let runtime = runtime::Handle::try_current()
            .context("Task scheduler must be created inside a Tokio runtime")?;
        Ok(TokioScheduler {
            runtime,
            next_id: Arc::new(AtomicU64::new(1)),
            pending: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Number of submitted tasks which neither finished nor were cancelled
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }
}

impl DelayScheduler for TokioScheduler {
    fn submit_after(&self, delay: Duration, task: Task) -> TaskHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let pending = self.pending.clone();
        // Registration happens under the lock, so a task finishing right away
        // still finds its own entry to remove.
        let mut registry = lock(&self.pending);
        let join_handle = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
            lock(&pending).remove(&id);
        });
        registry.insert(id, join_handle.abort_handle());
        TaskHandle::new(id)
    }

    fn cancel(&self, handle: TaskHandle) -> bool {
        match lock(&self.pending).remove(&handle.id()) {
            Some(abort_handle) => {
                abort_handle.abort();
                true
            }
            None => false,
        }
    }
}
