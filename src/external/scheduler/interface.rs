use std::{future::Future, pin::Pin, time::Duration};

/// A unit of work handed to a [DelayScheduler].
pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Identifies a task submitted to a [DelayScheduler], for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(u64);

impl TaskHandle {
    pub fn new(id: u64) -> TaskHandle {
        TaskHandle(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Runs tasks after a delay, on some executor other than the caller's.
///
/// Cancellation is best-effort: a task which has already started may still
/// run to completion, so tasks must check for themselves whether they are
/// still wanted.
pub trait DelayScheduler: Send + Sync + 'static {
    fn submit_after(&self, delay: Duration, task: Task) -> TaskHandle;

    /// Returns false if the task already finished or was never submitted here.
    fn cancel(&self, handle: TaskHandle) -> bool;
}
