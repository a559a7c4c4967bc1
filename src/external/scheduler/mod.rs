/// Cancellable delayed execution of tasks
pub mod interface;
pub mod tokio_scheduler;

pub use interface::*;
