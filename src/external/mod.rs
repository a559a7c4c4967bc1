//! Narrow ports to everything outside the brightness core: display hardware,
//! delayed task execution and brightness persistence.

pub mod brightness_store;
pub mod dependency_provider;
pub mod scheduler;
pub mod screen_action;
