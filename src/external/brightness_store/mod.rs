/// Persistence of the user's brightness setting
pub mod file;
pub mod interface;
pub mod mock;

pub use interface::*;
