/// Control of display power and backlight hardware
pub mod interface;
pub mod mock;
pub mod sysfs;

pub use interface::*;

#[cfg(test)]
mod test;
