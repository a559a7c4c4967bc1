//! A small actor toolkit on top of Tokio tasks.
//!
//! Long-lived components (like the display power server) run as tasks which
//! own their state and are reached through an [ActorPort].

mod ports;
mod server;

#[doc(inline)]
pub use ports::*;

#[doc(inline)]
pub use server::*;

#[cfg(test)]
mod test_ports;

#[cfg(test)]
mod test_server;
