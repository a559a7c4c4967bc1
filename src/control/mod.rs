//! Control layer - the actor exposing the displays to the rest of the process

pub mod display_power_server;
