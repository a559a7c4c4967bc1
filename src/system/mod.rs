//! The brightness core: stepwise transitions and per-display arbitration

pub mod gradual_animator;
pub mod screen_controller;

#[cfg(test)]
mod test;
