use anyhow::Result;
use async_trait::async_trait;
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Power state of a single display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisplayState {
    /// Not known yet, the hardware didn't report anything usable
    Unknown,
    On,
    Off,
    /// Still visible, low power
    Dim,
    /// Blanked, awaiting activity
    Suspend,
}

impl DisplayState {
    /// Whether the content of the display is visible in this state.
    pub fn is_on(self) -> bool {
        matches!(self, DisplayState::On | DisplayState::Dim)
    }
}

impl fmt::Display for DisplayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DisplayState::Unknown => "unknown",
            DisplayState::On => "on",
            DisplayState::Off => "off",
            DisplayState::Dim => "dim",
            DisplayState::Suspend => "suspend",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown display state {0:?}, expected one of on, off, dim, suspend")]
pub struct ParseDisplayStateError(String);

impl FromStr for DisplayState {
    type Err = ParseDisplayStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "on" => Ok(DisplayState::On),
            "off" => Ok(DisplayState::Off),
            "dim" => Ok(DisplayState::Dim),
            "suspend" => Ok(DisplayState::Suspend),
            _ => Err(ParseDisplayStateError(s.to_owned())),
        }
    }
}

/// Invoked once the display has actually reached the requested power state.
pub type StateCommitted = Box<dyn FnOnce(DisplayState) + Send + 'static>;

/// The interface between the brightness core and the platform's display
/// driver. Brightness values are in the device's own range.
#[async_trait]
pub trait ScreenAction: Clone + Send + Sync + 'static {
    /// All displays which can be controlled
    async fn get_display_ids(&self) -> Result<Vec<u32>>;

    async fn get_default_display_id(&self) -> Result<u32>;

    async fn get_power_state(&self, display: u32) -> Result<DisplayState>;

    async fn get_brightness(&self, display: u32) -> Result<u32>;

    async fn set_brightness(&self, display: u32, value: u32) -> Result<()>;

    /// Change the power level and wait until it's applied.
    async fn set_power_state(&self, display: u32, state: DisplayState, reason: u32) -> Result<()>;

    /// Start a power state change which completes in the background.
    ///
    /// Returning `Ok` only means the change was accepted. `on_committed` is
    /// called with the reached state once the hardware is done, possibly on
    /// a different task.
    async fn set_power_state_async(
        &self,
        display: u32,
        state: DisplayState,
        reason: u32,
        on_committed: StateCommitted,
    ) -> Result<()>;
}
