use super::{DisplayState, ScreenAction, StateCommitted};
use crate::util::lock;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

#[derive(Default)]
struct MockDisplay {
    brightness: u32,
    state: Option<DisplayState>,
    brightness_writes: Vec<u32>,
}

#[derive(Default)]
struct MockState {
    displays: HashMap<u32, MockDisplay>,
    default_display: u32,
    should_fail: bool,
    defer_commits: bool,
    pending_commits: Vec<(DisplayState, StateCommitted)>,
    power_calls: usize,
}

/// A mock [ScreenAction], usable when testing the controllers and when
/// running without backlight hardware.
#[derive(Clone)]
pub struct MockScreenAction {
    state: Arc<Mutex<MockState>>,
}

impl MockScreenAction {
    /// Create a mock driving the given displays, all starting at the
    /// specified brightness and in the `On` state. The first id is the
    /// default display.
    pub fn new(display_ids: &[u32], initial_brightness: u32) -> MockScreenAction {
        let displays = display_ids
            .iter()
            .map(|id| {
                (
                    *id,
                    MockDisplay {
                        brightness: initial_brightness,
                        state: Some(DisplayState::On),
                        brightness_writes: vec![],
                    },
                )
            })
            .collect();
        MockScreenAction {
            state: Arc::new(Mutex::new(MockState {
                displays,
                default_display: display_ids.first().copied().unwrap_or(0),
                ..Default::default()
            })),
        }
    }

    /// Set whether operations on this mock should return an error or not
    pub fn set_failure_mode(&self, should_fail: bool) {
        lock(&self.state).should_fail = should_fail;
    }

    /// When enabled, asynchronous power state changes are queued until
    /// [MockScreenAction::commit_pending] is called.
    pub fn set_deferred_commits(&self, defer: bool) {
        lock(&self.state).defer_commits = defer;
    }

    /// Fire all queued asynchronous power state completions. Returns how many
    /// there were.
    pub fn commit_pending(&self) -> usize {
        let pending = std::mem::take(&mut lock(&self.state).pending_commits);
        let count = pending.len();
        for (state, on_committed) in pending {
            on_committed(state);
        }
        count
    }

    pub fn brightness(&self, display: u32) -> Option<u32> {
        lock(&self.state).displays.get(&display).map(|d| d.brightness)
    }

    pub fn power_state(&self, display: u32) -> Option<DisplayState> {
        lock(&self.state)
            .displays
            .get(&display)
            .and_then(|d| d.state)
    }

    /// Every brightness value successfully written to the display, in order
    pub fn brightness_writes(&self, display: u32) -> Vec<u32> {
        lock(&self.state)
            .displays
            .get(&display)
            .map(|d| d.brightness_writes.clone())
            .unwrap_or_default()
    }

    /// Number of power state changes requested, successful or not
    pub fn power_calls(&self) -> usize {
        lock(&self.state).power_calls
    }

    fn with_display<T>(
        &self,
        display: u32,
        f: impl FnOnce(&mut MockDisplay) -> T,
    ) -> Result<T> {
        let mut state = lock(&self.state);
        if state.should_fail {
            return Err(anyhow!("Mock ScreenAction is failing"));
        }
        state
            .displays
            .get_mut(&display)
            .map(f)
            .ok_or_else(|| anyhow!("No display with id {}", display))
    }
}

#[async_trait]
impl ScreenAction for MockScreenAction {
    async fn get_display_ids(&self) -> Result<Vec<u32>> {
        let mut ids: Vec<u32> = lock(&self.state).displays.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn get_default_display_id(&self) -> Result<u32> {
        Ok(lock(&self.state).default_display)
    }

    async fn get_power_state(&self, display: u32) -> Result<DisplayState> {
        self.with_display(display, |d| d.state.unwrap_or(DisplayState::Unknown))
    }

    async fn get_brightness(&self, display: u32) -> Result<u32> {
        self.with_display(display, |d| d.brightness)
    }

    async fn set_brightness(&self, display: u32, value: u32) -> Result<()> {
        self.with_display(display, |d| {
            d.brightness = value;
            d.brightness_writes.push(value);
        })
    }

    async fn set_power_state(&self, display: u32, state: DisplayState, _: u32) -> Result<()> {
        lock(&self.state).power_calls += 1;
        self.with_display(display, |d| d.state = Some(state))
    }

    async fn set_power_state_async(
        &self,
        display: u32,
        state: DisplayState,
        _: u32,
        on_committed: StateCommitted,
    ) -> Result<()> {
        lock(&self.state).power_calls += 1;
        self.with_display(display, |d| d.state = Some(state))?;
        let deferred = {
            let mut mock = lock(&self.state);
            if mock.defer_commits {
                mock.pending_commits.push((state, on_committed));
                None
            } else {
                Some(on_committed)
            }
        };
        if let Some(on_committed) = deferred {
            on_committed(state);
        }
        Ok(())
    }
}
