//! Per-display power state and brightness arbitration.

use super::gradual_animator::{AnimateCallback, AnimationError, GradualAnimator};
use crate::{
    config::{BrightnessLimits, Config},
    external::{
        brightness_store::BrightnessStore,
        dependency_provider::DependencyProvider,
        scheduler::{DelayScheduler, TaskHandle},
        screen_action::{DisplayState, ScreenAction, StateCommitted},
    },
    util::lock,
};
use async_trait::async_trait;
use std::{
    sync::{Arc, Mutex, Weak},
    time::Duration,
};
use thiserror::Error;
use tokio::sync::broadcast;

/// Notifications sent to observers of the displays
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayEvent {
    StateChanged {
        display: u32,
        state: DisplayState,
        reason: u32,
    },
    /// A new brightness reached the hardware. The value is logical, before
    /// any discount.
    BrightnessChanged { display: u32, value: u32 },
    /// A brightness transition ended, either reaching its target or stopped
    BrightnessSettled { display: u32, value: u32 },
}

#[derive(Debug, Error)]
pub enum ScreenError {
    #[error("hardware write failed: {0:#}")]
    HardwareWriteFailed(anyhow::Error),

    #[error("can't transition to {0}")]
    InvalidTransition(DisplayState),

    #[error("brightness is overridden")]
    Overridden,

    #[error("brightness is boosted")]
    Boosted,

    #[error("brightness isn't boosted")]
    NotBoosted,

    #[error("brightness isn't overridden")]
    NotOverridden,

    #[error("display isn't on")]
    ScreenOff,

    #[error("no display with id {0}")]
    UnknownDisplay(u32),
}

#[derive(Debug)]
struct PowerSnapshot {
    state: DisplayState,
    reason: u32,
    /// Brightness to bring back once the display is on again
    before_off: Option<u32>,
}

#[derive(Debug)]
struct BrightnessSnapshot {
    /// Logical brightness last committed by a normal or override request
    cached: u32,
    /// Logical brightness currently on the display, which differs from
    /// `cached` while boosted or animating
    applied: u32,
    discount: f64,
    overridden: bool,
    override_restore: u32,
    boosted: bool,
    boost_expiry: Option<TaskHandle>,
    animation_updates_cache: bool,
}

/// The single owner of one display's power state and brightness.
///
/// Requests to change brightness come in three flavours. Normal requests
/// (`set_brightness`) are refused while an override or a boost is active.
/// Overrides win over normal requests until restored, boosts raise the
/// display to its maximum for a limited time. Overrides and boosts exclude
/// each other.
///
/// Brightness values handled here are logical. The discount factor is only
/// applied right before a value is written to the hardware.
pub struct ScreenController<A: ScreenAction, S: BrightnessStore> {
    display: u32,
    name: String,
    limits: BrightnessLimits,
    screen_action: A,
    store: S,
    scheduler: Arc<dyn DelayScheduler>,
    events: broadcast::Sender<DisplayEvent>,
    animator: GradualAnimator,
    power: Mutex<PowerSnapshot>,
    brightness: Mutex<BrightnessSnapshot>,
    // Serializes power state transitions
    transition: tokio::sync::Mutex<()>,
    // Serializes brightness requests. Taken after `transition` when both are
    // needed.
    arbiter: tokio::sync::Mutex<()>,
    self_ref: Weak<Self>,
}

impl<A: ScreenAction, S: BrightnessStore> ScreenController<A, S> {
    pub async fn new(
        display: u32,
        config: &Config,
        provider: &DependencyProvider<A, S>,
        events: broadcast::Sender<DisplayEvent>,
    ) -> Arc<ScreenController<A, S>> {
        let name = format!("Screen{}", display);
        let screen_action = provider.get_screen_action();
        let store = provider.get_brightness_store();
        let limits = config.brightness;

        let state = match screen_action.get_power_state(display).await {
            Ok(state) => state,
            Err(e) => {
                log::warn!("{}: couldn't read the power state: {:#}", name, e);
                DisplayState::Unknown
            }
        };
        let persisted = match store.load().await {
            Ok(value) => limits.clamp(value),
            Err(e) => {
                log::info!("{}: no persisted brightness, will ask the hardware: {:#}", name, e);
                0
            }
        };
        log::info!(
            "{}: starting in state {}, brightness {}",
            name,
            state,
            persisted
        );

        Arc::new_cyclic(|self_ref: &Weak<ScreenController<A, S>>| {
            let callback: Weak<dyn AnimateCallback> = self_ref.clone();
            ScreenController {
                display,
                animator: GradualAnimator::new(
                    &name,
                    callback,
                    provider.get_scheduler(),
                    config.animation.tick(),
                ),
                name,
                limits,
                screen_action,
                store,
                scheduler: provider.get_scheduler(),
                events,
                power: Mutex::new(PowerSnapshot {
                    state,
                    reason: 0,
                    before_off: None,
                }),
                brightness: Mutex::new(BrightnessSnapshot {
                    cached: persisted,
                    applied: persisted,
                    discount: 1.0,
                    overridden: false,
                    override_restore: 0,
                    boosted: false,
                    boost_expiry: None,
                    animation_updates_cache: true,
                }),
                transition: tokio::sync::Mutex::new(()),
                arbiter: tokio::sync::Mutex::new(()),
                self_ref: self_ref.clone(),
            }
        })
    }

    pub fn display_id(&self) -> u32 {
        self.display
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DisplayEvent> {
        self.events.subscribe()
    }

    /// Moves the display into `state`. Asking for the state the display is
    /// already in succeeds without touching the hardware.
    ///
    /// `On` and `Off` are committed asynchronously, once the hardware reports
    /// that it's done, while `Dim` and `Suspend` are committed before this
    /// returns. A display which is off can't be dimmed; that request succeeds
    /// without any effect.
    pub async fn update_state(&self, state: DisplayState, reason: u32) -> bool {
        let _transition = self.transition.lock().await;
        let current = self.get_state();
        if state == current {
            log::debug!("{}: already {}", self.name, state);
            return true;
        }
        if state == DisplayState::Dim && current == DisplayState::Off {
            log::info!("{}: not dimming a display which is off", self.name);
            return true;
        }
        log::info!(
            "{}: {} -> {}, reason {}",
            self.name,
            current,
            state,
            reason
        );
        let result = match state {
            DisplayState::On | DisplayState::Off => self.begin_power_transition(state, reason).await,
            DisplayState::Dim | DisplayState::Suspend => self.apply_power_level(state, reason).await,
            DisplayState::Unknown => Err(ScreenError::InvalidTransition(state)),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                log::warn!("{}: couldn't switch to {}: {}", self.name, state, e);
                false
            }
        }
    }

    async fn begin_power_transition(&self, state: DisplayState, reason: u32) -> Result<(), ScreenError> {
        let before_off = if state == DisplayState::Off {
            let _arbiter = self.arbiter.lock().await;
            if self.animator.is_animating() {
                log::debug!("{}: stopping the animation before power off", self.name);
                self.animator.stop_animation().await;
            }
            Some(self.limits.sane_or_default(self.get_brightness().await))
        } else {
            None
        };

        let controller = self.self_ref.clone();
        let on_committed: StateCommitted = Box::new(move |reached| match controller.upgrade() {
            Some(controller) => controller.commit_state(reached, reason),
            None => log::warn!("Display turned {} after its controller was dropped", reached),
        });
        self.screen_action
            .set_power_state_async(self.display, state, reason, on_committed)
            .await
            .map_err(ScreenError::HardwareWriteFailed)?;

        if before_off.is_some() {
            lock(&self.power).before_off = before_off;
            return Ok(());
        }
        let saved = lock(&self.power).before_off.take();
        let (boosted, overridden) = {
            let brightness = lock(&self.brightness);
            (brightness.boosted, brightness.overridden)
        };
        // A boost outlives power off, the cache keeps the brightness to go
        // back to once it ends.
        let restore = if boosted {
            self.limits.max
        } else if overridden {
            self.get_brightness().await
        } else {
            match saved {
                Some(value) => value,
                None => self.limits.sane_or_default(self.get_brightness().await),
            }
        };
        log::debug!("{}: restoring brightness {} after power on", self.name, restore);
        if !self.update_brightness(restore, Duration::ZERO, !boosted).await {
            log::warn!("{}: display is on, but brightness {} wasn't restored", self.name, restore);
        }
        Ok(())
    }

    async fn apply_power_level(&self, state: DisplayState, reason: u32) -> Result<(), ScreenError> {
        self.screen_action
            .set_power_state(self.display, state, reason)
            .await
            .map_err(ScreenError::HardwareWriteFailed)?;
        self.commit_state(state, reason);
        Ok(())
    }

    fn commit_state(&self, state: DisplayState, reason: u32) {
        {
            let mut power = lock(&self.power);
            power.state = state;
            power.reason = reason;
        }
        log::info!("{}: now {}", self.name, state);
        self.notify(DisplayEvent::StateChanged {
            display: self.display,
            state,
            reason,
        });
    }

    /// A normal brightness request, ignored while the display is off,
    /// overridden or boosted. A zero `gradual_duration` writes the value right
    /// away.
    pub async fn set_brightness(&self, value: u32, gradual_duration: Duration) -> bool {
        let _arbiter = self.arbiter.lock().await;
        let screen_on = self.is_screen_on();
        let refusal = {
            let brightness = lock(&self.brightness);
            if !screen_on {
                Some(ScreenError::ScreenOff)
            } else if brightness.overridden {
                Some(ScreenError::Overridden)
            } else if brightness.boosted {
                Some(ScreenError::Boosted)
            } else {
                None
            }
        };
        if let Some(reason) = refusal {
            log::info!("{}: ignoring brightness {}, {}", self.name, value, reason);
            return false;
        }
        self.write_or_animate(value, gradual_duration, true).await
    }

    async fn update_brightness(&self, value: u32, gradual_duration: Duration, update_cache: bool) -> bool {
        let _arbiter = self.arbiter.lock().await;
        self.write_or_animate(value, gradual_duration, update_cache).await
    }

    // Callers hold the arbiter lock.
    async fn write_or_animate(&self, value: u32, gradual_duration: Duration, update_cache: bool) -> bool {
        let value = self.limits.clamp(value);
        if self.animator.is_animating() {
            log::debug!("{}: superseding the running animation", self.name);
            self.animator.stop_animation().await;
        }

        if !gradual_duration.is_zero() {
            let applied = lock(&self.brightness).applied;
            let from = if applied == 0 {
                self.get_brightness().await
            } else {
                applied
            };
            lock(&self.brightness).animation_updates_cache = update_cache;
            match self.animator.start_animation(from, value, gradual_duration) {
                Ok(()) => return true,
                // The discount may still have changed, so write anyway
                Err(AnimationError::Degenerate(_)) => (),
                Err(e) => {
                    log::warn!("{}: couldn't animate to {}: {}", self.name, value, e);
                    return false;
                }
            }
        }

        match self.write_brightness(value).await {
            Ok(()) => {
                if update_cache {
                    self.commit_brightness(value).await;
                }
                true
            }
            Err(e) => {
                log::warn!("{}: couldn't set brightness {}: {}", self.name, value, e);
                false
            }
        }
    }

    async fn write_brightness(&self, value: u32) -> Result<(), ScreenError> {
        let discount = lock(&self.brightness).discount;
        let physical = self.limits.clamp((value as f64 * discount).round() as u32);
        self.screen_action
            .set_brightness(self.display, physical)
            .await
            .map_err(ScreenError::HardwareWriteFailed)?;
        lock(&self.brightness).applied = value;
        log::trace!("{}: brightness {} written as {}", self.name, value, physical);
        self.notify(DisplayEvent::BrightnessChanged {
            display: self.display,
            value,
        });
        Ok(())
    }

    async fn commit_brightness(&self, value: u32) {
        let should_persist = {
            let mut brightness = lock(&self.brightness);
            brightness.cached = value;
            !brightness.overridden
        };
        if should_persist {
            self.persist(value).await;
        }
    }

    async fn persist(&self, value: u32) {
        if let Err(e) = self.store.persist(value).await {
            log::warn!("{}: couldn't persist brightness {}: {:#}", self.name, value, e);
        }
    }

    /// Sets a brightness which normal requests can't change.
    ///
    /// The first call remembers the current brightness. A later call asking
    /// for exactly that brightness ends the override.
    pub async fn override_brightness(&self, value: u32, gradual_duration: Duration) -> bool {
        let _arbiter = self.arbiter.lock().await;
        if !self.is_screen_on() {
            log::info!("{}: not overriding, {}", self.name, ScreenError::ScreenOff);
            return false;
        }
        let current = self.get_brightness().await;
        let value = self.limits.clamp(value);
        {
            let mut brightness = lock(&self.brightness);
            if brightness.boosted {
                log::info!("{}: not overriding, {}", self.name, ScreenError::Boosted);
                return false;
            }
            if !brightness.overridden {
                log::info!("{}: overriding {} with {}", self.name, current, value);
                brightness.override_restore = current;
                brightness.overridden = true;
            } else if value == brightness.override_restore {
                log::info!("{}: override ended at {}", self.name, value);
                brightness.overridden = false;
            }
        }
        self.write_or_animate(value, gradual_duration, true).await
    }

    /// Ends an override, going back to the brightness from before it.
    pub async fn restore_brightness(&self, gradual_duration: Duration) -> bool {
        let restore = {
            let brightness = lock(&self.brightness);
            if brightness.overridden {
                Some(brightness.override_restore)
            } else {
                None
            }
        };
        match restore {
            Some(value) => self.override_brightness(value, gradual_duration).await,
            None => {
                log::info!("{}: nothing to restore, {}", self.name, ScreenError::NotOverridden);
                false
            }
        }
    }

    /// Raises the display to its maximum brightness for `timeout`. Boosting
    /// again while boosted extends the boost.
    pub async fn boost_brightness(&self, timeout: Duration, gradual_duration: Duration) -> bool {
        if timeout.is_zero() {
            log::warn!("{}: refusing to boost for no time at all", self.name);
            return false;
        }
        let _arbiter = self.arbiter.lock().await;
        if !self.is_screen_on() {
            log::info!("{}: not boosting, {}", self.name, ScreenError::ScreenOff);
            return false;
        }
        self.get_brightness().await;
        let (first_boost, superseded_expiry) = {
            let mut brightness = lock(&self.brightness);
            if brightness.overridden {
                log::info!("{}: not boosting, {}", self.name, ScreenError::Overridden);
                return false;
            }
            let first_boost = !brightness.boosted;
            brightness.boosted = true;
            (first_boost, brightness.boost_expiry.take())
        };
        if let Some(handle) = superseded_expiry {
            self.scheduler.cancel(handle);
        }

        if first_boost {
            log::info!("{}: boosting for {:?}", self.name, timeout);
            if !self.write_or_animate(self.limits.max, gradual_duration, false).await {
                lock(&self.brightness).boosted = false;
                return false;
            }
        } else {
            log::info!("{}: boost extended by {:?}", self.name, timeout);
        }

        let controller = self.self_ref.clone();
        let expiry = self.scheduler.submit_after(
            timeout,
            Box::pin(async move {
                if let Some(controller) = controller.upgrade() {
                    controller.expire_boost(gradual_duration).await;
                }
            }),
        );
        lock(&self.brightness).boost_expiry = Some(expiry);
        true
    }

    async fn expire_boost(&self, gradual_duration: Duration) {
        let _arbiter = self.arbiter.lock().await;
        let restore = {
            let mut brightness = lock(&self.brightness);
            if !brightness.boosted {
                return;
            }
            brightness.boosted = false;
            // This task is the one the handle points to, so it's not cancelled.
            brightness.boost_expiry = None;
            brightness.cached
        };
        log::info!("{}: boost expired, back to {}", self.name, restore);
        self.write_or_animate(restore, gradual_duration, true).await;
    }

    /// Ends a boost early.
    pub async fn cancel_boost_brightness(&self, gradual_duration: Duration) -> bool {
        let _arbiter = self.arbiter.lock().await;
        let (restore, expiry) = {
            let mut brightness = lock(&self.brightness);
            if !brightness.boosted {
                log::info!("{}: nothing to cancel, {}", self.name, ScreenError::NotBoosted);
                return false;
            }
            brightness.boosted = false;
            (brightness.cached, brightness.boost_expiry.take())
        };
        if let Some(handle) = expiry {
            self.scheduler.cancel(handle);
        }
        log::info!("{}: boost cancelled, back to {}", self.name, restore);
        self.write_or_animate(restore, gradual_duration, true).await
    }

    /// Scales every following hardware write by `discount`, which must be in
    /// `(0, 1]`, and applies it to the current brightness.
    ///
    /// The logical brightness doesn't move, so the new physical value is
    /// written at once even when `gradual_duration` is set.
    pub async fn discount_brightness(&self, discount: f64, gradual_duration: Duration) -> bool {
        if !(discount > 0.0 && discount <= 1.0) {
            log::warn!("{}: discount {} is outside of (0, 1]", self.name, discount);
            return false;
        }
        if !self.is_screen_on() {
            log::info!("{}: not discounting, {}", self.name, ScreenError::ScreenOff);
            return false;
        }
        AnimateCallback::discount_brightness(self, discount);
        let applied = lock(&self.brightness).applied;
        let target = if applied == 0 {
            self.get_brightness().await
        } else {
            applied
        };
        self.update_brightness(target, gradual_duration, false).await
    }

    /// The committed logical brightness. Asks the hardware if nothing is
    /// known yet.
    pub async fn get_brightness(&self) -> u32 {
        let cached = lock(&self.brightness).cached;
        if cached != 0 {
            return cached;
        }
        match self.screen_action.get_brightness(self.display).await {
            Ok(value) => {
                let mut brightness = lock(&self.brightness);
                if brightness.cached == 0 {
                    brightness.cached = value;
                }
                if brightness.applied == 0 {
                    brightness.applied = value;
                }
                brightness.cached
            }
            Err(e) => {
                log::warn!("{}: couldn't read brightness: {:#}", self.name, e);
                0
            }
        }
    }

    /// What the hardware reports right now, discount included
    pub async fn get_device_brightness(&self) -> u32 {
        match self.screen_action.get_brightness(self.display).await {
            Ok(value) => value,
            Err(e) => {
                log::warn!("{}: couldn't read device brightness: {:#}", self.name, e);
                0
            }
        }
    }

    pub fn get_state(&self) -> DisplayState {
        lock(&self.power).state
    }

    pub fn get_reason(&self) -> u32 {
        lock(&self.power).reason
    }

    pub fn is_screen_on(&self) -> bool {
        self.get_state().is_on()
    }

    pub fn get_discount(&self) -> f64 {
        lock(&self.brightness).discount
    }

    pub fn is_overridden(&self) -> bool {
        lock(&self.brightness).overridden
    }

    /// The brightness an active override will restore
    pub fn get_before_override_brightness(&self) -> Option<u32> {
        let brightness = lock(&self.brightness);
        if brightness.overridden {
            Some(brightness.override_restore)
        } else {
            None
        }
    }

    pub fn is_boosted(&self) -> bool {
        lock(&self.brightness).boosted
    }

    pub fn is_animating(&self) -> bool {
        self.animator.is_animating()
    }

    pub fn animation_tick(&self) -> Duration {
        self.animator.tick_interval()
    }

    /// Stops everything scheduled on behalf of this display. Must be called
    /// before the controller is dropped.
    pub async fn shutdown(&self) {
        let expiry = lock(&self.brightness).boost_expiry.take();
        if let Some(handle) = expiry {
            self.scheduler.cancel(handle);
        }
        if self.animator.is_animating() {
            self.animator.stop_animation().await;
        }
        log::debug!("{}: shut down", self.name);
    }

    fn notify(&self, event: DisplayEvent) {
        if self.events.send(event).is_err() {
            log::trace!("{}: no observers", self.name);
        }
    }
}

#[async_trait]
impl<A: ScreenAction, S: BrightnessStore> AnimateCallback for ScreenController<A, S> {
    async fn on_start(&self) {
        log::debug!("{}: animation started", self.name);
    }

    async fn on_changed(&self, value: u32) {
        match self.write_brightness(value).await {
            Ok(()) => {
                let mut brightness = lock(&self.brightness);
                if brightness.animation_updates_cache {
                    brightness.cached = value;
                }
            }
            Err(e) => log::warn!("{}: animation step to {} failed: {}", self.name, value, e),
        }
    }

    async fn on_end(&self) {
        let (applied, persisted) = {
            let brightness = lock(&self.brightness);
            let persisted = if brightness.animation_updates_cache && !brightness.overridden {
                Some(brightness.cached)
            } else {
                None
            };
            (brightness.applied, persisted)
        };
        if let Some(value) = persisted {
            self.persist(value).await;
        }
        log::debug!("{}: settled at {}", self.name, applied);
        self.notify(DisplayEvent::BrightnessSettled {
            display: self.display,
            value: applied,
        });
    }

    fn discount_brightness(&self, discount: f64) {
        log::debug!("{}: discount set to {}", self.name, discount);
        lock(&self.brightness).discount = discount;
    }
}
