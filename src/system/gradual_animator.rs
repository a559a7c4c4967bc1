//! Stepwise brightness transitions.
//!
//! A [GradualAnimator] turns a `(from, to, duration)` request into a series
//! of brightness values, one per tick, delivered to an [AnimateCallback].
//! Ticks are scheduled through a [DelayScheduler], so callbacks run on the
//! scheduler's tasks and not on the caller's.

use crate::{
    external::scheduler::{DelayScheduler, TaskHandle},
    util::lock,
};
use async_trait::async_trait;
use std::{
    sync::{Arc, Mutex, Weak},
    time::Duration,
};
use thiserror::Error;

/// Tick used when the configuration doesn't say otherwise
pub const DEFAULT_TICK: Duration = Duration::from_millis(30);

const STRIDE_ABSOLUTE_MIN: i64 = 1;

/// Receives the progress of an animation.
#[async_trait]
pub trait AnimateCallback: Send + Sync {
    async fn on_start(&self);

    async fn on_changed(&self, value: u32);

    /// Called when an animation reaches its target or is stopped.
    async fn on_end(&self);

    /// Update the factor by which brightness is scaled before it's written.
    fn discount_brightness(&self, discount: f64);
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AnimationError {
    #[error("an animation is already running")]
    AlreadyRunning,

    #[error("no callback attached to the animator")]
    NullCallback,

    #[error("nothing to animate, already at {0}")]
    Degenerate(u32),
}

/// Step count and per-step delta of a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepPlan {
    pub total_steps: u64,
    pub stride: i64,
}

impl StepPlan {
    /// Returns `None` if `from == to`.
    ///
    /// The naive step count is `duration / tick` (at least one). The stride
    /// is the delta divided by that, but never smaller than one unit, and the
    /// step count is then recomputed so that `total_steps * |stride|` covers
    /// the whole delta. For small deltas the animation can thus take longer
    /// than `duration`.
    pub fn new(from: u32, to: u32, duration: Duration, tick: Duration) -> Option<StepPlan> {
        let delta = to as i64 - from as i64;
        if delta == 0 {
            return None;
        }
        let tick_ms = tick.as_millis().max(1);
        let naive_steps = (duration.as_millis() / tick_ms).clamp(1, i64::MAX as u128) as i64;
        let mut stride = delta / naive_steps;
        if stride.abs() < STRIDE_ABSOLUTE_MIN {
            stride = delta.signum() * STRIDE_ABSOLUTE_MIN;
        }
        let total_steps = (delta.abs() + stride.abs() - 1) / stride.abs();
        Some(StepPlan {
            total_steps: total_steps as u64,
            stride,
        })
    }
}

#[derive(Debug, Default)]
struct AnimationSession {
    from: i64,
    to: i64,
    current: i64,
    duration: Duration,
    total_steps: u64,
    current_step: u64,
    stride: i64,
    active: bool,
    // Bumped on every start so that a step of an earlier session which was
    // already running during a restart can't continue the new one.
    generation: u64,
    pending_step: Option<TaskHandle>,
}

/// What a single step has to report to the callback
struct StepOutcome {
    first: bool,
    value: u32,
    finished: bool,
}

struct AnimatorCore {
    name: String,
    tick: Duration,
    callback: Weak<dyn AnimateCallback>,
    scheduler: Arc<dyn DelayScheduler>,
    session: Mutex<AnimationSession>,
}

impl AnimatorCore {
    fn schedule_step(self: &Arc<Self>, generation: u64) -> TaskHandle {
        let core = self.clone();
        self.scheduler
            .submit_after(self.tick, Box::pin(core.next_step(generation)))
    }

    fn advance(&self, generation: u64) -> Option<StepOutcome> {
        let mut session = lock(&self.session);
        if !session.active || session.generation != generation {
            log::debug!("{}: step of a stopped animation, ignoring", self.name);
            return None;
        }
        session.pending_step = None;
        session.current_step += 1;
        let first = session.current_step == 1;
        let finished = if session.current_step <= session.total_steps {
            let next = session.current + session.stride;
            let overshoot = if session.stride > 0 {
                next >= session.to
            } else {
                next <= session.to
            };
            session.current = if overshoot { session.to } else { next };
            overshoot
        } else {
            log::warn!(
                "{}: ran out of steps at {} before reaching {}",
                self.name,
                session.current,
                session.to
            );
            session.current = session.to;
            true
        };
        if finished {
            session.active = false;
        }
        log::trace!(
            "{}: step {}/{}, brightness {}, stride {}",
            self.name,
            session.current_step,
            session.total_steps,
            session.current,
            session.stride
        );
        Some(StepOutcome {
            first,
            value: session.current as u32,
            finished,
        })
    }

    async fn next_step(self: Arc<Self>, generation: u64) {
        let callback = match self.callback.upgrade() {
            Some(callback) => callback,
            None => {
                log::warn!("{}: callback is gone, dropping step", self.name);
                return;
            }
        };
        let outcome = match self.advance(generation) {
            Some(outcome) => outcome,
            None => return,
        };
        if outcome.first {
            callback.on_start().await;
        }
        callback.on_changed(outcome.value).await;
        if outcome.finished {
            log::debug!("{}: reached {}", self.name, outcome.value);
            callback.on_end().await;
            return;
        }
        let mut session = lock(&self.session);
        if session.active && session.generation == generation {
            session.pending_step = Some(self.schedule_step(generation));
        }
    }
}

/// Drives one brightness transition at a time.
///
/// The animator only holds a weak reference to its callback; the owner of
/// the callback is expected to outlive every animation it starts and to stop
/// the animator before going away.
pub struct GradualAnimator {
    core: Arc<AnimatorCore>,
}

impl GradualAnimator {
    pub fn new(
        name: &str,
        callback: Weak<dyn AnimateCallback>,
        scheduler: Arc<dyn DelayScheduler>,
        tick: Duration,
    ) -> GradualAnimator {
        log::debug!("{}: animator created with tick {:?}", name, tick);
        GradualAnimator {
            core: Arc::new(AnimatorCore {
                name: name.to_owned(),
                tick,
                callback,
                scheduler,
                session: Mutex::new(AnimationSession::default()),
            }),
        }
    }

    /// Starts moving from `from` to `to` over roughly `duration`. The first
    /// value is delivered one tick from now.
    pub fn start_animation(&self, from: u32, to: u32, duration: Duration) -> Result<(), AnimationError> {
        let core = &self.core;
        let mut session = lock(&core.session);
        if session.active {
            log::info!(
                "{}: already animating, not starting {} -> {}",
                core.name,
                from,
                to
            );
            return Err(AnimationError::AlreadyRunning);
        }
        if core.callback.strong_count() == 0 {
            log::warn!("{}: no callback attached, not animating", core.name);
            return Err(AnimationError::NullCallback);
        }
        let plan = StepPlan::new(from, to, duration, core.tick).ok_or(AnimationError::Degenerate(from))?;
        log::debug!(
            "{}: animating {} -> {} over {:?} in {} steps of {}",
            core.name,
            from,
            to,
            duration,
            plan.total_steps,
            plan.stride
        );
        let generation = session.generation.wrapping_add(1);
        *session = AnimationSession {
            from: from as i64,
            to: to as i64,
            current: from as i64,
            duration,
            total_steps: plan.total_steps,
            current_step: 0,
            stride: plan.stride,
            active: true,
            generation,
            pending_step: None,
        };
        session.pending_step = Some(core.schedule_step(generation));
        Ok(())
    }

    /// Stops the running animation, if any, and reports `on_end` to the
    /// callback. The end is reported even when nothing was running.
    pub async fn stop_animation(&self) {
        let pending_step = {
            let mut session = lock(&self.core.session);
            if session.active {
                log::debug!(
                    "{}: stopping {} -> {} at {} (step {}/{}, requested {:?})",
                    self.core.name,
                    session.from,
                    session.to,
                    session.current,
                    session.current_step,
                    session.total_steps,
                    session.duration
                );
            }
            session.active = false;
            session.pending_step.take()
        };
        if let Some(handle) = pending_step {
            self.core.scheduler.cancel(handle);
        }
        match self.core.callback.upgrade() {
            Some(callback) => callback.on_end().await,
            None => log::warn!("{}: no callback to report the stop to", self.core.name),
        }
    }

    pub fn is_animating(&self) -> bool {
        lock(&self.core.session).active
    }

    pub fn tick_interval(&self) -> Duration {
        self.core.tick
    }
}
