//! Accelerometer fall detection.
//!
//! The monitor is a plain state machine. It never owns a timer: a threshold
//! crossing hands back a [`FallTimer`] that the caller schedules, and the
//! caller reports the deadline with [`FallMonitor::on_confirmation_due`].
//! Each timer carries a generation token. `stop` and every new suspicion bump
//! the generation, so a late or duplicated timer can never act on a newer
//! state.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::models::{FallState, MotionSample, STANDARD_GRAVITY};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FallConfig {
    /// Gravity-compensated magnitude that marks an impact.
    pub threshold: f32,
    /// Residual magnitude under which the user counts as "down and not moving".
    pub post_fall_threshold: f32,
    pub confirmation_window_ms: i64,
    pub gravity: f32,
}

impl Default for FallConfig {
    fn default() -> Self {
        Self {
            threshold: 20.0,
            post_fall_threshold: 2.0,
            confirmation_window_ms: 5_000,
            gravity: STANDARD_GRAVITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallTimer {
    pub generation: u64,
    pub due_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transition", rename_all = "snake_case")]
pub enum FallTransition {
    Unchanged,
    Suspected {
        started_at_ms: i64,
        magnitude: f32,
        timer: FallTimer,
    },
    Confirmed {
        started_at_ms: i64,
        confirmed_at_ms: i64,
        residual: f32,
    },
    FalseAlarm {
        started_at_ms: i64,
        residual: f32,
    },
}

#[derive(Debug, Clone)]
pub struct FallMonitor {
    config: FallConfig,
    active: bool,
    state: FallState,
    generation: u64,
    pending: Option<FallTimer>,
    fall_started_ms: Option<i64>,
    last_sample: Option<MotionSample>,
}

impl FallMonitor {
    pub fn new(config: FallConfig) -> Self {
        Self {
            config,
            active: false,
            state: FallState::Idle,
            generation: 0,
            pending: None,
            fall_started_ms: None,
            last_sample: None,
        }
    }

    pub fn config(&self) -> &FallConfig {
        &self.config
    }

    pub fn state(&self) -> FallState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn pending_timer(&self) -> Option<FallTimer> {
        self.pending
    }

    pub fn last_sample(&self) -> Option<&MotionSample> {
        self.last_sample.as_ref()
    }

    /// Returns `true` when monitoring was not already running.
    pub fn start(&mut self) -> bool {
        if self.active {
            return false;
        }
        self.active = true;
        self.reset();
        info!("fall monitoring started");
        true
    }

    /// Forces `Idle` and invalidates any pending confirmation timer, which is
    /// returned so the caller can drop it from its schedule.
    pub fn stop(&mut self) -> Option<FallTimer> {
        let cancelled = self.pending.take();
        if !self.active {
            return cancelled;
        }
        self.active = false;
        self.reset();
        info!(cancelled_timer = cancelled.is_some(), "fall monitoring stopped");
        cancelled
    }

    pub fn on_sample(&mut self, sample: MotionSample) -> FallTransition {
        if !self.active {
            return FallTransition::Unchanged;
        }
        if !sample.motion_magnitude(self.config.gravity).is_finite() {
            warn!(timestamp_ms = sample.timestamp_ms, "dropping non-finite motion sample");
            return FallTransition::Unchanged;
        }
        self.last_sample = Some(sample);

        match self.state {
            FallState::Suspected => FallTransition::Unchanged,
            _ => {
                // Confirmed is reported once; the next sample re-arms detection.
                self.state = FallState::Idle;
                let magnitude = sample.motion_magnitude(self.config.gravity);
                if magnitude <= self.config.threshold {
                    return FallTransition::Unchanged;
                }

                self.generation += 1;
                let timer = FallTimer {
                    generation: self.generation,
                    due_ms: sample
                        .timestamp_ms
                        .saturating_add(self.config.confirmation_window_ms),
                };
                self.state = FallState::Suspected;
                self.pending = Some(timer);
                self.fall_started_ms = Some(sample.timestamp_ms);
                warn!(
                    magnitude,
                    started_at_ms = sample.timestamp_ms,
                    due_ms = timer.due_ms,
                    "potential fall detected"
                );
                FallTransition::Suspected {
                    started_at_ms: sample.timestamp_ms,
                    magnitude,
                    timer,
                }
            }
        }
    }

    /// Resolves a suspicion at its deadline. A generation that does not match
    /// the outstanding timer is a no-op.
    pub fn on_confirmation_due(&mut self, generation: u64, now_ms: i64) -> FallTransition {
        let current = matches!(self.pending, Some(timer) if timer.generation == generation);
        if !current || self.state != FallState::Suspected {
            debug!(generation, "stale fall confirmation timer ignored");
            return FallTransition::Unchanged;
        }
        self.pending = None;

        let started_at_ms = self.fall_started_ms.take().unwrap_or(now_ms);
        let residual = self
            .last_sample
            .map(|sample| sample.motion_magnitude(self.config.gravity))
            .unwrap_or(0.0);

        if residual < self.config.post_fall_threshold {
            self.state = FallState::Confirmed;
            warn!(residual, started_at_ms, confirmed_at_ms = now_ms, "fall confirmed");
            FallTransition::Confirmed {
                started_at_ms,
                confirmed_at_ms: now_ms,
                residual,
            }
        } else {
            self.state = FallState::Idle;
            info!(residual, started_at_ms, "fall suspicion cleared, false alarm");
            FallTransition::FalseAlarm {
                started_at_ms,
                residual,
            }
        }
    }

    fn reset(&mut self) {
        self.generation += 1;
        self.state = FallState::Idle;
        self.pending = None;
        self.fall_started_ms = None;
        self.last_sample = None;
    }
}
