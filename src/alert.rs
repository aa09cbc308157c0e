//! Alert Controller: Calm / Warning state machine gated on how long posture
//! has been continuously not-GOOD.

use serde::{Deserialize, Serialize};

use crate::types::PostureState;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPhase {
    Calm,
    Warning,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertEvent {
    /// Calm -> Warning, fired once per bad episode.
    FirstWarning,
    /// Fired on every tick while the bad episode has outlasted the delay.
    Escalated { elapsed_ms: u64 },
    /// Warning -> Calm.
    Cleared,
}

/// Start of the current bad episode. Being "currently bad" is exactly
/// `bad_since_ms.is_some()`, so the two can never disagree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AlertTimer {
    bad_since_ms: Option<u64>,
}

impl AlertTimer {
    pub fn bad_since_ms(&self) -> Option<u64> {
        self.bad_since_ms
    }

    pub fn is_currently_bad(&self) -> bool {
        self.bad_since_ms.is_some()
    }
}

#[derive(Clone, Debug)]
pub struct AlertController {
    delay_ms: u64,
    timer: AlertTimer,
}

impl AlertController {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            timer: AlertTimer::default(),
        }
    }

    pub fn phase(&self) -> AlertPhase {
        if self.timer.is_currently_bad() {
            AlertPhase::Warning
        } else {
            AlertPhase::Calm
        }
    }

    pub fn timer(&self) -> AlertTimer {
        self.timer
    }

    /// Time spent in the current bad episode.
    pub fn elapsed_ms(&self, now_ms: u64) -> Option<u64> {
        self.timer.bad_since_ms.map(|since| now_ms.saturating_sub(since))
    }

    pub fn update(&mut self, state: PostureState, now_ms: u64) -> Option<AlertEvent> {
        if state.is_good() {
            return self.timer.bad_since_ms.take().map(|since| {
                log::info!(
                    "[alert] posture recovered after {:.1}s",
                    now_ms.saturating_sub(since) as f64 / 1000.0
                );
                AlertEvent::Cleared
            });
        }

        match self.timer.bad_since_ms {
            None => {
                self.timer.bad_since_ms = Some(now_ms);
                log::info!("[alert] {} detected, first warning", state);
                Some(AlertEvent::FirstWarning)
            }
            Some(since) if now_ms < since => {
                // clock restarted mid-episode; time it from here
                self.timer.bad_since_ms = Some(now_ms);
                None
            }
            Some(since) => {
                let elapsed_ms = now_ms - since;
                if elapsed_ms > self.delay_ms {
                    log::debug!("[alert] {} sustained for {}ms, escalating", state, elapsed_ms);
                    Some(AlertEvent::Escalated { elapsed_ms })
                } else {
                    None
                }
            }
        }
    }

    pub fn reset(&mut self) {
        self.timer = AlertTimer::default();
    }
}
