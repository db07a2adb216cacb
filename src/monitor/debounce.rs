//! Debounce state machine turning raw probe outcomes into state changes.
//!
//! A state change is only committed once the contrary signal has been absent
//! for longer than the debounce window:
//!
//! - a success ends any failure run, so it moves `fail_run_start` forward;
//! - a timeout ends any success run, so it moves `success_run_start` forward.
//!
//! The markers measure how long ago the last contrary outcome was seen, not
//! how many outcomes in a row agreed. A single success after a long outage
//! starts the clock towards UP even if timeouts resume right after.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

use crate::history::{History, HistoryStore, State};

/// Debounce tracking state for one monitored host.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: ChronoDuration,
    /// Start of the current success run (time of the last timeout).
    success_run_start: DateTime<Utc>,
    /// Start of the current failure run (time of the last success).
    fail_run_start: DateTime<Utc>,
}

impl Debouncer {
    /// Create a debouncer whose runs both begin at `now`.
    pub fn new(window: Duration, now: DateTime<Utc>) -> Self {
        Self {
            window: ChronoDuration::from_std(window).unwrap_or(ChronoDuration::MAX),
            success_run_start: now,
            fail_run_start: now,
        }
    }

    /// Record a reply that arrived within its deadline.
    ///
    /// Returns the new state if the history was rotated.
    pub fn observe_success(&mut self, store: &HistoryStore, at: DateTime<Utc>) -> Option<State> {
        let mut history = store.lock();
        self.fail_run_start = at;
        self.evaluate(&mut history, at)
    }

    /// Record a probe deadline that expired without a reply.
    ///
    /// Returns the new state if the history was rotated.
    pub fn observe_timeout(&mut self, store: &HistoryStore, at: DateTime<Utc>) -> Option<State> {
        let mut history = store.lock();
        self.success_run_start = at;
        self.evaluate(&mut history, at)
    }

    fn evaluate(&self, history: &mut History, now: DateTime<Utc>) -> Option<State> {
        let current = history.head_state();

        if now - self.success_run_start > self.window && current != Some(State::Up) {
            tracing::info!("Status is now UP");
            history.append_and_rotate(State::Up, self.success_run_start);
            Some(State::Up)
        } else if now - self.fail_run_start > self.window && current != Some(State::Down) {
            tracing::info!("Status is now DOWN");
            history.append_and_rotate(State::Down, self.fail_run_start);
            Some(State::Down)
        } else {
            None
        }
    }
}
