//! Thread-safe interval history.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use super::models::*;

/// Seconds between the end of a closed interval and the start of its successor.
pub const BOUNDARY_OFFSET_SECS: i64 = 1;

/// History error types.
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("history is empty")]
    EmptyHistory,
    #[error("malformed history: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("interval {0} is open but is not the head of the history")]
    OpenTail(usize),
    #[error("the head of the history is closed")]
    ClosedHead,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Interval sequence, most recent first. The front is the head.
#[derive(Debug, Default)]
pub struct History {
    intervals: VecDeque<Interval>,
}

impl History {
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn head(&self) -> Option<&Interval> {
        self.intervals.front()
    }

    pub fn head_state(&self) -> Option<State> {
        self.head().map(|h| h.state)
    }

    /// Close the head at `at` and open a new head in `state`.
    ///
    /// Returns false without touching anything when the head is already in
    /// `state`.
    pub fn append_and_rotate(&mut self, state: State, at: DateTime<Utc>) -> bool {
        if let Some(head) = self.intervals.front_mut() {
            if head.state == state {
                tracing::warn!("Refusing to rotate history into its current state {}", state);
                return false;
            }
            head.end = Some(at);
        }

        self.intervals
            .push_front(Interval::open(state, at + ChronoDuration::seconds(BOUNDARY_OFFSET_SECS)));
        true
    }

    fn seed_if_empty(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_empty() {
            return false;
        }
        self.intervals.push_front(Interval::open(State::Start, now));
        true
    }

    fn to_vec(&self) -> Vec<Interval> {
        self.intervals.iter().cloned().collect()
    }
}

/// Mutex-guarded history shared between the monitor, the exporter and the
/// web handlers.
#[derive(Debug, Default)]
pub struct HistoryStore {
    history: Mutex<History>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the history for a multi-step operation.
    pub(crate) fn lock(&self) -> MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed an empty history with an open START interval.
    pub fn seed_if_empty(&self, now: DateTime<Utc>) -> bool {
        self.lock().seed_if_empty(now)
    }

    /// Close the head at `at` and open a new head in `state`.
    ///
    /// The monitor rotates through [`HistoryStore::lock`] so its check and
    /// rotation share one critical section.
    #[cfg(test)]
    pub fn append_and_rotate(&self, state: State, at: DateTime<Utc>) -> bool {
        self.lock().append_and_rotate(state, at)
    }

    /// Point-in-time copy of the whole history, most recent first.
    pub fn snapshot(&self) -> Vec<Interval> {
        self.lock().to_vec()
    }

    #[cfg(test)]
    pub fn head_state(&self) -> Option<State> {
        self.lock().head_state()
    }

    /// Replace the whole history. The first interval becomes the head.
    pub fn replace(&self, intervals: Vec<Interval>) -> Result<(), HistoryError> {
        if intervals.is_empty() {
            return Err(HistoryError::EmptyHistory);
        }

        let mut history = self.lock();
        history.intervals = intervals.into();
        Ok(())
    }
}
