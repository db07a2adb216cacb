//! Interval record types.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Layout used when showing interval boundaries.
const TIME_LAYOUT: &str = "%Y-%m-%d %H:%M:%S";

/// Reachability state of an interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum State {
    /// Monitoring began, no debounced classification yet.
    Start,
    Up,
    Down,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Start => "START",
            State::Up => "UP",
            State::Down => "DOWN",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One contiguous period of a single reachability state.
///
/// An interval with no `end` is still open; only the head of a history
/// may be open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    #[serde(alias = "Start")]
    pub start: DateTime<Utc>,
    #[serde(
        alias = "End",
        default,
        deserialize_with = "deserialize_end",
        skip_serializing_if = "Option::is_none"
    )]
    pub end: Option<DateTime<Utc>>,
    #[serde(alias = "State")]
    pub state: State,
}

/// Older snapshot files mark the open interval with the zero timestamp
/// `0001-01-01T00:00:00Z` instead of leaving `end` out.
fn deserialize_end<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let end = Option::<DateTime<Utc>>::deserialize(deserializer)?;
    Ok(end.filter(|t| t.year() > 1))
}

impl Interval {
    /// Create a new open interval.
    pub fn open(state: State, start: DateTime<Utc>) -> Self {
        Self {
            start,
            end: None,
            state,
        }
    }

    pub fn is_active(&self) -> bool {
        self.end.is_none()
    }

    /// Length of the interval, rounded to whole seconds.
    ///
    /// Open intervals are measured up to `now`.
    pub fn duration(&self, now: DateTime<Utc>) -> ChronoDuration {
        let end = self.end.unwrap_or(now);
        round_to(end - self.start, 1)
    }

    /// Boundaries of the interval for display.
    pub fn time_range(&self) -> String {
        match self.end {
            None => format!("({})", self.start.format(TIME_LAYOUT)),
            Some(end) => format!(
                "({} to {})",
                self.start.format(TIME_LAYOUT),
                end.format(TIME_LAYOUT)
            ),
        }
    }

    /// How long ago the interval ended, bucketed for humans.
    pub fn relative_end(&self, now: DateTime<Utc>) -> String {
        let end = match self.end {
            Some(end) => end,
            None => return "now".to_string(),
        };

        let age = now - end;
        let text = if age > ChronoDuration::hours(2) {
            format!("{} hours", round_to(age, 3600).num_hours())
        } else if age > ChronoDuration::minutes(2) {
            format!("{} minutes", round_to(age, 60).num_minutes())
        } else {
            format!("{} seconds", round_to(age, 1).num_seconds())
        };

        format!("{} ago", text)
    }

    /// Human readable summary, e.g. `UP for 1h2m3s (2024-01-01 10:00:00)`.
    pub fn describe(&self, now: DateTime<Utc>) -> String {
        format!(
            "{} for {} {}",
            self.state,
            format_duration(self.duration(now)),
            self.time_range()
        )
    }
}

/// Round `d` to the nearest multiple of `unit_secs`, halves away from zero.
fn round_to(d: ChronoDuration, unit_secs: i64) -> ChronoDuration {
    let unit_ms = unit_secs * 1000;
    let ms = d.num_milliseconds();
    let half = unit_ms / 2;
    let rounded = if ms >= 0 {
        (ms + half) / unit_ms
    } else {
        (ms - half) / unit_ms
    };
    ChronoDuration::seconds(rounded * unit_secs)
}

/// Format a whole-second duration as `1h2m3s`, `4m5s` or `6s`.
pub fn format_duration(d: ChronoDuration) -> String {
    let total = d.num_seconds();
    let sign = if total < 0 { "-" } else { "" };
    let total = total.abs();
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);

    if h > 0 {
        format!("{}{}h{}m{}s", sign, h, m, s)
    } else if m > 0 {
        format!("{}{}m{}s", sign, m, s)
    } else {
        format!("{}{}s", sign, s)
    }
}
