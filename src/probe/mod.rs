//! Probe module for reachability monitoring.
//!
//! Sends ICMP echo requests to the monitored host and reports the round-trip
//! time of every reply on a channel. Missing replies are not reported; the
//! monitor notices them by their absence.

mod ping;

pub use ping::*;

use std::time::Duration;
use thiserror::Error;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("command failed: {0}")]
    Command(String),
    #[error("socket error: {0}")]
    Socket(String),
}

impl ProbeError {
    /// Whether the prober can no longer run at all.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProbeError::Config(_) | ProbeError::Command(_) | ProbeError::Socket(_)
        )
    }
}

/// Prober configuration.
#[derive(Debug, Clone)]
pub struct PingerConfig {
    /// Time between echo requests.
    pub interval: Duration,
    /// How long a single echo request waits for its reply.
    pub timeout: Duration,
}

impl Default for PingerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(2),
        }
    }
}
