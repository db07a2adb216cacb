//! Configuration module for pingtrail.
//!
//! Options come from the command line, with environment variable fallbacks.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::monitor::MonitorConfig;
use crate::probe::PingerConfig;

/// Ping a host and generate a downtime report.
#[derive(Debug, Clone, Parser)]
#[command(name = "pingtrail", version)]
pub struct Config {
    /// Host to monitor
    #[arg(env = "PINGTRAIL_HOST")]
    pub host: String,

    /// Local port to listen for web requests
    #[arg(short, long, env = "PINGTRAIL_HTTP_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Write the history to this JSON file periodically
    #[arg(short, long, env = "PINGTRAIL_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Restore the history from this JSON file at start-up
    #[arg(short, long, env = "PINGTRAIL_INPUT")]
    pub input: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, env = "PINGTRAIL_DEBUG")]
    pub debug: bool,

    /// Seconds a state must persist before it is recorded
    #[arg(long, env = "PINGTRAIL_DEBOUNCE_SECS", default_value_t = 10)]
    pub debounce_secs: u64,

    /// Milliseconds to wait for a reply before counting a timeout
    #[arg(long, env = "PINGTRAIL_DEADLINE_MS", default_value_t = 1100)]
    pub deadline_ms: u64,

    /// Seconds between history exports
    #[arg(long, env = "PINGTRAIL_EXPORT_SECS", default_value_t = 30)]
    pub export_secs: u64,

    /// Milliseconds between echo requests
    #[arg(long, env = "PINGTRAIL_INTERVAL_MS", default_value_t = 1000)]
    pub interval_ms: u64,

    /// Milliseconds a single echo request waits for its reply
    #[arg(long, env = "PINGTRAIL_ECHO_TIMEOUT_MS", default_value_t = 2000)]
    pub echo_timeout_ms: u64,
}

impl Config {
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            debounce_window: Duration::from_secs(self.debounce_secs),
            deadline: Duration::from_millis(self.deadline_ms.max(1)),
        }
    }

    pub fn pinger_config(&self) -> PingerConfig {
        PingerConfig {
            interval: Duration::from_millis(self.interval_ms.max(1)),
            timeout: Duration::from_millis(self.echo_timeout_ms.max(1)),
        }
    }

    pub fn export_cadence(&self) -> Duration {
        Duration::from_secs(self.export_secs.max(1))
    }

    /// Default log directive for the crate.
    pub fn log_directive(&self) -> &'static str {
        if self.debug {
            "pingtrail=debug"
        } else {
            "pingtrail=info"
        }
    }
}
