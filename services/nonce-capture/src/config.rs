//! Configuration loaded from environment variables

use std::time::Duration;

use crate::demux::DemuxConfig;
use crate::rf::sniffer::SnifferConfig;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the sniffer executable
    pub sniffer_path: String,

    /// Extra sniffer arguments, whitespace separated in the environment
    pub sniffer_args: Vec<String>,

    /// Capture channel capacity in frames
    pub channel_capacity: usize,

    /// How long a producer may wait for channel space before dropping a frame
    pub submit_timeout_ms: u64,

    /// Worker poll timeout in milliseconds
    pub poll_timeout_ms: u64,

    /// Statistics summary interval in seconds
    pub stats_interval_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            sniffer_path: var("SNIFFER_PATH").unwrap_or_else(|| "nfc-sniffer".to_string()),

            sniffer_args: var("SNIFFER_ARGS")
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),

            channel_capacity: var("CAPTURE_CHANNEL_CAPACITY")
                .and_then(|s| s.parse().ok())
                .filter(|&n| n > 0)
                .unwrap_or(512),

            submit_timeout_ms: var("SUBMIT_TIMEOUT_MS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),

            poll_timeout_ms: var("POLL_TIMEOUT_MS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(100),

            stats_interval_secs: var("STATS_INTERVAL_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
        }
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }

    pub fn demux_config(&self) -> DemuxConfig {
        DemuxConfig {
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
            stats_interval: Duration::from_secs(self.stats_interval_secs),
        }
    }

    pub fn sniffer_config(&self) -> SnifferConfig {
        SnifferConfig {
            path: self.sniffer_path.clone(),
            args: self.sniffer_args.clone(),
        }
    }
}
