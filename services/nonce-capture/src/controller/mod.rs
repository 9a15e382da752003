//! Active nonce-capture controller
//!
//! Emulates a MIFARE Classic tag towards a reader, answers two AUTH attempts
//! with nonces of our choosing and keeps the reader's encrypted answers. The
//! two rounds run in separate emulation sessions since the radio cannot take
//! a second AUTH within one listen session.

mod machine;
mod state;

use std::time::{Duration, Instant};

use thiserror::Error;

use crate::card::CardType;
use crate::rf::RfError;

pub use machine::NonceCaptureController;
pub use state::ControllerState;

/// Source of the free-running counter the tag nonce is derived from
pub trait CycleCounter {
    fn read(&self) -> u32;
}

/// Host counter: nanoseconds since construction, truncated to 32 bits
#[derive(Debug, Clone, Copy)]
pub struct MonotonicCycleCounter {
    origin: Instant,
}

impl MonotonicCycleCounter {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicCycleCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleCounter for MonotonicCycleCounter {
    fn read(&self) -> u32 {
        self.origin.elapsed().as_nanos() as u32
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Bound on every wait for the reader
    pub round_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            round_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("{0} does not support crypto1 authentication")]
    UnsupportedCard(CardType),

    #[error("reader did not answer in {0}")]
    TransportTimeout(&'static str),

    #[error("capture cancelled")]
    Cancelled,

    #[error("transport error: {0}")]
    Transport(RfError),
}

impl ControllerError {
    /// Failures that ended a running attempt. The attempt's session is discarded.
    pub fn is_session_abort(&self) -> bool {
        !matches!(self, Self::UnsupportedCard(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_counter_advances() {
        let counter = MonotonicCycleCounter::new();
        let first = counter.read();
        std::thread::sleep(Duration::from_millis(2));
        assert_ne!(counter.read(), first);
    }

    #[test]
    fn test_session_abort_classification() {
        assert!(ControllerError::Cancelled.is_session_abort());
        assert!(ControllerError::TransportTimeout("AwaitAuth").is_session_abort());
        assert!(ControllerError::Transport(RfError::Busy).is_session_abort());
        assert!(!ControllerError::UnsupportedCard(CardType::MifareUltralight).is_session_abort());
    }
}
