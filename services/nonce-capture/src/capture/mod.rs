//! Frame capture channel
//!
//! Carries self-delimiting frames from the real-time RF producer to the
//! background worker:
//! 1. Producer encodes `header ‖ payload` and submits it with a short timeout
//! 2. Consumer reassembles frames, never delivering a partial one
//! 3. Frames that could not be submitted in time are counted as capture gaps

mod assembler;
mod channel;
pub mod header;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;

pub use assembler::{AssemblyState, FrameAssembler};
pub use channel::{capture_channel, CaptureConsumer, CaptureProducer};
pub use header::CaptureHeader;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture channel full, frame dropped")]
    CaptureGap,

    #[error("payload of {0} bytes does not fit the 16-bit length field")]
    PayloadTooLong(usize),

    #[error("malformed capture header (flags {0:#04x})")]
    MalformedHeader(u8),

    #[error("capture channel disconnected")]
    Disconnected,
}

/// Channel statistics (atomic for thread-safe access)
#[derive(Debug, Default)]
pub struct CaptureStats {
    pub frames_submitted: AtomicU64,
    pub bytes_submitted: AtomicU64,
    pub frames_drained: AtomicU64,
    pub capture_gaps: AtomicU64,
    pub malformed_headers: AtomicU64,
}

impl CaptureStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> CaptureStatsSnapshot {
        CaptureStatsSnapshot {
            frames_submitted: self.frames_submitted.load(Ordering::Relaxed),
            bytes_submitted: self.bytes_submitted.load(Ordering::Relaxed),
            frames_drained: self.frames_drained.load(Ordering::Relaxed),
            capture_gaps: self.capture_gaps.load(Ordering::Relaxed),
            malformed_headers: self.malformed_headers.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`CaptureStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStatsSnapshot {
    pub frames_submitted: u64,
    pub bytes_submitted: u64,
    pub frames_drained: u64,
    pub capture_gaps: u64,
    pub malformed_headers: u64,
}

impl fmt::Display for CaptureStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frames: {} submitted, {} drained ({} bytes) | Capture gaps: {} | Malformed: {}",
            self.frames_submitted,
            self.frames_drained,
            self.bytes_submitted,
            self.capture_gaps,
            self.malformed_headers
        )
    }
}
