//! Bounded capture channel between the RF producer and the worker
//!
//! The producer side encodes header and payload into a single chunk so a
//! frame is written atomically. If the channel stays full for longer than the
//! submit timeout the frame is dropped and counted as a capture gap.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use tracing::{debug, warn};

use crate::frame::{Direction, RfFrame};

use super::assembler::{AssemblyState, FrameAssembler};
use super::header::encode_frame;
use super::{CaptureError, CaptureStats};

/// Create a capture channel holding at most `capacity` frames in flight
pub fn capture_channel(capacity: usize, submit_timeout: Duration) -> (CaptureProducer, CaptureConsumer) {
    let (tx, rx) = bounded::<Vec<u8>>(capacity);
    let stats = CaptureStats::new();

    let producer = CaptureProducer {
        tx,
        submit_timeout,
        stats: stats.clone(),
    };
    let consumer = CaptureConsumer {
        rx,
        assembler: FrameAssembler::new(),
        stats,
    };

    (producer, consumer)
}

/// Writing end, owned by the real-time RF context
#[derive(Clone)]
pub struct CaptureProducer {
    tx: Sender<Vec<u8>>,
    submit_timeout: Duration,
    stats: Arc<CaptureStats>,
}

impl CaptureProducer {
    /// Submit one frame. Blocks at most the configured submit timeout.
    pub fn submit(
        &self,
        direction: Direction,
        crc_dropped: bool,
        payload: &[u8],
    ) -> Result<(), CaptureError> {
        let chunk = encode_frame(direction, crc_dropped, payload)?;

        match self.tx.send_timeout(chunk, self.submit_timeout) {
            Ok(()) => {
                self.stats.frames_submitted.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .bytes_submitted
                    .fetch_add(payload.len() as u64, Ordering::Relaxed);
                Ok(())
            }
            Err(SendTimeoutError::Timeout(_)) => {
                let gaps = self.stats.capture_gaps.fetch_add(1, Ordering::Relaxed) + 1;
                debug!("Capture channel full, dropping {} frame ({} gaps)", direction.label(), gaps);
                Err(CaptureError::CaptureGap)
            }
            Err(SendTimeoutError::Disconnected(_)) => Err(CaptureError::Disconnected),
        }
    }

    pub fn submit_frame(&self, frame: &RfFrame) -> Result<(), CaptureError> {
        self.submit(frame.direction(), frame.crc_dropped(), frame.payload())
    }

    pub fn stats(&self) -> &Arc<CaptureStats> {
        &self.stats
    }
}

/// Reading end, owned by the demultiplexer worker
pub struct CaptureConsumer {
    rx: Receiver<Vec<u8>>,
    assembler: FrameAssembler,
    stats: Arc<CaptureStats>,
}

impl CaptureConsumer {
    /// Wait up to `timeout` for the next complete frame.
    ///
    /// Returns `Ok(None)` when the timeout elapses first and
    /// `Err(CaptureError::Disconnected)` once every producer is gone and the
    /// buffered frames have all been delivered.
    pub fn drain(&mut self, timeout: Duration) -> Result<Option<RfFrame>, CaptureError> {
        let deadline = Instant::now() + timeout;

        loop {
            match self.assembler.next_frame() {
                Ok(Some(frame)) => {
                    self.stats.frames_drained.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(frame));
                }
                Ok(None) => {}
                Err(e) => {
                    // Chunks always start on a frame boundary, so resync at the next one
                    warn!("Capture stream desynchronized: {}", e);
                    self.stats.malformed_headers.fetch_add(1, Ordering::Relaxed);
                    self.assembler.reset();
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(chunk) => self.assembler.push(&chunk),
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    if self.assembler.pending_bytes() > 0 {
                        debug!(
                            "Discarding {} bytes of an incomplete frame at disconnect",
                            self.assembler.pending_bytes()
                        );
                        self.assembler.reset();
                    }
                    return Err(CaptureError::Disconnected);
                }
            }
        }
    }

    /// Current reassembly phase
    pub fn assembly_state(&self) -> AssemblyState {
        self.assembler.state()
    }

    pub fn stats(&self) -> &Arc<CaptureStats> {
        &self.stats
    }
}
