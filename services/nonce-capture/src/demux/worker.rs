//! Demultiplexer worker - drains the capture channel and fans frames out
//!
//! Runs on its own thread as the sole consumer of the capture channel and the
//! sole caller of backend `handle`. Stops when the stop flag is raised (seen
//! within one poll timeout) or when every producer has gone away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info};

use crate::capture::{AssemblyState, CaptureConsumer, CaptureError};
use crate::frame::RfFrame;

use super::classify::CardObserver;
use super::sink::FrameSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    ReadHeader,
    ReadPayload,
    Dispatch,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct DemuxConfig {
    /// Upper bound on each wait for channel data
    pub poll_timeout: Duration,
    /// Interval between statistics summaries
    pub stats_interval: Duration,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(100),
            stats_interval: Duration::from_secs(10),
        }
    }
}

pub struct Demultiplexer {
    consumer: CaptureConsumer,
    sinks: Vec<Box<dyn FrameSink>>,
    observer: CardObserver,
    config: DemuxConfig,
    stop: Arc<AtomicBool>,
    state: WorkerState,
    frames_dispatched: u64,
}

impl Demultiplexer {
    pub fn new(consumer: CaptureConsumer, config: DemuxConfig, stop: Arc<AtomicBool>) -> Self {
        Self {
            consumer,
            sinks: Vec::new(),
            observer: CardObserver::new(),
            config,
            stop,
            state: WorkerState::Idle,
            frames_dispatched: 0,
        }
    }

    /// Add a backend. Backends see frames in registration order.
    pub fn register_backend(&mut self, sink: Box<dyn FrameSink>) {
        info!("Registered capture backend: {}", sink.name());
        self.sinks.push(sink);
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn frames_dispatched(&self) -> u64 {
        self.frames_dispatched
    }

    /// Classify one frame and hand it to every backend
    pub fn dispatch(&mut self, frame: &RfFrame) {
        self.state = WorkerState::Dispatch;
        let card = self.observer.observe(frame);
        for sink in self.sinks.iter_mut() {
            sink.handle(frame, card);
        }
        self.frames_dispatched += 1;
        self.state = WorkerState::ReadHeader;
    }

    /// Wait up to one poll timeout for a frame and dispatch it.
    /// Returns `Ok(false)` when nothing arrived.
    pub fn poll_once(&mut self) -> Result<bool, CaptureError> {
        match self.consumer.drain(self.config.poll_timeout) {
            Ok(Some(frame)) => {
                self.dispatch(&frame);
                Ok(true)
            }
            Ok(None) => {
                self.state = match self.consumer.assembly_state() {
                    AssemblyState::ReadHeader => WorkerState::ReadHeader,
                    AssemblyState::ReadPayload(_) => WorkerState::ReadPayload,
                };
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Worker loop. Returns the backends so the caller can inspect their final state.
    pub fn run(mut self) -> Vec<Box<dyn FrameSink>> {
        info!("Capture worker started with {} backend(s)", self.sinks.len());
        self.state = WorkerState::ReadHeader;
        let mut last_summary = Instant::now();

        while !self.stop.load(Ordering::SeqCst) {
            match self.poll_once() {
                Ok(_) => {}
                Err(CaptureError::Disconnected) => {
                    info!("Capture channel closed");
                    break;
                }
                Err(e) => debug!("Capture drain error: {}", e),
            }

            if last_summary.elapsed() >= self.config.stats_interval {
                self.log_summary();
                last_summary = Instant::now();
            }
        }

        self.state = WorkerState::Stopped;
        self.log_summary();
        info!("Capture worker stopped. Frames dispatched: {}", self.frames_dispatched);

        self.sinks
    }

    fn log_summary(&self) {
        info!(
            "[Capture] Dispatched: {} | {}",
            self.frames_dispatched,
            self.consumer.stats().snapshot()
        );
        for sink in &self.sinks {
            if let Some(summary) = sink.summary() {
                info!("[{}] {}", sink.name(), summary);
            }
        }
    }

    /// Start the worker loop on a dedicated thread
    pub fn spawn(self) -> Result<WorkerHandle> {
        let stop = self.stop.clone();
        let handle = thread::Builder::new()
            .name("capture-demux".to_string())
            .spawn(move || self.run())
            .context("Failed to spawn capture worker thread")?;

        Ok(WorkerHandle { handle, stop })
    }
}

/// Handle to a running worker thread
pub struct WorkerHandle {
    handle: JoinHandle<Vec<Box<dyn FrameSink>>>,
    stop: Arc<AtomicBool>,
}

impl WorkerHandle {
    /// Ask the worker to stop; observed within one poll timeout
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the worker and take back its backends
    pub fn join(self) -> Result<Vec<Box<dyn FrameSink>>> {
        self.handle
            .join()
            .map_err(|_| anyhow!("Capture worker thread panicked"))
    }
}
