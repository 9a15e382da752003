//! Sniffer process producer
//!
//! Spawns an external sniffer and turns its stdout into capture channel
//! frames. One frame per line:
//!
//! ```text
//! *R6005f7e1;     reader-to-tag, CRC included
//! *T-01200145;    tag-to-reader, CRC already stripped ('-')
//! ```

use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use crate::capture::{CaptureError, CaptureProducer};
use crate::frame::{Direction, RfFrame};

/// Sniffer command line
#[derive(Debug, Clone)]
pub struct SnifferConfig {
    pub path: String,
    pub args: Vec<String>,
}

/// Statistics for the sniffer (atomic for thread-safe access)
#[derive(Debug, Default)]
pub struct SnifferStats {
    pub lines_read: AtomicU64,
    pub frames_submitted: AtomicU64,
    pub parse_errors: AtomicU64,
    pub frames_lost: AtomicU64,
}

/// Parse one sniffer output line into a frame
pub fn parse_trace_line(line: &str) -> Option<RfFrame> {
    let body = line.trim().strip_prefix('*')?;
    let end_idx = body.find(';')?;
    let body = &body[..end_idx];

    let mut chars = body.chars();
    let direction = match chars.next()? {
        'R' => Direction::ReaderToTag,
        'T' => Direction::TagToReader,
        _ => return None,
    };

    let rest = chars.as_str();
    let (crc_dropped, hex_str) = match rest.strip_prefix('-') {
        Some(hex_str) => (true, hex_str),
        None => (false, rest),
    };

    if hex_str.is_empty() || hex_str.len() % 2 != 0 {
        return None;
    }

    let payload = hex::decode(hex_str).ok()?;
    Some(RfFrame::new(direction, crc_dropped, payload))
}

/// Read lines until EOF or stop, submitting every parsed frame
pub fn pump_lines<R: BufRead>(
    reader: R,
    producer: &CaptureProducer,
    running: &AtomicBool,
    stats: &SnifferStats,
) {
    let mut first_frame = true;

    for line in reader.lines() {
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let line = match line {
            Ok(line) => line,
            Err(e) => {
                error!("Error reading sniffer output: {}", e);
                break;
            }
        };
        stats.lines_read.fetch_add(1, Ordering::Relaxed);

        let Some(frame) = parse_trace_line(&line) else {
            if !line.trim().is_empty() {
                stats.parse_errors.fetch_add(1, Ordering::Relaxed);
                debug!("Failed to parse sniffer line: {}", line);
            }
            continue;
        };

        if first_frame {
            info!("First frame received from sniffer");
            first_frame = false;
        }

        match producer.submit_frame(&frame) {
            Ok(()) => {
                stats.frames_submitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(CaptureError::Disconnected) => {
                warn!("Capture channel closed, stopping sniffer");
                break;
            }
            Err(_) => {
                stats.frames_lost.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// External sniffer process controller
pub struct SnifferProcess {
    config: SnifferConfig,
    running: Arc<AtomicBool>,
    stats: Arc<SnifferStats>,
    child: Arc<Mutex<Option<Child>>>,
}

impl SnifferProcess {
    pub fn new(config: SnifferConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(SnifferStats::default()),
            child: Arc::new(Mutex::new(None)),
        }
    }

    /// Spawn the sniffer and a reader thread feeding `producer`
    pub fn start(&self, producer: CaptureProducer) -> Result<JoinHandle<()>> {
        info!("Starting sniffer: {} {}", self.config.path, self.config.args.join(" "));

        let mut child = Command::new(&self.config.path)
            .args(&self.config.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn sniffer {}", self.config.path))?;

        let stdout = child
            .stdout
            .take()
            .context("Failed to capture sniffer stdout")?;

        if let Some(stderr) = child.stderr.take() {
            thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    if !line.trim().is_empty() {
                        info!("[sniffer] {}", line.trim());
                    }
                }
            });
        }

        if let Ok(mut slot) = self.child.lock() {
            *slot = Some(child);
        }
        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let stats = self.stats.clone();
        let child = self.child.clone();

        thread::Builder::new()
            .name("sniffer-rx".to_string())
            .spawn(move || {
                pump_lines(BufReader::new(stdout), &producer, &running, &stats);
                running.store(false, Ordering::SeqCst);
                kill_child(&child);
                info!(
                    "Sniffer stopped. Lines: {}, Frames: {}, Parse errors: {}, Lost: {}",
                    stats.lines_read.load(Ordering::Relaxed),
                    stats.frames_submitted.load(Ordering::Relaxed),
                    stats.parse_errors.load(Ordering::Relaxed),
                    stats.frames_lost.load(Ordering::Relaxed)
                );
            })
            .context("Failed to spawn sniffer reader thread")
    }

    /// Stop the sniffer. Killing the child unblocks the reader thread.
    pub fn stop(&self) {
        info!("Stopping sniffer...");
        self.running.store(false, Ordering::SeqCst);
        kill_child(&self.child);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> &Arc<SnifferStats> {
        &self.stats
    }
}

impl Drop for SnifferProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

fn kill_child(child: &Mutex<Option<Child>>) {
    if let Ok(mut slot) = child.lock() {
        if let Some(mut child) = slot.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
