//! Nonce Capture - passive MIFARE Classic authentication sniffer
//!
//! Reads frames from an external ISO14443A sniffer, correlates authentication
//! rounds and prints every completed key-recovery record as a JSON line.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use crossbeam_channel::Receiver;
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use nonce_capture::capture::capture_channel;
use nonce_capture::config::Config;
use nonce_capture::correlator::Correlator;
use nonce_capture::demux::Demultiplexer;
use nonce_capture::handoff::KeyRecoveryRecord;
use nonce_capture::rf::sniffer::SnifferProcess;
use nonce_capture::trace_log::TraceLogger;

/// One stdout line per completed session
#[derive(Serialize)]
struct RecordLine<'a> {
    timestamp: String,
    record: &'a KeyRecoveryRecord,
    mfkey32: String,
}

fn print_records(rx: Receiver<KeyRecoveryRecord>) -> u64 {
    let mut printed = 0u64;

    for record in rx.iter() {
        info!("[KeyRecovery] {}", record);

        let line = RecordLine {
            timestamp: Utc::now().to_rfc3339(),
            record: &record,
            mfkey32: record.mfkey32_args(),
        };
        match serde_json::to_string(&line) {
            Ok(json) => {
                println!("{}", json);
                printed += 1;
            }
            Err(e) => warn!("Failed to serialize record: {}", e),
        }
    }

    printed
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("===========================================");
    info!("   Nonce Capture - ISO14443A sniffer");
    info!("   MIFARE Classic auth correlator");
    info!("===========================================");

    let config = Config::from_env();

    info!("Configuration:");
    info!("  Sniffer: {} {}", config.sniffer_path, config.sniffer_args.join(" "));
    info!("  Channel capacity: {} frames", config.channel_capacity);
    info!("  Submit timeout: {} ms", config.submit_timeout_ms);
    info!("  Poll timeout: {} ms", config.poll_timeout_ms);
    info!("  Stats interval: {} s", config.stats_interval_secs);

    let stop = Arc::new(AtomicBool::new(false));
    let (producer, consumer) = capture_channel(config.channel_capacity, config.submit_timeout());
    let (record_tx, record_rx) = crossbeam_channel::unbounded::<KeyRecoveryRecord>();

    let mut demux = Demultiplexer::new(consumer, config.demux_config(), stop.clone());
    demux.register_backend(Box::new(Correlator::new().with_handoff(record_tx)));
    demux.register_backend(Box::new(TraceLogger::new()));
    let worker = demux.spawn()?;

    let printer = tokio::task::spawn_blocking(move || print_records(record_rx));

    let sniffer = SnifferProcess::new(config.sniffer_config());
    let sniffer_handle = match sniffer.start(producer) {
        Ok(handle) => handle,
        Err(e) => {
            error!("Failed to start sniffer: {}", e);
            error!("Set SNIFFER_PATH to the sniffer executable.");
            worker.stop();
            let _ = worker.join();
            return Err(e);
        }
    };

    let ctrl_c_stop = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, shutting down...");
            ctrl_c_stop.store(true, Ordering::SeqCst);
        }
    });

    info!("===========================================");
    info!("  Starting capture...");
    info!("  Press Ctrl+C to stop.");
    info!("===========================================");

    while !stop.load(Ordering::SeqCst) {
        if !sniffer.is_running() {
            warn!("Sniffer exited");
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    // Cleanup. On Ctrl+C the worker stops at once; when the sniffer exits on
    // its own the reader drops the producer and the worker drains what is
    // still queued before it sees the disconnect.
    sniffer.stop();
    if sniffer_handle.join().is_err() {
        warn!("Sniffer reader thread panicked");
    }

    let sinks = tokio::task::spawn_blocking(move || worker.join())
        .await
        .context("Failed to join capture worker")??;
    for sink in &sinks {
        if let Some(summary) = sink.summary() {
            info!("[{}] final: {}", sink.name(), summary);
        }
    }
    // Dropping the correlator closes the hand-off channel
    drop(sinks);

    let printed = printer.await.context("Record printer failed")?;
    info!("Shutdown complete. Records exported: {}", printed);
    Ok(())
}
