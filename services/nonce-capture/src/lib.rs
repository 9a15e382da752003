//! ISO14443A / MIFARE Classic authentication capture
//!
//! Sniffed frames flow through a bounded capture channel into a worker that
//! classifies them and fans them out to backends. The correlator backend
//! rebuilds two-round authentication sessions and hands completed ones to key
//! recovery. The active controller collects the same material by emulating a
//! tag.

pub mod capture;
pub mod card;
pub mod config;
pub mod controller;
pub mod correlator;
pub mod demux;
pub mod frame;
pub mod handoff;
pub mod mifare;
pub mod rf;
pub mod session;
pub mod trace_log;
