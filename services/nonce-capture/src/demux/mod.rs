//! Frame demultiplexer
//!
//! Drains the capture channel on a dedicated thread, classifies the card in
//! the field from the activation exchange, and fans each frame out to the
//! registered backends.

mod classify;
mod sink;
mod worker;

pub use classify::{CardContext, CardObserver};
pub use sink::FrameSink;
pub use worker::{DemuxConfig, Demultiplexer, WorkerHandle, WorkerState};
