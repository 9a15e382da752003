//! Frame trace backend - logs every frame and counts them per direction

use tracing::debug;

use crate::demux::{CardContext, FrameSink};
use crate::frame::{Direction, RfFrame};

#[derive(Debug, Default)]
pub struct TraceLogger {
    reader_frames: u64,
    tag_frames: u64,
}

impl TraceLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reader_frames(&self) -> u64 {
        self.reader_frames
    }

    pub fn tag_frames(&self) -> u64 {
        self.tag_frames
    }
}

impl FrameSink for TraceLogger {
    fn name(&self) -> &str {
        "Trace"
    }

    fn handle(&mut self, frame: &RfFrame, _card: &CardContext) {
        match frame.direction() {
            Direction::ReaderToTag => self.reader_frames += 1,
            Direction::TagToReader => self.tag_frames += 1,
        }
        debug!("{}", frame);
    }

    fn summary(&self) -> Option<String> {
        Some(format!("R>T: {} | T>R: {}", self.reader_frames, self.tag_frames))
    }
}
