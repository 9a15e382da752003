//! Backend interface for consumers of the demultiplexed frame stream

use crate::frame::RfFrame;

use super::classify::CardContext;

/// A consumer of captured frames.
///
/// Backends are invoked synchronously on the worker thread, in registration
/// order, once per frame. They must not block.
pub trait FrameSink: Send {
    /// Name used in log output
    fn name(&self) -> &str;

    fn handle(&mut self, frame: &RfFrame, card: &CardContext);

    /// One-line statistics for the periodic summary
    fn summary(&self) -> Option<String> {
        None
    }
}

impl<F> FrameSink for (&'static str, F)
where
    F: FnMut(&RfFrame, &CardContext) + Send,
{
    fn name(&self) -> &str {
        self.0
    }

    fn handle(&mut self, frame: &RfFrame, card: &CardContext) {
        (self.1)(frame, card)
    }
}
