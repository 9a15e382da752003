use std::fmt;
use std::time::Instant;

use crate::frame::RfFrame;
use crate::session::CaptureSession;

/// Controller states. `round` is 0 or 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    EmulatingRound {
        round: u8,
    },
    AwaitAuth {
        round: u8,
        deadline: Instant,
    },
    RespondNonce {
        round: u8,
        nt: u32,
        deadline: Instant,
    },
    AwaitNrAr {
        round: u8,
        nt: u32,
        /// Reader frame that answered the nonce transmission, not yet examined
        reply: Option<RfFrame>,
        deadline: Instant,
    },
    StopEmulation {
        round: u8,
    },
    /// Both rounds captured
    Complete(CaptureSession),
}

impl ControllerState {
    pub fn round(&self) -> Option<u8> {
        match self {
            Self::EmulatingRound { round }
            | Self::AwaitAuth { round, .. }
            | Self::RespondNonce { round, .. }
            | Self::AwaitNrAr { round, .. }
            | Self::StopEmulation { round } => Some(*round),
            Self::Idle | Self::Complete(_) => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::EmulatingRound { .. } => "Emulating",
            Self::AwaitAuth { .. } => "AwaitAuth",
            Self::RespondNonce { .. } => "RespondNonce",
            Self::AwaitNrAr { .. } => "AwaitNrAr",
            Self::StopEmulation { .. } => "StopEmulation",
            Self::Complete(_) => "Complete",
        }
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.round() {
            Some(round) => write!(f, "{}Round{}", self.name(), round),
            None => f.write_str(self.name()),
        }
    }
}
