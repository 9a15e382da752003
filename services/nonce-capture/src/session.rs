//! Capture sessions: nonce rounds collected for one key slot of one card

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::handoff::KeyRecoveryRecord;
use crate::mifare::KeySlotIdentity;

/// One observed authentication round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceMaterial {
    /// Tag nonce (plaintext)
    pub nt: u32,
    /// Reader nonce (encrypted)
    pub nr: u32,
    /// Reader answer, encrypted successor of nt
    pub ar: u32,
}

impl NonceMaterial {
    pub fn new(nt: u32, nr: u32, ar: u32) -> Self {
        Self { nt, nr, ar }
    }
}

impl fmt::Display for NonceMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "nt={:08x} nr={:08x} ar={:08x}", self.nt, self.nr, self.ar)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Empty,
    PartiallyCollected,
    FullyCollected,
    Exported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session already holds both rounds")]
    AlreadyComplete,

    #[error("session was exported and is frozen")]
    Exported,
}

/// Two-round capture for a (cuid, key slot) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSession {
    cuid: u32,
    identity: KeySlotIdentity,
    round0: Option<NonceMaterial>,
    round1: Option<NonceMaterial>,
    state: SessionState,
}

impl CaptureSession {
    pub fn new(cuid: u32, identity: KeySlotIdentity) -> Self {
        Self {
            cuid,
            identity,
            round0: None,
            round1: None,
            state: SessionState::Empty,
        }
    }

    pub fn cuid(&self) -> u32 {
        self.cuid
    }

    pub fn identity(&self) -> KeySlotIdentity {
        self.identity
    }

    pub fn round0(&self) -> Option<NonceMaterial> {
        self.round0
    }

    pub fn round1(&self) -> Option<NonceMaterial> {
        self.round1
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Both rounds present, exported or not
    pub fn is_complete(&self) -> bool {
        matches!(self.state, SessionState::FullyCollected | SessionState::Exported)
    }

    /// Store the next round. The first round fills `round0`, the second `round1`.
    pub fn record_round(&mut self, material: NonceMaterial) -> Result<SessionState, SessionError> {
        match self.state {
            SessionState::Empty => {
                self.round0 = Some(material);
                self.state = SessionState::PartiallyCollected;
            }
            SessionState::PartiallyCollected => {
                self.round1 = Some(material);
                self.state = SessionState::FullyCollected;
            }
            SessionState::FullyCollected => return Err(SessionError::AlreadyComplete),
            SessionState::Exported => return Err(SessionError::Exported),
        }
        Ok(self.state)
    }

    /// Hand-off record, available once both rounds are present
    pub fn to_record(&self) -> Option<KeyRecoveryRecord> {
        match (self.round0, self.round1) {
            (Some(r0), Some(r1)) => Some(KeyRecoveryRecord::new(self.cuid, self.identity, r0, r1)),
            _ => None,
        }
    }

    /// Freeze a fully collected session and return its hand-off record
    pub fn export(&mut self) -> Option<KeyRecoveryRecord> {
        if self.state != SessionState::FullyCollected {
            return None;
        }
        let record = self.to_record()?;
        self.state = SessionState::Exported;
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mifare::KeyType;

    fn identity() -> KeySlotIdentity {
        KeySlotIdentity::new(2, KeyType::A).unwrap()
    }

    #[test]
    fn test_state_progression() {
        let mut session = CaptureSession::new(0xdeadbeef, identity());
        assert_eq!(session.state(), SessionState::Empty);
        assert!(session.to_record().is_none());

        let r0 = NonceMaterial::new(1, 2, 3);
        let r1 = NonceMaterial::new(4, 5, 6);
        assert_eq!(session.record_round(r0), Ok(SessionState::PartiallyCollected));
        assert!(session.export().is_none());
        assert_eq!(session.record_round(r1), Ok(SessionState::FullyCollected));
        assert_eq!(session.round0(), Some(r0));
        assert_eq!(session.round1(), Some(r1));

        assert_eq!(
            session.record_round(NonceMaterial::new(7, 8, 9)),
            Err(SessionError::AlreadyComplete)
        );
    }

    #[test]
    fn test_export_freezes_session() {
        let mut session = CaptureSession::new(0x01020304, identity());
        session.record_round(NonceMaterial::new(1, 2, 3)).unwrap();
        session.record_round(NonceMaterial::new(4, 5, 6)).unwrap();

        let record = session.export().unwrap();
        assert_eq!(record.cuid, 0x01020304);
        assert_eq!(record.nt1, 4);
        assert_eq!(session.state(), SessionState::Exported);
        assert!(session.is_complete());

        // Exporting twice yields nothing and the session stays untouched
        assert!(session.export().is_none());
        assert_eq!(
            session.record_round(NonceMaterial::new(7, 8, 9)),
            Err(SessionError::Exported)
        );
        assert_eq!(session.round1(), Some(NonceMaterial::new(4, 5, 6)));
    }
}
