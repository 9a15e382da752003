//! RF transceiver interface
//!
//! The radio is a single exclusive resource. A caller takes a session with
//! `begin_session`, exchanges frames, and must release it with `end_session`
//! before anyone else (sniffer or emulator) may use the hardware. Every
//! blocking call is bounded by a timeout.

pub mod sniffer;

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::card::CardType;
use crate::frame::RfFrame;

#[derive(Debug, Error)]
pub enum RfError {
    #[error("transport timeout after {0:?}")]
    Timeout(Duration),

    #[error("no emulation session active")]
    NoSession,

    #[error("radio already owned by another session")]
    Busy,

    #[error("transceiver failure: {0}")]
    Device(String),
}

/// Identity presented while emulating a tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmulationIdentity {
    uid: Vec<u8>,
    pub atqa: [u8; 2],
    pub sak: u8,
    pub card_type: CardType,
}

impl EmulationIdentity {
    /// Single, double and triple size UIDs only
    pub fn new(uid: &[u8], atqa: [u8; 2], sak: u8, card_type: CardType) -> Option<Self> {
        matches!(uid.len(), 4 | 7 | 10).then(|| Self {
            uid: uid.to_vec(),
            atqa,
            sak,
            card_type,
        })
    }

    pub fn uid(&self) -> &[u8] {
        &self.uid
    }

    /// Last four UID bytes, the identity used in crypto1 authentication
    pub fn cuid(&self) -> u32 {
        let tail = &self.uid[self.uid.len() - 4..];
        u32::from_be_bytes([tail[0], tail[1], tail[2], tail[3]])
    }
}

impl fmt::Display for EmulationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} UID {} ATQA {} SAK {:02x}",
            self.card_type,
            hex::encode(&self.uid),
            hex::encode(self.atqa),
            self.sak
        )
    }
}

/// Bits to transmit; the last byte may be partial
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxBits {
    pub data: Vec<u8>,
    pub bit_count: usize,
}

impl TxBits {
    pub fn from_bytes(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
            bit_count: data.len() * 8,
        }
    }

    /// A 32-bit word, most significant byte first
    pub fn from_word(word: u32) -> Self {
        Self::from_bytes(&word.to_be_bytes())
    }
}

/// Blocking radio primitive used by the active controller
pub trait RfTransceiver {
    /// Start emulating `identity` (listen mode). Anticollision is handled by the radio.
    fn begin_session(&mut self, identity: &EmulationIdentity) -> Result<(), RfError>;

    /// Wait for the next reader frame
    fn listen_rx(&mut self, timeout: Duration) -> Result<RfFrame, RfError>;

    /// Transmit `tx` and wait for the reader's reply
    fn tx_rx(&mut self, tx: &TxBits, timeout: Duration) -> Result<RfFrame, RfError>;

    /// Stop emulating and release the radio
    fn end_session(&mut self);
}
