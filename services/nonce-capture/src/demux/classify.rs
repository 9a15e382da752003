//! Card classification from the observed activation exchange
//!
//! Follows the ISO14443A activation sequence in the frame stream:
//! REQA/WUPA → ATQA, ANTICOLL/SELECT per cascade level → UID and SAK,
//! GET_VERSION → version. The result is looked up in the capability tables
//! and handed to every backend together with the frame.

use tracing::debug;

use crate::card::{self, CardCapability, CardSignature, UNKNOWN_CARD};
use crate::frame::RfFrame;

const CMD_REQA: u8 = 0x26;
const CMD_WUPA: u8 = 0x52;
const CMD_HLTA: u8 = 0x50;
const CMD_GET_VERSION: u8 = 0x60;
const SEL_CL1: u8 = 0x93;
const SEL_CL2: u8 = 0x95;
const SEL_CL3: u8 = 0x97;
const NVB_ANTICOLL: u8 = 0x20;
const NVB_SELECT: u8 = 0x70;
const CASCADE_TAG: u8 = 0x88;
/// SAK bit signalling that the UID continues at the next cascade level
const SAK_UID_INCOMPLETE: u8 = 0x04;

/// What the tag's next answer is expected to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Atqa,
    UidFragment(usize),
    Sak(usize),
    Version,
}

/// Everything learned about the card currently in the field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardContext {
    uid_levels: [Option<[u8; 4]>; 3],
    pub atqa: Option<[u8; 2]>,
    pub sak: Option<u8>,
    pub version: Option<[u8; 8]>,
    pub capability: &'static CardCapability,
}

impl CardContext {
    pub fn unknown() -> Self {
        Self {
            uid_levels: [None; 3],
            atqa: None,
            sak: None,
            version: None,
            capability: &UNKNOWN_CARD,
        }
    }

    /// UID assembled from the cascade levels seen so far, cascade tags stripped
    pub fn uid(&self) -> Vec<u8> {
        let last_level = self.uid_levels.iter().rposition(Option::is_some);
        let mut uid = Vec::with_capacity(10);
        for (level, fragment) in self.uid_levels.iter().enumerate() {
            if let Some(fragment) = fragment {
                if Some(level) != last_level && fragment[0] == CASCADE_TAG {
                    uid.extend_from_slice(&fragment[1..]);
                } else {
                    uid.extend_from_slice(fragment);
                }
            }
        }
        uid
    }

    /// Last four UID bytes as used in the authentication, 0 when unknown
    pub fn cuid(&self) -> u32 {
        let uid = self.uid();
        if uid.len() < 4 {
            return 0;
        }
        let tail = &uid[uid.len() - 4..];
        u32::from_be_bytes([tail[0], tail[1], tail[2], tail[3]])
    }
}

impl Default for CardContext {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Tracks the activation exchange and keeps a [`CardContext`] current
#[derive(Debug, Default)]
pub struct CardObserver {
    context: CardContext,
    expect: Option<Expect>,
}

impl CardObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn context(&self) -> &CardContext {
        &self.context
    }

    /// Feed one frame; returns the context valid for that frame
    pub fn observe(&mut self, frame: &RfFrame) -> &CardContext {
        if frame.is_from_reader() {
            self.observe_command(frame);
        } else {
            self.observe_answer(frame);
        }
        &self.context
    }

    fn observe_command(&mut self, frame: &RfFrame) {
        let data = frame.data_without_crc();
        self.expect = match data {
            [CMD_REQA] | [CMD_WUPA] => {
                self.context = CardContext::unknown();
                Some(Expect::Atqa)
            }
            [CMD_HLTA, 0x00] => {
                debug!("HLTA, card context reset");
                self.context = CardContext::unknown();
                None
            }
            [sel, NVB_ANTICOLL] => cascade_level(*sel).map(Expect::UidFragment),
            [sel, NVB_SELECT, uid @ .., _bcc] if uid.len() == 4 => {
                cascade_level(*sel).map(|level| {
                    self.context.uid_levels[level] = Some([uid[0], uid[1], uid[2], uid[3]]);
                    Expect::Sak(level)
                })
            }
            [CMD_GET_VERSION] => Some(Expect::Version),
            _ => None,
        };
    }

    fn observe_answer(&mut self, frame: &RfFrame) {
        let Some(expect) = self.expect.take() else {
            return;
        };
        let data = frame.payload();

        match expect {
            Expect::Atqa if data.len() == 2 => {
                self.context.atqa = Some([data[0], data[1]]);
            }
            Expect::UidFragment(level) if data.len() == 5 => {
                let bcc = data[0] ^ data[1] ^ data[2] ^ data[3];
                if bcc == data[4] {
                    self.context.uid_levels[level] = Some([data[0], data[1], data[2], data[3]]);
                } else {
                    debug!("Anticollision answer with bad BCC ignored");
                }
            }
            Expect::Sak(level) if data.len() == 1 || data.len() == 3 => {
                if data[0] & SAK_UID_INCOMPLETE == 0 {
                    self.context.sak = Some(data[0]);
                    // Deeper levels belong to an earlier activation
                    for stale in self.context.uid_levels.iter_mut().skip(level + 1) {
                        *stale = None;
                    }
                }
            }
            Expect::Version if data.len() == 8 || data.len() == 10 => {
                let mut version = [0u8; 8];
                version.copy_from_slice(&data[..8]);
                self.context.version = Some(version);
            }
            _ => {
                debug!("Unexpected {}-byte answer while waiting for {:?}", data.len(), expect);
                return;
            }
        }

        self.refresh_capability();
    }

    fn refresh_capability(&mut self) {
        let (Some(atqa), Some(sak)) = (self.context.atqa, self.context.sak) else {
            return;
        };
        let capability = card::lookup(&CardSignature {
            version: self.context.version,
            atqa,
            sak,
        });
        if capability.card_type != self.context.capability.card_type {
            debug!(
                "Card classified as {} (ATQA {:02x}{:02x} SAK {:02x})",
                capability.card_type, atqa[0], atqa[1], sak
            );
        }
        self.context.capability = capability;
    }
}

fn cascade_level(sel: u8) -> Option<usize> {
    match sel {
        SEL_CL1 => Some(0),
        SEL_CL2 => Some(1),
        SEL_CL3 => Some(2),
        _ => None,
    }
}
