//! Hand-off of completed sessions to the offline key-recovery tool
//!
//! The value set is fixed: cuid, sector, key type and both nonce rounds.
//! Three renderings are provided: a packed 30-byte big-endian layout, the
//! argument list of the mfkey32 tool, and a human-readable log line.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mifare::{KeySlotIdentity, KeyType};
use crate::session::NonceMaterial;

/// Packed size: cuid(4) sector(1) key_type(1) six nonce words(24)
pub const RECORD_LEN: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("invalid record length {0}, expected 30")]
    InvalidLength(usize),

    #[error("sector {0} out of range")]
    InvalidSector(u8),

    #[error("invalid key type {0}")]
    InvalidKeyType(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecoveryRecord {
    pub cuid: u32,
    pub sector: u8,
    /// 0 = key A, 1 = key B
    pub key_type: u8,
    pub nt0: u32,
    pub nr0: u32,
    pub ar0: u32,
    pub nt1: u32,
    pub nr1: u32,
    pub ar1: u32,
}

impl KeyRecoveryRecord {
    pub fn new(
        cuid: u32,
        identity: KeySlotIdentity,
        round0: NonceMaterial,
        round1: NonceMaterial,
    ) -> Self {
        Self {
            cuid,
            sector: identity.sector,
            key_type: identity.key_type.as_u8(),
            nt0: round0.nt,
            nr0: round0.nr,
            ar0: round0.ar,
            nt1: round1.nt,
            nr1: round1.nr,
            ar1: round1.ar,
        }
    }

    pub fn identity(&self) -> Option<KeySlotIdentity> {
        KeySlotIdentity::new(self.sector, KeyType::from_u8(self.key_type)?)
    }

    pub fn round0(&self) -> NonceMaterial {
        NonceMaterial::new(self.nt0, self.nr0, self.ar0)
    }

    pub fn round1(&self) -> NonceMaterial {
        NonceMaterial::new(self.nt1, self.nr1, self.ar1)
    }

    pub fn to_bytes(&self) -> [u8; RECORD_LEN] {
        let mut out = [0u8; RECORD_LEN];
        out[0..4].copy_from_slice(&self.cuid.to_be_bytes());
        out[4] = self.sector;
        out[5] = self.key_type;
        let words = [self.nt0, self.nr0, self.ar0, self.nt1, self.nr1, self.ar1];
        for (i, word) in words.iter().enumerate() {
            let offset = 6 + i * 4;
            out[offset..offset + 4].copy_from_slice(&word.to_be_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RecordError> {
        if bytes.len() != RECORD_LEN {
            return Err(RecordError::InvalidLength(bytes.len()));
        }

        let word = |offset: usize| {
            u32::from_be_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
        };

        let sector = bytes[4];
        if KeySlotIdentity::new(sector, KeyType::A).is_none() {
            return Err(RecordError::InvalidSector(sector));
        }
        let key_type = bytes[5];
        if KeyType::from_u8(key_type).is_none() {
            return Err(RecordError::InvalidKeyType(key_type));
        }

        Ok(Self {
            cuid: word(0),
            sector,
            key_type,
            nt0: word(6),
            nr0: word(10),
            ar0: word(14),
            nt1: word(18),
            nr1: word(22),
            ar1: word(26),
        })
    }

    /// `<cuid> <nt0> <nr0> <ar0> <nt1> <nr1> <ar1>` as taken by mfkey32
    pub fn mfkey32_args(&self) -> String {
        format!(
            "{:08x} {:08x} {:08x} {:08x} {:08x} {:08x} {:08x}",
            self.cuid, self.nt0, self.nr0, self.ar0, self.nt1, self.nr1, self.ar1
        )
    }
}

impl fmt::Display for KeyRecoveryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = KeyType::from_u8(self.key_type)
            .map(|k| k.to_string())
            .unwrap_or_else(|| "?".to_string());
        write!(
            f,
            "Sec {} key {} cuid {:08x} nt0 {:08x} nr0 {:08x} ar0 {:08x} nt1 {:08x} nr1 {:08x} ar1 {:08x}",
            self.sector, key, self.cuid, self.nt0, self.nr0, self.ar0, self.nt1, self.nr1, self.ar1
        )
    }
}
