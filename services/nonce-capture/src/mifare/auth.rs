//! MIFARE Classic authentication exchange parsing

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// AUTH with key A
pub const CMD_AUTH_A: u8 = 0x60;
/// AUTH with key B
pub const CMD_AUTH_B: u8 = 0x61;

/// Highest sector number (4K layout: 32 small + 8 large sectors)
pub const MAX_SECTOR: u8 = 39;

/// First block of the 16-block sector area
const LARGE_SECTOR_START_BLOCK: u8 = 128;
const SMALL_SECTOR_COUNT: u8 = 32;

/// Shape errors for authentication frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthParseError {
    #[error("not an AUTH opcode ({0:#04x})")]
    NotAuth(u8),

    #[error("invalid frame length {0}")]
    InvalidLength(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    A,
    B,
}

impl KeyType {
    pub fn from_opcode(opcode: u8) -> Option<Self> {
        match opcode {
            CMD_AUTH_A => Some(Self::A),
            CMD_AUTH_B => Some(Self::B),
            _ => None,
        }
    }

    pub fn opcode(&self) -> u8 {
        match self {
            Self::A => CMD_AUTH_A,
            Self::B => CMD_AUTH_B,
        }
    }

    /// Wire value in the key-recovery hand-off
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::A),
            1 => Some(Self::B),
            _ => None,
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => f.write_str("A"),
            Self::B => f.write_str("B"),
        }
    }
}

/// Sector containing `block`: 4-block sectors below block 128, 16-block sectors above
pub fn sector_from_block(block: u8) -> u8 {
    if block < LARGE_SECTOR_START_BLOCK {
        block / 4
    } else {
        SMALL_SECTOR_COUNT + (block - LARGE_SECTOR_START_BLOCK) / 16
    }
}

/// One authentication target of the card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeySlotIdentity {
    pub sector: u8,
    pub key_type: KeyType,
}

impl KeySlotIdentity {
    pub fn new(sector: u8, key_type: KeyType) -> Option<Self> {
        (sector <= MAX_SECTOR).then_some(Self { sector, key_type })
    }

    pub fn from_block(block: u8, key_type: KeyType) -> Self {
        Self {
            sector: sector_from_block(block),
            key_type,
        }
    }
}

impl fmt::Display for KeySlotIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sector {} key {}", self.sector, self.key_type)
    }
}

/// Parsed AUTH command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthCommand {
    pub key_type: KeyType,
    pub block: u8,
}

impl AuthCommand {
    /// Parse `[op, block]` (CRC dropped) or `[op, block, crc0, crc1]`
    pub fn parse(data: &[u8], crc_dropped: bool) -> Result<Self, AuthParseError> {
        let opcode = *data.first().ok_or(AuthParseError::InvalidLength(0))?;
        let key_type = KeyType::from_opcode(opcode).ok_or(AuthParseError::NotAuth(opcode))?;

        let expected_len = if crc_dropped { 2 } else { 4 };
        if data.len() != expected_len {
            return Err(AuthParseError::InvalidLength(data.len()));
        }

        Ok(Self {
            key_type,
            block: data[1],
        })
    }

    pub fn identity(&self) -> KeySlotIdentity {
        KeySlotIdentity::from_block(self.block, self.key_type)
    }
}

/// Big-endian u32 from the first four bytes on air
pub fn word_from_bytes(bytes: &[u8]) -> Option<u32> {
    let arr: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
    Some(u32::from_be_bytes(arr))
}

/// Tag nonce frame: exactly 4 bytes
pub fn parse_nt(data: &[u8]) -> Result<u32, AuthParseError> {
    if data.len() != 4 {
        return Err(AuthParseError::InvalidLength(data.len()));
    }
    word_from_bytes(data).ok_or(AuthParseError::InvalidLength(data.len()))
}

/// Reader answer frame: exactly 8 bytes, `nr ‖ ar`
pub fn parse_nr_ar(data: &[u8]) -> Result<(u32, u32), AuthParseError> {
    if data.len() != 8 {
        return Err(AuthParseError::InvalidLength(data.len()));
    }
    match (word_from_bytes(&data[..4]), word_from_bytes(&data[4..])) {
        (Some(nr), Some(ar)) => Ok((nr, ar)),
        _ => Err(AuthParseError::InvalidLength(data.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sector_from_block() {
        assert_eq!(sector_from_block(0), 0);
        assert_eq!(sector_from_block(3), 0);
        assert_eq!(sector_from_block(5), 1);
        assert_eq!(sector_from_block(8), 2);
        assert_eq!(sector_from_block(127), 31);
        assert_eq!(sector_from_block(128), 32);
        assert_eq!(sector_from_block(143), 32);
        assert_eq!(sector_from_block(144), 33);
        assert_eq!(sector_from_block(255), MAX_SECTOR);
    }

    #[test]
    fn test_parse_auth_a_with_crc() {
        let cmd = AuthCommand::parse(&[0x60, 0x08, 0xbd, 0xf7], false).unwrap();
        assert_eq!(cmd.key_type, KeyType::A);
        assert_eq!(cmd.block, 8);
        assert_eq!(cmd.identity(), KeySlotIdentity::new(2, KeyType::A).unwrap());
    }

    #[test]
    fn test_parse_auth_b_crc_dropped() {
        let cmd = AuthCommand::parse(&[0x61, 0xc0], true).unwrap();
        assert_eq!(cmd.identity().key_type, KeyType::B);
        assert_eq!(cmd.identity().sector, 36);
    }

    #[test]
    fn test_parse_auth_rejects_bad_shapes() {
        assert_eq!(AuthCommand::parse(&[], false), Err(AuthParseError::InvalidLength(0)));
        assert_eq!(AuthCommand::parse(&[0x30, 0x04, 0x26, 0xee], false), Err(AuthParseError::NotAuth(0x30)));
        // GET_VERSION shares the opcode but is a single byte plus CRC
        assert_eq!(AuthCommand::parse(&[0x60, 0xf8, 0x32], false), Err(AuthParseError::InvalidLength(3)));
        assert_eq!(AuthCommand::parse(&[0x60, 0x04, 0x00, 0x00], true), Err(AuthParseError::InvalidLength(4)));
    }

    #[test]
    fn test_parse_nonces() {
        assert_eq!(parse_nt(&[0x01, 0x20, 0x01, 0x45]), Ok(0x0120_0145));
        assert!(parse_nt(&[0x01, 0x20, 0x01]).is_err());

        let (nr, ar) = parse_nr_ar(&[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]).unwrap();
        assert_eq!(nr, 0x1122_3344);
        assert_eq!(ar, 0x5566_7788);
        assert!(parse_nr_ar(&[0u8; 4]).is_err());
    }

    #[test]
    fn test_identity_bounds() {
        assert!(KeySlotIdentity::new(39, KeyType::B).is_some());
        assert!(KeySlotIdentity::new(40, KeyType::B).is_none());
        assert_eq!(KeyType::from_u8(KeyType::B.as_u8()), Some(KeyType::B));
        assert_eq!(KeyType::A.opcode(), CMD_AUTH_A);
    }
}
