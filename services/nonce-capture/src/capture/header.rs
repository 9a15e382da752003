//! Capture header framing
//!
//! Every frame travelling through the capture channel is prefixed by a
//! 3-byte header:
//!
//! ```text
//!  byte 0: flags   bit0 = direction (1 = tag-to-reader)
//!                  bit1 = crc_dropped
//!                  bit2..7 reserved, must be zero
//!  byte 1-2: payload length, big-endian u16
//! ```
//!
//! followed by exactly `length` payload bytes.

use crate::frame::Direction;

use super::CaptureError;

/// Encoded header size in bytes
pub const HEADER_LEN: usize = 3;

const FLAG_TAG_TO_READER: u8 = 0x01;
const FLAG_CRC_DROPPED: u8 = 0x02;
const FLAG_RESERVED: u8 = !(FLAG_TAG_TO_READER | FLAG_CRC_DROPPED);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureHeader {
    pub direction: Direction,
    pub crc_dropped: bool,
    pub length: u16,
}

impl CaptureHeader {
    /// Build a header for a payload, rejecting payloads the length field cannot describe
    pub fn for_payload(
        direction: Direction,
        crc_dropped: bool,
        payload: &[u8],
    ) -> Result<Self, CaptureError> {
        let length = u16::try_from(payload.len())
            .map_err(|_| CaptureError::PayloadTooLong(payload.len()))?;
        Ok(Self {
            direction,
            crc_dropped,
            length,
        })
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut flags = 0u8;
        if self.direction == Direction::TagToReader {
            flags |= FLAG_TAG_TO_READER;
        }
        if self.crc_dropped {
            flags |= FLAG_CRC_DROPPED;
        }
        let len = self.length.to_be_bytes();
        [flags, len[0], len[1]]
    }

    /// Decode a header from the first `HEADER_LEN` bytes of `buf`.
    /// Returns `Ok(None)` when not enough bytes are available yet.
    pub fn decode(buf: &[u8]) -> Result<Option<Self>, CaptureError> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let flags = buf[0];
        if flags & FLAG_RESERVED != 0 {
            return Err(CaptureError::MalformedHeader(flags));
        }

        let direction = if flags & FLAG_TAG_TO_READER != 0 {
            Direction::TagToReader
        } else {
            Direction::ReaderToTag
        };

        Ok(Some(Self {
            direction,
            crc_dropped: flags & FLAG_CRC_DROPPED != 0,
            length: u16::from_be_bytes([buf[1], buf[2]]),
        }))
    }

    /// Total encoded size of header plus payload
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.length as usize
    }
}

/// Encode a complete frame (header followed by payload) into one buffer
pub fn encode_frame(
    direction: Direction,
    crc_dropped: bool,
    payload: &[u8],
) -> Result<Vec<u8>, CaptureError> {
    let header = CaptureHeader::for_payload(direction, crc_dropped, payload)?;
    let mut buf = Vec::with_capacity(header.frame_len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    Ok(buf)
}
