//! Captured ISO14443A frames

use std::fmt;

/// Which side of the link transmitted a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    ReaderToTag,
    TagToReader,
}

impl Direction {
    /// Short arrow label used in trace output
    pub fn label(&self) -> &'static str {
        match self {
            Self::ReaderToTag => "R>T",
            Self::TagToReader => "T>R",
        }
    }
}

/// A single frame observed on air. Immutable once captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RfFrame {
    direction: Direction,
    /// The producer already stripped the trailing CRC_A
    crc_dropped: bool,
    payload: Vec<u8>,
}

impl RfFrame {
    pub fn new(direction: Direction, crc_dropped: bool, payload: Vec<u8>) -> Self {
        Self {
            direction,
            crc_dropped,
            payload,
        }
    }

    pub fn reader(payload: &[u8]) -> Self {
        Self::new(Direction::ReaderToTag, false, payload.to_vec())
    }

    pub fn tag(payload: &[u8]) -> Self {
        Self::new(Direction::TagToReader, false, payload.to_vec())
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn crc_dropped(&self) -> bool {
        self.crc_dropped
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn is_from_reader(&self) -> bool {
        self.direction == Direction::ReaderToTag
    }

    pub fn is_from_tag(&self) -> bool {
        self.direction == Direction::TagToReader
    }

    /// Payload without the CRC_A bytes, if the frame still carries them
    pub fn data_without_crc(&self) -> &[u8] {
        if self.crc_dropped || self.payload.len() < 3 {
            &self.payload
        } else {
            &self.payload[..self.payload.len() - 2]
        }
    }

    pub fn into_parts(self) -> (Direction, bool, Vec<u8>) {
        (self.direction, self.crc_dropped, self.payload)
    }
}

impl fmt::Display for RfFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.direction.label())?;
        for b in &self.payload {
            write!(f, " {:02x}", b)?;
        }
        Ok(())
    }
}
