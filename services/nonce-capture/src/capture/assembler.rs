//! Reassembly of header-delimited frames from the capture byte stream

use crate::frame::RfFrame;

use super::header::{CaptureHeader, HEADER_LEN};
use super::CaptureError;

/// Where the assembler is inside the current frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyState {
    /// Waiting for the 3 header bytes
    ReadHeader,
    /// Header parsed, waiting for `length` payload bytes
    ReadPayload(CaptureHeader),
}

/// Accumulates raw channel bytes and yields complete frames.
///
/// A frame is only produced once every byte its header declares is buffered;
/// nothing is ever read past the end of the available data.
#[derive(Debug)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
    state: AssemblyState,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(256),
            state: AssemblyState::ReadHeader,
        }
    }

    pub fn state(&self) -> AssemblyState {
        self.state
    }

    /// Bytes buffered but not yet delivered as a frame
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Drop everything buffered and wait for the next header
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = AssemblyState::ReadHeader;
    }

    /// Try to take the next complete frame out of the buffer
    pub fn next_frame(&mut self) -> Result<Option<RfFrame>, CaptureError> {
        loop {
            match self.state {
                AssemblyState::ReadHeader => match CaptureHeader::decode(&self.buffer)? {
                    Some(header) => self.state = AssemblyState::ReadPayload(header),
                    None => return Ok(None),
                },
                AssemblyState::ReadPayload(header) => {
                    if self.buffer.len() < header.frame_len() {
                        return Ok(None);
                    }

                    let payload = self.buffer[HEADER_LEN..header.frame_len()].to_vec();
                    self.buffer.drain(..header.frame_len());
                    self.state = AssemblyState::ReadHeader;

                    return Ok(Some(RfFrame::new(
                        header.direction,
                        header.crc_dropped,
                        payload,
                    )));
                }
            }
        }
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::header::encode_frame;
    use crate::frame::Direction;

    #[test]
    fn test_partial_header_yields_nothing() {
        let mut asm = FrameAssembler::new();
        asm.push(&[0x01]);
        assert_eq!(asm.next_frame().unwrap(), None);
        assert_eq!(asm.state(), AssemblyState::ReadHeader);
    }

    #[test]
    fn test_partial_payload_waits_for_remaining_bytes() {
        let encoded = encode_frame(Direction::ReaderToTag, true, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let mut asm = FrameAssembler::new();

        // Header plus 5 of 8 payload bytes
        asm.push(&encoded[..8]);
        assert_eq!(asm.next_frame().unwrap(), None);
        assert!(matches!(asm.state(), AssemblyState::ReadPayload(h) if h.length == 8));
        assert_eq!(asm.pending_bytes(), 8);

        // Still one byte short
        asm.push(&encoded[8..10]);
        assert_eq!(asm.next_frame().unwrap(), None);

        asm.push(&encoded[10..]);
        let frame = asm.next_frame().unwrap().unwrap();
        assert_eq!(frame.payload(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(frame.crc_dropped());
        assert_eq!(asm.pending_bytes(), 0);
        assert_eq!(asm.state(), AssemblyState::ReadHeader);
    }

    #[test]
    fn test_multiple_frames_in_one_chunk() {
        let mut chunk = encode_frame(Direction::ReaderToTag, false, &[0x26]).unwrap();
        chunk.extend(encode_frame(Direction::TagToReader, false, &[0x04, 0x00]).unwrap());
        chunk.extend(encode_frame(Direction::ReaderToTag, false, &[]).unwrap());

        let mut asm = FrameAssembler::new();
        asm.push(&chunk);

        let first = asm.next_frame().unwrap().unwrap();
        assert_eq!(first, RfFrame::reader(&[0x26]));
        let second = asm.next_frame().unwrap().unwrap();
        assert_eq!(second, RfFrame::tag(&[0x04, 0x00]));
        let third = asm.next_frame().unwrap().unwrap();
        assert!(third.is_empty());
        assert_eq!(asm.next_frame().unwrap(), None);
    }

    #[test]
    fn test_byte_by_byte_delivery() {
        let encoded = encode_frame(Direction::TagToReader, false, &[0xde, 0xad, 0xbe, 0xef]).unwrap();
        let mut asm = FrameAssembler::new();
        let mut frames = Vec::new();
        for b in &encoded {
            asm.push(&[*b]);
            if let Some(frame) = asm.next_frame().unwrap() {
                frames.push(frame);
            }
        }
        assert_eq!(frames, vec![RfFrame::tag(&[0xde, 0xad, 0xbe, 0xef])]);
    }

    #[test]
    fn test_malformed_header_then_reset() {
        let mut asm = FrameAssembler::new();
        asm.push(&[0xf0, 0x00, 0x01, 0xaa]);
        assert!(asm.next_frame().is_err());

        asm.reset();
        asm.push(&encode_frame(Direction::ReaderToTag, false, &[0x52]).unwrap());
        assert_eq!(asm.next_frame().unwrap(), Some(RfFrame::reader(&[0x52])));
    }
}
