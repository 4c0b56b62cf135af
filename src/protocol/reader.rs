//! Incremental instruction reader
//!
//! The control-channel read loop hands the reader whatever the socket
//! produced; instruction boundaries never line up with read boundaries, so
//! the reader buffers until a full instruction is available.

use bytes::{Buf, BufMut, BytesMut};

use super::constants::{MAX_ELEMENT_LEN, MAX_INSTRUCTION_LEN};
use super::instruction::{decode, Instruction};
use crate::error::FramingError;

/// Buffering decoder for a stream of instructions
#[derive(Debug, Default)]
pub struct InstructionReader {
    buf: BytesMut,
}

impl InstructionReader {
    /// Create an empty reader
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes received from the control channel
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    /// Bytes currently buffered without a complete instruction
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Try to extract the next complete instruction
    ///
    /// Returns `Ok(None)` when the buffer holds only a prefix of an
    /// instruction; feed more bytes and call again. A framing error consumes
    /// nothing — the channel owner decides whether to drop the connection.
    pub fn next(&mut self) -> Result<Option<Instruction>, FramingError> {
        match self.scan() {
            Ok(Some(end)) => {
                let raw = self.buf.split_to(end);
                decode(&raw).map(Some)
            }
            Ok(None) => {
                if self.buf.len() > MAX_INSTRUCTION_LEN {
                    return Err(FramingError::InstructionTooLarge(self.buf.len()));
                }
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Discard buffered bytes through the next `;`, returning the count
    ///
    /// Best-effort resync after a framing error: a malformed instruction is
    /// fatal to itself, not to the channel. A `;` inside an element payload
    /// can make the resync land mid-instruction, in which case the next
    /// `next()` call reports another framing error and recovery repeats.
    pub fn recover(&mut self) -> usize {
        match self.buf.iter().position(|&b| b == b';') {
            Some(pos) => {
                self.buf.advance(pos + 1);
                pos + 1
            }
            None => {
                let dropped = self.buf.len();
                self.buf.clear();
                dropped
            }
        }
    }

    /// Locate the end (exclusive, past the `;`) of the first complete
    /// instruction, without allocating.
    fn scan(&self) -> Result<Option<usize>, FramingError> {
        let raw = &self.buf[..];
        let mut pos = 0usize;

        loop {
            // Length prefix
            let digits_start = pos;
            while pos < raw.len() && raw[pos].is_ascii_digit() {
                pos += 1;
            }
            if pos == raw.len() {
                return Ok(None);
            }
            if pos == digits_start || raw[pos] != b'.' {
                return Err(FramingError::InvalidLength);
            }
            let declared: usize = std::str::from_utf8(&raw[digits_start..pos])
                .map_err(|_| FramingError::InvalidLength)?
                .parse()
                .map_err(|_| FramingError::InvalidLength)?;
            if declared > MAX_ELEMENT_LEN {
                return Err(FramingError::ElementTooLarge(declared));
            }

            // Element content plus its trailing separator must be buffered
            let separator = pos + 1 + declared;
            if separator >= raw.len() {
                return Ok(None);
            }

            match raw[separator] {
                b',' => pos = separator + 1,
                b';' => return Ok(Some(separator + 1)),
                _ => return Err(FramingError::MissingTerminator),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_instruction() {
        let mut reader = InstructionReader::new();
        reader.feed(b"4.blob,1.7,8.aGVsbG8h;");

        let instruction = reader.next().unwrap().unwrap();
        assert_eq!(instruction.opcode, "blob");
        assert_eq!(instruction.args, vec!["7", "aGVsbG8h"]);
        assert!(reader.next().unwrap().is_none());
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn test_multiple_instructions_one_feed() {
        let mut reader = InstructionReader::new();
        reader.feed(b"3.ack,1.1,1.0,2.OK;3.end,1.1;");

        assert_eq!(reader.next().unwrap().unwrap().opcode, "ack");
        assert_eq!(reader.next().unwrap().unwrap().opcode, "end");
        assert!(reader.next().unwrap().is_none());
    }

    #[test]
    fn test_split_across_feeds() {
        // Byte-at-a-time worst case
        let wire = b"6.select,3.rdp;4.size,4.1920,4.1080;";
        let mut reader = InstructionReader::new();
        let mut parsed = Vec::new();

        for byte in wire.iter() {
            reader.feed(std::slice::from_ref(byte));
            while let Some(instruction) = reader.next().unwrap() {
                parsed.push(instruction);
            }
        }

        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].opcode, "select");
        assert_eq!(parsed[0].args, vec!["rdp"]);
        assert_eq!(parsed[1].opcode, "size");
        assert_eq!(parsed[1].args, vec!["1920", "1080"]);
    }

    #[test]
    fn test_split_inside_length_prefix() {
        let mut reader = InstructionReader::new();
        reader.feed(b"1");
        assert!(reader.next().unwrap().is_none());
        reader.feed(b"0.abcdefghij;");
        let instruction = reader.next().unwrap().unwrap();
        assert_eq!(instruction.opcode, "abcdefghij");
    }

    #[test]
    fn test_payload_containing_semicolon() {
        // The terminator search must honor length prefixes, not scan for ';'
        let mut reader = InstructionReader::new();
        reader.feed(b"4.blob,1.1,5.ab;cd;");
        let instruction = reader.next().unwrap().unwrap();
        assert_eq!(instruction.args[1], "ab;cd");
    }

    #[test]
    fn test_malformed_prefix_is_error() {
        let mut reader = InstructionReader::new();
        reader.feed(b"x.oops;");
        assert_eq!(reader.next().unwrap_err(), FramingError::InvalidLength);
    }

    #[test]
    fn test_bad_separator_is_error() {
        let mut reader = InstructionReader::new();
        reader.feed(b"3.end,1.1x");
        assert_eq!(reader.next().unwrap_err(), FramingError::MissingTerminator);
    }

    #[test]
    fn test_recover_skips_to_next_instruction() {
        let mut reader = InstructionReader::new();
        reader.feed(b"x.garbage;3.end,1.1;");

        assert!(reader.next().is_err());
        assert_eq!(reader.recover(), 10);

        let instruction = reader.next().unwrap().unwrap();
        assert_eq!(instruction.opcode, "end");
    }

    #[test]
    fn test_recover_clears_terminatorless_garbage() {
        let mut reader = InstructionReader::new();
        reader.feed(b"no terminator here");
        assert!(reader.next().is_err());
        assert_eq!(reader.recover(), 18);
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn test_runaway_instruction_is_error() {
        let mut reader = InstructionReader::new();
        // A single huge element is rejected by its declared length
        reader.feed(format!("{}.", MAX_ELEMENT_LEN + 1).as_bytes());
        assert!(matches!(
            reader.next().unwrap_err(),
            FramingError::ElementTooLarge(_)
        ));
    }
}
