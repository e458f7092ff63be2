//! Outgoing message fragmentation (RFC 6455 Section 5.4).

use crate::protocol::{Frame, OpCode};

/// Iterator splitting one message payload into wire frames.
///
/// The first frame carries the message opcode (and the compressed flag, if
/// set); every later frame is a continuation. Only the last frame has FIN.
pub struct Fragmenter<'a> {
    payload: &'a [u8],
    opcode: OpCode,
    compressed: bool,
    fragment_size: usize,
    offset: usize,
    first: bool,
}

impl<'a> Fragmenter<'a> {
    /// Split `payload` into frames of at most `fragment_size` bytes.
    #[must_use]
    pub fn new(payload: &'a [u8], opcode: OpCode, compressed: bool, fragment_size: usize) -> Self {
        Self {
            payload,
            opcode,
            compressed,
            fragment_size: fragment_size.max(1),
            offset: 0,
            first: true,
        }
    }
}

impl Iterator for Fragmenter<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.payload.len() {
            // An empty message still yields one empty final frame.
            if self.first {
                self.first = false;
                let mut frame = Frame::new(true, self.opcode, Vec::new());
                frame.compressed = self.compressed;
                return Some(frame);
            }
            return None;
        }

        let chunk_len = (self.payload.len() - self.offset).min(self.fragment_size);
        let fin = self.offset + chunk_len == self.payload.len();
        let chunk = self.payload[self.offset..self.offset + chunk_len].to_vec();
        self.offset += chunk_len;

        let opcode = if self.first {
            self.opcode
        } else {
            OpCode::Continuation
        };
        let mut frame = Frame::new(fin, opcode, chunk);
        frame.compressed = self.first && self.compressed;
        self.first = false;
        Some(frame)
    }
}
