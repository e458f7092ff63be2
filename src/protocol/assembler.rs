//! Message reassembly from decoded frames (RFC 6455 Section 5.4).

use bytes::BytesMut;

use crate::config::Limits;
use crate::error::{Error, FrameError, ProtocolError, Result};
use crate::extensions::Decompressor;
use crate::message::{CloseCode, Message};
use crate::protocol::{Frame, OpCode};

/// Collects fragmented data frames into complete messages and passes
/// control frames straight through.
///
/// One per connection; created at upgrade, reset after every completed
/// message, dropped with the connection. Ownership of an emitted
/// [`Message`] transfers to the caller.
pub struct MessageReassembler {
    buffer: BytesMut,
    opcode: Option<OpCode>,
    compressed: bool,
    fragment_count: usize,
    limits: Limits,
    decompressor: Option<Box<dyn Decompressor>>,
}

impl MessageReassembler {
    /// Create a reassembler with the given limits and no decompressor.
    #[must_use]
    pub fn new(limits: Limits) -> Self {
        Self {
            buffer: BytesMut::new(),
            opcode: None,
            compressed: false,
            fragment_count: 0,
            limits,
            decompressor: None,
        }
    }

    /// Install the decompression hook; without one, any compressed frame is
    /// a protocol error.
    #[must_use]
    pub fn with_decompressor(mut self, decompressor: Box<dyn Decompressor>) -> Self {
        self.decompressor = Some(decompressor);
        self
    }

    /// Whether a fragmented message is currently in progress.
    #[must_use]
    pub fn is_reassembling(&self) -> bool {
        self.opcode.is_some()
    }

    /// Feed one decoded frame; returns a complete message when one forms.
    ///
    /// Control frames are emitted immediately regardless of any in-progress
    /// fragmented message — the two may interleave freely.
    ///
    /// # Errors
    ///
    /// Sequencing violations ([`ProtocolError`]) and payload-level problems
    /// ([`FrameError`]); in either case the in-progress message is
    /// discarded and the connection must be torn down by the caller.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>> {
        if frame.opcode.is_control() {
            return self.push_control(frame).map(Some);
        }

        match frame.opcode {
            OpCode::Continuation => {
                if self.opcode.is_none() {
                    return Err(ProtocolError::UnexpectedContinuation.into());
                }
            }
            opcode => {
                if self.opcode.is_some() {
                    self.reset();
                    return Err(ProtocolError::UnexpectedOpcode(opcode).into());
                }
                self.opcode = Some(opcode);
                self.compressed = frame.compressed;
                if self.compressed && self.decompressor.is_none() {
                    self.reset();
                    return Err(FrameError::CompressionNotNegotiated.into());
                }
            }
        }

        self.fragment_count += 1;
        if let Err(e) = self.limits.check_fragment_count(self.fragment_count) {
            self.reset();
            return Err(e.into());
        }

        let fin = frame.fin;
        let chunk = if self.compressed {
            // Hook is present; checked when the message opened.
            match self
                .decompressor
                .as_mut()
                .ok_or(FrameError::CompressionNotNegotiated)?
                .decompress(frame.payload(), fin)
            {
                Ok(chunk) => chunk,
                Err(e) => {
                    self.reset();
                    return Err(e.into());
                }
            }
        } else {
            frame.into_payload()
        };

        if let Err(e) = self.limits.check_message_size(self.buffer.len() + chunk.len()) {
            self.reset();
            return Err(e.into());
        }
        self.buffer.extend_from_slice(&chunk);

        if !fin {
            return Ok(None);
        }

        let payload = self.buffer.split().to_vec();
        let opcode = self.opcode.take().unwrap_or(OpCode::Binary);
        self.reset();

        match opcode {
            OpCode::Text => match String::from_utf8(payload) {
                Ok(text) => Ok(Some(Message::Text(text))),
                Err(_) => Err(FrameError::InvalidUtf8.into()),
            },
            _ => Ok(Some(Message::Binary(payload))),
        }
    }

    /// Discard any in-progress message.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.opcode = None;
        self.compressed = false;
        self.fragment_count = 0;
    }

    fn push_control(&mut self, frame: Frame) -> Result<Message> {
        if frame.compressed {
            return Err(Error::Frame(FrameError::Extension(
                "control frame cannot be compressed".into(),
            )));
        }
        match frame.opcode {
            OpCode::Ping => Ok(Message::Ping(frame.into_payload())),
            OpCode::Pong => Ok(Message::Pong(frame.into_payload())),
            _ => {
                let (code, reason) = parse_close_payload(frame.payload())?;
                Ok(Message::Closed { code, reason })
            }
        }
    }
}

/// Split a close payload into status code and reason.
///
/// An empty payload means the peer sent no status; that maps to
/// [`CloseCode::NoStatus`] here at the presentation layer, never on the
/// wire.
fn parse_close_payload(payload: &[u8]) -> Result<(CloseCode, String)> {
    match payload {
        [] => Ok((CloseCode::NoStatus, String::new())),
        [_] => Err(FrameError::InvalidCloseFrame.into()),
        [hi, lo, reason @ ..] => {
            let code = CloseCode::from_u16(u16::from_be_bytes([*hi, *lo]));
            let reason = std::str::from_utf8(reason)
                .map_err(|_| FrameError::InvalidUtf8)?
                .to_string();
            Ok((code, reason))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassembler() -> MessageReassembler {
        MessageReassembler::new(Limits::default())
    }

    fn tight_reassembler() -> MessageReassembler {
        MessageReassembler::new(Limits::new(1024, 100, 3, 4096))
    }

    #[test]
    fn test_single_frame_text() {
        let msg = reassembler()
            .push(Frame::text(b"Hello".to_vec()))
            .unwrap()
            .unwrap();
        assert_eq!(msg, Message::Text("Hello".into()));
    }

    #[test]
    fn test_two_fragment_text() {
        let mut r = reassembler();
        assert!(
            r.push(Frame::new(false, OpCode::Text, b"Hel".to_vec()))
                .unwrap()
                .is_none()
        );
        assert!(r.is_reassembling());

        let msg = r
            .push(Frame::new(true, OpCode::Continuation, b"lo".to_vec()))
            .unwrap()
            .unwrap();
        assert_eq!(msg, Message::Text("Hello".into()));
        assert!(!r.is_reassembling());
    }

    #[test]
    fn test_many_fragment_binary() {
        let mut r = reassembler();
        r.push(Frame::new(false, OpCode::Binary, vec![1, 2])).unwrap();
        r.push(Frame::new(false, OpCode::Continuation, vec![3, 4]))
            .unwrap();
        let msg = r
            .push(Frame::new(true, OpCode::Continuation, vec![5, 6]))
            .unwrap()
            .unwrap();
        assert_eq!(msg, Message::Binary(vec![1, 2, 3, 4, 5, 6]));
    }

    #[test]
    fn test_ping_interleaves_without_resetting() {
        let mut r = reassembler();
        r.push(Frame::new(false, OpCode::Text, b"Hel".to_vec()))
            .unwrap();

        let ping = r.push(Frame::ping(b"beat".to_vec())).unwrap().unwrap();
        assert_eq!(ping, Message::Ping(b"beat".to_vec()));
        assert!(r.is_reassembling());

        let msg = r
            .push(Frame::new(true, OpCode::Continuation, b"lo".to_vec()))
            .unwrap()
            .unwrap();
        assert_eq!(msg, Message::Text("Hello".into()));
    }

    #[test]
    fn test_unexpected_continuation() {
        let result = reassembler().push(Frame::new(true, OpCode::Continuation, vec![1]));
        assert!(matches!(
            result,
            Err(Error::Protocol(ProtocolError::UnexpectedContinuation))
        ));
    }

    #[test]
    fn test_new_opcode_mid_message() {
        let mut r = reassembler();
        r.push(Frame::new(false, OpCode::Text, b"a".to_vec())).unwrap();
        let result = r.push(Frame::new(true, OpCode::Text, b"b".to_vec()));
        assert!(matches!(
            result,
            Err(Error::Protocol(ProtocolError::UnexpectedOpcode(OpCode::Text)))
        ));
    }

    #[test]
    fn test_invalid_utf8_discards_message() {
        let mut r = reassembler();
        let result = r.push(Frame::new(true, OpCode::Text, vec![0x80, 0x81]));
        assert!(matches!(result, Err(Error::Frame(FrameError::InvalidUtf8))));
        assert!(!r.is_reassembling());
    }

    #[test]
    fn test_utf8_split_across_fragments() {
        // U+1F389 split mid-sequence; validation happens at materialization.
        let mut r = reassembler();
        r.push(Frame::new(false, OpCode::Text, vec![0xf0, 0x9f]))
            .unwrap();
        let msg = r
            .push(Frame::new(true, OpCode::Continuation, vec![0x8e, 0x89]))
            .unwrap()
            .unwrap();
        assert_eq!(msg, Message::Text("\u{1F389}".into()));
    }

    #[test]
    fn test_binary_skips_utf8_validation() {
        let msg = reassembler()
            .push(Frame::binary(vec![0x80, 0x81, 0xff]))
            .unwrap()
            .unwrap();
        assert_eq!(msg, Message::Binary(vec![0x80, 0x81, 0xff]));
    }

    #[test]
    fn test_message_size_limit() {
        let result = tight_reassembler().push(Frame::text(vec![b'a'; 150]));
        assert!(matches!(
            result,
            Err(Error::Protocol(ProtocolError::MessageTooLarge { .. }))
        ));
    }

    #[test]
    fn test_fragment_count_limit() {
        let mut r = tight_reassembler();
        r.push(Frame::new(false, OpCode::Binary, vec![1])).unwrap();
        r.push(Frame::new(false, OpCode::Continuation, vec![2]))
            .unwrap();
        r.push(Frame::new(false, OpCode::Continuation, vec![3]))
            .unwrap();
        let result = r.push(Frame::new(true, OpCode::Continuation, vec![4]));
        assert!(matches!(
            result,
            Err(Error::Protocol(ProtocolError::TooManyFragments { .. }))
        ));
    }

    #[test]
    fn test_close_with_code_and_reason() {
        let msg = reassembler()
            .push(Frame::close(Some(1000), "bye"))
            .unwrap()
            .unwrap();
        assert_eq!(
            msg,
            Message::Closed {
                code: CloseCode::Normal,
                reason: "bye".into(),
            }
        );
    }

    #[test]
    fn test_close_without_payload_maps_to_no_status() {
        let msg = reassembler()
            .push(Frame::close(None, ""))
            .unwrap()
            .unwrap();
        assert_eq!(
            msg,
            Message::Closed {
                code: CloseCode::NoStatus,
                reason: String::new(),
            }
        );
    }

    #[test]
    fn test_close_with_one_byte_payload_rejected() {
        let result = reassembler().push(Frame::new(true, OpCode::Close, vec![0x03]));
        assert!(matches!(
            result,
            Err(Error::Frame(FrameError::InvalidCloseFrame))
        ));
    }

    #[test]
    fn test_close_with_invalid_utf8_reason_rejected() {
        let result = reassembler().push(Frame::new(true, OpCode::Close, vec![0x03, 0xe8, 0xff]));
        assert!(matches!(result, Err(Error::Frame(FrameError::InvalidUtf8))));
    }

    #[test]
    fn test_compressed_frame_without_hook_rejected() {
        let mut frame = Frame::text(b"x".to_vec());
        frame.compressed = true;
        let result = reassembler().push(frame);
        assert!(matches!(
            result,
            Err(Error::Frame(FrameError::CompressionNotNegotiated))
        ));
    }

    #[test]
    fn test_compressed_message_runs_through_hook() {
        struct Reverser;
        impl Decompressor for Reverser {
            fn decompress(
                &mut self,
                payload: &[u8],
                _is_final: bool,
            ) -> std::result::Result<Vec<u8>, FrameError> {
                Ok(payload.iter().rev().copied().collect())
            }
        }

        let mut r = MessageReassembler::new(Limits::default())
            .with_decompressor(Box::new(Reverser));
        let mut frame = Frame::text(b"olleh".to_vec());
        frame.compressed = true;
        let msg = r.push(frame).unwrap().unwrap();
        assert_eq!(msg, Message::Text("hello".into()));
    }

    #[test]
    fn test_reset_clears_partial_message() {
        let mut r = reassembler();
        r.push(Frame::new(false, OpCode::Text, b"part".to_vec()))
            .unwrap();
        r.reset();
        assert!(!r.is_reassembling());

        let msg = r.push(Frame::text(b"fresh".to_vec())).unwrap().unwrap();
        assert_eq!(msg, Message::Text("fresh".into()));
    }
}
