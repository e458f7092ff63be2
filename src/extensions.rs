//! Per-message compression hooks.
//!
//! The engine exposes the extension seam only; the compression algorithm
//! itself (e.g. permessage-deflate) lives outside the crate. With no hooks
//! installed the compressed bit is never set on outgoing frames and an
//! incoming compressed frame is a protocol error.

use crate::error::FrameError;

/// Compresses outgoing data message payloads.
///
/// Installed per connection; the engine compresses the whole message before
/// fragmentation and sets the compressed bit on the first frame.
pub trait Compressor: Send {
    /// Compress one message payload.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Extension`] if the payload cannot be compressed;
    /// the engine treats this as fatal for the connection.
    fn compress(&mut self, payload: &[u8]) -> Result<Vec<u8>, FrameError>;
}

/// Decompresses incoming compressed frame payloads.
///
/// Called once per frame of a compressed message, in order; `is_final`
/// marks the message's last frame so stateful codecs can flush.
pub trait Decompressor: Send {
    /// Decompress one frame payload.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Extension`] on corrupt input; the engine treats
    /// this as fatal for the connection.
    fn decompress(&mut self, payload: &[u8], is_final: bool) -> Result<Vec<u8>, FrameError>;
}
