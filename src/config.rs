//! Configuration and resource limits for WebSocket connections.

use crate::error::{FrameError, HandshakeError, ProtocolError};

/// Resource limits for a single connection.
///
/// These bound memory usage against hostile or broken peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum size of a single frame in bytes.
    ///
    /// Default: 16 MB
    pub max_frame_size: usize,

    /// Maximum size of a reassembled message in bytes.
    ///
    /// Default: 64 MB
    pub max_message_size: usize,

    /// Maximum number of fragments in a single message.
    ///
    /// Default: 128
    pub max_fragment_count: usize,

    /// Maximum size of the buffered handshake head in bytes.
    ///
    /// Default: 8 KB
    pub max_handshake_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,
            max_message_size: 64 * 1024 * 1024,
            max_fragment_count: 128,
            max_handshake_size: 8192,
        }
    }
}

impl Limits {
    /// Create limits with custom values.
    #[must_use]
    pub const fn new(
        max_frame_size: usize,
        max_message_size: usize,
        max_fragment_count: usize,
        max_handshake_size: usize,
    ) -> Self {
        Self {
            max_frame_size,
            max_message_size,
            max_fragment_count,
            max_handshake_size,
        }
    }

    /// Validate a declared frame size.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::FrameTooLarge`] if `size` exceeds the maximum.
    pub const fn check_frame_size(&self, size: usize) -> Result<(), FrameError> {
        if size > self.max_frame_size {
            Err(FrameError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate an accumulated message size.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MessageTooLarge`] if `size` exceeds the maximum.
    pub const fn check_message_size(&self, size: usize) -> Result<(), ProtocolError> {
        if size > self.max_message_size {
            Err(ProtocolError::MessageTooLarge {
                size,
                max: self.max_message_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate a fragment count.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::TooManyFragments`] if `count` exceeds the maximum.
    pub const fn check_fragment_count(&self, count: usize) -> Result<(), ProtocolError> {
        if count > self.max_fragment_count {
            Err(ProtocolError::TooManyFragments {
                count,
                max: self.max_fragment_count,
            })
        } else {
            Ok(())
        }
    }

    /// Validate a buffered handshake head size.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::TooLarge`] if `size` exceeds the maximum.
    pub const fn check_handshake_size(&self, size: usize) -> Result<(), HandshakeError> {
        if size > self.max_handshake_size {
            Err(HandshakeError::TooLarge {
                size,
                max: self.max_handshake_size,
            })
        } else {
            Ok(())
        }
    }
}

/// Per-connection engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Resource limits.
    pub limits: Limits,

    /// Fragment size for outgoing data messages, in bytes.
    ///
    /// Messages larger than this are split into continuation frames.
    ///
    /// Default: 16 KB
    pub fragment_size: usize,

    /// Automatically echo a Pong for every received Ping.
    ///
    /// The Ping is still surfaced to the application either way.
    ///
    /// Default: true
    pub auto_pong: bool,

    /// Accept unmasked frames from clients (server role only).
    ///
    /// RFC 6455 requires clients to mask every frame; enabling this
    /// violates the RFC but is occasionally useful against broken peers.
    ///
    /// Default: false
    pub accept_unmasked_frames: bool,

    /// Initial capacity of the receive buffer, in bytes.
    ///
    /// Default: 8 KB
    pub read_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            fragment_size: 16 * 1024,
            auto_pong: true,
            accept_unmasked_frames: false,
            read_buffer_size: 8192,
        }
    }
}

impl Config {
    /// Create a configuration with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set custom limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the outgoing fragment size.
    #[must_use]
    pub const fn with_fragment_size(mut self, size: usize) -> Self {
        self.fragment_size = size;
        self
    }

    /// Enable or disable automatic Pong replies.
    #[must_use]
    pub const fn with_auto_pong(mut self, auto_pong: bool) -> Self {
        self.auto_pong = auto_pong;
        self
    }

    /// Tolerate unmasked client frames (server role only).
    #[must_use]
    pub const fn with_accept_unmasked_frames(mut self, accept: bool) -> Self {
        self.accept_unmasked_frames = accept;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = Limits::default();
        assert_eq!(limits.max_frame_size, 16 * 1024 * 1024);
        assert_eq!(limits.max_message_size, 64 * 1024 * 1024);
        assert_eq!(limits.max_fragment_count, 128);
        assert_eq!(limits.max_handshake_size, 8192);
    }

    #[test]
    fn test_frame_size_check() {
        let limits = Limits::new(1024, 4096, 8, 512);
        assert!(limits.check_frame_size(1024).is_ok());
        assert!(matches!(
            limits.check_frame_size(1025),
            Err(FrameError::FrameTooLarge { size: 1025, max: 1024 })
        ));
    }

    #[test]
    fn test_message_size_check() {
        let limits = Limits::new(1024, 4096, 8, 512);
        assert!(limits.check_message_size(4096).is_ok());
        assert!(limits.check_message_size(4097).is_err());
    }

    #[test]
    fn test_fragment_count_check() {
        let limits = Limits::new(1024, 4096, 8, 512);
        assert!(limits.check_fragment_count(8).is_ok());
        assert!(limits.check_fragment_count(9).is_err());
    }

    #[test]
    fn test_handshake_size_check() {
        let limits = Limits::new(1024, 4096, 8, 512);
        assert!(limits.check_handshake_size(512).is_ok());
        assert!(matches!(
            limits.check_handshake_size(513),
            Err(HandshakeError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_config_builder() {
        let config = Config::new()
            .with_fragment_size(256)
            .with_auto_pong(false)
            .with_accept_unmasked_frames(true);
        assert_eq!(config.fragment_size, 256);
        assert!(!config.auto_pong);
        assert!(config.accept_unmasked_frames);
    }
}
