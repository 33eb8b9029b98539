//! Error types for the WebSocket server.
//!
//! Two of these variants are not terminal: [`Error::IncompleteFrame`] and
//! [`Error::IncompleteHandshake`] mean "wait for more bytes" and are checked
//! with [`Error::is_incomplete`] by the poll loop.

use thiserror::Error;

/// Result type alias for WebSocket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while accepting, upgrading, or framing connections.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Server configuration is unusable (empty bind address, etc).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid frame structure or header.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Frame header declares more payload than the buffer holds.
    #[error("Incomplete frame: need {needed} more bytes")]
    IncompleteFrame {
        /// Number of additional bytes needed.
        needed: usize,
    },

    /// Handshake bytes do not yet contain the CRLFCRLF header terminator.
    #[error("Incomplete handshake: header terminator not received")]
    IncompleteHandshake,

    /// Invalid WebSocket handshake request.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// Handshake request exceeds the configured maximum size.
    #[error("Handshake too large: {size} bytes (max: {max})")]
    HandshakeTooLarge {
        /// Actual handshake size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Invalid opcode value.
    #[error("Invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    /// Reserved opcode used.
    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    /// Client frame without a masking key (RFC 6455 violation).
    #[error("Client frame must be masked")]
    UnmaskedClientFrame,

    /// Control frame fragmented (RFC violation).
    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    /// Control frame payload too large (>125 bytes).
    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    /// Declared payload length does not fit in a `usize` on this platform.
    #[error("Payload too large for platform: {size} bytes")]
    PayloadTooLarge {
        /// Declared payload length.
        size: u64,
    },

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// True for the wait-for-more-input cases.
    ///
    /// The reactor treats these as "keep the connection, try again on the
    /// next readiness event", never as a failure.
    #[must_use]
    pub const fn is_incomplete(&self) -> bool {
        matches!(
            self,
            Error::IncompleteFrame { .. } | Error::IncompleteHandshake
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
