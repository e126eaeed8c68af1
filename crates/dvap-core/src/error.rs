//! Error types for the DVAP bridge.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport faults, framing violations,
//! and session-level failures are all captured here.

/// Largest total frame length the 13-bit length field can carry.
pub const MAX_FRAME_LEN: usize = 8191;

/// The error type for all DVAP bridge operations.
///
/// Errors on one connection or device session never imply anything about
/// another; callers tear down only the link that produced the error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport setup error (serial port open, TCP bind or connect).
    #[error("transport error: {0}")]
    Transport(String),

    /// A protocol-level error (malformed header, short control response).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A read or write made no progress without reporting an error.
    ///
    /// The link is treated as unusable rather than as end-of-stream.
    #[error("transport made no progress")]
    TransportFault,

    /// The peer closed the stream.
    #[error("disconnected")]
    Disconnected,

    /// A received header declared a length beyond the reader's capacity.
    #[error("frame too large: declared {len} bytes, capacity {max}")]
    FrameTooLarge { len: usize, max: usize },

    /// A payload does not fit in a single frame.
    #[error("payload too large: frame would be {len} bytes (max 8191)")]
    PayloadTooLarge { len: usize },

    /// Timed out waiting for a control response from the device.
    ///
    /// This typically indicates the device is unplugged, still in boot
    /// mode, or the serial link is running at the wrong baud rate.
    #[error("timeout waiting for response")]
    Timeout,

    /// An invalid parameter was passed to a builder or command.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The session or server has shut down.
    #[error("not connected")]
    NotConnected,

    /// The connection was lost unexpectedly (reset, broken pipe).
    #[error("connection lost")]
    ConnectionLost,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
