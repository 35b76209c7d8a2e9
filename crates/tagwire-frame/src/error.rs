/// Errors raised by typed reads and writes on a [`crate::PacketBuffer`].
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    /// The write does not fit in the remaining capacity.
    #[error("write of {needed} bytes exceeds remaining capacity ({remaining} bytes)")]
    CapacityExceeded { needed: usize, remaining: usize },

    /// The read extends past the end of the buffer.
    #[error("read of {needed} bytes past end of buffer ({available} bytes available)")]
    BufferUnderrun { needed: usize, available: usize },

    /// A write was attempted on a read-only view.
    #[error("buffer is a read-only view")]
    ReadOnlyViolation,

    /// A length prefix was negative.
    #[error("invalid length prefix: {0}")]
    InvalidLength(i32),

    /// A length-prefixed string did not contain UTF-8.
    #[error("string is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// The char needs more than one UTF-16 code unit.
    #[error("char {0:?} does not fit in one UTF-16 code unit")]
    UnencodableChar(char),

    /// The code unit read is a lone surrogate.
    #[error("invalid UTF-16 code unit 0x{0:04x}")]
    InvalidChar(u16),
}

pub type BufferResult<T> = std::result::Result<T, BufferError>;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The body exceeds the maximum body size of the connection.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The length field holds a negative value, or an explicit length is
    /// larger than the payload it describes.
    #[error("invalid body length: {0}")]
    InvalidLength(i64),

    /// The buffer ends before the field being decoded.
    #[error("truncated frame (need {needed} bytes, have {available})")]
    Truncated { needed: usize, available: usize },

    /// The frame layout cannot be used.
    #[error("invalid frame config: {0}")]
    InvalidConfig(String),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
