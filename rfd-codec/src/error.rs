//! Codec error types.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while encoding commands or decoding replies.
///
/// Every decode variant means the byte stream can no longer be trusted; the
/// client tears the connection down when it sees one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// A command needs at least the operation name.
    #[error("command has no arguments")]
    EmptyCommand,

    /// The first byte of a frame is not a RESP2 type marker.
    #[error("invalid reply type byte 0x{0:02x}")]
    InvalidType(u8),

    /// Length header is negative (other than the -1 null marker) or unparsable.
    #[error("invalid length header: {0}")]
    InvalidLength(String),

    /// Integer reply is not a valid signed 64-bit number.
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// A bulk payload was not followed by CRLF.
    #[error("missing CRLF terminator")]
    MissingTerminator,

    /// Bulk string length exceeds the configured limit.
    #[error("bulk string of {len} bytes exceeds limit of {max}")]
    BulkTooLarge { len: usize, max: usize },

    /// A header or status line runs past the configured length.
    #[error("reply line exceeds {0} bytes")]
    LineTooLong(usize),

    /// Arrays nest deeper than the configured limit.
    #[error("reply nesting exceeds depth {0}")]
    TooDeep(usize),
}
