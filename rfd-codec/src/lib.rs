//! # rfd Frame Codec
//!
//! Purpose: Translate commands into RESP2 request frames and turn a byte
//! stream coming back from the server into discrete reply values.
//!
//! ## Design Principles
//! 1. **No I/O**: Every function here is a pure transformation over buffers.
//! 2. **Binary-Safe**: Arguments and bulk payloads are raw bytes, length-prefixed.
//! 3. **Streaming Decode**: Incomplete frames report "need more data" and leave
//!    the buffer untouched, so callers can feed arbitrary TCP segments.
//! 4. **Fail Fast**: Malformed framing surfaces as a `CodecError` immediately.

mod command;
mod decode;
mod encode;
mod error;
mod reply;

pub use command::{Command, ToArg};
pub use decode::{decode, decode_with, DecodeOptions, ReplyDecoder};
pub use encode::{encode_command, encode_reply};
pub use error::{CodecError, CodecResult};
pub use reply::Reply;
