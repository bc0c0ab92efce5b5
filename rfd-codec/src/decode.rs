//! # Streaming RESP2 Decoding
//!
//! Purpose: Parse one reply at a time from the front of a byte buffer that may
//! end anywhere, including in the middle of a nested array element.
//!
//! ## Design Principles
//! 1. **All-or-Nothing**: A reply is either fully decoded or the buffer is left
//!    unconsumed. Nothing is allocated for a reply until all of it is buffered.
//! 2. **Linear**: `ReplyDecoder` remembers how far it has scanned an incomplete
//!    reply, so a large reply arriving in many reads is walked once.
//! 3. **Bounded**: Header lines, bulk sizes and nesting depth are capped so a
//!    hostile or corrupt stream cannot force huge allocations or deep recursion.
//! 4. **Binary-Safe**: Bulk payloads are located by their length prefix, never
//!    by scanning for delimiters.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{CodecError, CodecResult};
use crate::reply::Reply;

/// Matches the server's default `proto-max-bulk-len` (512 MiB).
pub const DEFAULT_MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Deep enough for any real reply shape (SCAN replies nest two levels).
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Longest accepted header or status line, CRLF excluded (64 KiB).
pub const DEFAULT_MAX_LINE_LEN: usize = 64 * 1024;

// Cap for up-front array allocation; longer arrays grow as elements arrive.
const MAX_PREALLOC_ITEMS: usize = 1024;

/// Limits applied while decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Largest accepted bulk string, in bytes.
    pub max_bulk_len: usize,
    /// Deepest accepted array nesting.
    pub max_depth: usize,
    /// Longest accepted line for `+`, `-`, `:` replies and length headers.
    pub max_line_len: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        DecodeOptions {
            max_bulk_len: DEFAULT_MAX_BULK_LEN,
            max_depth: DEFAULT_MAX_DEPTH,
            max_line_len: DEFAULT_MAX_LINE_LEN,
        }
    }
}

/// Decodes one reply from the front of `buf` with default limits.
///
/// Returns the reply and the number of bytes it occupied, or `Ok(None)` when
/// `buf` does not yet hold a complete reply.
pub fn decode(buf: &[u8]) -> CodecResult<Option<(Reply, usize)>> {
    decode_with(buf, &DecodeOptions::default())
}

/// Decodes one reply from the front of `buf` with explicit limits.
pub fn decode_with(buf: &[u8], options: &DecodeOptions) -> CodecResult<Option<(Reply, usize)>> {
    let mut scan = Scan::default();
    match scan.advance(buf, options)? {
        Some(end) => Ok(materialize(&buf[..end], options)),
        None => Ok(None),
    }
}

/// One frame header, checked but not copied.
enum Header {
    /// A complete scalar, bulk, or null; the value ends at the offset.
    Leaf(usize),
    /// A non-null array of `len` elements whose first element starts at the offset.
    Array(usize, usize),
}

/// Validates the frame starting at `start` without allocating.
///
/// `Ok(None)` means the header (or bulk payload) is not fully buffered yet.
fn scan_header(
    buf: &[u8],
    start: usize,
    depth: usize,
    options: &DecodeOptions,
) -> CodecResult<Option<Header>> {
    let marker = match buf.get(start) {
        Some(&marker) => marker,
        None => return Ok(None),
    };
    if !matches!(marker, b'+' | b'-' | b':' | b'$' | b'*') {
        return Err(CodecError::InvalidType(marker));
    }

    let (line_end, next) = match find_line(buf, start, options.max_line_len)? {
        Some(found) => found,
        None => return Ok(None),
    };
    let body = &buf[start + 1..line_end];

    match marker {
        b'+' | b'-' => Ok(Some(Header::Leaf(next))),
        b':' => {
            parse_i64(body).ok_or_else(|| CodecError::InvalidInteger(lossy(body)))?;
            Ok(Some(Header::Leaf(next)))
        }
        b'$' => {
            let len = match parse_len(body)? {
                Some(len) => len,
                None => return Ok(Some(Header::Leaf(next))),
            };
            if len > options.max_bulk_len {
                return Err(CodecError::BulkTooLarge {
                    len,
                    max: options.max_bulk_len,
                });
            }
            let end = next + len;
            if buf.len() < end + 2 {
                return Ok(None);
            }
            if &buf[end..end + 2] != b"\r\n" {
                return Err(CodecError::MissingTerminator);
            }
            Ok(Some(Header::Leaf(end + 2)))
        }
        _ => {
            let len = match parse_len(body)? {
                Some(len) => len,
                None => return Ok(Some(Header::Leaf(next))),
            };
            if depth >= options.max_depth {
                return Err(CodecError::TooDeep(options.max_depth));
            }
            Ok(Some(Header::Array(next, len)))
        }
    }
}

/// Resumable completeness scan over one top-level reply.
#[derive(Debug, Default)]
struct Scan {
    /// Offset of the first frame not yet validated.
    pos: usize,
    /// Elements still expected by each open array, outermost first.
    open: Vec<usize>,
}

impl Scan {
    /// Validates frames from `pos` onwards; returns the reply's end offset once
    /// the whole reply is buffered.
    fn advance(&mut self, buf: &[u8], options: &DecodeOptions) -> CodecResult<Option<usize>> {
        loop {
            match scan_header(buf, self.pos, self.open.len(), options)? {
                None => return Ok(None),
                Some(Header::Array(next, len)) if len > 0 => {
                    self.pos = next;
                    self.open.push(len);
                    continue;
                }
                Some(Header::Array(next, _)) | Some(Header::Leaf(next)) => self.pos = next,
            }

            // An element finished; close every array it completes.
            loop {
                match self.open.last_mut() {
                    None => return Ok(Some(self.pos)),
                    Some(remaining) => {
                        *remaining -= 1;
                        if *remaining > 0 {
                            break;
                        }
                        self.open.pop();
                    }
                }
            }
        }
    }

    fn reset(&mut self) {
        self.pos = 0;
        self.open.clear();
    }
}

/// Builds the reply for a buffer already validated by [`Scan`].
fn materialize(buf: &[u8], options: &DecodeOptions) -> Option<(Reply, usize)> {
    build(buf, 0, options)
}

fn build(buf: &[u8], start: usize, options: &DecodeOptions) -> Option<(Reply, usize)> {
    let marker = *buf.get(start)?;
    let (line_end, next) = find_line(buf, start, options.max_line_len).ok()??;
    let body = &buf[start + 1..line_end];

    match marker {
        b'+' => Some((Reply::Simple(Bytes::copy_from_slice(body)), next)),
        b'-' => Some((Reply::Error(Bytes::copy_from_slice(body)), next)),
        b':' => Some((Reply::Integer(parse_i64(body)?), next)),
        b'$' => match parse_len(body).ok()? {
            None => Some((Reply::Nil, next)),
            Some(len) => {
                let end = next + len;
                let payload = buf.get(next..end)?;
                Some((Reply::Bulk(Bytes::copy_from_slice(payload)), end + 2))
            }
        },
        b'*' => match parse_len(body).ok()? {
            None => Some((Reply::Nil, next)),
            Some(len) => {
                let mut items = Vec::with_capacity(len.min(MAX_PREALLOC_ITEMS));
                let mut pos = next;
                for _ in 0..len {
                    let (item, after) = build(buf, pos, options)?;
                    items.push(item);
                    pos = after;
                }
                Some((Reply::Array(items), pos))
            }
        },
        _ => None,
    }
}

/// Locates the CRLF ending the header line that starts at `start`.
///
/// Returns (index of '\r', index after '\n'). Only `max_len` bytes past the
/// type marker are searched; a longer line is an error.
fn find_line(buf: &[u8], start: usize, max_len: usize) -> CodecResult<Option<(usize, usize)>> {
    let rest = match buf.get(start..) {
        Some(rest) => rest,
        None => return Ok(None),
    };
    // Marker byte, at most `max_len` body bytes, then CRLF.
    let window = rest.len().min(max_len.saturating_add(3));
    match rest[..window].windows(2).position(|pair| pair == b"\r\n") {
        Some(offset) => Ok(Some((start + offset, start + offset + 2))),
        None if window > max_len.saturating_add(2) => Err(CodecError::LineTooLong(max_len)),
        None => Ok(None),
    }
}

/// Parses a length header; `Ok(None)` is the -1 null marker.
fn parse_len(body: &[u8]) -> CodecResult<Option<usize>> {
    match parse_i64(body) {
        Some(-1) => Ok(None),
        Some(len) if len >= 0 => Ok(Some(len as usize)),
        _ => Err(CodecError::InvalidLength(lossy(body))),
    }
}

fn parse_i64(body: &[u8]) -> Option<i64> {
    std::str::from_utf8(body).ok()?.parse().ok()
}

fn lossy(body: &[u8]) -> String {
    String::from_utf8_lossy(body).into_owned()
}

/// Accumulating decoder for a byte stream.
///
/// Bytes are appended with [`feed`](Self::feed) (or read straight into
/// [`buffer_mut`](Self::buffer_mut)); complete replies are drained with
/// [`next_reply`](Self::next_reply).
#[derive(Debug)]
pub struct ReplyDecoder {
    buffer: BytesMut,
    options: DecodeOptions,
    scan: Scan,
}

impl ReplyDecoder {
    /// Creates a decoder with default limits.
    pub fn new() -> Self {
        Self::with_options(DecodeOptions::default())
    }

    /// Creates a decoder with explicit limits.
    pub fn with_options(options: DecodeOptions) -> Self {
        ReplyDecoder {
            buffer: BytesMut::with_capacity(16 * 1024),
            options,
            scan: Scan::default(),
        }
    }

    /// Appends raw bytes received from the server.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Accumulation buffer, for reading socket data into it directly.
    ///
    /// Only append to it; buffered bytes must not be modified or removed.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Pops the next complete reply, if one is buffered.
    ///
    /// An incomplete reply is scanned only from where the previous call
    /// stopped, and is copied out once, when its last byte has arrived.
    pub fn next_reply(&mut self) -> CodecResult<Option<Reply>> {
        let end = match self.scan.advance(&self.buffer, &self.options)? {
            Some(end) => end,
            None => return Ok(None),
        };
        self.scan.reset();
        match materialize(&self.buffer[..end], &self.options) {
            Some((reply, used)) => {
                self.buffer.advance(used);
                Ok(Some(reply))
            }
            None => Err(CodecError::MissingTerminator),
        }
    }

    /// Number of bytes waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drops buffered bytes, e.g. after the connection is replaced.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scan.reset();
    }
}

impl Default for ReplyDecoder {
    fn default() -> Self {
        Self::new()
    }
}
