//! # RESP2 Encoding
//!
//! Requests are always arrays of bulk strings. Replies can be encoded too so
//! that test servers and round-trip checks speak the same format.

use bytes::{BufMut, BytesMut};

use crate::command::Command;
use crate::error::{CodecError, CodecResult};
use crate::reply::Reply;

/// Appends the request frame for `command` to `out`.
///
/// Fails only when the command has no arguments; `out` is left untouched in
/// that case.
pub fn encode_command(command: &Command, out: &mut BytesMut) -> CodecResult<()> {
    if command.is_empty() {
        return Err(CodecError::EmptyCommand);
    }

    let payload: usize = command.args().iter().map(|arg| arg.len() + 16).sum();
    out.reserve(payload + 16);

    out.put_u8(b'*');
    push_i64(out, command.len() as i64);
    out.put_slice(b"\r\n");
    for arg in command.args() {
        out.put_u8(b'$');
        push_i64(out, arg.len() as i64);
        out.put_slice(b"\r\n");
        out.put_slice(arg);
        out.put_slice(b"\r\n");
    }
    Ok(())
}

/// Appends the server-side encoding of `reply` to `out`.
///
/// `Reply::Nil` is written as a null bulk string.
pub fn encode_reply(reply: &Reply, out: &mut BytesMut) {
    match reply {
        Reply::Simple(data) => push_line(out, b'+', data),
        Reply::Error(data) => push_line(out, b'-', data),
        Reply::Integer(value) => {
            out.put_u8(b':');
            push_i64(out, *value);
            out.put_slice(b"\r\n");
        }
        Reply::Bulk(data) => {
            out.put_u8(b'$');
            push_i64(out, data.len() as i64);
            out.put_slice(b"\r\n");
            out.put_slice(data);
            out.put_slice(b"\r\n");
        }
        Reply::Nil => out.put_slice(b"$-1\r\n"),
        Reply::Array(items) => {
            out.put_u8(b'*');
            push_i64(out, items.len() as i64);
            out.put_slice(b"\r\n");
            for item in items {
                encode_reply(item, out);
            }
        }
    }
}

fn push_line(out: &mut BytesMut, marker: u8, data: &[u8]) {
    out.put_u8(marker);
    out.put_slice(data);
    out.put_slice(b"\r\n");
}

fn push_i64(out: &mut BytesMut, value: i64) {
    // Digits go into a stack buffer first to keep the hot path allocation-free.
    let mut buf = [0u8; 20];
    let mut len = 0;
    let mut magnitude = value.unsigned_abs();
    if magnitude == 0 {
        buf[0] = b'0';
        len = 1;
    }
    while magnitude > 0 {
        buf[len] = b'0' + (magnitude % 10) as u8;
        magnitude /= 10;
        len += 1;
    }
    if value < 0 {
        out.put_u8(b'-');
    }
    for idx in (0..len).rev() {
        out.put_u8(buf[idx]);
    }
}
