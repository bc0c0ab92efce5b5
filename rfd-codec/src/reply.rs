//! # Reply Values
//!
//! Decoded server replies. Values are immutable once decoded; nested arrays
//! cover HGETALL-style flat lists and SCAN-style `[cursor, [items...]]` pairs.

use std::fmt;

use bytes::Bytes;

/// One RESP2 reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+OK` / `+PONG` style status replies.
    Simple(Bytes),
    /// `-ERR ...` replies; the payload is the server's message text.
    Error(Bytes),
    /// `:123` replies.
    Integer(i64),
    /// `$<len>` bulk strings (may be empty).
    Bulk(Bytes),
    /// `$-1` or `*-1`: an absent value, distinct from an empty bulk string.
    Nil,
    /// `*<len>` arrays; elements may themselves be arrays.
    Array(Vec<Reply>),
}

impl Reply {
    /// Shorthand for a status reply.
    pub fn simple(text: &str) -> Self {
        Reply::Simple(Bytes::copy_from_slice(text.as_bytes()))
    }

    /// Shorthand for a bulk reply.
    pub fn bulk(data: impl AsRef<[u8]>) -> Self {
        Reply::Bulk(Bytes::copy_from_slice(data.as_ref()))
    }

    /// Shorthand for an error reply.
    pub fn error(message: &str) -> Self {
        Reply::Error(Bytes::copy_from_slice(message.as_bytes()))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Nil)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Integer payload, if this is an integer reply.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Reply::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Raw payload of status, error, and bulk replies.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Reply::Simple(data) | Reply::Error(data) | Reply::Bulk(data) => Some(data),
            _ => None,
        }
    }

    /// Payload as UTF-8 text, when it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|data| std::str::from_utf8(data).ok())
    }

    /// Consumes an array reply into its elements.
    pub fn into_array(self) -> Option<Vec<Reply>> {
        match self {
            Reply::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Error text for an error reply, lossily decoded.
    pub fn error_message(&self) -> Option<String> {
        match self {
            Reply::Error(data) => Some(String::from_utf8_lossy(data).into_owned()),
            _ => None,
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Simple(data) | Reply::Bulk(data) => {
                write!(f, "{}", String::from_utf8_lossy(data))
            }
            Reply::Error(data) => write!(f, "(error) {}", String::from_utf8_lossy(data)),
            Reply::Integer(value) => write!(f, "{}", value),
            Reply::Nil => write!(f, "nil"),
            Reply::Array(items) => {
                write!(f, "[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_nested_scan_reply() {
        let reply = Reply::Array(vec![
            Reply::bulk("0"),
            Reply::Array(vec![Reply::bulk("a"), Reply::Nil, Reply::Integer(3)]),
        ]);
        assert_eq!(reply.to_string(), "[0, [a, nil, 3]]");
    }

    #[test]
    fn accessors_match_variants() {
        assert_eq!(Reply::Integer(-7).as_integer(), Some(-7));
        assert_eq!(Reply::simple("PONG").as_str(), Some("PONG"));
        assert_eq!(Reply::Nil.as_bytes(), None);
        assert!(Reply::error("ERR x").is_error());
        assert_eq!(
            Reply::error("ERR x").error_message().as_deref(),
            Some("ERR x")
        );
        assert!(Reply::bulk("").as_bytes().is_some_and(|b| b.is_empty()));
        assert!(!Reply::bulk("").is_nil());
    }
}
