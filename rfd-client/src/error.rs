//! Client error taxonomy.

use std::sync::Arc;
use std::time::Duration;

use rfd_codec::CodecError;
use thiserror::Error;

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the client, either to one callback or via the `error`
/// event.
///
/// The type is `Clone` because a single connection fault fails every pending
/// request with the same value.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// TCP or Unix connect failed.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// Connect did not finish within the configured timeout.
    #[error("timed out connecting to {addr} after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    /// Socket failure after the connection was established.
    #[error("io error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    /// The connection went away while the request was pending.
    #[error("connection closed")]
    ConnectionClosed,

    /// The client is closing or closed and accepts no new commands.
    #[error("not connected")]
    NotConnected,

    /// The server sent bytes that are not a valid reply.
    #[error("protocol error: {0}")]
    Protocol(#[source] CodecError),

    /// A well-formed reply that does not fit the request it answers.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    /// The server answered this command with an error reply.
    #[error("{0}")]
    Command(String),

    /// Too many requests are outstanding.
    #[error("too many pending requests (limit {limit})")]
    Backpressure { limit: usize },

    /// The command cannot be encoded (e.g. no arguments).
    #[error("invalid command: {0}")]
    InvalidCommand(#[source] CodecError),

    /// Invalid client configuration or environment.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Coarse classification of [`ClientError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connect failure, socket reset, or use after close.
    Connection,
    /// Undecodable or mismatched server data; fatal to the connection.
    Protocol,
    /// Server error reply, local to one request.
    Command,
    /// Outstanding request limit reached.
    Backpressure,
    /// Caller mistake: bad command or configuration.
    Usage,
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Connect { .. }
            | ClientError::ConnectTimeout { .. }
            | ClientError::Io(_)
            | ClientError::ConnectionClosed
            | ClientError::NotConnected => ErrorKind::Connection,
            ClientError::Protocol(_) | ClientError::UnexpectedReply(_) => ErrorKind::Protocol,
            ClientError::Command(_) => ErrorKind::Command,
            ClientError::Backpressure { .. } => ErrorKind::Backpressure,
            ClientError::InvalidCommand(_) | ClientError::Config(_) => ErrorKind::Usage,
        }
    }

    /// True for faults that tear down the connection.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Connection | ErrorKind::Protocol)
    }

    pub(crate) fn connect(addr: &str, err: std::io::Error) -> Self {
        ClientError::Connect {
            addr: addr.to_string(),
            source: Arc::new(err),
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Io(Arc::new(err))
    }
}

impl From<CodecError> for ClientError {
    fn from(err: CodecError) -> Self {
        ClientError::Protocol(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_errors() {
        assert_eq!(ClientError::ConnectionClosed.kind(), ErrorKind::Connection);
        assert_eq!(
            ClientError::Protocol(CodecError::InvalidType(b'?')).kind(),
            ErrorKind::Protocol
        );
        assert_eq!(ClientError::Command("ERR x".into()).kind(), ErrorKind::Command);
        assert_eq!(
            ClientError::Backpressure { limit: 1 }.kind(),
            ErrorKind::Backpressure
        );
        assert!(ClientError::NotConnected.is_fatal());
        assert!(!ClientError::Command("ERR x".into()).is_fatal());
    }

    #[test]
    fn command_error_displays_server_text() {
        let err = ClientError::Command("ERR unknown command 'FOO'".into());
        assert_eq!(err.to_string(), "ERR unknown command 'FOO'");
    }
}
