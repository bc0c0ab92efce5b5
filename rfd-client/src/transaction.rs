//! # Transaction Batcher
//!
//! `MULTI` / queued commands / `EXEC` written as one contiguous block and
//! tracked as a single pending request that consumes K+2 replies. The
//! acknowledgements are swallowed; the `EXEC` array is fanned back out to the
//! per-command callbacks and then handed whole to the aggregate callback.

use bytes::BytesMut;
use rfd_codec::{encode_command, CodecError, CodecResult, Command, Reply};
use tokio::sync::oneshot;

use crate::client::Client;
use crate::error::{ClientError, ClientResult};
use crate::pipeline::{into_result, invoke, Callback, ExecCallback, Payload};

/// Fluent builder for a transaction, created by [`Client::multi`].
///
/// Nothing is sent until [`exec`](Self::exec).
pub struct Multi {
    client: Client,
    commands: Vec<Command>,
    callbacks: Vec<Option<Callback>>,
}

impl Multi {
    pub(crate) fn new(client: Client) -> Self {
        Multi {
            client,
            commands: Vec::new(),
            callbacks: Vec::new(),
        }
    }

    /// Appends a command whose individual result is not needed.
    pub fn queue(self, command: Command) -> Self {
        self.queue_boxed(command, None)
    }

    /// Appends a command with its own result callback.
    pub fn queue_with<F>(self, command: Command, callback: F) -> Self
    where
        F: FnOnce(ClientResult<Reply>) + Send + 'static,
    {
        self.queue_boxed(command, Some(Box::new(callback)))
    }

    /// Appends a command with an optional boxed callback.
    pub fn queue_boxed(mut self, command: Command, callback: Option<Callback>) -> Self {
        self.commands.push(command);
        self.callbacks.push(callback);
        self
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Sends the transaction.
    ///
    /// `aggregate` receives every reply in queue order, `Ok(None)` when the
    /// server aborted the transaction (no per-command callback fires then),
    /// or the error that failed it. Returns `Err` without invoking any
    /// callback when a queued command is empty or the client is saturated.
    pub fn exec<F>(self, aggregate: F) -> ClientResult<()>
    where
        F: FnOnce(ClientResult<Option<Vec<Reply>>>) + Send + 'static,
    {
        if self.commands.iter().any(Command::is_empty) {
            return Err(ClientError::InvalidCommand(CodecError::EmptyCommand));
        }
        let Multi {
            client,
            commands,
            callbacks,
        } = self;
        let state = TransactionState::new(commands, callbacks, Box::new(aggregate));
        let weight = state.weight();
        client.dispatch(Payload::Transaction(state), weight)
    }

    /// Future form of [`exec`](Self::exec).
    pub async fn exec_async(self) -> ClientResult<Option<Vec<Reply>>> {
        let (tx, rx) = oneshot::channel();
        self.exec(move |result| {
            let _ = tx.send(result);
        })?;
        rx.await.unwrap_or(Err(ClientError::ConnectionClosed))
    }
}

/// Reply bookkeeping for one in-flight transaction.
pub(crate) struct TransactionState {
    commands: Vec<Command>,
    callbacks: Vec<Option<Callback>>,
    aggregate: Option<ExecCallback>,
    queue_errors: Vec<Option<ClientError>>,
    received: usize,
}

impl TransactionState {
    pub(crate) fn new(
        commands: Vec<Command>,
        callbacks: Vec<Option<Callback>>,
        aggregate: ExecCallback,
    ) -> Self {
        let queue_errors = vec![None; callbacks.len()];
        TransactionState {
            commands,
            callbacks,
            aggregate: Some(aggregate),
            queue_errors,
            received: 0,
        }
    }

    /// Replies this transaction will consume: MULTI, one per command, EXEC.
    pub(crate) fn weight(&self) -> usize {
        self.callbacks.len() + 2
    }

    /// Writes MULTI, the queued commands, and EXEC back to back.
    pub(crate) fn encode(&mut self, out: &mut BytesMut) -> CodecResult<()> {
        if self.commands.iter().any(Command::is_empty) {
            return Err(CodecError::EmptyCommand);
        }
        encode_command(&Command::new("MULTI"), out)?;
        for command in self.commands.drain(..) {
            encode_command(&command, out)?;
        }
        encode_command(&Command::new("EXEC"), out)
    }

    /// Feeds the next reply; returns the EXEC reply once it arrives.
    pub(crate) fn accept(&mut self, reply: Reply) -> Option<Reply> {
        let index = self.received;
        self.received += 1;
        let queued = self.callbacks.len();

        if index == 0 {
            if let Some(message) = reply.error_message() {
                tracing::debug!(error = %message, "MULTI rejected");
            }
            return None;
        }
        if index <= queued {
            // QUEUED acknowledgement, or the reason this command was refused.
            if let Some(message) = reply.error_message() {
                self.queue_errors[index - 1] = Some(ClientError::Command(message));
            }
            return None;
        }
        Some(reply)
    }

    /// Dispatches the EXEC reply.
    pub(crate) fn finish(self, exec_reply: Reply) {
        let queued = self.callbacks.len();
        match exec_reply {
            Reply::Array(items) if items.len() == queued => self.complete(items),
            Reply::Nil => self.abort(),
            Reply::Error(message) => {
                let err = ClientError::Command(String::from_utf8_lossy(&message).into_owned());
                self.reject(err)
            }
            other => self.fail(ClientError::UnexpectedReply(format!(
                "EXEC returned {} for {} queued commands",
                other, queued
            ))),
        }
    }

    /// Fails every callback with `err`, per-command first.
    pub(crate) fn fail(self, err: ClientError) {
        for callback in self.callbacks.into_iter().flatten() {
            invoke(callback, Err(err.clone()));
        }
        if let Some(aggregate) = self.aggregate {
            invoke(aggregate, Err(err));
        }
    }

    fn complete(self, items: Vec<Reply>) {
        for (callback, item) in self.callbacks.into_iter().zip(items.iter()) {
            if let Some(callback) = callback {
                invoke(callback, into_result(item.clone()));
            }
        }
        if let Some(aggregate) = self.aggregate {
            invoke(aggregate, Ok(Some(items)));
        }
    }

    fn abort(self) {
        tracing::debug!(queued = self.callbacks.len(), "transaction aborted by server");
        if let Some(aggregate) = self.aggregate {
            invoke(aggregate, Ok(None));
        }
    }

    // EXECABORT and friends: commands refused at queue time keep their own error.
    fn reject(self, err: ClientError) {
        for (callback, queue_error) in self.callbacks.into_iter().zip(self.queue_errors) {
            if let Some(callback) = callback {
                invoke(callback, Err(queue_error.unwrap_or_else(|| err.clone())));
            }
        }
        if let Some(aggregate) = self.aggregate {
            invoke(aggregate, Err(err));
        }
    }
}
