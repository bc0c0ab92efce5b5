//! # Command Pipeline
//!
//! Purpose: Encode accepted requests into the outbound buffer and match every
//! decoded reply to the oldest request still waiting for one.
//!
//! ## Design Principles
//! 1. **Strict FIFO**: The server answers in request order, so the head of the
//!    pending queue always owns the next reply. No correlation ids.
//! 2. **Exactly Once**: Each pending request leaves the queue by completing or
//!    by `fail_all`; either way its callback runs once.
//! 3. **RAII Capacity**: A `Permit` travels with each request and returns its
//!    backpressure budget when dropped.
//! 4. **Synchronous Core**: No I/O here; the connection driver feeds bytes in
//!    and takes bytes out, which keeps the matching logic unit-testable.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use rfd_codec::{encode_command, Command, Reply};

use crate::error::{ClientError, ClientResult};
use crate::transaction::TransactionState;

/// Completion callback for a single command.
pub type Callback = Box<dyn FnOnce(ClientResult<Reply>) + Send + 'static>;

/// Aggregate callback for a transaction: `Ok(None)` means the server aborted it.
pub type ExecCallback = Box<dyn FnOnce(ClientResult<Option<Vec<Reply>>>) + Send + 'static>;

/// Converts a reply into the callback contract: error replies become
/// `ClientError::Command`, everything else is a value.
pub(crate) fn into_result(reply: Reply) -> ClientResult<Reply> {
    match reply {
        Reply::Error(message) => Err(ClientError::Command(
            String::from_utf8_lossy(&message).into_owned(),
        )),
        other => Ok(other),
    }
}

/// Runs a completion callback, containing any panic so the driver task and
/// the callbacks queued behind this one survive it.
pub(crate) fn invoke<T>(callback: impl FnOnce(T), value: T) {
    if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| callback(value))) {
        tracing::error!(panic = panic_message(&*panic), "completion callback panicked");
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// Reservation against the outstanding-request limit.
pub(crate) struct Permit {
    counter: Arc<AtomicUsize>,
    weight: usize,
}

impl Permit {
    /// Reserves `weight` slots, or returns `None` when that would exceed `limit`.
    pub(crate) fn acquire(counter: &Arc<AtomicUsize>, weight: usize, limit: usize) -> Option<Self> {
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                let next = current.checked_add(weight)?;
                (next <= limit).then_some(next)
            })
            .ok()?;
        Some(Permit {
            counter: counter.clone(),
            weight,
        })
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.counter.fetch_sub(self.weight, Ordering::AcqRel);
    }
}

/// What a caller asked for.
pub(crate) enum Payload {
    Single {
        command: Command,
        callback: Option<Callback>,
    },
    Transaction(TransactionState),
}

impl Payload {
    /// Completes the payload's callbacks with `err` without sending anything.
    pub(crate) fn fail(self, err: ClientError) {
        match self {
            Payload::Single { callback, .. } => {
                if let Some(callback) = callback {
                    invoke(callback, Err(err));
                }
            }
            Payload::Transaction(state) => state.fail(err),
        }
    }
}

/// An accepted request on its way to the connection driver.
pub(crate) struct Request {
    pub(crate) payload: Payload,
    pub(crate) permit: Permit,
}

impl Request {
    pub(crate) fn fail(self, err: ClientError) {
        let Request { payload, permit } = self;
        drop(permit);
        payload.fail(err);
    }
}

enum Slot {
    Single(Option<Callback>),
    Transaction(TransactionState),
}

struct PendingRequest {
    seq: u64,
    slot: Slot,
    permit: Permit,
}

/// Ordered queue of requests written to the socket and awaiting replies.
#[derive(Default)]
pub(crate) struct Pipeline {
    pending: VecDeque<PendingRequest>,
    next_seq: u64,
}

impl Pipeline {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Encodes `request` into `out` and queues it for the matching reply.
    ///
    /// A request that cannot be encoded is failed immediately and never queued,
    /// so the queue only ever holds requests whose bytes are in `out`.
    pub(crate) fn enqueue(&mut self, request: Request, out: &mut BytesMut) {
        let Request { payload, permit } = request;
        let slot = match payload {
            Payload::Single { command, callback } => match encode_command(&command, out) {
                Ok(()) => Slot::Single(callback),
                Err(err) => {
                    drop(permit);
                    if let Some(callback) = callback {
                        invoke(callback, Err(ClientError::InvalidCommand(err)));
                    }
                    return;
                }
            },
            Payload::Transaction(mut state) => match state.encode(out) {
                Ok(()) => Slot::Transaction(state),
                Err(err) => {
                    drop(permit);
                    state.fail(ClientError::InvalidCommand(err));
                    return;
                }
            },
        };

        let seq = self.next_seq;
        self.next_seq += 1;
        tracing::trace!(seq, "request written");
        self.pending.push_back(PendingRequest { seq, slot, permit });
    }

    /// Routes one decoded reply to the head of the queue.
    ///
    /// A reply with nothing pending means the stream is out of sync, which is
    /// reported as a protocol fault.
    pub(crate) fn dispatch(&mut self, reply: Reply) -> ClientResult<()> {
        let head = match self.pending.front_mut() {
            Some(head) => head,
            None => {
                return Err(ClientError::UnexpectedReply(format!(
                    "reply with no pending request: {}",
                    reply
                )))
            }
        };

        // Transactions consume several replies before they complete.
        let reply = match &mut head.slot {
            Slot::Single(_) => reply,
            Slot::Transaction(state) => match state.accept(reply) {
                Some(exec_reply) => exec_reply,
                None => return Ok(()),
            },
        };

        let PendingRequest { seq, slot, permit } = match self.pending.pop_front() {
            Some(entry) => entry,
            None => return Ok(()),
        };
        // Release capacity first so the callback may submit follow-up work.
        drop(permit);
        tracing::trace!(seq, "request completed");

        match slot {
            Slot::Single(Some(callback)) => invoke(callback, into_result(reply)),
            Slot::Single(None) => {}
            Slot::Transaction(state) => state.finish(reply),
        }
        Ok(())
    }

    /// Fails every pending request with `err`, oldest first.
    pub(crate) fn fail_all(&mut self, err: &ClientError) {
        if !self.pending.is_empty() {
            tracing::debug!(pending = self.pending.len(), error = %err, "failing pending requests");
        }
        while let Some(PendingRequest { slot, permit, .. }) = self.pending.pop_front() {
            drop(permit);
            match slot {
                Slot::Single(Some(callback)) => invoke(callback, Err(err.clone())),
                Slot::Single(None) => {}
                Slot::Transaction(state) => state.fail(err.clone()),
            }
        }
    }
}
