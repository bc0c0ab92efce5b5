//! # rfd Pipelined Client
//!
//! Purpose: An asynchronous Redis-protocol client that keeps one connection
//! busy with many outstanding commands and hands each reply back to the
//! callback that asked for it.
//!
//! ## Design Principles
//! 1. **Pipelining First**: Commands are written as soon as they are submitted;
//!    nobody waits for the previous reply.
//! 2. **Callback Or Future**: Every command takes a completion callback, with
//!    thin `async` wrappers on top for callers that prefer `.await`.
//! 3. **Atomic Transactions**: `multi()` batches MULTI/EXEC into one contiguous
//!    write that other submissions cannot interleave with.
//! 4. **Observable Lifecycle**: `ready`, `error`, and `end` events plus a
//!    `watch`-backed connection state.

mod client;
mod config;
mod connection;
mod error;
mod event;
mod pipeline;
mod transaction;

pub use client::{print, Client};
pub use config::{
    ClientConfig, ClientConfigBuilder, Endpoint, ReconnectPolicy, DEFAULT_MAX_PENDING_REQUESTS,
};
pub use connection::ConnectionState;
pub use error::{ClientError, ClientResult, ErrorKind};
pub use event::{Event, EventKind, SubscriptionId};
pub use pipeline::{Callback, ExecCallback};
pub use rfd_codec::{cmd, Command, Reply, ToArg};
pub use transaction::Multi;
