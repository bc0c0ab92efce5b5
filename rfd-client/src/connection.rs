//! # Connection Manager
//!
//! Purpose: Own the socket lifecycle for one client: connect, serve the
//! pipeline, reconnect per policy, drain on `end()`, and close.
//!
//! ## Design Principles
//! 1. **Single Owner**: One driver task owns the socket, the decoder, and the
//!    pending queue, so request order is channel order is write order.
//! 2. **Authoritative State**: `ConnectionState` lives in a `watch` channel;
//!    only this module changes it, everyone else observes.
//! 3. **Cancel-Safe Loop**: The serve loop only awaits cancel-safe operations
//!    inside `select!`, so no bytes are lost when another branch wins.
//! 4. **Fail Loudly, Once**: A connection fault is emitted once as an `error`
//!    event and then fails every pending request.
//!
//! ## Lifecycle
//!
//! ```text
//!             connect ok               end()
//! Connecting ───────────▶ Ready ──────────────▶ Closing ──▶ Closed
//!     ▲  │                  │ fault                           ▲
//!     │  │ connect failed   │                                 │
//!     └──┴──── retry ◀──────┴──── policy exhausted ───────────┘
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use rfd_codec::ReplyDecoder;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::config::{ClientConfig, Endpoint};
use crate::error::{ClientError, ClientResult};
use crate::event::{Event, EventHub};
use crate::pipeline::{Pipeline, Request};

/// Initial capacity of the coalesced outbound buffer.
const OUTBOUND_CAPACITY: usize = 16 * 1024;

/// Requests pulled from the queue per wakeup before the loop polls the socket.
const MAX_BATCH: usize = 1024;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Dialing the server (initially or after a fault); requests wait.
    Connecting,
    /// Connected; requests are written as they arrive.
    Ready,
    /// `end()` was called; accepted requests drain, new ones are refused.
    Closing,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    fn can_transition_to(self, next: ConnectionState) -> bool {
        match (self, next) {
            (ConnectionState::Closed, _) => false,
            (ConnectionState::Closing, next) => next == ConnectionState::Closed,
            _ => true,
        }
    }

    /// True when new requests may be submitted.
    pub fn accepts_requests(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Ready)
    }
}

/// State shared between the client handles and the driver task.
pub(crate) struct Shared {
    pub(crate) config: ClientConfig,
    pub(crate) events: EventHub,
    pub(crate) in_flight: Arc<AtomicUsize>,
    state: watch::Sender<ConnectionState>,
}

impl Shared {
    pub(crate) fn new(config: ClientConfig) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Arc::new(Shared {
            config,
            events: EventHub::new(),
            in_flight: Arc::new(AtomicUsize::new(0)),
            state,
        })
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Moves to `Closing`; returns false when already closing or closed.
    pub(crate) fn begin_close(&self) -> bool {
        self.state().accepts_requests() && self.transition(ConnectionState::Closing)
    }

    fn transition(&self, next: ConnectionState) -> bool {
        let mut allowed = false;
        self.state.send_if_modified(|state| {
            allowed = state.can_transition_to(next);
            if allowed && *state != next {
                *state = next;
                true
            } else {
                false
            }
        });
        allowed
    }
}

/// Byte stream the driver can serve: TCP, Unix socket, or anything in tests.
pub(crate) trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// Starts the driver task for a new client.
pub(crate) fn spawn(
    runtime: &tokio::runtime::Handle,
    shared: Arc<Shared>,
    requests: mpsc::UnboundedReceiver<Request>,
) {
    let state_rx = shared.watch_state();
    let driver = ConnectionDriver {
        shared,
        requests,
        state_rx,
        pipeline: Pipeline::new(),
    };
    runtime.spawn(driver.run());
}

enum ServeExit {
    /// `end()` completed (drained or timed out).
    Closing,
    /// The connection broke.
    Fault(ClientError),
}

struct ConnectionDriver {
    shared: Arc<Shared>,
    requests: mpsc::UnboundedReceiver<Request>,
    state_rx: watch::Receiver<ConnectionState>,
    pipeline: Pipeline,
}

impl ConnectionDriver {
    async fn run(mut self) {
        let endpoint = self.shared.config.endpoint();
        let mut attempt: u32 = 0;

        loop {
            if !self.shared.transition(ConnectionState::Connecting) {
                break;
            }
            tracing::debug!(%endpoint, attempt, "connecting");

            let connected = tokio::select! {
                result = open(&endpoint, &self.shared.config) => Some(result),
                _ = closing_while_connecting(&mut self.state_rx, &self.shared) => None,
            };
            let transport = match connected {
                None => break,
                Some(Ok(transport)) => transport,
                Some(Err(err)) => {
                    tracing::warn!(%endpoint, error = %err, "connect failed");
                    self.shared.events.emit(Event::Error(err));
                    attempt += 1;
                    if self.backoff(attempt).await {
                        continue;
                    }
                    break;
                }
            };

            attempt = 0;
            if self.shared.transition(ConnectionState::Ready) {
                tracing::info!(%endpoint, "connected");
                self.shared.events.emit(Event::Ready);
            }

            match self.serve(transport).await {
                ServeExit::Closing => break,
                ServeExit::Fault(err) => {
                    tracing::warn!(
                        %endpoint,
                        error = %err,
                        pending = self.pipeline.len(),
                        "connection lost"
                    );
                    // No socket from here on, whatever the policy decides.
                    self.shared.transition(ConnectionState::Connecting);
                    self.shared.events.emit(Event::Error(err));
                    self.pipeline.fail_all(&ClientError::ConnectionClosed);
                    attempt += 1;
                    if !self.backoff(attempt).await {
                        break;
                    }
                }
            }
        }

        self.shutdown();
    }

    /// Waits out the reconnect delay; false means stop for good.
    async fn backoff(&mut self, attempt: u32) -> bool {
        let delay = match self.shared.config.reconnect.delay_for(attempt) {
            Some(delay) => delay,
            None => return false,
        };
        tracing::debug!(attempt, ?delay, "reconnect scheduled");
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = wait_closing(&mut self.state_rx) => false,
        }
    }

    /// Pumps requests out and replies in until the connection ends.
    async fn serve(&mut self, transport: Box<dyn Transport>) -> ServeExit {
        let (mut reader, mut writer) = tokio::io::split(transport);
        let mut decoder = ReplyDecoder::new();
        let mut outbound = BytesMut::with_capacity(OUTBOUND_CAPACITY);
        let mut drain_deadline: Option<Instant> = None;

        loop {
            if drain_deadline.is_some() && self.pipeline.is_empty() && outbound.is_empty() {
                tracing::debug!("drained");
                return ServeExit::Closing;
            }

            tokio::select! {
                request = self.requests.recv(), if drain_deadline.is_none() => match request {
                    Some(request) => {
                        self.pipeline.enqueue(request, &mut outbound);
                        self.collect_queued(&mut outbound);
                    }
                    // Every client handle is gone; treat like end().
                    None => drain_deadline = Some(self.drain_deadline()),
                },
                _ = wait_closing(&mut self.state_rx), if drain_deadline.is_none() => {
                    // Submissions stop at Closing, so this queue is finite.
                    while let Ok(request) = self.requests.try_recv() {
                        self.pipeline.enqueue(request, &mut outbound);
                    }
                    tracing::debug!(pending = self.pipeline.len(), "closing, draining in-flight replies");
                    drain_deadline = Some(self.drain_deadline());
                }
                written = writer.write(&outbound), if !outbound.is_empty() => match written {
                    Ok(0) => {
                        let err = std::io::Error::new(std::io::ErrorKind::WriteZero, "socket closed for writing");
                        return ServeExit::Fault(err.into());
                    }
                    Ok(n) => outbound.advance(n),
                    Err(err) => return ServeExit::Fault(err.into()),
                },
                read = reader.read_buf(decoder.buffer_mut()) => match read {
                    Ok(0) if drain_deadline.is_some() => return ServeExit::Closing,
                    Ok(0) => {
                        let err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "connection closed by server");
                        return ServeExit::Fault(err.into());
                    }
                    Ok(_) => {
                        if let Err(err) = self.dispatch_replies(&mut decoder) {
                            return ServeExit::Fault(err);
                        }
                    }
                    Err(err) => return ServeExit::Fault(err.into()),
                },
                _ = tokio::time::sleep_until(drain_deadline.unwrap_or_else(Instant::now)), if drain_deadline.is_some() => {
                    tracing::warn!(pending = self.pipeline.len(), "drain timeout elapsed");
                    return ServeExit::Closing;
                }
            }
        }
    }

    /// Encodes whatever else is already queued so it goes out in one write.
    fn collect_queued(&mut self, outbound: &mut BytesMut) {
        for _ in 0..MAX_BATCH {
            match self.requests.try_recv() {
                Ok(request) => self.pipeline.enqueue(request, outbound),
                Err(_) => break,
            }
        }
    }

    fn dispatch_replies(&mut self, decoder: &mut ReplyDecoder) -> ClientResult<()> {
        while let Some(reply) = decoder.next_reply()? {
            self.pipeline.dispatch(reply)?;
        }
        Ok(())
    }

    fn drain_deadline(&self) -> Instant {
        Instant::now() + self.shared.config.drain_timeout()
    }

    /// Final teardown: Closed, then fail leftovers oldest first.
    fn shutdown(mut self) {
        self.shared.transition(ConnectionState::Closed);
        self.pipeline.fail_all(&ClientError::ConnectionClosed);

        // Requests that raced with close never reached the socket.
        self.requests.close();
        let mut unsent = 0usize;
        while let Ok(request) = self.requests.try_recv() {
            request.fail(ClientError::ConnectionClosed);
            unsent += 1;
        }
        tracing::debug!(unsent, "connection closed");
        self.shared.events.emit(Event::End);
    }
}

async fn wait_closing(state_rx: &mut watch::Receiver<ConnectionState>) {
    let _ = state_rx
        .wait_for(|state| !state.accepts_requests())
        .await;
}

/// Resolves when a connect attempt should be abandoned: closing with nothing
/// queued, or closing and the drain timeout has elapsed.
async fn closing_while_connecting(state_rx: &mut watch::Receiver<ConnectionState>, shared: &Shared) {
    wait_closing(state_rx).await;
    if shared.in_flight.load(Ordering::Acquire) > 0 {
        tokio::time::sleep(shared.config.drain_timeout()).await;
    }
}

/// Dials `endpoint`, honouring the configured connect timeout.
async fn open(endpoint: &Endpoint, config: &ClientConfig) -> ClientResult<Box<dyn Transport>> {
    match config.connect_timeout() {
        Some(timeout) => tokio::time::timeout(timeout, dial(endpoint, config))
            .await
            .map_err(|_| ClientError::ConnectTimeout {
                addr: endpoint.to_string(),
                timeout,
            })?,
        None => dial(endpoint, config).await,
    }
}

async fn dial(endpoint: &Endpoint, config: &ClientConfig) -> ClientResult<Box<dyn Transport>> {
    match endpoint {
        Endpoint::Tcp { host, port } => {
            let stream = TcpStream::connect((host.as_str(), *port))
                .await
                .map_err(|err| ClientError::connect(&endpoint.to_string(), err))?;
            // Small pipelined requests should not wait on Nagle.
            stream.set_nodelay(config.nodelay)?;
            Ok(Box::new(stream))
        }
        #[cfg(unix)]
        Endpoint::Unix(path) => {
            let stream = tokio::net::UnixStream::connect(path)
                .await
                .map_err(|err| ClientError::connect(&endpoint.to_string(), err))?;
            Ok(Box::new(stream))
        }
        #[cfg(not(unix))]
        Endpoint::Unix(_) => Err(ClientError::Config(
            "unix domain sockets are not supported on this platform".to_string(),
        )),
    }
}
