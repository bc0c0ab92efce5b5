//! # Client Facade
//!
//! Purpose: The public handle. Cheap to clone, safe to share across tasks,
//! and the only way callers reach the connection driver.
//!
//! ## Design Principles
//! 1. **Non-Blocking Submission**: `raw_call` never waits on the network; it
//!    reserves capacity, enqueues, and returns.
//! 2. **One Outcome Per Submission**: a callback is invoked exactly once, or
//!    the submission returns `Err` and the callback is dropped unused.
//! 3. **Close On Last Drop**: dropping every handle behaves like `end()`.

use std::sync::Arc;

use rfd_codec::{CodecError, Command, Reply};
use tokio::sync::{mpsc, oneshot};

use crate::config::ClientConfig;
use crate::connection::{self, ConnectionState, Shared};
use crate::error::{ClientError, ClientResult};
use crate::event::{Event, EventKind, SubscriptionId};
use crate::pipeline::{Callback, Payload, Permit, Request};
use crate::transaction::Multi;

/// Pipelined client handle.
///
/// # Example
///
/// ```no_run
/// use rfd_client::{cmd, print, Client};
///
/// # async fn demo() -> rfd_client::ClientResult<()> {
/// let client = Client::connect("127.0.0.1", 6379)?;
/// client.on_ready(|| println!("connected"));
/// client.raw_call(cmd!["SET", "greeting", "hello"], print)?;
/// let value = client.call(cmd!["GET", "greeting"]).await?;
/// assert_eq!(value.as_str(), Some("hello"));
/// client.end();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    shared: Arc<Shared>,
    requests: mpsc::UnboundedSender<Request>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if self.shared.begin_close() {
            tracing::debug!("last client handle dropped, closing");
        }
    }
}

impl Client {
    /// Creates a client and starts connecting in the background.
    ///
    /// Must be called from within a Tokio runtime. Returns immediately;
    /// subscribe to `ready` or await [`wait_ready`](Self::wait_ready) to know
    /// when the connection is up.
    pub fn new(config: ClientConfig) -> ClientResult<Client> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| ClientError::Config(format!("no tokio runtime: {}", err)))?;

        tracing::debug!(endpoint = %config.endpoint(), "starting client");
        let shared = Shared::new(config);
        let (requests, rx) = mpsc::unbounded_channel();
        connection::spawn(&runtime, shared.clone(), rx);

        Ok(Client {
            inner: Arc::new(ClientInner { shared, requests }),
        })
    }

    /// Shorthand for a TCP client with default settings.
    pub fn connect(host: impl Into<String>, port: u16) -> ClientResult<Client> {
        Client::new(ClientConfig::builder().host(host).port(port).build())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.shared.config
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    /// Sends a command; `callback` receives the reply or the failure.
    ///
    /// Returns `Err` (and drops the callback) when the command is empty or the
    /// pending-request limit is reached. After `end()` the callback is invoked
    /// right away with [`ClientError::NotConnected`].
    pub fn raw_call<F>(&self, command: Command, callback: F) -> ClientResult<()>
    where
        F: FnOnce(ClientResult<Reply>) + Send + 'static,
    {
        self.submit(command, Some(Box::new(callback)))
    }

    /// Sends a command and discards its reply.
    pub fn raw_call_detached(&self, command: Command) -> ClientResult<()> {
        self.submit(command, None)
    }

    /// Sends a command with an optional boxed callback.
    pub fn submit(&self, command: Command, callback: Option<Callback>) -> ClientResult<()> {
        if command.is_empty() {
            return Err(ClientError::InvalidCommand(CodecError::EmptyCommand));
        }
        self.dispatch(Payload::Single { command, callback }, 1)
    }

    /// Future form of [`raw_call`](Self::raw_call).
    pub async fn call(&self, command: Command) -> ClientResult<Reply> {
        let (tx, rx) = oneshot::channel();
        self.raw_call(command, move |result| {
            let _ = tx.send(result);
        })?;
        rx.await.unwrap_or(Err(ClientError::ConnectionClosed))
    }

    /// Starts a transaction builder bound to this client.
    pub fn multi(&self) -> Multi {
        Multi::new(self.clone())
    }

    /// Starts a transaction pre-filled with `commands`.
    pub fn multi_with<I>(&self, commands: I) -> Multi
    where
        I: IntoIterator<Item = (Command, Option<Callback>)>,
    {
        commands
            .into_iter()
            .fold(self.multi(), |multi, (command, callback)| {
                multi.queue_boxed(command, callback)
            })
    }

    pub(crate) fn dispatch(&self, payload: Payload, weight: usize) -> ClientResult<()> {
        let shared = &self.inner.shared;
        if !shared.state().accepts_requests() {
            payload.fail(ClientError::NotConnected);
            return Ok(());
        }

        let limit = shared.config.max_pending_requests;
        let permit = match Permit::acquire(&shared.in_flight, weight, limit) {
            Some(permit) => permit,
            None => {
                tracing::debug!(limit, weight, "pending request limit reached");
                return Err(ClientError::Backpressure { limit });
            }
        };

        if let Err(mpsc::error::SendError(request)) =
            self.inner.requests.send(Request { payload, permit })
        {
            request.fail(ClientError::NotConnected);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------------

    /// Subscribes to one kind of lifecycle event.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.shared.events.subscribe(kind, handler)
    }

    /// Runs `handler` on every successful (re)connect.
    ///
    /// A connect that happened before anyone subscribed is replayed once.
    pub fn on_ready<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on(EventKind::Ready, move |_| handler())
    }

    pub fn on_error<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ClientError) + Send + Sync + 'static,
    {
        self.on(EventKind::Error, move |event| {
            if let Event::Error(err) = event {
                handler(err);
            }
        })
    }

    pub fn on_end<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on(EventKind::End, move |_| handler())
    }

    /// Removes a subscription; false if it was already gone.
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.inner.shared.events.unsubscribe(id)
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        self.inner.shared.state()
    }

    /// Weighted count of submitted requests that have not completed yet.
    pub fn in_flight(&self) -> usize {
        self.inner
            .shared
            .in_flight
            .load(std::sync::atomic::Ordering::Acquire)
    }

    /// Resolves once the client is `Ready`, or fails if it closes first.
    pub async fn wait_ready(&self) -> ClientResult<()> {
        let mut state = self.inner.shared.watch_state();
        let reached = state
            .wait_for(|state| *state != ConnectionState::Connecting)
            .await
            .map(|state| *state);
        match reached {
            Ok(ConnectionState::Ready) => Ok(()),
            _ => Err(ClientError::NotConnected),
        }
    }

    /// Resolves once the client reaches `Closed`.
    pub async fn closed(&self) {
        let mut state = self.inner.shared.watch_state();
        let _ = state
            .wait_for(|state| *state == ConnectionState::Closed)
            .await;
    }

    /// Stops accepting requests and closes after in-flight replies drain.
    ///
    /// Idempotent. Requests accepted earlier still get their replies, up to
    /// the configured drain timeout; anything left then fails with
    /// [`ClientError::ConnectionClosed`].
    pub fn end(&self) {
        if self.inner.shared.begin_close() {
            tracing::info!(pending = self.in_flight(), "client closing");
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.inner.shared.config.endpoint())
            .field("state", &self.state())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// Ready-made callback that writes the outcome to stdout.
pub fn print(result: ClientResult<Reply>) {
    match result {
        Ok(reply) => println!("Reply: {}", reply),
        Err(err) => println!("Error: {}", err),
    }
}
