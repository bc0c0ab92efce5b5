//! # Lifecycle Events
//!
//! Observer list for `ready`, `error`, and `end` notifications.
//!
//! A `ready` event emitted while nobody listens for it is remembered and
//! replayed to the first `ready` subscriber, so subscribing right after
//! `Client::new` never misses the initial connect. `end` clears that memory.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::ClientError;
use crate::pipeline::panic_message;

/// Lifecycle notification.
#[derive(Debug, Clone)]
pub enum Event {
    /// A connection was established and commands are being written.
    Ready,
    /// A fault occurred; fatal faults are followed by reconnect or `End`.
    Error(ClientError),
    /// The client reached `Closed` and will not reconnect.
    End,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Ready => EventKind::Ready,
            Event::Error(_) => EventKind::Error,
            Event::End => EventKind::End,
        }
    }
}

/// Event selector used when subscribing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Ready,
    Error,
    End,
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    kind: EventKind,
    handler: Handler,
}

#[derive(Default)]
struct HubState {
    next_id: u64,
    subscribers: Vec<Subscriber>,
    unseen_ready: bool,
}

/// Per-client subscriber registry.
#[derive(Default)]
pub(crate) struct EventHub {
    state: Mutex<HubState>,
}

impl EventHub {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn subscribe(
        &self,
        kind: EventKind,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let handler: Handler = Arc::new(handler);
        let (id, replay) = {
            let mut state = self.state.lock();
            state.next_id += 1;
            let id = SubscriptionId(state.next_id);
            state.subscribers.push(Subscriber {
                id,
                kind,
                handler: handler.clone(),
            });
            let replay = kind == EventKind::Ready && std::mem::take(&mut state.unseen_ready);
            (id, replay)
        };

        // Run outside the lock so the handler may subscribe or unsubscribe.
        if replay {
            handler(&Event::Ready);
        }
        id
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.state.lock();
        let before = state.subscribers.len();
        state.subscribers.retain(|sub| sub.id != id);
        state.subscribers.len() != before
    }

    pub(crate) fn emit(&self, event: Event) {
        let kind = event.kind();
        let handlers: Vec<Handler> = {
            let mut state = self.state.lock();
            match kind {
                EventKind::Ready => state.unseen_ready = true,
                EventKind::End => state.unseen_ready = false,
                EventKind::Error => {}
            }
            let handlers: Vec<Handler> = state
                .subscribers
                .iter()
                .filter(|sub| sub.kind == kind)
                .map(|sub| sub.handler.clone())
                .collect();
            if kind == EventKind::Ready && !handlers.is_empty() {
                state.unseen_ready = false;
            }
            handlers
        };

        if handlers.is_empty() {
            if let Event::Error(err) = &event {
                tracing::warn!("unhandled client error: {}", err);
            }
            return;
        }
        for handler in handlers {
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                tracing::error!(
                    event = ?kind,
                    panic = panic_message(&*panic),
                    "event handler panicked"
                );
            }
        }
    }
}
