//! In-process event registry.
//!
//! [`EventDispatcher`] maps an event name to an ordered list of listeners. The
//! connection manager uses it for lifecycle events ([`CONNECTION`], [`CLOSE`],
//! [`ERROR`], [`STATE`]) and for protocol routing (topic names, correlation
//! ids, `status:<id>` and `service_request:<service>`). Topics reuse it for
//! their local [`MESSAGE`] fan-out.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde_json::Value;

use crate::ws::connection::ConnectionState;

/// Emitted after a socket reaches the open state.
pub const CONNECTION: &str = "connection";
/// Emitted when a socket closes, or when the connection is closed by hand.
pub const CLOSE: &str = "close";
/// Emitted on transport errors.
pub const ERROR: &str = "error";
/// Emitted on every connection state transition.
pub const STATE: &str = "state";
/// Status messages that carry no id.
pub const STATUS: &str = "status";
/// Local fan-out of inbound topic messages.
pub const MESSAGE: &str = "message";

/// Event name for a `status` message correlated with `id`.
#[must_use]
pub fn status_event(id: &str) -> String {
    format!("status:{id}")
}

/// Event name under which inbound requests for `service` are emitted.
#[must_use]
pub fn service_request_event(service: &str) -> String {
    format!("service_request:{service}")
}

/// Payload carried by connection manager events.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The socket opened.
    Connection,
    /// The socket closed. `manual` is set when [`close`] was called.
    ///
    /// [`close`]: crate::ws::ConnectionManager::close
    Close { manual: bool },
    /// Transport error, rendered as text.
    Error(String),
    /// New connection state.
    State(ConnectionState),
    /// A routed protocol message.
    Message(Value),
}

impl Event {
    #[must_use]
    pub fn as_message(&self) -> Option<&Value> {
        match self {
            Self::Message(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_state(&self) -> Option<ConnectionState> {
        match self {
            Self::State(state) => Some(*state),
            _ => None,
        }
    }
}

/// Shared listener callback.
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Handle returned by [`EventDispatcher::on`], used to remove that listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

struct Registered<E> {
    id: ListenerId,
    once: bool,
    listener: Listener<E>,
}

/// Name-keyed registry of listeners.
///
/// Listeners run in registration order. A listener that panics is logged and
/// skipped; the remaining listeners still run. No internal lock is held while
/// listeners run, so they may register, remove or emit re-entrantly.
pub struct EventDispatcher<E> {
    listeners: DashMap<String, Vec<Registered<E>>>,
    next_id: AtomicU64,
}

impl<E> Default for EventDispatcher<E> {
    fn default() -> Self {
        Self {
            listeners: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<E> EventDispatcher<E> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener for `event`.
    pub fn on<F>(&self, event: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.register(event.into(), Arc::new(listener), false)
    }

    /// Add a listener that is removed right before its first invocation.
    pub fn once<F>(&self, event: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.register(event.into(), Arc::new(listener), true)
    }

    fn register(&self, event: String, listener: Listener<E>, once: bool) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.entry(event).or_default().push(Registered {
            id,
            once,
            listener,
        });
        id
    }

    /// Remove one listener. Returns `false` if it was not registered under `event`.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        let removed = match self.listeners.get_mut(event) {
            Some(mut registered) => {
                let before = registered.len();
                registered.retain(|r| r.id != id);
                registered.len() != before
            }
            None => false,
        };
        self.listeners.remove_if(event, |_, registered| registered.is_empty());
        removed
    }

    /// Remove every listener of `event`, returning how many were removed.
    pub fn off_all(&self, event: &str) -> usize {
        self.listeners
            .remove(event)
            .map_or(0, |(_, registered)| registered.len())
    }

    /// Remove every listener of every event.
    pub fn clear(&self) {
        self.listeners.clear();
    }

    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.get(event).map_or(0, |registered| registered.len())
    }

    /// Invoke the listeners of `event` with `payload`.
    ///
    /// Returns `false` when nothing is listening.
    pub fn emit(&self, event: &str, payload: &E) -> bool {
        let snapshot: Vec<Listener<E>> = {
            let Some(mut registered) = self.listeners.get_mut(event) else {
                return false;
            };
            let snapshot = registered
                .iter()
                .map(|r| Arc::clone(&r.listener))
                .collect();
            registered.retain(|r| !r.once);
            snapshot
        };
        self.listeners.remove_if(event, |_, registered| registered.is_empty());

        for listener in snapshot {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(payload))) {
                let reason = panic_message(panic.as_ref());
                #[cfg(feature = "tracing")]
                tracing::warn!(event, %reason, "Event listener panicked");
                #[cfg(not(feature = "tracing"))]
                let _: (&str, &String) = (event, &reason);
            }
        }
        true
    }
}

/// Extract the text of a panic payload, when it has one.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "Unknown error".to_owned()
    }
}
