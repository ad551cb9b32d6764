//! Topic handle: subscribe, advertise and publish on a named topic.

#![expect(
    clippy::module_name_repetitions,
    reason = "TopicOptions is re-exported at the crate root and reads better with its prefix"
)]

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_stream::stream;
use bon::Builder;
use futures::Stream;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::Result;
use crate::events::{EventDispatcher, ListenerId, MESSAGE};
use crate::protocol::request::{Hints, Request};
use crate::registration::{Reconnectable, Registration, Roles};
use crate::ws::ConnectionManager;

/// Transport hints sent with `subscribe` and `advertise`.
///
/// Unset, zero and `false` hints are left out of the wire message.
#[non_exhaustive]
#[derive(Debug, Clone, Default, Builder)]
pub struct TopicOptions {
    /// Compression requested from the bridge, e.g. `png` or `cbor`
    #[builder(into)]
    pub compression: Option<String>,
    /// Minimum time between messages, in milliseconds
    pub throttle_rate: Option<u32>,
    /// Publisher queue size
    pub queue_size: Option<u32>,
    /// Subscriber queue length on the bridge side
    pub queue_length: Option<u32>,
    /// Latch the last published message
    #[builder(default)]
    pub latch: bool,
}

impl TopicOptions {
    fn hints(&self) -> Hints<'_> {
        Hints {
            compression: self.compression.as_deref(),
            throttle_rate: self.throttle_rate,
            queue_length: self.queue_length,
            queue_size: self.queue_size,
            latch: self.latch,
        }
    }
}

/// A named, typed topic on the bridge.
///
/// Subscriptions and advertisements are re-sent automatically after every
/// reconnection. They are forgotten only when the connection is closed by
/// hand. Clones share the same registrations.
#[derive(Clone)]
pub struct Topic {
    inner: Arc<TopicInner>,
}

struct TopicInner {
    connection: ConnectionManager,
    name: String,
    message_type: String,
    options: TopicOptions,
    messages: EventDispatcher<Value>,
    state: Mutex<TopicState>,
}

struct TopicState {
    registration: Registration,
    /// Listener on the connection for this topic's inbound messages
    wire_listener: Option<ListenerId>,
}

impl Topic {
    #[must_use]
    pub fn new<N, T>(connection: &ConnectionManager, name: N, message_type: T) -> Self
    where
        N: Into<String>,
        T: Into<String>,
    {
        Self::with_options(connection, name, message_type, TopicOptions::default())
    }

    #[must_use]
    pub fn with_options<N, T>(
        connection: &ConnectionManager,
        name: N,
        message_type: T,
        options: TopicOptions,
    ) -> Self
    where
        N: Into<String>,
        T: Into<String>,
    {
        Self {
            inner: Arc::new(TopicInner {
                connection: connection.clone(),
                name: name.into(),
                message_type: message_type.into(),
                options,
                messages: EventDispatcher::new(),
                state: Mutex::new(TopicState {
                    registration: Registration::new(connection.clone()),
                    wire_listener: None,
                }),
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn message_type(&self) -> &str {
        &self.inner.message_type
    }

    #[must_use]
    pub fn options(&self) -> &TopicOptions {
        &self.inner.options
    }

    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.inner.lock().registration.holds(Roles::SUBSCRIBER)
    }

    #[must_use]
    pub fn is_advertised(&self) -> bool {
        self.inner.lock().registration.holds(Roles::PUBLISHER)
    }

    /// Subscribe on the bridge and deliver every inbound message to `callback`.
    ///
    /// Does nothing, and drops `callback`, if already subscribed. Use
    /// [`on_message`](Self::on_message) to add more listeners.
    pub fn subscribe<F>(&self, callback: F) -> Result<()>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let inner = &self.inner;
        let mut state = inner.lock();
        if state.registration.holds(Roles::SUBSCRIBER) {
            return Ok(());
        }

        inner.connection.send(&inner.subscribe_request())?;
        state
            .registration
            .acquire(Roles::SUBSCRIBER, inner.reconnectable());

        let topic = Arc::downgrade(inner);
        state.wire_listener = Some(inner.connection.on(inner.name.clone(), move |event| {
            let Some(message) = event.as_message() else {
                return;
            };
            if let Some(topic) = topic.upgrade() {
                topic.messages.emit(MESSAGE, message);
            }
            callback(message);
        }));

        #[cfg(feature = "tracing")]
        tracing::debug!(topic = %inner.name, "Subscribed");
        Ok(())
    }

    /// Unsubscribe on the bridge. Does nothing if not subscribed.
    pub fn unsubscribe(&self) -> Result<()> {
        let inner = &self.inner;
        let mut state = inner.lock();
        if !state.registration.holds(Roles::SUBSCRIBER) {
            return Ok(());
        }

        inner.connection.send(&Request::unsubscribe(&inner.name))?;
        state.registration.release(Roles::SUBSCRIBER);
        inner.detach_wire_listener(&mut state);
        Ok(())
    }

    /// Advertise as a publisher of this topic. Does nothing if already advertised.
    pub fn advertise(&self) -> Result<()> {
        let mut state = self.inner.lock();
        self.inner.advertise(&mut state)
    }

    /// Withdraw the advertisement. Does nothing if not advertised.
    pub fn unadvertise(&self) -> Result<()> {
        let inner = &self.inner;
        let mut state = inner.lock();
        if !state.registration.holds(Roles::PUBLISHER) {
            return Ok(());
        }

        inner.connection.send(&Request::unadvertise(&inner.name))?;
        state.registration.release(Roles::PUBLISHER);
        Ok(())
    }

    /// Publish `message`, advertising first if needed.
    pub fn publish<M: Serialize + ?Sized>(&self, message: &M) -> Result<()> {
        let inner = &self.inner;
        let msg = serde_json::to_value(message)?;
        let mut state = inner.lock();
        inner.advertise(&mut state)?;
        inner.connection.send(&Request::publish(&inner.name, msg))
    }

    /// Listen to inbound messages without affecting the subscription.
    pub fn on_message<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.messages.on(MESSAGE, listener)
    }

    pub fn off_message(&self, id: ListenerId) -> bool {
        self.inner.messages.off(MESSAGE, id)
    }

    /// Stream the inbound messages of this topic.
    ///
    /// Subscribes on the bridge if needed. The stream shares the subscription
    /// with every other consumer and stops listening when dropped; the wire
    /// subscription itself stays until [`unsubscribe`](Self::unsubscribe).
    pub fn messages(&self) -> Result<impl Stream<Item = Value> + use<>> {
        self.subscribe(|_| {})?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = self.on_message(move |message| {
            _ = tx.send(message.clone());
        });
        let guard = MessageListenerGuard {
            topic: Arc::downgrade(&self.inner),
            id,
        };

        Ok(stream! {
            let _guard = guard;
            while let Some(message) = rx.recv().await {
                yield message;
            }
        })
    }
}

impl std::fmt::Debug for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topic")
            .field("name", &self.inner.name)
            .field("message_type", &self.inner.message_type)
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

struct MessageListenerGuard {
    topic: Weak<TopicInner>,
    id: ListenerId,
}

impl Drop for MessageListenerGuard {
    fn drop(&mut self) {
        if let Some(topic) = self.topic.upgrade() {
            topic.messages.off(MESSAGE, self.id);
        }
    }
}

impl TopicInner {
    fn lock(&self) -> MutexGuard<'_, TopicState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reconnectable(self: &Arc<Self>) -> Weak<dyn Reconnectable> {
        let weak: Weak<Self> = Arc::downgrade(self);
        weak
    }

    fn subscribe_request(&self) -> Request {
        Request::subscribe(&self.name, &self.message_type, self.options.hints())
    }

    fn advertise_request(&self) -> Request {
        Request::advertise(&self.name, &self.message_type, self.options.hints())
    }

    fn advertise(self: &Arc<Self>, state: &mut TopicState) -> Result<()> {
        if state.registration.holds(Roles::PUBLISHER) {
            return Ok(());
        }

        self.connection.send(&self.advertise_request())?;
        state
            .registration
            .acquire(Roles::PUBLISHER, self.reconnectable());
        #[cfg(feature = "tracing")]
        tracing::debug!(topic = %self.name, "Advertised");
        Ok(())
    }

    fn detach_wire_listener(&self, state: &mut TopicState) {
        if let Some(id) = state.wire_listener.take() {
            self.connection.off(&self.name, id);
        }
    }
}

impl Reconnectable for TopicInner {
    fn reregister(&self) {
        let roles = self.lock().registration.roles();
        #[cfg(feature = "tracing")]
        tracing::debug!(topic = %self.name, ?roles, "Re-registering topic after reconnect");

        let mut requests = Vec::with_capacity(2);
        if roles.contains(Roles::SUBSCRIBER) {
            requests.push(self.subscribe_request());
        }
        if roles.contains(Roles::PUBLISHER) {
            requests.push(self.advertise_request());
        }

        for request in &requests {
            match serde_json::to_value(request) {
                // Still queued from before the socket opened; the flush sends it
                Ok(message) if self.connection.is_queued(&message) => {}
                Ok(message) => self.connection.call_on_connection(message),
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(topic = %self.name, error = %e, "Failed to re-register topic");
                    #[cfg(not(feature = "tracing"))]
                    let _: &serde_json::Error = &e;
                }
            }
        }
    }

    fn forget(&self) {
        let mut state = self.lock();
        state.registration.release_all();
        self.detach_wire_listener(&mut state);
    }
}

impl Drop for TopicInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = state.wire_listener.take() {
            self.connection.off(&self.name, id);
        }
    }
}
