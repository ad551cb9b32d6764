//! Convenience registries over the topic, service and parameter handles.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use serde_json::Value;

use crate::Result;
use crate::error::Error;
use crate::events::{EventDispatcher, ListenerId, MESSAGE};
use crate::param::Param;
use crate::service::Service;
use crate::topic::Topic;
use crate::ws::{ConnectionManager, WsError};

/// Deadline applied by [`ServiceManager`] and [`ParamManager`] unless overridden.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

struct ManagedTopic {
    topic: Topic,
    message_type: String,
    callbacks: Arc<EventDispatcher<Value>>,
}

/// Shares one wire subscription per topic name between any number of callbacks.
pub struct TopicManager {
    connection: RwLock<ConnectionManager>,
    topics: DashMap<String, ManagedTopic>,
    /// Cached publishers, one per topic name
    publishers: DashMap<String, Topic>,
}

impl TopicManager {
    #[must_use]
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection: RwLock::new(connection),
            topics: DashMap::new(),
            publishers: DashMap::new(),
        }
    }

    /// The connection new topics are created on.
    #[must_use]
    pub fn connection(&self) -> ConnectionManager {
        // A ConnectionManager handle has no intermediate state to corrupt
        self.connection
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Add `callback` to topic `name`, subscribing on the bridge on first use.
    ///
    /// While disconnected the subscription is queued until the connection opens.
    pub fn subscribe<F>(&self, name: &str, message_type: &str, callback: F) -> Result<ListenerId>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let connection = self.connection();
        if !connection.is_connected() {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                topic = %name,
                "ROS not connected, subscription is queued until the connection opens"
            );
        }

        match self.topics.entry(name.to_owned()) {
            Entry::Occupied(entry) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(topic = %name, "Topic already subscribed, adding callback");
                Ok(entry.get().callbacks.on(MESSAGE, callback))
            }
            Entry::Vacant(entry) => {
                let callbacks = Arc::new(EventDispatcher::new());
                let id = callbacks.on(MESSAGE, callback);
                let topic = Self::fan_out(&connection, name, message_type, &callbacks)?;

                entry.insert(ManagedTopic {
                    topic,
                    message_type: message_type.to_owned(),
                    callbacks,
                });
                Ok(id)
            }
        }
    }

    fn fan_out(
        connection: &ConnectionManager,
        name: &str,
        message_type: &str,
        callbacks: &Arc<EventDispatcher<Value>>,
    ) -> Result<Topic> {
        let topic = Topic::new(connection, name, message_type);
        let callbacks = Arc::clone(callbacks);
        topic.subscribe(move |message| {
            callbacks.emit(MESSAGE, message);
        })?;
        Ok(topic)
    }

    /// Remove one callback, or all of them with `None`.
    ///
    /// The wire subscription is dropped once no callback is left.
    pub fn unsubscribe(&self, name: &str, callback: Option<ListenerId>) -> Result<()> {
        let Entry::Occupied(entry) = self.topics.entry(name.to_owned()) else {
            return Ok(());
        };

        if let Some(id) = callback {
            let callbacks = &entry.get().callbacks;
            callbacks.off(MESSAGE, id);
            if callbacks.listener_count(MESSAGE) > 0 {
                return Ok(());
            }
        }

        let managed = entry.remove();
        managed.topic.unsubscribe()
    }

    /// Unsubscribe every managed topic.
    pub fn clear_all(&self) {
        let names: Vec<String> = self.topics.iter().map(|entry| entry.key().clone()).collect();
        for name in names {
            if let Some((_, managed)) = self.topics.remove(&name)
                && let Err(e) = managed.topic.unsubscribe()
            {
                #[cfg(feature = "tracing")]
                tracing::warn!(topic = %name, error = %e, "Failed to unsubscribe");
                #[cfg(not(feature = "tracing"))]
                let _: &Error = &e;
            }
        }
    }

    /// Move every managed topic onto `connection`, keeping its callbacks.
    ///
    /// Topics bound to the previous connection are discarded without
    /// unsubscribing, as that connection is assumed gone.
    pub fn resubscribe_all(&self, connection: ConnectionManager) {
        *self
            .connection
            .write()
            .unwrap_or_else(PoisonError::into_inner) = connection.clone();
        self.publishers.clear();

        for mut entry in self.topics.iter_mut() {
            let name = entry.key().clone();
            let managed = entry.value_mut();
            match Self::fan_out(&connection, &name, &managed.message_type, &managed.callbacks) {
                Ok(topic) => managed.topic = topic,
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(topic = %name, error = %e, "Failed to re-subscribe");
                    #[cfg(not(feature = "tracing"))]
                    let _: &Error = &e;
                }
            }
        }
    }

    fn publisher(&self, name: &str, message_type: &str) -> Topic {
        self.publishers
            .entry(name.to_owned())
            .or_insert_with(|| Topic::new(&self.connection(), name, message_type))
            .clone()
    }

    pub fn advertise(&self, name: &str, message_type: &str) -> Result<()> {
        self.publisher(name, message_type).advertise()
    }

    pub fn unadvertise(&self, name: &str) -> Result<()> {
        match self.publishers.remove(name) {
            Some((_, topic)) => topic.unadvertise(),
            None => Ok(()),
        }
    }

    /// Publish `message` on `name`, advertising on first use.
    pub fn publish<M: Serialize + ?Sized>(
        &self,
        name: &str,
        message_type: &str,
        message: &M,
    ) -> Result<()> {
        if !self.connection().is_connected() {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                topic = %name,
                "ROS not connected, message is queued until the connection opens"
            );
        }
        self.publisher(name, message_type).publish(message)
    }

    /// Names of the managed subscriptions.
    #[must_use]
    pub fn topic_names(&self) -> Vec<String> {
        self.topics.iter().map(|entry| entry.key().clone()).collect()
    }

    #[must_use]
    pub fn callback_count(&self, name: &str) -> usize {
        self.topics
            .get(name)
            .map_or(0, |managed| managed.callbacks.listener_count(MESSAGE))
    }
}

fn ensure_connected(connection: &ConnectionManager, operation: &str) -> Result<()> {
    if connection.is_connected() {
        return Ok(());
    }
    #[cfg(feature = "tracing")]
    tracing::warn!("ROS not connected, cannot {operation}");
    #[cfg(not(feature = "tracing"))]
    let _: &str = operation;
    Err(WsError::NotConnected.into())
}

async fn with_deadline<T, F>(operation: String, after: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(after, call)
        .await
        .map_err(|_elapsed| Error::timeout(operation, after))?
}

/// One-shot service calls with a deadline.
#[derive(Debug, Clone)]
pub struct ServiceManager {
    connection: ConnectionManager,
    timeout: Duration,
}

impl ServiceManager {
    #[must_use]
    pub fn new(connection: ConnectionManager) -> Self {
        Self::with_timeout(connection, DEFAULT_CALL_TIMEOUT)
    }

    #[must_use]
    pub fn with_timeout(connection: ConnectionManager, timeout: Duration) -> Self {
        Self {
            connection,
            timeout,
        }
    }

    /// Call `name` and wait at most `timeout` (or the manager default).
    ///
    /// Fails right away with [`WsError::NotConnected`] while disconnected.
    pub async fn call(
        &self,
        name: &str,
        service_type: &str,
        args: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        ensure_connected(&self.connection, &format!("call service {name}"))?;

        let service = Service::new(&self.connection, name, service_type);
        with_deadline(
            format!("Service call {name}"),
            timeout.unwrap_or(self.timeout),
            service.call_service(args),
        )
        .await
    }
}

/// Parameter access with a deadline.
#[derive(Debug, Clone)]
pub struct ParamManager {
    connection: ConnectionManager,
    timeout: Duration,
}

impl ParamManager {
    #[must_use]
    pub fn new(connection: ConnectionManager) -> Self {
        Self::with_timeout(connection, DEFAULT_CALL_TIMEOUT)
    }

    #[must_use]
    pub fn with_timeout(connection: ConnectionManager, timeout: Duration) -> Self {
        Self {
            connection,
            timeout,
        }
    }

    pub async fn get(&self, name: &str, timeout: Option<Duration>) -> Result<Value> {
        ensure_connected(&self.connection, &format!("get param {name}"))?;

        let param = Param::new(&self.connection, name);
        with_deadline(
            format!("Get param {name}"),
            timeout.unwrap_or(self.timeout),
            param.get(),
        )
        .await
    }

    pub async fn set<V: Serialize + ?Sized>(
        &self,
        name: &str,
        value: &V,
        timeout: Option<Duration>,
    ) -> Result<()> {
        ensure_connected(&self.connection, &format!("set param {name}"))?;

        let param = Param::new(&self.connection, name);
        with_deadline(
            format!("Set param {name}"),
            timeout.unwrap_or(self.timeout),
            param.set(value),
        )
        .await
    }

    pub async fn delete(&self, name: &str, timeout: Option<Duration>) -> Result<()> {
        ensure_connected(&self.connection, &format!("delete param {name}"))?;

        let param = Param::new(&self.connection, name);
        with_deadline(
            format!("Delete param {name}"),
            timeout.unwrap_or(self.timeout),
            param.delete(),
        )
        .await
    }
}
