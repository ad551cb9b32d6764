//! Service handle: call a remote service, or serve one to the bridge.

#![expect(
    clippy::module_name_repetitions,
    reason = "ServiceHandler is re-exported at the crate root and reads better with its prefix"
)]

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::oneshot;

use crate::Result;
use crate::error::BoxError;
use crate::events::{Event, ListenerId, panic_message, service_request_event};
use crate::protocol::request::Request;
use crate::protocol::response::service_outcome;
use crate::registration::{Reconnectable, Registration, Roles};
use crate::ws::{ConnectionManager, WsError};

/// Server-side request handler.
///
/// Receives the request `args` and the response values to fill in. Returning
/// `Ok(false)` or an error answers the request with `result: false`.
pub type ServiceHandler =
    Arc<dyn Fn(&Value, &mut Map<String, Value>) -> std::result::Result<bool, BoxError> + Send + Sync>;

/// A named, typed service on the bridge.
///
/// As a client, [`call_service`](Self::call_service) sends a request and waits
/// for the matching response. As a server, [`advertise`](Self::advertise)
/// answers inbound requests; the advertisement is restored after every
/// reconnection until the connection is closed by hand.
#[derive(Clone)]
pub struct Service {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    connection: ConnectionManager,
    name: String,
    service_type: String,
    state: Mutex<ServiceState>,
}

struct ServiceState {
    registration: Registration,
    handler: Option<ServiceHandler>,
    request_listener: Option<ListenerId>,
}

impl Service {
    #[must_use]
    pub fn new<N, T>(connection: &ConnectionManager, name: N, service_type: T) -> Self
    where
        N: Into<String>,
        T: Into<String>,
    {
        Self {
            inner: Arc::new(ServiceInner {
                connection: connection.clone(),
                name: name.into(),
                service_type: service_type.into(),
                state: Mutex::new(ServiceState {
                    registration: Registration::new(connection.clone()),
                    handler: None,
                    request_listener: None,
                }),
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn service_type(&self) -> &str {
        &self.inner.service_type
    }

    #[must_use]
    pub fn is_advertised(&self) -> bool {
        self.inner.lock().registration.holds(Roles::SERVER)
    }

    /// Call the service with `args` and wait for its response values.
    ///
    /// The request is queued while disconnected. The call fails with
    /// [`Kind::Service`](crate::error::Kind::Service) when the bridge answers
    /// `result: false`, and with [`Kind::Protocol`](crate::error::Kind::Protocol)
    /// when the response has no `result`. Dropping the future stops listening
    /// for the response.
    pub async fn call_service(&self, args: Value) -> Result<Value> {
        let connection = &self.inner.connection;
        let id = connection.next_id();

        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let listener = connection.once(id.clone(), move |event: &Event| {
            if let Some(message) = event.as_message()
                && let Some(tx) = tx.lock().unwrap_or_else(PoisonError::into_inner).take()
            {
                _ = tx.send(message.clone());
            }
        });
        let _guard = ResponseListenerGuard {
            connection: connection.clone(),
            id: id.clone(),
            listener,
        };

        connection.send(&Request::call_service(
            id,
            self.inner.name.as_str(),
            self.inner.service_type.as_str(),
            args,
        ))?;

        let response = rx.await.map_err(|_e| WsError::ConnectionClosed)?;
        service_outcome(&self.inner.name, &response)
    }

    /// Typed variant of [`call_service`](Self::call_service).
    pub async fn call<Req, Resp>(&self, request: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let args = serde_json::to_value(request)?;
        let values = self.call_service(args).await?;
        Ok(serde_json::from_value(values)?)
    }

    /// Serve this service, answering every inbound request with `handler`.
    ///
    /// Does nothing, and drops `handler`, if already advertised.
    pub fn advertise<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(&Value, &mut Map<String, Value>) -> std::result::Result<bool, BoxError>
            + Send
            + Sync
            + 'static,
    {
        let inner = &self.inner;
        let mut state = inner.lock();
        if state.registration.holds(Roles::SERVER) {
            return Ok(());
        }

        inner.connection.send(&inner.advertise_request())?;
        let reconnectable: Weak<ServiceInner> = Arc::downgrade(inner);
        state.registration.acquire(Roles::SERVER, reconnectable);
        state.handler = Some(Arc::new(handler));

        let service = Arc::downgrade(inner);
        state.request_listener = Some(inner.connection.on(
            service_request_event(&inner.name),
            move |event| {
                if let (Some(request), Some(service)) = (event.as_message(), service.upgrade()) {
                    service.answer(request);
                }
            },
        ));

        #[cfg(feature = "tracing")]
        tracing::debug!(service = %inner.name, "Advertised service");
        Ok(())
    }

    /// Stop serving. Removes the handler and the request listener.
    pub fn unadvertise(&self) -> Result<()> {
        let inner = &self.inner;
        let mut state = inner.lock();
        if !state.registration.holds(Roles::SERVER) {
            return Ok(());
        }

        inner
            .connection
            .send(&Request::unadvertise_service(&inner.name))?;
        state.registration.release(Roles::SERVER);
        inner.detach_handler(&mut state);
        Ok(())
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.inner.name)
            .field("service_type", &self.inner.service_type)
            .finish_non_exhaustive()
    }
}

struct ResponseListenerGuard {
    connection: ConnectionManager,
    id: String,
    listener: ListenerId,
}

impl Drop for ResponseListenerGuard {
    fn drop(&mut self) {
        self.connection.off(&self.id, self.listener);
    }
}

impl ServiceInner {
    fn lock(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn advertise_request(&self) -> Request {
        Request::advertise_service(&self.name, &self.service_type)
    }

    fn detach_handler(&self, state: &mut ServiceState) {
        state.handler = None;
        if let Some(id) = state.request_listener.take() {
            self.connection
                .off(&service_request_event(&self.name), id);
        }
    }

    /// Run the handler on an inbound `service_request` and send the reply.
    fn answer(&self, request: &Value) {
        let Some(handler) = self.lock().handler.clone() else {
            return;
        };

        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let args = request.get("args").cloned().unwrap_or(Value::Null);
        let mut values = Map::new();

        let outcome = match catch_unwind(AssertUnwindSafe(|| handler(&args, &mut values))) {
            Ok(Ok(true)) => Ok(Value::Object(values)),
            Ok(Ok(false)) => Err(None),
            Ok(Err(e)) => Err(Some(e.to_string())),
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                #[cfg(feature = "tracing")]
                tracing::warn!(service = %self.name, %reason, "Service handler panicked");
                Err(Some(reason))
            }
        };

        #[cfg(feature = "tracing")]
        if let Err(Some(reason)) = &outcome {
            tracing::debug!(service = %self.name, %reason, "Service handler failed");
        }

        let reply = Request::service_response(&self.name, id, outcome);
        if let Err(e) = self.connection.send(&reply) {
            #[cfg(feature = "tracing")]
            tracing::warn!(service = %self.name, error = %e, "Failed to send service response");
            #[cfg(not(feature = "tracing"))]
            let _: &crate::error::Error = &e;
        }
    }
}

impl Reconnectable for ServiceInner {
    fn reregister(&self) {
        if !self.lock().registration.holds(Roles::SERVER) {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(service = %self.name, "Re-advertising service after reconnect");
        match serde_json::to_value(self.advertise_request()) {
            Ok(message) if self.connection.is_queued(&message) => {}
            Ok(message) => self.connection.call_on_connection(message),
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(service = %self.name, error = %e, "Failed to re-advertise service");
                #[cfg(not(feature = "tracing"))]
                let _: &serde_json::Error = &e;
            }
        }
    }

    fn forget(&self) {
        let mut state = self.lock();
        state.registration.release_all();
        self.detach_handler(&mut state);
    }
}

impl Drop for ServiceInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = state.request_listener.take() {
            self.connection
                .off(&service_request_event(&self.name), id);
        }
    }
}
