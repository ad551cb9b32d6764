#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::collections::VecDeque;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff as _;
use futures::{SinkExt as _, StreamExt as _};
use serde::Serialize;
use serde_json::Value;
use strum_macros::Display;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep, timeout};

use super::config::Config;
use super::error::WsError;
use super::transport::{Connector, Socket, TungsteniteConnector};
use crate::Result;
use crate::events::{
    CLOSE, CONNECTION, ERROR, Event, EventDispatcher, ListenerId, STATE, panic_message,
};
use crate::protocol::request::Request;
use crate::protocol::response::route_message;

/// How long a closing socket may take to flush its close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Service polled by the default keep-alive.
const KEEPALIVE_SERVICE: &str = "/rosapi/get_time";
const KEEPALIVE_SERVICE_TYPE: &str = "rosapi/GetTime";

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// No connection attempt has been made yet
    Idle,
    /// A socket is being opened
    Connecting,
    /// The socket is open
    Connected,
    /// Waiting for the backoff delay before the next attempt
    Reconnecting,
    /// Closed by hand; no further reconnection
    Closed,
    /// The connection could not be started, e.g. because the URL is invalid
    Error,
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

enum SocketCommand {
    Send(String),
    Close,
}

/// Control side of the task that owns a socket.
struct SocketHandle {
    open: bool,
    commands: mpsc::UnboundedSender<SocketCommand>,
}

impl SocketHandle {
    fn transmit(&self, value: Value) -> std::result::Result<(), Value> {
        let text = value.to_string();
        #[cfg(feature = "tracing")]
        tracing::trace!(%text, "Sending frame");
        self.commands
            .send(SocketCommand::Send(text))
            .map_err(|_e| value)
    }

    fn close(&self) {
        _ = self.commands.send(SocketCommand::Close);
    }
}

/// Work recorded under the lock and carried out once it is released.
enum Pending {
    Emit(String, Event),
    /// Emit [`CONNECTION`] for a freshly opened socket, then flush the queue.
    Opened { generation: u64 },
}

struct Core {
    state: ConnectionState,
    /// Bumped on every connect, close and reconnect attempt. Socket and timer
    /// callbacks carrying an older value are discarded.
    generation: u64,
    url: Option<String>,
    manual_close: bool,
    backoff: ExponentialBackoff,
    queue: VecDeque<Value>,
    socket: Option<SocketHandle>,
    reconnect_timer: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    last_server_message: Option<Instant>,
    pending: VecDeque<Pending>,
    /// Thread running the `connection` listeners of a fresh socket. Its sends
    /// skip the queue so re-registrations reach the bridge before it.
    restoring: Option<ThreadId>,
}

impl Core {
    fn is_open(&self) -> bool {
        self.socket.as_ref().is_some_and(|socket| socket.open)
    }

    fn stop_timers(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
    }

    fn close_socket(&mut self) {
        if let Some(socket) = self.socket.take() {
            socket.close();
        }
    }

    fn push(&mut self, name: &str, event: Event) {
        self.pending.push_back(Pending::Emit(name.to_owned(), event));
    }
}

struct Shared {
    config: Config,
    connector: Arc<dyn Connector>,
    events: EventDispatcher<Event>,
    core: Mutex<Core>,
    dispatching: Mutex<()>,
    next_id: AtomicU64,
    state_tx: watch::Sender<ConnectionState>,
}

/// A single logical rosbridge session that survives socket failures.
///
/// The manager tracks the [`ConnectionState`], reconnects with exponential
/// backoff after unexpected drops, optionally watches the link with a
/// heartbeat, and queues outbound messages while it is not connected. Queued
/// messages are flushed in order as soon as a socket opens.
///
/// Lifecycle events are broadcast through an [`EventDispatcher`]:
/// [`CONNECTION`], [`CLOSE`], [`ERROR`] and [`STATE`]. Inbound protocol
/// messages are re-emitted under the topic name, the correlation id,
/// `status:<id>` or `service_request:<service>`.
///
/// Cloning is cheap; all clones drive the same session. Dropping the last
/// clone closes the socket.
///
/// # Example
///
/// ```no_run
/// use rosbridge_client::ws::ConnectionManager;
/// use rosbridge_client::ws::config::Config;
///
/// # async fn run() {
/// let connection = ConnectionManager::new(Config::default().with_url("ws://localhost:9090"));
/// connection.on("connection", |_| println!("connected"));
/// # }
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Create a connection manager using the tungstenite transport.
    ///
    /// Connects right away when [`Config::url`] is set.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_connector(config, TungsteniteConnector)
    }

    /// Create a connection manager opening its sockets through `connector`.
    #[must_use]
    pub fn with_connector<C: Connector>(config: Config, connector: C) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let backoff = config.reconnect.clone().into();
        let url = config.url.clone();

        let manager = Self {
            shared: Arc::new(Shared {
                config,
                connector: Arc::new(connector),
                events: EventDispatcher::new(),
                core: Mutex::new(Core {
                    state: ConnectionState::Idle,
                    generation: 0,
                    url: None,
                    manual_close: false,
                    backoff,
                    queue: VecDeque::new(),
                    socket: None,
                    reconnect_timer: None,
                    heartbeat: None,
                    last_server_message: None,
                    pending: VecDeque::new(),
                    restoring: None,
                }),
                dispatching: Mutex::new(()),
                next_id: AtomicU64::new(1),
                state_tx,
            }),
        };

        if let Some(url) = url {
            manager.connect(url);
        }
        manager
    }

    /// Open a session to `url`.
    ///
    /// Does nothing while already connecting or connected to the same URL.
    /// Otherwise any previous socket, timer and queued message is discarded
    /// and a fresh connection cycle starts. Failures are reported through the
    /// [`ERROR`] event, never returned.
    pub fn connect<S: Into<String>>(&self, url: S) {
        self.shared.connect(url.into());
    }

    /// Close the session for good. Queued messages are dropped and no
    /// reconnection is attempted until [`connect`](Self::connect) is called.
    pub fn close(&self) {
        self.shared.close();
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// URL of the current (or last) session.
    #[must_use]
    pub fn url(&self) -> Option<String> {
        self.shared.lock().url.clone()
    }

    /// Subscribe to connection state changes.
    ///
    /// Returns a receiver that notifies when the connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Send `message` now if the socket is open, otherwise queue it until the
    /// next successful connection.
    pub fn call_on_connection(&self, message: Value) {
        self.shared.call_on_connection(message);
    }

    /// Serialize a request and hand it to [`call_on_connection`](Self::call_on_connection).
    pub fn send<R: Serialize>(&self, request: &R) -> Result<()> {
        let message = serde_json::to_value(request)?;
        self.call_on_connection(message);
        Ok(())
    }

    /// Send `message` only if the socket is open. Never queues.
    pub fn cast(&self, message: Value) {
        self.shared.cast(message);
    }

    /// Next correlation id, unique for this manager.
    #[must_use]
    pub fn next_id(&self) -> String {
        self.shared.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }

    /// Whether an equal message is waiting for the next connection.
    #[must_use]
    pub fn is_queued(&self, message: &Value) -> bool {
        self.shared.is_queued(message)
    }

    /// Number of messages waiting for the next connection.
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    pub fn on<F>(&self, event: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.shared.events.on(event, listener)
    }

    pub fn once<F>(&self, event: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.shared.events.once(event, listener)
    }

    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        self.shared.events.off(event, id)
    }

    pub fn off_all(&self, event: &str) -> usize {
        self.shared.events.off_all(event)
    }

    pub fn emit(&self, event: &str, payload: &Event) -> bool {
        self.shared.events.emit(event, payload)
    }

    #[must_use]
    pub fn listener_count(&self, event: &str) -> usize {
        self.shared.events.listener_count(event)
    }

    /// The dispatcher carrying this manager's events.
    #[must_use]
    pub fn events(&self) -> &EventDispatcher<Event> {
        &self.shared.events
    }

    /// Whether both handles drive the same session.
    #[must_use]
    pub fn same_session(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.shared.lock();
        f.debug_struct("ConnectionManager")
            .field("url", &core.url)
            .field("state", &core.state)
            .field("queued", &core.queue.len())
            .finish_non_exhaustive()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Core> {
        // Core is only mutated through short non-panicking sections, so a
        // poisoned lock still holds consistent state.
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, core: &mut Core, state: ConnectionState) {
        if core.state == state {
            return;
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(from = %core.state, to = %state, "Connection state changed");
        core.state = state;
        self.state_tx.send_replace(state);
        core.push(STATE, Event::State(state));
    }

    /// Dispatch pending events. Only one thread drains at a time; events
    /// recorded meanwhile are picked up by that thread.
    fn flush_events(&self) {
        loop {
            let guard = match self.dispatching.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::WouldBlock) => return,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            };

            loop {
                let next = self.lock().pending.pop_front();
                match next {
                    Some(Pending::Emit(name, event)) => {
                        self.events.emit(&name, &event);
                    }
                    Some(Pending::Opened { generation }) => self.restore(generation),
                    None => break,
                }
            }

            drop(guard);
            if self.lock().pending.is_empty() {
                return;
            }
        }
    }

    fn connect(self: &Arc<Self>, url: String) {
        let mut core = self.lock();
        if core.url.as_deref() == Some(url.as_str())
            && matches!(
                core.state,
                ConnectionState::Connecting | ConnectionState::Connected
            )
        {
            return;
        }

        core.generation += 1;
        core.stop_timers();
        core.close_socket();
        core.queue.clear();
        core.backoff.reset();
        core.last_server_message = None;

        #[cfg(feature = "tracing")]
        tracing::debug!(%url, generation = core.generation, "Connecting to bridge");

        core.url = Some(url);
        core.manual_close = false;
        self.set_state(&mut core, ConnectionState::Idle);
        self.set_state(&mut core, ConnectionState::Connecting);
        let generation = core.generation;
        self.open_socket(&mut core, generation);

        drop(core);
        self.flush_events();
    }

    fn close(&self) {
        let mut core = self.lock();
        core.generation += 1;
        core.manual_close = true;
        core.stop_timers();
        core.queue.clear();

        let previous = core.state;
        self.set_state(&mut core, ConnectionState::Closed);
        core.close_socket();
        if previous != ConnectionState::Closed {
            core.push(CLOSE, Event::Close { manual: true });
        }

        drop(core);
        self.flush_events();
    }

    fn open_socket(self: &Arc<Self>, core: &mut Core, generation: u64) {
        let Some(url) = core.url.clone() else {
            return;
        };

        if let Err(e) = url::Url::parse(&url) {
            self.fail(core, WsError::InvalidUrl(e).to_string());
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            self.fail(core, "no Tokio runtime available to drive the socket".to_owned());
            return;
        };

        let (commands, rx) = mpsc::unbounded_channel();
        core.socket = Some(SocketHandle {
            open: false,
            commands,
        });
        runtime.spawn(run_socket(
            Arc::downgrade(self),
            Arc::clone(&self.connector),
            url,
            generation,
            rx,
        ));
    }

    /// The connection cannot be started at all.
    fn fail(&self, core: &mut Core, reason: String) {
        #[cfg(feature = "tracing")]
        tracing::error!(%reason, "Unable to open socket");
        core.push(ERROR, Event::Error(reason));
        self.set_state(core, ConnectionState::Error);
    }

    fn handle_open(self: &Arc<Self>, generation: u64) {
        let mut core = self.lock();
        if core.generation != generation {
            return;
        }

        core.backoff.reset();
        core.last_server_message = Some(Instant::now());
        if let Some(socket) = core.socket.as_mut() {
            socket.open = true;
        }
        self.set_state(&mut core, ConnectionState::Connected);
        self.start_heartbeat(&mut core, generation);
        core.pending.push_back(Pending::Opened { generation });

        drop(core);
        self.flush_events();
    }

    /// Run the `connection` listeners, letting their re-registrations
    /// through ahead of the queue, then flush the queue.
    fn restore(&self, generation: u64) {
        let current = {
            let mut core = self.lock();
            let current = core.generation == generation;
            if current {
                core.restoring = Some(thread::current().id());
            }
            current
        };

        self.events.emit(CONNECTION, &Event::Connection);
        if !current {
            return;
        }

        let mut core = self.lock();
        core.restoring = None;
        if core.generation == generation {
            Self::flush_queue(&mut core);
        }
    }

    fn flush_queue(core: &mut Core) {
        #[cfg(feature = "tracing")]
        if !core.queue.is_empty() {
            tracing::debug!(count = core.queue.len(), "Flushing queued messages");
        }

        while let Some(message) = core.queue.pop_front() {
            let Some(socket) = core.socket.as_ref() else {
                core.queue.push_front(message);
                return;
            };
            if let Err(message) = socket.transmit(message) {
                core.queue.push_front(message);
                return;
            }
        }
    }

    fn handle_message(&self, generation: u64, text: &str) {
        {
            let mut core = self.lock();
            if core.generation != generation {
                return;
            }
            core.last_server_message = Some(Instant::now());
        }

        #[cfg(feature = "tracing")]
        tracing::trace!(%text, "Received frame");

        match route_message(text) {
            Ok(Some(routed)) => {
                self.lock()
                    .push(&routed.event, Event::Message(routed.payload));
                self.flush_events();
            }
            Ok(None) => {}
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(%text, error = %e, "Dropping undecodable message");
                #[cfg(not(feature = "tracing"))]
                let _: &crate::error::Error = &e;
            }
        }
    }

    fn handle_error(&self, generation: u64, error: &WsError) {
        let mut core = self.lock();
        if core.generation != generation {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::error!(%error, "Socket error");
        core.push(ERROR, Event::Error(error.to_string()));
        if core.state == ConnectionState::Connecting && !core.manual_close {
            self.set_state(&mut core, ConnectionState::Reconnecting);
        }

        drop(core);
        self.flush_events();
    }

    fn handle_close(self: &Arc<Self>, generation: u64) {
        let mut core = self.lock();
        if core.generation != generation {
            return;
        }

        if let Some(heartbeat) = core.heartbeat.take() {
            heartbeat.abort();
        }
        core.socket = None;
        let manual = core.manual_close;
        core.push(CLOSE, Event::Close { manual });

        if manual {
            self.set_state(&mut core, ConnectionState::Closed);
        } else {
            self.set_state(&mut core, ConnectionState::Reconnecting);
            self.schedule_reconnect(&mut core);
        }

        drop(core);
        self.flush_events();
    }

    fn schedule_reconnect(self: &Arc<Self>, core: &mut Core) {
        if let Some(timer) = core.reconnect_timer.take() {
            timer.abort();
        }

        let generation = core.generation;
        let delay = core.backoff.current_interval;
        #[cfg(feature = "tracing")]
        tracing::debug!(?delay, generation, "Scheduling reconnect");

        let shared = Arc::downgrade(self);
        core.reconnect_timer = Some(tokio::spawn(async move {
            sleep(delay).await;
            if let Some(shared) = shared.upgrade() {
                shared.handle_reconnect_timer(generation);
            }
        }));
    }

    fn handle_reconnect_timer(self: &Arc<Self>, generation: u64) {
        let mut core = self.lock();
        if core.manual_close
            || core.generation != generation
            || core.state != ConnectionState::Reconnecting
        {
            return;
        }

        // Dropping the handle detaches the running timer task
        core.reconnect_timer = None;
        core.generation += 1;
        let generation = core.generation;
        self.set_state(&mut core, ConnectionState::Connecting);
        self.open_socket(&mut core, generation);
        let _next = core.backoff.next_backoff();

        drop(core);
        self.flush_events();
    }

    fn start_heartbeat(self: &Arc<Self>, core: &mut Core, generation: u64) {
        if let Some(heartbeat) = core.heartbeat.take() {
            heartbeat.abort();
        }

        let period = self.config.heartbeat_interval;
        if period.is_zero() {
            return;
        }

        let shared = Arc::downgrade(self);
        core.heartbeat = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                if !shared.heartbeat_tick(generation, period) {
                    break;
                }
            }
        }));
    }

    /// Returns whether the heartbeat should keep running.
    fn heartbeat_tick(self: &Arc<Self>, generation: u64, period: Duration) -> bool {
        let mut core = self.lock();
        if core.generation != generation {
            return false;
        }
        if core.state != ConnectionState::Connected || !core.is_open() {
            return true;
        }

        let silent = core
            .last_server_message
            .is_none_or(|last| last.elapsed() > period * 2);
        if silent {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                ?period,
                "Heartbeat expired: no message from the bridge, forcing reconnect"
            );

            // This task is the heartbeat; drop its handle instead of aborting itself
            core.heartbeat = None;
            self.set_state(&mut core, ConnectionState::Reconnecting);
            if let Some(socket) = core.socket.as_ref() {
                socket.close();
            }
            drop(core);
            self.flush_events();
            return false;
        }
        drop(core);

        match &self.config.heartbeat_fn {
            Some(heartbeat) => {
                let manager = ConnectionManager {
                    shared: Arc::clone(self),
                };
                if let Err(panic) = catch_unwind(AssertUnwindSafe(|| heartbeat(&manager))) {
                    let reason = panic_message(panic.as_ref());
                    #[cfg(feature = "tracing")]
                    tracing::warn!(%reason, "Heartbeat function panicked");
                    #[cfg(not(feature = "tracing"))]
                    let _: &String = &reason;
                }
            }
            None => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
                let request = Request::call_service(
                    id,
                    KEEPALIVE_SERVICE,
                    KEEPALIVE_SERVICE_TYPE,
                    Value::Object(serde_json::Map::new()),
                );
                match serde_json::to_value(&request) {
                    Ok(message) => self.cast(message),
                    Err(e) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(error = %e, "Unable to encode keep-alive");
                        #[cfg(not(feature = "tracing"))]
                        let _: &serde_json::Error = &e;
                    }
                }
            }
        }
        true
    }

    fn call_on_connection(&self, message: Value) {
        let mut core = self.lock();
        let restoring = core.restoring == Some(thread::current().id());
        let message = if core.state == ConnectionState::Connected
            && (core.queue.is_empty() || restoring)
        {
            match core.socket.as_ref().filter(|socket| socket.open) {
                Some(socket) => match socket.transmit(message) {
                    Ok(()) => return,
                    Err(message) => message,
                },
                None => message,
            }
        } else {
            message
        };

        #[cfg(feature = "tracing")]
        tracing::trace!(queued = core.queue.len() + 1, "Queueing message until connected");
        core.queue.push_back(message);
    }

    fn is_queued(&self, message: &Value) -> bool {
        self.lock().queue.contains(message)
    }

    fn cast(&self, message: Value) {
        let core = self.lock();
        match core.socket.as_ref().filter(|socket| socket.open) {
            Some(socket) => {
                _ = socket.transmit(message);
            }
            None => {
                #[cfg(feature = "tracing")]
                tracing::trace!("Socket not open, dropping cast");
            }
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let core = self.core.get_mut().unwrap_or_else(PoisonError::into_inner);
        core.stop_timers();
        core.close_socket();
    }
}

/// Drive one socket until it closes, reporting its lifecycle back to the
/// manager tagged with `generation`.
async fn run_socket(
    shared: Weak<Shared>,
    connector: Arc<dyn Connector>,
    url: String,
    generation: u64,
    mut commands: mpsc::UnboundedReceiver<SocketCommand>,
) {
    // Anything arriving before the socket opens can only be a close request
    let opened = tokio::select! {
        biased;
        result = connector.connect(&url) => result,
        _ = commands.recv() => return,
    };

    let Socket {
        mut sink,
        mut stream,
    } = match opened {
        Ok(socket) => socket,
        Err(e) => {
            if let Some(shared) = shared.upgrade() {
                shared.handle_error(generation, &e);
                shared.handle_close(generation);
            }
            return;
        }
    };

    match shared.upgrade() {
        Some(shared) => shared.handle_open(generation),
        None => return,
    }

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(text)) => {
                    let Some(shared) = shared.upgrade() else { break };
                    shared.handle_message(generation, &text);
                }
                Some(Err(e)) => {
                    if let Some(shared) = shared.upgrade() {
                        shared.handle_error(generation, &e);
                    }
                    break;
                }
                None => break,
            },
            command = commands.recv() => match command {
                Some(SocketCommand::Send(text)) => {
                    if let Err(e) = sink.send(text).await {
                        if let Some(shared) = shared.upgrade() {
                            shared.handle_error(generation, &e);
                        }
                        break;
                    }
                }
                Some(SocketCommand::Close) | None => {
                    _ = timeout(CLOSE_TIMEOUT, sink.close()).await;
                    break;
                }
            },
        }
    }

    if let Some(shared) = shared.upgrade() {
        shared.handle_close(generation);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use super::*;

    /// Connector whose sockets never finish opening.
    #[derive(Clone, Default)]
    struct Stalled {
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connector for Stalled {
        async fn connect(&self, _url: &str) -> std::result::Result<Socket, WsError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            futures::future::pending().await
        }
    }

    fn record_states(manager: &ConnectionManager) -> Arc<Mutex<Vec<ConnectionState>>> {
        let states = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&states);
        manager.on(STATE, move |event| {
            if let Some(state) = event.as_state() {
                sink.lock().unwrap().push(state);
            }
        });
        states
    }

    async fn settle() {
        sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn stale_reconnect_timer_is_ignored() {
        let connector = Stalled::default();
        let manager = ConnectionManager::with_connector(Config::default(), connector.clone());

        manager.connect("ws://first:9090");
        let stale = manager.shared.lock().generation;
        manager.connect("ws://second:9090");
        settle().await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);

        {
            let mut core = manager.shared.lock();
            manager
                .shared
                .set_state(&mut core, ConnectionState::Reconnecting);
        }
        manager.shared.handle_reconnect_timer(stale);
        settle().await;

        assert_eq!(manager.state(), ConnectionState::Reconnecting);
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);

        let current = manager.shared.lock().generation;
        manager.shared.handle_reconnect_timer(current);
        settle().await;

        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_to_same_url_while_connecting_is_a_no_op() {
        let connector = Stalled::default();
        let manager = ConnectionManager::with_connector(Config::default(), connector.clone());
        let states = record_states(&manager);

        manager.connect("ws://robot:9090");
        manager.connect("ws://robot:9090");
        settle().await;

        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(*states.lock().unwrap(), vec![ConnectionState::Connecting]);
    }

    #[test]
    fn invalid_url_reports_error_state() {
        let manager = ConnectionManager::with_connector(Config::default(), Stalled::default());
        let errors = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&errors);
        manager.on(ERROR, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        manager.connect("not a url");

        assert_eq!(manager.state(), ConnectionState::Error);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn messages_queue_until_connected_and_close_drops_them() {
        let manager = ConnectionManager::with_connector(Config::default(), Stalled::default());
        manager.call_on_connection(serde_json::json!({"op": "publish", "topic": "/a", "msg": {}}));
        manager.call_on_connection(serde_json::json!({"op": "publish", "topic": "/b", "msg": {}}));
        assert_eq!(manager.queued_len(), 2);
        assert!(manager.is_queued(&serde_json::json!({"op": "publish", "topic": "/b", "msg": {}})));
        assert!(!manager.is_queued(&serde_json::json!({"op": "publish", "topic": "/c", "msg": {}})));

        let closes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&closes);
        manager.on(CLOSE, move |event| sink.lock().unwrap().push(event.clone()));

        manager.close();
        manager.close();

        assert_eq!(manager.queued_len(), 0);
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert_eq!(*closes.lock().unwrap(), vec![Event::Close { manual: true }]);
    }

    #[test]
    fn cast_without_socket_is_dropped() {
        let manager = ConnectionManager::with_connector(Config::default(), Stalled::default());
        manager.cast(serde_json::json!({"op": "call_service"}));
        assert_eq!(manager.queued_len(), 0);
    }

    #[test]
    fn correlation_ids_increase() {
        let manager = ConnectionManager::with_connector(Config::default(), Stalled::default());
        assert_eq!(manager.next_id(), "1");
        assert_eq!(manager.next_id(), "2");
    }

    #[test]
    fn state_display_is_screaming_snake_case() {
        assert_eq!(ConnectionState::Reconnecting.to_string(), "RECONNECTING");
    }
}
