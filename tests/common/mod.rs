#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Each test binary uses a different subset of these helpers"
)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as chan;
use futures::{FutureExt as _, SinkExt as _, StreamExt as _};
use rosbridge_client::ws::{ConnectionManager, ConnectionState, Connector, Socket, WsError};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};

/// Upper bound for anything a test waits on. Paused-time tests advance to it instantly.
pub const WAIT: Duration = Duration::from_secs(60);

/// A connection attempt seen by the [`MemoryConnector`].
#[derive(Debug, Clone)]
pub struct Attempt {
    pub url: String,
    pub at: Instant,
}

/// [`Connector`] whose sockets are driven by a [`MemoryServer`].
#[derive(Clone)]
pub struct MemoryConnector {
    attempts: mpsc::UnboundedSender<Attempt>,
    sockets: mpsc::UnboundedSender<ServerSocket>,
    refuse: Arc<AtomicBool>,
}

/// Test side of the [`MemoryConnector`].
pub struct MemoryServer {
    attempts: mpsc::UnboundedReceiver<Attempt>,
    sockets: mpsc::UnboundedReceiver<ServerSocket>,
    refuse: Arc<AtomicBool>,
}

#[must_use]
pub fn memory() -> (MemoryConnector, MemoryServer) {
    let (attempts_tx, attempts_rx) = mpsc::unbounded_channel();
    let (sockets_tx, sockets_rx) = mpsc::unbounded_channel();
    let refuse = Arc::new(AtomicBool::new(false));

    (
        MemoryConnector {
            attempts: attempts_tx,
            sockets: sockets_tx,
            refuse: Arc::clone(&refuse),
        },
        MemoryServer {
            attempts: attempts_rx,
            sockets: sockets_rx,
            refuse,
        },
    )
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Socket, WsError> {
        _ = self.attempts.send(Attempt {
            url: url.to_owned(),
            at: Instant::now(),
        });
        if self.refuse.load(Ordering::SeqCst) {
            return Err(WsError::ConnectionClosed);
        }

        let (client_tx, client_rx) = chan::unbounded::<String>();
        let (server_tx, server_rx) = chan::unbounded::<Result<String, WsError>>();
        _ = self.sockets.send(ServerSocket {
            to_client: server_tx,
            from_client: client_rx,
        });

        Ok(Socket::new(
            client_tx.sink_map_err(|_e| WsError::ConnectionClosed),
            server_rx,
        ))
    }
}

impl MemoryServer {
    /// Make the following connection attempts fail (or succeed again).
    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub async fn next_attempt(&mut self) -> Attempt {
        timeout(WAIT, self.attempts.recv())
            .await
            .expect("no connection attempt")
            .unwrap()
    }

    /// Connection attempts already made, without waiting.
    pub fn pending_attempts(&mut self) -> Vec<Attempt> {
        let mut attempts = Vec::new();
        while let Ok(attempt) = self.attempts.try_recv() {
            attempts.push(attempt);
        }
        attempts
    }

    /// Wait for the next socket to be opened by the client.
    pub async fn accept(&mut self) -> ServerSocket {
        timeout(WAIT, self.sockets.recv())
            .await
            .expect("no socket opened")
            .unwrap()
    }
}

/// Server end of one in-memory socket.
pub struct ServerSocket {
    to_client: chan::UnboundedSender<Result<String, WsError>>,
    from_client: chan::UnboundedReceiver<String>,
}

impl ServerSocket {
    pub fn send(&self, message: &Value) {
        self.send_text(&message.to_string());
    }

    pub fn send_text(&self, text: &str) {
        self.to_client.unbounded_send(Ok(text.to_owned())).unwrap();
    }

    /// Next frame from the client, or `None` once the client closed the socket.
    pub async fn recv(&mut self) -> Option<Value> {
        let text = timeout(WAIT, self.from_client.next())
            .await
            .expect("client sent nothing")?;
        Some(serde_json::from_str(&text).unwrap())
    }

    /// Frames the client has already sent, without waiting.
    pub fn drain(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Some(Some(text)) = self.from_client.next().now_or_never() {
            frames.push(serde_json::from_str(&text).unwrap());
        }
        frames
    }

    /// Drop the socket from the server side, as a network failure would.
    pub fn disconnect(self) {}
}

/// Wait until `connection` reaches `state`.
pub async fn wait_for_state(connection: &ConnectionManager, state: ConnectionState) {
    let mut states = connection.state_receiver();
    timeout(WAIT, states.wait_for(|current| *current == state))
        .await
        .unwrap_or_else(|_| panic!("connection never reached {state}"))
        .unwrap();
}

/// Let spawned tasks run without moving the clock.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// Collects every value passed to the returned callback.
#[must_use]
pub fn collector() -> (
    impl Fn(&Value) + Send + Sync + 'static,
    mpsc::UnboundedReceiver<Value>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        move |value: &Value| {
            _ = tx.send(value.clone());
        },
        rx,
    )
}

pub async fn next_value(rx: &mut mpsc::UnboundedReceiver<Value>) -> Value {
    timeout(WAIT, rx.recv())
        .await
        .expect("no value received")
        .unwrap()
}
