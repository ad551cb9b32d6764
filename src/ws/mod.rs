//! Resilient WebSocket session for the bridge.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: connection state machine with reconnection, heartbeat and an
//!   offline send queue
//! - [`Connector`]: opens the sockets the manager drives; [`TungsteniteConnector`] by default
//!
//! # Example
//!
//! ```no_run
//! use rosbridge_client::ws::ConnectionManager;
//! use rosbridge_client::ws::config::Config;
//!
//! # async fn run() {
//! let connection = ConnectionManager::new(Config::default());
//! connection.connect("ws://localhost:9090");
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod transport;

pub use connection::{ConnectionManager, ConnectionState};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use transport::{Connector, Socket, SocketSink, SocketStream, TungsteniteConnector};
