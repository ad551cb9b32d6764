//! Pluggable socket transport.
//!
//! The connection manager never touches tungstenite types directly: it asks a
//! [`Connector`] for a [`Socket`], a pair of text sink and text stream. The
//! default [`TungsteniteConnector`] dials real WebSocket endpoints; tests plug
//! in an in-memory connector instead.

use std::future::ready;
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, SinkExt as _, Stream, StreamExt as _};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::error::WsError;

/// Outgoing half of a socket, accepting JSON text frames.
pub type SocketSink = Pin<Box<dyn Sink<String, Error = WsError> + Send>>;
/// Incoming half of a socket, yielding JSON text frames.
pub type SocketStream = Pin<Box<dyn Stream<Item = Result<String, WsError>> + Send>>;

/// An open, text-framed duplex socket.
#[non_exhaustive]
pub struct Socket {
    pub sink: SocketSink,
    pub stream: SocketStream,
}

impl Socket {
    pub fn new<Si, St>(sink: Si, stream: St) -> Self
    where
        Si: Sink<String, Error = WsError> + Send + 'static,
        St: Stream<Item = Result<String, WsError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

/// Opens sockets for the connection manager.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a socket to `url`. Resolving means the socket is open.
    async fn connect(&self, url: &str) -> Result<Socket, WsError>;
}

/// [`Connector`] backed by `tokio-tungstenite`.
///
/// Binary frames are dropped; ping, pong and close frames are answered by
/// tungstenite itself.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Socket, WsError> {
        let (ws_stream, _) = connect_async(url).await?;
        let (write, read) = ws_stream.split();

        let sink = write.with(|text: String| ready(Ok::<_, WsError>(Message::Text(text.into()))));
        let stream = read.filter_map(|frame| {
            ready(match frame {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(_) => None,
                Err(e) => Some(Err(WsError::Connection(e))),
            })
        });

        Ok(Socket::new(sink, stream))
    }
}
