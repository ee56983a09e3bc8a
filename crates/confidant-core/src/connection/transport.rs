//! Opening the underlying full-duplex channel.
//!
//! A [`Transport`] turns an endpoint URL into a [`Link`]: a sink for
//! outbound payloads and a stream of inbound ones. Payloads are opaque
//! strings; framing beyond that belongs to whoever consumes the channel.

use std::pin::Pin;

use futures::future::{self, BoxFuture};
use futures::{FutureExt, Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, protocol::Message};
use url::Url;

pub type PayloadSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;
pub type PayloadStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Connection reset: {0}")]
    Reset(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<tungstenite::Error> for TransportError {
    fn from(e: tungstenite::Error) -> Self {
        match e {
            tungstenite::Error::ConnectionClosed
            | tungstenite::Error::AlreadyClosed
            | tungstenite::Error::Io(_) => TransportError::Reset(e.to_string()),
            other => TransportError::Protocol(other.to_string()),
        }
    }
}

/// One open channel. The stream ending means the peer closed it.
pub struct Link {
    pub sink: PayloadSink,
    pub stream: PayloadStream,
}

impl Link {
    pub fn new(sink: PayloadSink, stream: PayloadStream) -> Self {
        Self { sink, stream }
    }
}

/// Something that can open a [`Link`] to an endpoint.
///
/// `open` may take arbitrarily long; the connection manager imposes no
/// deadline and only stops waiting on teardown.
pub trait Transport: Send + Sync {
    fn open(&self, endpoint: &Url) -> BoxFuture<'static, Result<Link, TransportError>>;
}

/// WebSocket transport; text frames carry payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl Transport for WebSocketTransport {
    fn open(&self, endpoint: &Url) -> BoxFuture<'static, Result<Link, TransportError>> {
        let endpoint = endpoint.clone();
        async move {
            let (ws_stream, _response) = connect_async(endpoint.as_str())
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;
            let (write, read) = ws_stream.split();

            let sink = write
                .sink_map_err(TransportError::from)
                .with(|payload: String| future::ready(Ok::<_, TransportError>(Message::Text(payload))));

            let stream = read.filter_map(|frame| {
                future::ready(match frame {
                    Ok(Message::Text(text)) => Some(Ok(text)),
                    Ok(Message::Binary(bytes)) => Some(
                        String::from_utf8(bytes).map_err(|e| TransportError::Protocol(e.to_string())),
                    ),
                    // Ping/pong are answered by tungstenite; close ends the stream.
                    Ok(_) => None,
                    Err(e) => Some(Err(TransportError::from(e))),
                })
            });

            Ok(Link::new(Box::pin(sink), Box::pin(stream)))
        }
        .boxed()
    }
}
