//! In-process [`Transport`] for tests and offline runs.
//!
//! Each call to `open` consumes the next scripted step. With nothing
//! scripted the attempt is refused, which is what an absent agent looks
//! like.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use futures::channel::mpsc;
use futures::future::{self, BoxFuture};
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::sync::oneshot;
use url::Url;

use super::transport::{Link, Transport, TransportError};

enum Step {
    Refuse(String),
    Accept(Link),
    Defer(oneshot::Receiver<Link>),
}

#[derive(Default)]
pub struct MemoryTransport {
    steps: Mutex<VecDeque<Step>>,
    attempts: AtomicUsize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `open` was called.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn refuse_next(&self, reason: impl Into<String>) {
        self.push(Step::Refuse(reason.into()));
    }

    /// Accept the next attempt; the returned peer is the remote side.
    pub fn accept_next(&self) -> MemoryPeer {
        let (link, peer) = pair();
        self.push(Step::Accept(link));
        peer
    }

    /// Leave the next attempt pending until the returned value is resolved.
    /// Dropping it refuses the attempt.
    pub fn defer_next(&self) -> DeferredOpen {
        let (tx, rx) = oneshot::channel();
        self.push(Step::Defer(rx));
        DeferredOpen { tx }
    }

    fn push(&self, step: Step) {
        self.steps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(step);
    }
}

impl Transport for MemoryTransport {
    fn open(&self, _endpoint: &Url) -> BoxFuture<'static, Result<Link, TransportError>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let step = self
            .steps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();

        match step {
            None => future::ready(Err(TransportError::Connect("connection refused".into()))).boxed(),
            Some(Step::Refuse(reason)) => future::ready(Err(TransportError::Connect(reason))).boxed(),
            Some(Step::Accept(link)) => future::ready(Ok(link)).boxed(),
            Some(Step::Defer(rx)) => async move {
                rx.await
                    .map_err(|_| TransportError::Connect("deferred open abandoned".into()))
            }
            .boxed(),
        }
    }
}

pub struct DeferredOpen {
    tx: oneshot::Sender<Link>,
}

impl DeferredOpen {
    /// Complete the pending attempt. If the caller already stopped waiting
    /// the returned peer sees a closed channel.
    pub fn accept(self) -> MemoryPeer {
        let (link, peer) = pair();
        let _ = self.tx.send(link);
        peer
    }
}

/// The remote end of an in-memory [`Link`].
pub struct MemoryPeer {
    to_client: mpsc::UnboundedSender<Result<String, TransportError>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl MemoryPeer {
    pub fn send(&self, payload: impl Into<String>) {
        let _ = self.to_client.unbounded_send(Ok(payload.into()));
    }

    pub fn fail(&self, error: TransportError) {
        let _ = self.to_client.unbounded_send(Err(error));
    }

    /// Next payload from the client; `None` once the client closed its side.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.next().await
    }

    /// Close from the remote side.
    pub fn close(self) {}
}

fn pair() -> (Link, MemoryPeer) {
    let (to_client, client_rx) = mpsc::unbounded();
    let (client_tx, from_client) = mpsc::unbounded::<String>();

    let sink = client_tx.sink_map_err(|e| TransportError::Reset(e.to_string()));
    let link = Link::new(Box::pin(sink), Box::pin(client_rx));
    let peer = MemoryPeer {
        to_client,
        from_client,
    };
    (link, peer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> Url {
        Url::parse("ws://localhost:1/ws").unwrap()
    }

    #[tokio::test]
    async fn unscripted_attempts_are_refused() {
        let transport = MemoryTransport::new();
        let result = transport.open(&endpoint()).await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test]
    async fn accepted_link_carries_payloads_both_ways() {
        let transport = MemoryTransport::new();
        let mut peer = transport.accept_next();
        let Link { mut sink, mut stream } = transport.open(&endpoint()).await.unwrap();

        sink.send("up".to_string()).await.unwrap();
        assert_eq!(peer.recv().await.as_deref(), Some("up"));

        peer.send("down");
        assert_eq!(stream.next().await, Some(Ok("down".to_string())));

        peer.close();
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn closing_client_sink_ends_peer_recv() {
        let transport = MemoryTransport::new();
        let mut peer = transport.accept_next();
        let mut link = transport.open(&endpoint()).await.unwrap();

        link.sink.close().await.unwrap();
        assert_eq!(peer.recv().await, None);
    }

    #[tokio::test]
    async fn deferred_open_resolves_later() {
        let transport = MemoryTransport::new();
        let deferred = transport.defer_next();
        let pending = transport.open(&endpoint());

        let _peer = deferred.accept();
        assert!(pending.await.is_ok());
    }

    #[tokio::test]
    async fn dropped_deferral_refuses() {
        let transport = MemoryTransport::new();
        let deferred = transport.defer_next();
        let pending = transport.open(&endpoint());

        drop(deferred);
        assert!(matches!(pending.await, Err(TransportError::Connect(_))));
    }
}
