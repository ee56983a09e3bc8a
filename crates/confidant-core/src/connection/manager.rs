//! Connection lifecycle.
//!
//! A single driver task per [`ConnectionManager`] runs the loop
//! `connecting → (connected | error) → disconnected → wait → connecting`
//! until teardown. Every publication goes through [`Shared::publish`],
//! which checks the torn-down flag under the same lock teardown takes, so
//! a transition racing teardown is either fully published before it or
//! not at all.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use url::Url;

use super::policy::ReconnectPolicy;
use super::transport::{Link, Transport, TransportError};
use super::{ChannelHandle, ConnectionStatus};
use crate::config::ConnectionConfig;
use crate::event_bus::{CompanionEvent, EventBus};
use crate::logging::{Direction, WireLog};

/// How long to wait for the sink to flush a close before giving up on it.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// What consumers observe: the status plus, while connected, a handle.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub handle: Option<ChannelHandle>,
}

impl ConnectionState {
    fn new(status: ConnectionStatus, handle: Option<ChannelHandle>) -> Self {
        Self { status, handle }
    }
}

struct Shared {
    endpoint: Url,
    transport: Arc<dyn Transport>,
    policy: Arc<dyn ReconnectPolicy>,
    events: Option<Arc<EventBus>>,
    wire_log: WireLog,
    torn_down: Mutex<bool>,
    state: watch::Sender<ConnectionState>,
    shutdown: watch::Sender<bool>,
    generation: AtomicU64,
}

impl Shared {
    fn lock_torn_down(&self) -> MutexGuard<'_, bool> {
        self.torn_down
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_torn_down(&self) -> bool {
        *self.lock_torn_down()
    }

    /// Publish a transition. Returns `false` (and publishes nothing) once
    /// torn down, which tells the driver to stop.
    fn publish(&self, status: ConnectionStatus, handle: Option<ChannelHandle>) -> bool {
        let torn_down = self.lock_torn_down();
        if *torn_down {
            debug!("Dropping '{status}' transition after teardown");
            return false;
        }
        debug!("Connection status: {status}");
        self.state.send_replace(ConnectionState::new(status, handle));
        if let Some(events) = &self.events {
            events.emit(CompanionEvent::ConnectionStatus { status });
        }
        true
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut retry: u32 = 0;

        loop {
            if !self.publish(ConnectionStatus::Connecting, None) {
                break;
            }
            self.wire_log.record(Direction::Link, &format!("open {}", self.endpoint));

            let opened = tokio::select! {
                _ = cancelled(&mut shutdown) => break,
                result = self.transport.open(&self.endpoint) => result,
            };

            match opened {
                Ok(link) => {
                    retry = 0;
                    info!("Connected to {}", self.endpoint);
                    match self.pump(link, &mut shutdown).await {
                        PumpExit::Shutdown => break,
                        PumpExit::Closed => {
                            info!("Connection to {} closed", self.endpoint);
                            self.wire_log.record(Direction::Link, "closed");
                        }
                        PumpExit::Failed(e) => {
                            warn!("Connection to {} failed: {e}", self.endpoint);
                            self.wire_log.record(Direction::Link, &format!("error {e}"));
                            if !self.publish(ConnectionStatus::Error, None) {
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!("Could not connect to {}: {e}", self.endpoint);
                    self.wire_log.record(Direction::Link, &format!("error {e}"));
                    if !self.publish(ConnectionStatus::Error, None) {
                        break;
                    }
                }
            }

            if !self.publish(ConnectionStatus::Disconnected, None) {
                break;
            }

            let delay = self.policy.delay(retry);
            retry = retry.saturating_add(1);
            info!("Reconnecting in {} ms", delay.as_millis());
            tokio::select! {
                _ = cancelled(&mut shutdown) => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        debug!("Connection driver for {} stopped", self.endpoint);
    }

    /// Move payloads until the link ends or teardown is requested.
    async fn pump(&self, link: Link, shutdown: &mut watch::Receiver<bool>) -> PumpExit {
        let Link { mut sink, mut stream } = link;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (handle, mut outbound) = ChannelHandle::open(generation);

        let exit = if self.publish(ConnectionStatus::Connected, Some(handle.clone())) {
            loop {
                tokio::select! {
                    _ = cancelled(shutdown) => break PumpExit::Shutdown,
                    frame = stream.next() => match frame {
                        Some(Ok(payload)) => {
                            self.wire_log.record(Direction::Recv, &payload);
                            handle.deliver(payload);
                        }
                        Some(Err(e)) => break PumpExit::Failed(e),
                        None => break PumpExit::Closed,
                    },
                    Some(payload) = outbound.recv() => {
                        self.wire_log.record(Direction::Send, &payload);
                        if let Err(e) = sink.send(payload).await {
                            break PumpExit::Failed(e);
                        }
                    }
                }
            }
        } else {
            PumpExit::Shutdown
        };

        // Handles issued for this link stop accepting payloads from here on.
        outbound.close();
        if tokio::time::timeout(CLOSE_GRACE, sink.close()).await.is_err() {
            debug!("Timed out closing link to {}", self.endpoint);
        }
        exit
    }
}

enum PumpExit {
    Shutdown,
    Closed,
    Failed(TransportError),
}

/// Resolves once teardown has been requested.
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    // The sender lives in `Shared`, which outlives the driver.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Keeps one logical connection to the remote agent.
///
/// Created disconnected and idle; [`connect`](Self::connect) starts the
/// driver, [`teardown`](Self::teardown) stops it for good. Dropping the
/// manager tears it down.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(config: &ConnectionConfig, transport: Arc<dyn Transport>) -> Self {
        let (state, _) = watch::channel(ConnectionState::new(ConnectionStatus::Disconnected, None));
        let (shutdown, _) = watch::channel(false);
        let wire_log = WireLog::open(config.wire_log_dir.as_deref(), "wire");

        Self {
            shared: Arc::new(Shared {
                endpoint: config.endpoint.url().clone(),
                transport,
                policy: config.reconnect.clone(),
                events: None,
                wire_log,
                torn_down: Mutex::new(false),
                state,
                shutdown,
                generation: AtomicU64::new(0),
            }),
            driver: Mutex::new(None),
        }
    }

    /// Announce every status transition on `events` as well.
    ///
    /// Must be called before [`connect`](Self::connect).
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.events = Some(events);
        } else {
            warn!("Event bus attached after connect; ignoring");
        }
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.shared.endpoint
    }

    /// Start connecting. Does nothing if already running or torn down.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        let mut driver = self
            .driver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if self.shared.is_torn_down() {
            debug!("connect() after teardown ignored");
            return;
        }
        if driver.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        info!("Connecting to {}", self.shared.endpoint);
        let shutdown = self.shared.shutdown.subscribe();
        *driver = Some(tokio::spawn(self.shared.clone().run(shutdown)));
    }

    /// Stop for good: cancel any pending reconnect, close the open link,
    /// and publish nothing further. Safe to call repeatedly.
    pub fn teardown(&self) {
        {
            let mut torn_down = self.shared.lock_torn_down();
            if *torn_down {
                return;
            }
            *torn_down = true;
        }
        info!("Tearing down connection to {}", self.shared.endpoint);
        self.shared.shutdown.send_replace(true);
    }

    pub fn is_torn_down(&self) -> bool {
        self.shared.is_torn_down()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.state.borrow().status
    }

    /// The current channel handle; `Some` only while connected.
    pub fn handle(&self) -> Option<ChannelHandle> {
        self.shared.state.borrow().handle.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.borrow().clone()
    }

    /// Receiver that always holds the latest [`ConnectionState`].
    pub fn watch_status(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Endpoint;
    use crate::connection::memory::MemoryTransport;
    use crate::connection::policy::FixedDelay;
    use crate::connection::ChannelError;
    use tokio::sync::broadcast;
    use tokio::time::Instant;

    fn config() -> ConnectionConfig {
        ConnectionConfig::new(Endpoint::parse("localhost:9").unwrap())
    }

    fn manager_with(transport: &Arc<MemoryTransport>) -> ConnectionManager {
        ConnectionManager::new(&config(), transport.clone())
    }

    async fn wait_for_status(rx: &mut watch::Receiver<ConnectionState>, status: ConnectionStatus) {
        rx.wait_for(|state| state.status == status).await.unwrap();
    }

    async fn next_status(rx: &mut broadcast::Receiver<CompanionEvent>) -> ConnectionStatus {
        loop {
            if let CompanionEvent::ConnectionStatus { status } = rx.recv().await.unwrap() {
                return status;
            }
        }
    }

    mod lifecycle {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn starts_disconnected_and_idle() {
            let transport = Arc::new(MemoryTransport::new());
            let manager = manager_with(&transport);

            tokio::time::sleep(Duration::from_secs(10)).await;

            assert_eq!(manager.status(), ConnectionStatus::Disconnected);
            assert!(manager.handle().is_none());
            assert_eq!(transport.attempts(), 0);
        }

        #[tokio::test(start_paused = true)]
        async fn connect_publishes_handle() {
            let transport = Arc::new(MemoryTransport::new());
            let _peer = transport.accept_next();
            let manager = manager_with(&transport);
            let mut rx = manager.watch_status();

            manager.connect();
            wait_for_status(&mut rx, ConnectionStatus::Connected).await;

            let handle = manager.handle().expect("handle while connected");
            assert!(handle.is_open());
            assert_eq!(handle.generation(), 1);
        }

        #[tokio::test(start_paused = true)]
        async fn connect_twice_opens_once() {
            let transport = Arc::new(MemoryTransport::new());
            let _peer = transport.accept_next();
            let manager = manager_with(&transport);
            let mut rx = manager.watch_status();

            manager.connect();
            manager.connect();
            wait_for_status(&mut rx, ConnectionStatus::Connected).await;
            manager.connect();
            tokio::time::sleep(Duration::from_secs(1)).await;

            assert_eq!(transport.attempts(), 1);
        }

        #[tokio::test(start_paused = true)]
        async fn transition_order_for_failed_then_successful_attempt() {
            let transport = Arc::new(MemoryTransport::new());
            transport.refuse_next("agent not up yet");
            let _peer = transport.accept_next();
            let bus = Arc::new(EventBus::new());
            let mut events = bus.subscribe();
            let manager = manager_with(&transport).with_events(bus.clone());

            manager.connect();

            let mut seen = Vec::new();
            while seen.last() != Some(&ConnectionStatus::Connected) {
                seen.push(next_status(&mut events).await);
            }
            assert_eq!(
                seen,
                vec![
                    ConnectionStatus::Connecting,
                    ConnectionStatus::Error,
                    ConnectionStatus::Disconnected,
                    ConnectionStatus::Connecting,
                    ConnectionStatus::Connected,
                ]
            );
        }

        #[tokio::test(start_paused = true)]
        async fn stream_error_goes_through_error_state() {
            let transport = Arc::new(MemoryTransport::new());
            let peer = transport.accept_next();
            let bus = Arc::new(EventBus::new());
            let mut events = bus.subscribe();
            let manager = manager_with(&transport).with_events(bus.clone());

            manager.connect();
            assert_eq!(next_status(&mut events).await, ConnectionStatus::Connecting);
            assert_eq!(next_status(&mut events).await, ConnectionStatus::Connected);

            peer.fail(TransportError::Reset("peer reset".into()));

            assert_eq!(next_status(&mut events).await, ConnectionStatus::Error);
            assert_eq!(next_status(&mut events).await, ConnectionStatus::Disconnected);
            assert!(manager.handle().is_none());
        }
    }

    mod traffic {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn payloads_flow_both_ways() {
            let transport = Arc::new(MemoryTransport::new());
            let mut peer = transport.accept_next();
            let manager = manager_with(&transport);
            let mut rx = manager.watch_status();

            manager.connect();
            wait_for_status(&mut rx, ConnectionStatus::Connected).await;
            let handle = manager.handle().unwrap();
            let mut inbound = handle.subscribe();

            handle.send("ping").unwrap();
            assert_eq!(peer.recv().await.as_deref(), Some("ping"));

            peer.send("pong");
            assert_eq!(inbound.recv().await.unwrap(), "pong");
        }

        #[tokio::test(start_paused = true)]
        async fn stale_handle_rejects_sends_after_close() {
            let transport = Arc::new(MemoryTransport::new());
            let peer = transport.accept_next();
            let manager = manager_with(&transport);
            let mut rx = manager.watch_status();

            manager.connect();
            wait_for_status(&mut rx, ConnectionStatus::Connected).await;
            let handle = manager.handle().unwrap();

            peer.close();
            wait_for_status(&mut rx, ConnectionStatus::Disconnected).await;

            assert!(manager.handle().is_none());
            assert!(!handle.is_open());
            assert_eq!(handle.send("late"), Err(ChannelError::Closed(1)));
        }

        #[tokio::test(start_paused = true)]
        async fn reconnect_issues_a_new_generation() {
            let transport = Arc::new(MemoryTransport::new());
            let first = transport.accept_next();
            let _second = transport.accept_next();
            let manager = manager_with(&transport);
            let mut rx = manager.watch_status();

            manager.connect();
            wait_for_status(&mut rx, ConnectionStatus::Connected).await;
            first.close();
            wait_for_status(&mut rx, ConnectionStatus::Disconnected).await;
            wait_for_status(&mut rx, ConnectionStatus::Connected).await;

            assert_eq!(manager.handle().unwrap().generation(), 2);
        }

        #[tokio::test(start_paused = true)]
        async fn wire_log_records_traffic() {
            let dir = tempfile::tempdir().unwrap();
            let transport = Arc::new(MemoryTransport::new());
            let mut peer = transport.accept_next();
            let manager = ConnectionManager::new(
                &config().with_wire_log_dir(dir.path()),
                transport.clone(),
            );
            let mut rx = manager.watch_status();

            manager.connect();
            wait_for_status(&mut rx, ConnectionStatus::Connected).await;
            manager.handle().unwrap().send("hello agent").unwrap();
            assert_eq!(peer.recv().await.as_deref(), Some("hello agent"));

            let log = std::fs::read_to_string(dir.path().join("wire.log")).unwrap();
            assert!(log.contains("LINK: open ws://localhost:9/ws"));
            assert!(log.contains("SEND: hello agent"));
        }
    }

    mod reconnect {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn waits_fixed_interval_between_attempts() {
            let transport = Arc::new(MemoryTransport::new());
            let bus = Arc::new(EventBus::new());
            let mut events = bus.subscribe();
            let manager = manager_with(&transport).with_events(bus.clone());

            manager.connect();

            let mut connecting_at = Vec::new();
            let mut disconnected_at = Vec::new();
            while connecting_at.len() < 4 {
                match next_status(&mut events).await {
                    ConnectionStatus::Connecting => connecting_at.push(Instant::now()),
                    ConnectionStatus::Disconnected => disconnected_at.push(Instant::now()),
                    _ => {}
                }
            }

            for (closed, next) in disconnected_at.iter().zip(connecting_at.iter().skip(1)) {
                assert_eq!(next.duration_since(*closed), Duration::from_millis(2000));
            }
            assert_eq!(transport.attempts(), connecting_at.len());
        }

        #[tokio::test(start_paused = true)]
        async fn custom_policy_is_honoured() {
            let transport = Arc::new(MemoryTransport::new());
            let bus = Arc::new(EventBus::new());
            let mut events = bus.subscribe();
            let config = config().with_reconnect(FixedDelay(Duration::from_millis(250)));
            let manager = ConnectionManager::new(&config, transport.clone()).with_events(bus.clone());

            manager.connect();
            while next_status(&mut events).await != ConnectionStatus::Disconnected {}
            let closed = Instant::now();
            while next_status(&mut events).await != ConnectionStatus::Connecting {}

            assert_eq!(closed.elapsed(), Duration::from_millis(250));
        }

        #[tokio::test(start_paused = true)]
        async fn no_attempt_limit() {
            let transport = Arc::new(MemoryTransport::new());
            let manager = manager_with(&transport);

            manager.connect();
            tokio::time::sleep(Duration::from_millis(2000 * 20 + 1)).await;

            assert!(transport.attempts() >= 20);
            assert!(!manager.is_torn_down());
        }
    }

    mod teardown {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn late_open_is_never_published() {
            let transport = Arc::new(MemoryTransport::new());
            let deferred = transport.defer_next();
            let manager = manager_with(&transport);
            let mut rx = manager.watch_status();

            manager.connect();
            wait_for_status(&mut rx, ConnectionStatus::Connecting).await;
            manager.teardown();

            let mut peer = deferred.accept();
            tokio::time::sleep(Duration::from_secs(10)).await;

            assert_eq!(manager.status(), ConnectionStatus::Connecting);
            assert!(manager.handle().is_none());
            assert!(!rx.has_changed().unwrap());
            assert_eq!(transport.attempts(), 1);
            assert_eq!(peer.recv().await, None);
        }

        #[tokio::test(start_paused = true)]
        async fn cancels_pending_reconnect() {
            let transport = Arc::new(MemoryTransport::new());
            let manager = manager_with(&transport);
            let mut rx = manager.watch_status();

            manager.connect();
            wait_for_status(&mut rx, ConnectionStatus::Disconnected).await;
            manager.teardown();

            tokio::time::sleep(Duration::from_secs(30)).await;

            assert_eq!(transport.attempts(), 1);
            assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        }

        #[tokio::test(start_paused = true)]
        async fn closes_open_link_and_stays_silent() {
            let transport = Arc::new(MemoryTransport::new());
            let mut peer = transport.accept_next();
            let bus = Arc::new(EventBus::new());
            let mut events = bus.subscribe();
            let manager = manager_with(&transport).with_events(bus.clone());
            let mut rx = manager.watch_status();

            manager.connect();
            wait_for_status(&mut rx, ConnectionStatus::Connected).await;
            let handle = manager.handle().unwrap();

            manager.teardown();
            assert_eq!(peer.recv().await, None);
            tokio::time::sleep(Duration::from_secs(10)).await;

            assert_eq!(manager.status(), ConnectionStatus::Connected);
            assert!(!handle.is_open());
            assert_eq!(transport.attempts(), 1);

            let mut after = Vec::new();
            while let Ok(event) = events.try_recv() {
                after.push(event);
            }
            assert_eq!(
                after,
                vec![
                    CompanionEvent::ConnectionStatus { status: ConnectionStatus::Connecting },
                    CompanionEvent::ConnectionStatus { status: ConnectionStatus::Connected },
                ]
            );
        }

        #[tokio::test(start_paused = true)]
        async fn is_idempotent_and_blocks_connect() {
            let transport = Arc::new(MemoryTransport::new());
            let manager = manager_with(&transport);

            manager.teardown();
            manager.teardown();
            manager.connect();
            tokio::time::sleep(Duration::from_secs(5)).await;

            assert!(manager.is_torn_down());
            assert_eq!(transport.attempts(), 0);
            assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        }

        #[tokio::test(start_paused = true)]
        async fn drop_tears_down() {
            let transport = Arc::new(MemoryTransport::new());
            let mut peer = transport.accept_next();
            let manager = manager_with(&transport);
            let mut rx = manager.watch_status();

            manager.connect();
            wait_for_status(&mut rx, ConnectionStatus::Connected).await;
            drop(manager);

            assert_eq!(peer.recv().await, None);
            tokio::time::sleep(Duration::from_secs(10)).await;
            assert_eq!(transport.attempts(), 1);
        }
    }
}
