//! Push event client
//!
//! Keeps the order cache fresh without polling:
//!
//! 1. Connect with identity query parameters
//! 2. Send `register`, wait for the acknowledgement
//! 3. Normalize `new-order` / `order-updated` payloads and merge them
//! 4. Keepalive ping
//! 5. Reconnect with exponential backoff on disconnect; after
//!    `max_reconnect_attempts` consecutive failures report `Offline`
//!
//! Events missed while disconnected are not replayed. Observers of
//! [`ReconnectEvent::Reconnected`] should refresh over REST to close the gap.

mod transport;

pub use transport::{
    Connector, MemoryConnector, MemoryPeer, MemoryServer, MemoryTransport, PushTransport,
    WsConnector, WsTransport, memory_pair,
};

use parking_lot::Mutex;
use shared::message::{OrderEventPayload, PushEvent, PushMessage, RegisterAck, RegisterPayload};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Interval;
use tokio_util::sync::CancellationToken;

use crate::config::{Identity, PushConfig};
use crate::error::PushError;
use crate::normalize::order_from_value;
use crate::store::OrderStore;

/// Observable connection state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// First connection attempt in progress
    Connecting,
    /// Registered and receiving events
    Connected,
    /// Waiting for or running reconnect attempt `attempt`
    Reconnecting { attempt: u32 },
    /// Stopped, or gave up after exhausting reconnect attempts
    Offline,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Reconnection lifecycle events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectEvent {
    /// An established connection dropped
    Disconnected,
    /// Connected again after an earlier connection
    Reconnected,
    /// Gave up after this many consecutive attempts
    ReconnectFailed { attempts: u32 },
}

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Long-lived push connection feeding [`OrderStore::merge`]
pub struct PushClient {
    connector: Arc<dyn Connector>,
    store: Arc<OrderStore>,
    identity: Identity,
    config: PushConfig,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<ReconnectEvent>,
    ever_connected: Arc<AtomicBool>,
    shutdown: Mutex<CancellationToken>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PushClient {
    pub fn new(
        connector: Arc<dyn Connector>,
        store: Arc<OrderStore>,
        identity: Identity,
        config: PushConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Offline);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            connector,
            store,
            identity,
            config,
            state_tx,
            events_tx,
            ever_connected: Arc::new(AtomicBool::new(false)),
            shutdown: Mutex::new(CancellationToken::new()),
            task: Mutex::new(None),
        }
    }

    /// Spawn the connection loop. Returns `false` if it is already running.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start(&self) -> bool {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return false;
        }

        let token = CancellationToken::new();
        *self.shutdown.lock() = token.clone();
        self.state_tx.send_replace(ConnectionState::Connecting);

        let worker = PushWorker {
            connector: self.connector.clone(),
            store: self.store.clone(),
            identity: self.identity.clone(),
            config: self.config.clone(),
            state_tx: self.state_tx.clone(),
            events_tx: self.events_tx.clone(),
            ever_connected: self.ever_connected.clone(),
            shutdown: token,
        };
        *task = Some(tokio::spawn(worker.run()));
        true
    }

    /// Restart the loop after it went `Offline`. No-op while running.
    pub fn reconnect(&self) -> bool {
        let started = self.start();
        if started {
            tracing::info!("Push client restarted");
        }
        started
    }

    /// Stop the loop and close the connection
    pub async fn stop(&self) {
        self.shutdown.lock().cancel();
        let task = self.task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            tracing::warn!("Push task ended abnormally: {}", e);
        }
        self.state_tx.send_replace(ConnectionState::Offline);
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Subscribe to reconnection events
    pub fn subscribe_reconnect(&self) -> broadcast::Receiver<ReconnectEvent> {
        self.events_tx.subscribe()
    }
}

impl std::fmt::Debug for PushClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushClient")
            .field("connector", &self.connector)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for PushClient {
    fn drop(&mut self) {
        self.shutdown.lock().cancel();
    }
}

enum SessionEnd {
    Shutdown,
    Disconnected(String),
}

struct PushWorker {
    connector: Arc<dyn Connector>,
    store: Arc<OrderStore>,
    identity: Identity,
    config: PushConfig,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<ReconnectEvent>,
    ever_connected: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

impl PushWorker {
    async fn run(self) {
        tracing::info!(role = %self.identity.role, "Push client started");
        let max_attempts = self.config.max_reconnect_attempts;
        let mut attempt: u32 = 0;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let connected = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = self.connect_and_register() => result,
            };

            match connected {
                Ok(transport) => {
                    attempt = 0;
                    self.set_state(ConnectionState::Connected);
                    if self.ever_connected.swap(true, Ordering::SeqCst) {
                        tracing::info!("Push client reconnected");
                        let _ = self.events_tx.send(ReconnectEvent::Reconnected);
                    } else {
                        tracing::info!("Push client connected");
                    }

                    match self.run_session(transport.as_ref()).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Disconnected(reason) => {
                            tracing::warn!(reason = %reason, "Push connection lost");
                            let _ = self.events_tx.send(ReconnectEvent::Disconnected);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(attempt, "Push connection failed: {}", e);
                }
            }

            attempt += 1;
            if max_attempts > 0 && attempt > max_attempts {
                tracing::error!(
                    attempts = max_attempts,
                    "Push reconnect attempts exhausted, going offline"
                );
                self.set_state(ConnectionState::Offline);
                let _ = self.events_tx.send(ReconnectEvent::ReconnectFailed {
                    attempts: max_attempts,
                });
                return;
            }

            let delay = self.config.backoff_delay(attempt);
            self.set_state(ConnectionState::Reconnecting { attempt });
            tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Push reconnect scheduled");
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {},
            }
        }

        self.set_state(ConnectionState::Offline);
        tracing::info!("Push client stopped");
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    async fn connect_and_register(&self) -> Result<Box<dyn PushTransport>, PushError> {
        let timeout = self.config.register_timeout;
        let transport = tokio::time::timeout(timeout, self.connector.connect(&self.identity))
            .await
            .map_err(|_| PushError::Timeout("connect".into()))??;

        let register = PushMessage::register(&RegisterPayload {
            user_id: self.identity.user_id.clone(),
            role: self.identity.role.clone(),
            session_id: self.identity.session_id.clone(),
        });
        transport.write_message(&register).await?;

        let ack = tokio::time::timeout(timeout, self.await_ack(transport.as_ref()))
            .await
            .map_err(|_| PushError::Timeout("registration acknowledgement".into()))??;

        if !ack.success {
            let _ = transport.close().await;
            return Err(PushError::Handshake(
                ack.message.unwrap_or_else(|| "registration rejected".into()),
            ));
        }
        Ok(transport)
    }

    async fn await_ack(&self, transport: &dyn PushTransport) -> Result<RegisterAck, PushError> {
        loop {
            let msg = match transport.read_message().await {
                Ok(msg) => msg,
                Err(PushError::InvalidMessage(e)) => {
                    tracing::warn!("Dropping invalid push frame: {}", e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            if msg.event == PushEvent::Registered {
                return RegisterAck::from_value(&msg.data).ok_or_else(|| {
                    PushError::Handshake(format!("malformed acknowledgement: {}", msg.data))
                });
            }
            // Order events may race the acknowledgement
            self.handle_message(msg);
        }
    }

    async fn run_session(&self, transport: &dyn PushTransport) -> SessionEnd {
        let mut ping = keepalive(self.config.ping_interval);
        if let Some(ping) = ping.as_mut() {
            ping.tick().await; // skip immediate tick
        }

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = transport.close().await;
                    return SessionEnd::Shutdown;
                }

                _ = tick(&mut ping) => {
                    if let Err(e) = transport.ping().await {
                        return SessionEnd::Disconnected(format!("ping failed: {}", e));
                    }
                }

                msg = transport.read_message() => {
                    match msg {
                        Ok(msg) => self.handle_message(msg),
                        Err(PushError::InvalidMessage(e)) => {
                            tracing::warn!("Dropping invalid push frame: {}", e);
                        }
                        Err(e) => return SessionEnd::Disconnected(e.to_string()),
                    }
                }
            }
        }
    }

    /// Merge an order event; malformed payloads are logged and dropped
    fn handle_message(&self, msg: PushMessage) {
        if !msg.event.carries_order() {
            tracing::debug!(event = %msg.event, "Ignoring push event");
            return;
        }

        let raw = match msg.parse_payload::<OrderEventPayload>() {
            Ok(payload) => payload.order,
            // Some servers send the order itself as `data`
            Err(_) => msg.data,
        };
        match order_from_value(&raw) {
            Ok(order) => {
                let order_number = order.order_number.clone();
                let outcome = self.store.merge(order);
                tracing::debug!(
                    event = %msg.event,
                    order_number = %order_number,
                    changed = outcome.changed,
                    "Push event merged"
                );
            }
            Err(e) => {
                tracing::warn!(event = %msg.event, error = %e, "Dropping malformed order payload");
            }
        }
    }
}

fn keepalive(period: Duration) -> Option<Interval> {
    (!period.is_zero()).then(|| tokio::time::interval(period))
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::order::OrderStatus;
    use serde_json::json;

    fn fast_config() -> PushConfig {
        PushConfig::new()
            .with_backoff(Duration::from_millis(10), Duration::from_millis(40))
            .with_max_reconnect_attempts(3)
            .with_register_timeout(Duration::from_millis(500))
            .with_ping_interval(Duration::ZERO)
    }

    fn client(connector: MemoryConnector, store: Arc<OrderStore>) -> PushClient {
        PushClient::new(
            Arc::new(connector),
            store,
            Identity::customer("u-1"),
            fast_config(),
        )
    }

    async fn wait_for(
        rx: &mut watch::Receiver<ConnectionState>,
        f: impl FnMut(&ConnectionState) -> bool,
    ) {
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(f))
            .await
            .expect("state timeout")
            .expect("state channel closed");
    }

    /// Accept one connection and complete the handshake
    async fn handshake(server: &mut MemoryServer) -> MemoryPeer {
        let mut peer = server.accept().await.unwrap();
        let register = peer.recv().await.unwrap();
        assert_eq!(register.event, PushEvent::Register);
        let payload: RegisterPayload = register.parse_payload().unwrap();
        assert_eq!(payload.user_id.as_deref(), Some("u-1"));
        assert_eq!(payload.role, "customer");
        peer.send(&PushMessage::registered(true)).unwrap();
        peer
    }

    #[tokio::test]
    async fn test_events_are_merged() {
        let (connector, mut server) = memory_pair();
        let store = Arc::new(OrderStore::new());
        let push = client(connector, store.clone());
        let mut state = push.watch_state();
        assert!(push.start());
        assert!(!push.start());

        let peer = handshake(&mut server).await;
        wait_for(&mut state, ConnectionState::is_connected).await;

        peer.send(&PushMessage::new_order(&json!({
            "orderNumber": "ORD-1", "status": "pending", "updatedAt": 10
        })))
        .unwrap();
        // Malformed payloads and unknown events are dropped
        peer.send(&PushMessage::order_updated(&json!({ "status": "shipped" })))
            .unwrap();
        peer.send_text("garbage").unwrap();
        peer.send(&PushMessage::new(PushEvent::Other("ping".into()), json!({})))
            .unwrap();
        peer.send(&PushMessage::order_updated(&json!({
            "orderNumber": "ORD-1", "status": "shipped", "updatedAt": 20
        })))
        .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while store.get("ORD-1").map(|o| o.status) != Some(OrderStatus::Shipped) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("order not merged");
        assert_eq!(store.len(), 1);

        push.stop().await;
        assert_eq!(push.state(), ConnectionState::Offline);
        assert!(!push.is_running());
    }

    #[tokio::test]
    async fn test_reconnects_after_drop() {
        let (connector, mut server) = memory_pair();
        let push = client(connector, Arc::new(OrderStore::new()));
        let mut events = push.subscribe_reconnect();
        let mut state = push.watch_state();
        push.start();

        let peer = handshake(&mut server).await;
        wait_for(&mut state, ConnectionState::is_connected).await;
        drop(peer);

        assert_eq!(events.recv().await.unwrap(), ReconnectEvent::Disconnected);
        let _peer = handshake(&mut server).await;
        assert_eq!(events.recv().await.unwrap(), ReconnectEvent::Reconnected);
        wait_for(&mut state, ConnectionState::is_connected).await;

        push.stop().await;
    }

    #[tokio::test]
    async fn test_goes_offline_after_exhausting_attempts() {
        let (connector, server) = memory_pair();
        server.set_online(false);
        let push = client(connector, Arc::new(OrderStore::new()));
        let mut events = push.subscribe_reconnect();
        let mut state = push.watch_state();
        push.start();

        assert_eq!(
            events.recv().await.unwrap(),
            ReconnectEvent::ReconnectFailed { attempts: 3 }
        );
        wait_for(&mut state, |s| *s == ConnectionState::Offline).await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while push.is_running() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        // Manual restart once the server is back
        let mut server = server;
        server.set_online(true);
        assert!(push.reconnect());
        let _peer = handshake(&mut server).await;
        wait_for(&mut state, ConnectionState::is_connected).await;
        push.stop().await;
    }

    #[tokio::test]
    async fn test_rejected_registration_is_retried() {
        let (connector, mut server) = memory_pair();
        let push = client(connector, Arc::new(OrderStore::new()));
        let mut state = push.watch_state();
        push.start();

        let mut peer = server.accept().await.unwrap();
        peer.recv().await.unwrap();
        peer.send(&PushMessage::registered(false)).unwrap();
        wait_for(&mut state, |s| matches!(s, ConnectionState::Reconnecting { .. })).await;

        let _peer = handshake(&mut server).await;
        wait_for(&mut state, ConnectionState::is_connected).await;
        push.stop().await;
    }
}
