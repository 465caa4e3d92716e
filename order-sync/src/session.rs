//! Session lifecycle
//!
//! [`Session::init`] wires the components for one signed-in (or guest) user:
//!
//! 1. Open persistence and restore the order cache and the inbox
//! 2. Attach the notification store to the order registry
//! 3. Repair legacy owner references on restored records
//! 4. Start the push client, refreshing over REST after every reconnect
//! 5. Initial REST refresh when a token is configured
//!
//! [`Session::teardown`] is logout: it stops background work, clears both
//! stores and deletes the persisted blob.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SyncConfig;
use crate::error::{ApiResult, SessionError};
use crate::fetch::{OrderDraft, OrderFetcher, RefreshSummary};
use crate::http::HttpClient;
use crate::notification::NotificationStore;
use crate::persist::{MemoryStateStore, RedbStateStore, StateStore};
use crate::push::{ConnectionState, Connector, PushClient, ReconnectEvent, WsConnector};
use crate::store::{OrderStore, Subscription};
use shared::order::Order;

/// Injected collaborators; anything left `None` is built from the config
#[derive(Default)]
pub struct Collaborators {
    /// Replaces the redb / in-memory store chosen by `storage_path`
    pub state_store: Option<Arc<dyn StateStore>>,
    /// Replaces the WebSocket connector built from `push_url`
    pub connector: Option<Arc<dyn Connector>>,
}

impl Collaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }
}

/// One user session over the order sync core
pub struct Session {
    config: SyncConfig,
    persistence: Arc<dyn StateStore>,
    store: Arc<OrderStore>,
    notifications: Arc<NotificationStore>,
    fetcher: OrderFetcher,
    push: Option<Arc<PushClient>>,
    inbox: Subscription,
    shutdown: CancellationToken,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Build and start a session. Must be called inside a Tokio runtime.
    ///
    /// Only configuration errors (bad base URL, unopenable storage file) fail;
    /// an unreachable backend leaves the session running on cached data.
    pub async fn init(config: SyncConfig, collaborators: Collaborators) -> Result<Self, SessionError> {
        let persistence: Arc<dyn StateStore> = match (collaborators.state_store, &config.storage_path) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(RedbStateStore::open(path, config.storage_namespace.clone())?),
            (None, None) => Arc::new(MemoryStateStore::new()),
        };
        let http = HttpClient::new(&config)?;

        let store = Arc::new(OrderStore::with_persistence(persistence.clone()));
        let notifications = Arc::new(NotificationStore::with_persistence(
            config.announce_new_orders,
            persistence.clone(),
        ));

        match persistence.load() {
            Ok(Some(state)) => {
                let orders = store.restore(state.orders);
                let items = notifications.restore(state.notifications);
                tracing::info!(orders, notifications = items, "Session state restored");
            }
            Ok(None) => tracing::debug!("No persisted session state"),
            Err(e) => tracing::warn!(error = %e, "Failed to load session state, starting empty"),
        }

        let inbox = notifications.attach(&store);
        store.repair_owner_refs();

        let fetcher = OrderFetcher::new(http, store.clone());
        let shutdown = CancellationToken::new();

        let connector = collaborators.connector.or_else(|| {
            config
                .push_url
                .as_ref()
                .map(|url| Arc::new(WsConnector::new(url.clone())) as Arc<dyn Connector>)
        });
        let push = connector.map(|connector| {
            Arc::new(PushClient::new(
                connector,
                store.clone(),
                config.identity.clone(),
                config.push.clone(),
            ))
        });

        let refresh_task = match &push {
            Some(push) if config.refresh_on_reconnect => Some(spawn_reconnect_refresh(
                push,
                fetcher.clone(),
                shutdown.clone(),
            )),
            _ => None,
        };
        if let Some(push) = &push {
            push.start();
        }

        let session = Self {
            config,
            persistence,
            store,
            notifications,
            fetcher,
            push,
            inbox,
            shutdown,
            refresh_task: Mutex::new(refresh_task),
        };

        if session.config.token.is_some() {
            // Cached data stays the fallback when the backend is unreachable
            let _ = session.refresh().await;
        }

        tracing::info!(
            role = %session.config.identity.role,
            push = session.push.is_some(),
            orders = session.store.len(),
            "Session initialized"
        );
        Ok(session)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<OrderStore> {
        &self.store
    }

    pub fn notifications(&self) -> &Arc<NotificationStore> {
        &self.notifications
    }

    pub fn fetcher(&self) -> &OrderFetcher {
        &self.fetcher
    }

    pub fn push(&self) -> Option<&Arc<PushClient>> {
        self.push.as_ref()
    }

    /// Push connection state; `Offline` when push is not configured
    pub fn connection_state(&self) -> ConnectionState {
        self.push
            .as_ref()
            .map(|p| p.state())
            .unwrap_or(ConnectionState::Offline)
    }

    /// Re-fetch the signed-in user's orders
    pub async fn refresh(&self) -> ApiResult<RefreshSummary> {
        self.fetcher.refresh_my_orders().await
    }

    /// Anonymous lookup by order number or tracking number
    pub async fn track(&self, token: &str) -> ApiResult<Order> {
        self.fetcher.track(token).await
    }

    pub async fn place_order(&self, draft: OrderDraft) -> ApiResult<Order> {
        self.fetcher.place_order(draft).await
    }

    /// Orders of the session user, or every cached order for admins and guests
    pub fn my_orders(&self) -> Vec<Order> {
        let owner = match &self.config.identity.user_id {
            Some(user_id) if !self.config.identity.is_admin() => Some(user_id.as_str()),
            _ => None,
        };
        self.store.list(owner).into_vec()
    }

    /// Logout: stop background work, clear both stores and the persisted blob.
    ///
    /// Safe to call more than once.
    pub async fn teardown(&self) -> Result<(), SessionError> {
        self.shutdown.cancel();
        let task = self.refresh_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        if let Some(push) = &self.push {
            push.stop().await;
        }

        self.inbox.unsubscribe();
        self.store.registry().clear();
        self.store.clear();
        self.notifications.reset();
        self.persistence.clear()?;

        tracing::info!("Session torn down");
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.config.identity)
            .field("store", &self.store)
            .field("notifications", &self.notifications)
            .field("push", &self.push)
            .finish()
    }
}

/// Close the replay gap: refresh over REST after every reconnect
fn spawn_reconnect_refresh(
    push: &PushClient,
    fetcher: OrderFetcher,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let mut events = push.subscribe_reconnect();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(ReconnectEvent::Reconnected) => {
                    tracing::info!("Push reconnected, refreshing orders");
                    let _ = fetcher.refresh_my_orders().await;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Reconnect events lagged, refreshing orders");
                    let _ = fetcher.refresh_my_orders().await;
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
