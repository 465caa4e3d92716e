//! redb-based persistence for the session blob
//!
//! # Layout
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `session_state` | namespace | JSON `PersistedState` | Order cache + notification inbox |
//!
//! Both stores write their own section of the same blob; each save is one
//! read-modify-write transaction, so a crash never leaves half a blob.
//!
//! # Schema versions
//!
//! - v0: bare JSON array of orders (no notifications)
//! - v1: `PersistedState`
//!
//! Unknown versions are discarded on load.

use parking_lot::Mutex;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use shared::order::{Notification, Order, OrderStatus};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Table for session blobs: key = namespace, value = JSON-serialized PersistedState
const STATE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("session_state");

/// Current blob schema
pub const SCHEMA_VERSION: u32 = 1;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

// ========== Blob sections ==========

/// Order cache section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedOrders {
    pub records: Vec<Order>,
    /// Folded temp id -> server id
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

/// One emitted `(order, status)` pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifiedKey {
    pub order_number: String,
    pub status: OrderStatus,
}

/// Notification inbox section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedNotifications {
    pub items: Vec<Notification>,
    /// order number -> last status a notification was derived from
    #[serde(default)]
    pub last_notified: BTreeMap<String, OrderStatus>,
    /// De-duplication keys, kept even after notifications are removed
    #[serde(default)]
    pub emitted: Vec<NotifiedKey>,
}

/// The whole namespaced blob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    pub schema_version: u32,
    #[serde(default)]
    pub orders: PersistedOrders,
    #[serde(default)]
    pub notifications: PersistedNotifications,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            orders: PersistedOrders::default(),
            notifications: PersistedNotifications::default(),
        }
    }
}

impl PersistedState {
    /// Decode a stored blob, migrating older schemas.
    ///
    /// Returns `None` (after logging) when the blob is unreadable or comes
    /// from an unknown schema; callers start from an empty state then.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let value: serde_json::Value = match serde_json::from_slice(bytes) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Discarding unreadable session blob: {}", e);
                return None;
            }
        };

        // v0: bare array of orders
        if value.is_array() {
            return match serde_json::from_value::<Vec<Order>>(value) {
                Ok(records) => {
                    tracing::info!(count = records.len(), "Migrated v0 session blob");
                    Some(Self {
                        orders: PersistedOrders {
                            records,
                            aliases: BTreeMap::new(),
                        },
                        ..Self::default()
                    })
                }
                Err(e) => {
                    tracing::warn!("Discarding malformed v0 session blob: {}", e);
                    None
                }
            };
        }

        let version = value.get("schemaVersion").and_then(|v| v.as_u64());
        if version != Some(u64::from(SCHEMA_VERSION)) {
            tracing::warn!(?version, "Discarding session blob with unknown schema version");
            return None;
        }

        match serde_json::from_value(value) {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!("Discarding malformed session blob: {}", e);
                None
            }
        }
    }

    pub fn encode(&self) -> StorageResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

// ========== StateStore ==========

/// Persistence collaborator injected into the order and notification stores
pub trait StateStore: Send + Sync {
    /// Load the blob; `Ok(None)` when nothing usable is stored
    fn load(&self) -> StorageResult<Option<PersistedState>>;

    /// Replace the order section
    fn save_orders(&self, orders: &PersistedOrders) -> StorageResult<()>;

    /// Replace the notification section
    fn save_notifications(&self, notifications: &PersistedNotifications) -> StorageResult<()>;

    /// Delete the blob (logout)
    fn clear(&self) -> StorageResult<()>;
}

/// Session blob stored in a redb file
#[derive(Clone)]
pub struct RedbStateStore {
    db: Arc<Database>,
    namespace: String,
}

impl RedbStateStore {
    /// Open or create the database at the given path
    pub fn open(path: impl AsRef<Path>, namespace: impl Into<String>) -> StorageResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = Database::create(path)?;
        Self::init(db, namespace.into())
    }

    /// Open an in-memory database
    pub fn open_in_memory(namespace: impl Into<String>) -> StorageResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db, namespace.into())
    }

    fn init(db: Database, namespace: String) -> StorageResult<Self> {
        // Create the table if it doesn't exist
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(STATE_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db: Arc::new(db),
            namespace,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Read-modify-write the blob in a single transaction
    fn update(&self, apply: impl FnOnce(&mut PersistedState)) -> StorageResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(STATE_TABLE)?;
            let existing = table
                .get(self.namespace.as_str())?
                .map(|guard| guard.value().to_vec());
            let mut state = existing
                .as_deref()
                .and_then(PersistedState::decode)
                .unwrap_or_default();
            apply(&mut state);
            let bytes = state.encode()?;
            table.insert(self.namespace.as_str(), bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }
}

impl StateStore for RedbStateStore {
    fn load(&self) -> StorageResult<Option<PersistedState>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(STATE_TABLE)?;
        let state = table
            .get(self.namespace.as_str())?
            .and_then(|guard| PersistedState::decode(guard.value()));
        Ok(state)
    }

    fn save_orders(&self, orders: &PersistedOrders) -> StorageResult<()> {
        self.update(|state| state.orders = orders.clone())
    }

    fn save_notifications(&self, notifications: &PersistedNotifications) -> StorageResult<()> {
        self.update(|state| state.notifications = notifications.clone())
    }

    fn clear(&self) -> StorageResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(STATE_TABLE)?;
            table.remove(self.namespace.as_str())?;
        }
        txn.commit()?;
        Ok(())
    }
}

/// Session blob kept in process memory (sessions without a storage path)
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    blob: Mutex<Option<Vec<u8>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, apply: impl FnOnce(&mut PersistedState)) -> StorageResult<()> {
        let mut blob = self.blob.lock();
        let mut state = blob
            .as_deref()
            .and_then(PersistedState::decode)
            .unwrap_or_default();
        apply(&mut state);
        *blob = Some(state.encode()?);
        Ok(())
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> StorageResult<Option<PersistedState>> {
        Ok(self.blob.lock().as_deref().and_then(PersistedState::decode))
    }

    fn save_orders(&self, orders: &PersistedOrders) -> StorageResult<()> {
        self.update(|state| state.orders = orders.clone())
    }

    fn save_notifications(&self, notifications: &PersistedNotifications) -> StorageResult<()> {
        self.update(|state| state.notifications = notifications.clone())
    }

    fn clear(&self) -> StorageResult<()> {
        *self.blob.lock() = None;
        Ok(())
    }
}
