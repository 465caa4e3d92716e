//! Order Sync - order lifecycle synchronization for storefront clients
//!
//! Keeps a customer's order history, the tracking view and the admin order
//! feed consistent with the backend, from three sources:
//!
//! - optimistic writes at checkout ([`OrderFetcher::place_order`])
//! - REST fetches ([`OrderFetcher`])
//! - push events ([`PushClient`])
//!
//! All of them converge in [`OrderStore::merge`]. Changed orders fan out
//! through the [`SubscriberRegistry`]; the [`NotificationStore`] derives
//! de-duplicated, read-tracked notifications from them.

pub mod config;
pub mod error;
pub mod fetch;
pub mod http;
pub mod logger;
pub mod normalize;
pub mod notification;
pub mod persist;
pub mod push;
pub mod session;
pub mod store;

pub use config::{Identity, PushConfig, SyncConfig};
pub use error::{ApiError, ApiResult, NormalizeError, PushError, SessionError};
pub use fetch::{OrderDraft, OrderFetcher, RefreshSummary};
pub use http::HttpClient;
pub use normalize::{normalize_order, order_from_value};
pub use notification::NotificationStore;
pub use persist::{
    MemoryStateStore, PersistedState, RedbStateStore, StateStore, StorageError, StorageResult,
};
pub use push::{ConnectionState, Connector, PushClient, ReconnectEvent, WsConnector};
pub use session::{Collaborators, Session};
pub use store::{MergeOutcome, OrderList, OrderStore, SubscriberRegistry, Subscription};

// Re-export shared types for convenience
pub use shared::order::{Notification, NotificationKind, Order, OrderStatus};
