//! Shared types for the order sync core
//!
//! Wire and domain types used by the backend and every client surface:
//! the canonical order record, notification records, push channel frames
//! and the REST response envelope.

pub mod message;
pub mod order;
pub mod response;
pub mod util;

// Re-exports
pub use serde::{Deserialize, Serialize};

// Push channel re-exports (for convenient access)
pub use message::{PushEvent, PushMessage};

pub use order::{Notification, NotificationKind, Order, OrderStatus};
pub use response::ApiResponse;
