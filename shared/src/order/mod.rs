//! Order domain types
//!
//! - [`Order`]: canonical record, identical for optimistic, fetched and pushed data
//! - [`OrderStatus`]: closed status set with a documentation-level transition table
//! - [`Notification`]: derived, user-facing record of a status change

pub mod notification;
pub mod status;
pub mod types;

// Re-exports
pub use notification::{Notification, NotificationKind};
pub use status::{OrderStatus, Transition};
pub use types::*;
