//! User-facing notification records derived from order mutations

use super::OrderStatus;
use serde::{Deserialize, Serialize};

/// What a notification announces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// First sighting of an order (admin feed)
    Created,
    /// A known status moved to another known status
    StatusChanged,
    /// Status changed to something this client cannot name
    Updated,
}

/// One entry of the notification inbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    /// Join key of the order this is about
    pub order_number: String,
    /// Server id, when the order had one at the time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    pub kind: NotificationKind,
    pub message: String,
    /// Status the notification announces
    pub status: OrderStatus,
    pub created_at: i64,
    #[serde(default)]
    pub read: bool,
}
