use serde::{Deserialize, Serialize};

// ==================== Payloads ====================

/// Registration payload (client -> server)
///
/// Sent once per connection, before any order event is delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayload {
    /// Authenticated user, `None` for guests
    pub user_id: Option<String>,
    /// `customer` or `admin`; admins receive every order
    pub role: String,
    /// Client session identifier
    pub session_id: String,
}

/// Registration acknowledgement (server -> client)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterAck {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RegisterAck {
    /// Servers answer either `{ "success": bool }` or a bare boolean
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(success) => Some(Self {
                success: *success,
                message: None,
            }),
            other => Self::deserialize(other).ok(),
        }
    }
}

/// `new-order` / `order-updated` payload
///
/// The order is kept as raw JSON: the client normalizes it into the canonical
/// shape itself, since servers populate fields inconsistently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEventPayload {
    pub order: serde_json::Value,
}
