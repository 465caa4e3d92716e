//! Push channel message types
//!
//! Shared between the order backend and its clients. Every frame on the push
//! connection is one JSON text message:
//!
//! ```json
//! { "event": "order-updated", "data": { "order": { ... } } }
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

pub mod payload;
pub use payload::*;

/// Push channel event names
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PushEvent {
    /// Client -> server identity handshake
    Register,
    /// Server -> client handshake acknowledgement
    Registered,
    /// An order was placed
    NewOrder,
    /// An order changed (status, tracking number, ...)
    OrderUpdated,
    /// Any event this client does not handle
    Other(String),
}

impl PushEvent {
    pub fn as_str(&self) -> &str {
        match self {
            PushEvent::Register => "register",
            PushEvent::Registered => "registered",
            PushEvent::NewOrder => "new-order",
            PushEvent::OrderUpdated => "order-updated",
            PushEvent::Other(name) => name,
        }
    }

    /// Whether the event carries an order to merge
    pub fn carries_order(&self) -> bool {
        matches!(self, PushEvent::NewOrder | PushEvent::OrderUpdated)
    }
}

impl From<&str> for PushEvent {
    fn from(value: &str) -> Self {
        match value {
            "register" => PushEvent::Register,
            "registered" => PushEvent::Registered,
            // Older servers emitted `order-created`
            "new-order" | "order-created" => PushEvent::NewOrder,
            "order-updated" => PushEvent::OrderUpdated,
            other => PushEvent::Other(other.to_string()),
        }
    }
}

impl fmt::Display for PushEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for PushEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PushEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(PushEvent::from(raw.as_str()))
    }
}

/// One frame on the push connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    pub event: PushEvent,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl PushMessage {
    pub fn new(event: PushEvent, data: serde_json::Value) -> Self {
        Self { event, data }
    }

    /// Create the registration handshake message
    pub fn register(payload: &RegisterPayload) -> Self {
        Self::new(PushEvent::Register, to_value(payload))
    }

    /// Create the handshake acknowledgement
    pub fn registered(success: bool) -> Self {
        Self::new(
            PushEvent::Registered,
            to_value(&RegisterAck {
                success,
                message: None,
            }),
        )
    }

    /// Create a `new-order` message
    pub fn new_order<T: Serialize>(order: &T) -> Self {
        Self::new(PushEvent::NewOrder, serde_json::json!({ "order": order }))
    }

    /// Create an `order-updated` message
    pub fn order_updated<T: Serialize>(order: &T) -> Self {
        Self::new(PushEvent::OrderUpdated, serde_json::json!({ "order": order }))
    }

    /// Parse `data` into the given payload type
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }

    /// Encode as a JSON text frame
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a JSON text frame
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

fn to_value<T: Serialize>(payload: &T) -> serde_json::Value {
    // Payload structs here contain only strings and bools
    serde_json::to_value(payload).unwrap_or(serde_json::Value::Null)
}
