//! Order status and its documentation-level transition table
//!
//! The server is authoritative for status changes. The client never rejects a
//! transition; [`OrderStatus::transition`] only classifies it so that
//! regressions can be flagged in logs.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Order fulfilment status
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum OrderStatus {
    #[default]
    Pending,
    Processing,
    Shipped,
    OutForDelivery,
    Delivered,
    /// Terminal: cancelled by the customer or the back office
    Cancelled,
    /// A value the server sent that this client does not know.
    /// Kept verbatim so it survives persistence and re-serialization.
    Other(String),
}

/// Classification of a status change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Moves forward along the fulfilment path (or into `Cancelled`)
    Advance,
    /// No change
    Same,
    /// Moves backward, e.g. `Shipped -> Processing`
    Regress,
    /// One side is not a known status, or the source is terminal
    Unknown,
}

impl OrderStatus {
    /// Canonical wire name
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "Pending",
            Self::Processing => "Processing",
            Self::Shipped => "Shipped",
            Self::OutForDelivery => "OutForDelivery",
            Self::Delivered => "Delivered",
            Self::Cancelled => "Cancelled",
            Self::Other(raw) => raw,
        }
    }

    /// Human-readable label for notification text
    pub fn label(&self) -> &str {
        match self {
            Self::OutForDelivery => "Out for Delivery",
            other => other.as_str(),
        }
    }

    /// Parse a status leniently: case, spaces, dashes and underscores are ignored.
    /// Never fails; unrecognized values become [`OrderStatus::Other`].
    pub fn parse(raw: &str) -> Self {
        let key: String = raw
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .flat_map(char::to_lowercase)
            .collect();

        match key.as_str() {
            "pending" => Self::Pending,
            "processing" => Self::Processing,
            "shipped" => Self::Shipped,
            "outfordelivery" => Self::OutForDelivery,
            "delivered" => Self::Delivered,
            "cancelled" | "canceled" => Self::Cancelled,
            _ => Self::Other(raw.trim().to_string()),
        }
    }

    /// Position on the fulfilment path; `None` for statuses off the path
    fn rank(&self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Processing => Some(1),
            Self::Shipped => Some(2),
            Self::OutForDelivery => Some(3),
            Self::Delivered => Some(4),
            Self::Cancelled | Self::Other(_) => None,
        }
    }

    /// Whether this is a recognized status
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Other(_))
    }

    /// Whether no further change is expected under normal operation
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }

    /// Classify `from -> to`
    ///
    /// | from \ to      | later on path | same | earlier on path | Cancelled |
    /// |----------------|---------------|------|-----------------|-----------|
    /// | on path        | Advance       | Same | Regress         | Advance   |
    /// | Cancelled      | Unknown       | Same | Unknown         | Same      |
    ///
    /// `Delivered -> Cancelled` is `Unknown`; `Other(_)` on either side is `Unknown`
    /// unless both sides are equal.
    pub fn transition(from: &OrderStatus, to: &OrderStatus) -> Transition {
        if from == to {
            return Transition::Same;
        }
        match (from.rank(), to.rank()) {
            (Some(a), Some(b)) if b > a => Transition::Advance,
            (Some(_), Some(_)) => Transition::Regress,
            (Some(_), None) if *to == Self::Cancelled && *from != Self::Delivered => {
                Transition::Advance
            }
            _ => Transition::Unknown,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<&str> for OrderStatus {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl Serialize for OrderStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OrderStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}
