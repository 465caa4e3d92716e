//! Canonical order shape shared by every ingress path and every UI surface

use super::OrderStatus;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Historical spellings of the owner reference, in lookup priority order.
///
/// Checkout wrote `userId`, the admin panel wrote `user` (sometimes a populated
/// object), older REST payloads used `customerId`.
pub const OWNER_REF_ALIASES: &[&str] = &[
    "userId",
    "user_id",
    "user",
    "customerId",
    "customer_id",
    "customer",
    "owner",
];

// ============================================================================
// Order
// ============================================================================

/// One purchase transaction
///
/// `order_number` is the join key across optimistic, fetched and pushed
/// representations; `id` and `client_temp_id` may differ between them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Server-assigned id, absent until confirmed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Locally generated id used before server confirmation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_temp_id: Option<String>,
    /// Human-readable, unique order number
    pub order_number: String,
    /// Carrier tracking number, assigned once shipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_number: Option<String>,
    #[serde(default)]
    pub status: OrderStatus,
    /// Owning user id; `None` for guest orders
    #[serde(default)]
    pub owner_ref: Option<String>,
    #[serde(default)]
    pub items: Vec<OrderItem>,
    #[serde(default)]
    pub shipping_address: ShippingAddress,
    #[serde(default)]
    pub totals: OrderTotals,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub payment_status: PaymentStatus,
    /// Milliseconds since epoch
    #[serde(default)]
    pub created_at: i64,
    /// Milliseconds since epoch
    #[serde(default)]
    pub updated_at: i64,
    /// Logical timestamp: the max `updated_at` seen across all sources
    #[serde(default)]
    pub version: i64,
    /// Fields this client does not model (including legacy owner spellings
    /// until [`Order::normalize_owner_ref`] folds them away)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Order {
    /// Create a pending order with the given number and no other data
    pub fn new(order_number: impl Into<String>) -> Self {
        Self {
            id: None,
            client_temp_id: None,
            order_number: order_number.into(),
            tracking_number: None,
            status: OrderStatus::Pending,
            owner_ref: None,
            items: Vec::new(),
            shipping_address: ShippingAddress::default(),
            totals: OrderTotals::default(),
            payment_method: None,
            payment_status: PaymentStatus::default(),
            created_at: 0,
            updated_at: 0,
            version: 0,
            extra: Map::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_client_temp_id(mut self, temp_id: impl Into<String>) -> Self {
        self.client_temp_id = Some(temp_id.into());
        self
    }

    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_owner(mut self, owner_ref: impl Into<String>) -> Self {
        self.owner_ref = Some(owner_ref.into());
        self
    }

    pub fn with_tracking_number(mut self, tracking_number: impl Into<String>) -> Self {
        self.tracking_number = Some(tracking_number.into());
        self
    }

    /// Set `updated_at` and `version` together
    pub fn with_version(mut self, version: i64) -> Self {
        self.updated_at = version;
        self.version = version;
        self
    }

    /// Raise `version` to at least `updated_at`
    pub fn sync_version(&mut self) {
        self.version = self.version.max(self.updated_at);
    }

    /// Whether the order is owned by `owner_ref`
    pub fn is_owned_by(&self, owner_ref: &str) -> bool {
        self.owner_ref.as_deref() == Some(owner_ref)
    }

    /// Collapse every known owner spelling into `owner_ref`.
    ///
    /// The canonical field wins when already set; otherwise the first alias in
    /// [`OWNER_REF_ALIASES`] order that yields an id is used. All alias keys are
    /// removed from `extra` either way. Returns `true` if the record changed.
    pub fn normalize_owner_ref(&mut self) -> bool {
        let mut changed = false;

        if self.owner_ref.as_deref().is_some_and(|s| s.trim().is_empty()) {
            self.owner_ref = None;
            changed = true;
        }

        for alias in OWNER_REF_ALIASES {
            if let Some(value) = self.extra.remove(*alias) {
                changed = true;
                if self.owner_ref.is_none() {
                    self.owner_ref = owner_ref_from_value(&value);
                }
            }
        }

        changed
    }
}

/// Extract an owner id from any of the shapes legacy writers produced:
/// a plain string, a number, or a populated object carrying `_id` / `id`.
pub fn owner_ref_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Object(obj) => obj
            .get("_id")
            .or_else(|| obj.get("id"))
            .and_then(owner_ref_from_value),
        _ => None,
    }
}

// ============================================================================
// Order parts
// ============================================================================

/// One line of an order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    #[serde(default)]
    pub product_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub quantity: u32,
    /// Unit price at purchase time
    #[serde(default)]
    pub price: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl OrderItem {
    /// `price * quantity`
    pub fn line_total(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }
}

/// Delivery address snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ShippingAddress {
    pub full_name: String,
    pub line1: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    pub city: String,
    pub region: String,
    pub postal_code: String,
    pub country: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Money summary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub shipping: Decimal,
    pub tax: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
}

/// Payment state as reported by the backend
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
    Refunded,
    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_owner_ref_from_legacy_spellings() {
        let mut order: Order = serde_json::from_value(json!({
            "orderNumber": "ORD-1",
            "userId": "u-42"
        }))
        .unwrap();
        assert!(order.owner_ref.is_none());
        assert!(order.normalize_owner_ref());
        assert_eq!(order.owner_ref.as_deref(), Some("u-42"));
        assert!(order.extra.is_empty());

        // Second pass has nothing left to do
        assert!(!order.normalize_owner_ref());
    }

    #[test]
    fn test_owner_ref_populated_object() {
        let mut order: Order = serde_json::from_value(json!({
            "orderNumber": "ORD-2",
            "user": { "_id": "abc", "name": "Ana" },
            "customerId": "ignored"
        }))
        .unwrap();
        order.normalize_owner_ref();
        assert_eq!(order.owner_ref.as_deref(), Some("abc"));
        assert!(!order.extra.contains_key("customerId"));
    }

    #[test]
    fn test_canonical_owner_wins() {
        let mut order: Order = serde_json::from_value(json!({
            "orderNumber": "ORD-3",
            "ownerRef": "canonical",
            "userId": "legacy"
        }))
        .unwrap();
        order.normalize_owner_ref();
        assert_eq!(order.owner_ref.as_deref(), Some("canonical"));
    }

    #[test]
    fn test_guest_order_has_no_owner() {
        let mut order = Order::new("ORD-4").with_owner("   ");
        assert!(order.normalize_owner_ref());
        assert!(order.owner_ref.is_none());
    }

    #[test]
    fn test_unmodelled_fields_survive() {
        let order: Order = serde_json::from_value(json!({
            "orderNumber": "ORD-5",
            "giftMessage": "happy birthday"
        }))
        .unwrap();
        let back = serde_json::to_value(&order).unwrap();
        assert_eq!(back["giftMessage"], "happy birthday");
        assert_eq!(back["status"], "Pending");
    }

    #[test]
    fn test_line_total() {
        let item = OrderItem {
            quantity: 3,
            price: Decimal::new(1250, 2),
            ..Default::default()
        };
        assert_eq!(item.line_total(), Decimal::new(3750, 2));
    }
}
