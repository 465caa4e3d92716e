//! REST fetch layer
//!
//! Pulls authoritative orders and runs each one through [`OrderStore::merge`].
//! A failed request returns an [`ApiError`] and leaves the cache untouched.

use crate::error::{ApiError, ApiResult};
use crate::http::HttpClient;
use crate::normalize::order_from_value;
use crate::store::OrderStore;
use rust_decimal::Decimal;
use shared::order::{Order, OrderItem, OrderTotals, ShippingAddress};
use std::sync::Arc;

/// Outcome of a bulk refresh
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Orders in the response
    pub received: usize,
    /// Orders that inserted or replaced a cached record
    pub changed: usize,
    /// Malformed orders that were skipped
    pub dropped: usize,
}

/// Checkout input
#[derive(Debug, Clone, Default)]
pub struct OrderDraft {
    /// Generated when absent
    pub order_number: Option<String>,
    pub owner_ref: Option<String>,
    pub items: Vec<OrderItem>,
    pub shipping_address: ShippingAddress,
    /// Computed from the items when left at zero
    pub totals: OrderTotals,
    pub payment_method: Option<String>,
}

impl OrderDraft {
    pub fn new(items: Vec<OrderItem>) -> Self {
        Self {
            items,
            ..Self::default()
        }
    }

    pub fn with_owner(mut self, owner_ref: impl Into<String>) -> Self {
        self.owner_ref = Some(owner_ref.into());
        self
    }

    pub fn with_shipping_address(mut self, address: ShippingAddress) -> Self {
        self.shipping_address = address;
        self
    }

    pub fn with_payment_method(mut self, method: impl Into<String>) -> Self {
        self.payment_method = Some(method.into());
        self
    }

    /// Local pending order with a client temp id, stamped now
    pub fn into_order(self) -> Order {
        let now = shared::util::now_millis();
        let mut totals = self.totals;
        if totals.total.is_zero() {
            totals.subtotal = self.items.iter().map(OrderItem::line_total).sum::<Decimal>();
            totals.total = totals.subtotal + totals.shipping + totals.tax - totals.discount;
        }

        let mut order = Order::new(
            self.order_number
                .unwrap_or_else(shared::util::order_number),
        )
        .with_client_temp_id(shared::util::client_temp_id())
        .with_version(now);
        order.created_at = now;
        order.owner_ref = self.owner_ref;
        order.items = self.items;
        order.shipping_address = self.shipping_address;
        order.totals = totals;
        order.payment_method = self.payment_method;
        order
    }
}

/// REST fetches feeding the order cache
#[derive(Debug, Clone)]
pub struct OrderFetcher {
    http: HttpClient,
    store: Arc<OrderStore>,
}

impl OrderFetcher {
    pub fn new(http: HttpClient, store: Arc<OrderStore>) -> Self {
        Self { http, store }
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Merge every order of `GET /orders/my-orders`
    pub async fn refresh_my_orders(&self) -> ApiResult<RefreshSummary> {
        let raw = self.http.my_orders().await.inspect_err(|e| {
            tracing::warn!(error = %e, "Order refresh failed, keeping cached orders");
        })?;

        let mut summary = RefreshSummary {
            received: raw.len(),
            ..RefreshSummary::default()
        };
        for (index, value) in raw.iter().enumerate() {
            match order_from_value(value) {
                Ok(order) => {
                    if self.store.merge(order).changed {
                        summary.changed += 1;
                    }
                }
                Err(e) => {
                    summary.dropped += 1;
                    tracing::warn!(index, error = %e, "Dropping malformed order from refresh");
                }
            }
        }

        tracing::info!(
            received = summary.received,
            changed = summary.changed,
            dropped = summary.dropped,
            "Orders refreshed"
        );
        Ok(summary)
    }

    /// Look up one order by order number or tracking number and merge it.
    ///
    /// Returns the cached record after the merge, which may be newer than the
    /// response.
    pub async fn track(&self, token: &str) -> ApiResult<Order> {
        let raw = self.http.track(token).await?;
        let order = order_from_value(&raw).map_err(|e| {
            tracing::warn!(token, error = %e, "Malformed tracked order");
            ApiError::InvalidResponse(e.to_string())
        })?;
        Ok(self.store.merge(order).result)
    }

    /// Checkout: optimistic insert, `POST /orders`, merge the confirmed echo.
    ///
    /// When the request fails the optimistic record stays cached and the
    /// error is returned.
    pub async fn place_order(&self, draft: OrderDraft) -> ApiResult<Order> {
        let local = self.store.upsert_optimistic(draft.into_order()).result;
        tracing::info!(
            order_number = %local.order_number,
            temp_id = ?local.client_temp_id,
            "Order placed locally"
        );

        let echo = self.http.create_order(&local).await.inspect_err(|e| {
            tracing::warn!(
                order_number = %local.order_number,
                error = %e,
                "Order submission failed, keeping local record"
            );
        })?;

        let mut confirmed =
            order_from_value(&echo).map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
        if confirmed.order_number != local.order_number {
            tracing::warn!(
                local = %local.order_number,
                server = %confirmed.order_number,
                "Server assigned a different order number"
            );
        }
        if confirmed.client_temp_id.is_none() {
            confirmed.client_temp_id = local.client_temp_id.clone();
        }
        // The echo is causally after the local write even if the clocks disagree
        confirmed.version = confirmed.version.max(local.version);

        let merged = self.store.merge(confirmed).result;
        tracing::info!(
            order_number = %merged.order_number,
            id = ?merged.id,
            "Order confirmed"
        );
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draft_into_order() {
        let draft = OrderDraft::new(vec![OrderItem {
            product_id: "p-1".into(),
            name: "Mug".into(),
            quantity: 2,
            price: Decimal::new(1250, 2),
            ..OrderItem::default()
        }])
        .with_owner("u-1")
        .with_payment_method("card");

        let order = draft.into_order();
        assert!(order.order_number.starts_with("ORD-"));
        assert!(order.client_temp_id.as_deref().unwrap().starts_with("tmp-"));
        assert!(order.id.is_none());
        assert_eq!(order.owner_ref.as_deref(), Some("u-1"));
        assert_eq!(order.totals.subtotal, Decimal::new(2500, 2));
        assert_eq!(order.totals.total, Decimal::new(2500, 2));
        assert_eq!(order.version, order.updated_at);
        assert_eq!(order.created_at, order.updated_at);
    }

    #[test]
    fn test_draft_keeps_explicit_totals() {
        let mut draft = OrderDraft::new(Vec::new());
        draft.order_number = Some("ORD-7".into());
        draft.totals.total = Decimal::new(999, 2);
        let order = draft.into_order();
        assert_eq!(order.order_number, "ORD-7");
        assert_eq!(order.totals.total, Decimal::new(999, 2));
    }
}
