//! Raw payload -> canonical [`Order`]
//!
//! Every ingress path (push events, REST responses, checkout echo) runs raw
//! JSON through [`order_from_value`] before it reaches the store. Backends
//! written at different times disagree on field names and types; this is the
//! one place those differences are absorbed.

use crate::error::NormalizeError;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use shared::order::{Order, owner_ref_from_value};

/// Timestamps below this are taken to be seconds, not milliseconds
const SECONDS_CUTOFF: u64 = 100_000_000_000;

/// 9999-12-31T23:59:59.999Z; anything further out is garbage
const MAX_TIMESTAMP_MILLIS: u64 = 253_402_300_799_999;

/// Normalize a raw order payload into the canonical shape.
///
/// Coerces numeric and date fields, fills missing optional fields with
/// defaults, folds owner aliases and raises `version` to `updatedAt`.
/// Only a missing `orderNumber` or a non-object payload is fatal.
pub fn order_from_value(raw: &Value) -> Result<Order, NormalizeError> {
    let Value::Object(source) = raw else {
        return Err(NormalizeError::NotAnObject);
    };
    let mut map = source.clone();

    let order_number = take_first(&mut map, &["orderNumber", "order_number", "orderNo"])
        .as_ref()
        .and_then(scalar_string)
        .ok_or(NormalizeError::MissingOrderNumber)?;
    map.insert("orderNumber".into(), Value::String(order_number));

    rename_scalar(&mut map, &["id", "_id"], "id");
    rename_scalar(&mut map, &["clientTempId", "tempId", "client_temp_id"], "clientTempId");
    rename_scalar(&mut map, &["trackingNumber", "tracking_number"], "trackingNumber");
    rename_scalar(&mut map, &["paymentMethod", "payment_method"], "paymentMethod");

    if let Some(status) = map.remove("status") {
        if let Some(status) = scalar_string(&status) {
            map.insert("status".into(), Value::String(status));
        }
    }
    if let Some(status) = take_first(&mut map, &["paymentStatus", "payment_status"]) {
        if let Some(status) = scalar_string(&status) {
            map.insert("paymentStatus".into(), Value::String(status.to_lowercase()));
        }
    }

    // Canonical owner field may itself arrive as a populated object
    if let Some(owner) = map.remove("ownerRef") {
        map.insert(
            "ownerRef".into(),
            owner_ref_from_value(&owner).map_or(Value::Null, Value::String),
        );
    }

    for (field, aliases) in [
        ("createdAt", &["createdAt", "created_at"][..]),
        ("updatedAt", &["updatedAt", "updated_at"][..]),
        ("version", &["version"][..]),
    ] {
        if let Some(value) = take_first(&mut map, aliases) {
            match timestamp_millis(&value) {
                Some(millis) => {
                    map.insert(field.into(), Value::from(millis));
                }
                None => {
                    tracing::warn!(field, value = %value, "Unparseable timestamp, using default");
                }
            }
        }
    }

    let items = match map.remove("items") {
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| normalize_item(i, item))
            .collect::<Result<Vec<_>, _>>()?,
        _ => Vec::new(),
    };
    map.insert("items".into(), Value::Array(items));

    let totals = normalize_totals(&mut map)?;
    map.insert("totals".into(), totals);

    let address = match take_first(&mut map, &["shippingAddress", "shipping_address", "address"]) {
        Some(Value::Object(address)) => normalize_address(address),
        _ => Value::Object(Map::new()),
    };
    map.insert("shippingAddress".into(), address);

    let mut order: Order =
        serde_json::from_value(Value::Object(map)).map_err(|e| NormalizeError::InvalidField {
            field: "order".to_string(),
            reason: e.to_string(),
        })?;

    order.normalize_owner_ref();
    order.sync_version();
    Ok(order)
}

/// Normalize an already typed order (optimistic inserts).
pub fn normalize_order(mut order: Order) -> Order {
    order.normalize_owner_ref();
    order.sync_version();
    order
}

fn normalize_item(index: usize, raw: &Value) -> Result<Value, NormalizeError> {
    let Value::Object(source) = raw else {
        return Err(NormalizeError::InvalidField {
            field: format!("items[{index}]"),
            reason: "not an object".to_string(),
        });
    };
    let mut item = source.clone();

    // `product` is sometimes a populated document
    if let Some(product) = take_first(&mut item, &["productId", "product_id", "product"]) {
        if let Value::Object(doc) = &product {
            if !item.contains_key("name") {
                if let Some(name) = doc.get("name").cloned() {
                    item.insert("name".into(), name);
                }
            }
        }
        if let Some(id) = owner_ref_from_value(&product) {
            item.insert("productId".into(), Value::String(id));
        }
    }

    if let Some(quantity) = take_first(&mut item, &["quantity", "qty"]) {
        let quantity = number_i64(&quantity)
            .filter(|q| *q >= 0)
            .ok_or_else(|| NormalizeError::InvalidField {
                field: format!("items[{index}].quantity"),
                reason: format!("not a non-negative integer: {quantity}"),
            })?;
        item.insert("quantity".into(), Value::from(quantity));
    }

    if let Some(price) = take_first(&mut item, &["price", "unitPrice", "unit_price"]) {
        let price = decimal(&price).ok_or_else(|| NormalizeError::InvalidField {
            field: format!("items[{index}].price"),
            reason: format!("not a number: {price}"),
        })?;
        item.insert("price".into(), Value::String(price.to_string()));
    }

    Ok(Value::Object(item))
}

/// Totals arrive either nested under `totals` or flat on the order
fn normalize_totals(map: &mut Map<String, Value>) -> Result<Value, NormalizeError> {
    let mut source = match map.remove("totals") {
        Some(Value::Object(totals)) => totals,
        _ => Map::new(),
    };

    let mut totals = Map::new();
    for (field, aliases) in [
        ("subtotal", &["subtotal", "subTotal", "itemsPrice"][..]),
        ("shipping", &["shipping", "shippingCost", "shippingPrice"][..]),
        ("tax", &["tax", "taxPrice"][..]),
        ("discount", &["discount"][..]),
        ("total", &["total", "totalAmount", "totalPrice"][..]),
    ] {
        let value = take_first(&mut source, aliases).or_else(|| take_first(map, aliases));
        if let Some(value) = value {
            let amount = decimal(&value).ok_or_else(|| NormalizeError::InvalidField {
                field: format!("totals.{field}"),
                reason: format!("not a number: {value}"),
            })?;
            totals.insert(field.into(), Value::String(amount.to_string()));
        }
    }
    Ok(Value::Object(totals))
}

fn normalize_address(mut source: Map<String, Value>) -> Value {
    let mut address = Map::new();
    for (field, aliases) in [
        ("fullName", &["fullName", "full_name", "name"][..]),
        ("line1", &["line1", "street", "address", "addressLine1"][..]),
        ("line2", &["line2", "addressLine2", "apartment"][..]),
        ("city", &["city"][..]),
        ("region", &["region", "state", "province"][..]),
        ("postalCode", &["postalCode", "postal_code", "zipCode", "zip"][..]),
        ("country", &["country"][..]),
        ("phone", &["phone", "phoneNumber"][..]),
    ] {
        if let Some(value) = take_first(&mut source, aliases).as_ref().and_then(scalar_string) {
            address.insert(field.into(), Value::String(value));
        }
    }
    Value::Object(address)
}

/// Remove every alias and return the first one that was present and non-null
fn take_first(map: &mut Map<String, Value>, aliases: &[&str]) -> Option<Value> {
    let mut found = None;
    for alias in aliases {
        if let Some(value) = map.remove(*alias) {
            if found.is_none() && !value.is_null() {
                found = Some(value);
            }
        }
    }
    found
}

/// Move the first present alias to `canonical` as a string, dropping empties
fn rename_scalar(map: &mut Map<String, Value>, aliases: &[&str], canonical: &str) {
    if let Some(value) = take_first(map, aliases).as_ref().and_then(scalar_string) {
        map.insert(canonical.into(), Value::String(value));
    }
}

/// Strings (trimmed, non-empty) and numbers as a string
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .filter(|f| *f >= i64::MIN as f64 && *f < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => n.to_string().parse().ok(),
        Value::String(s) => s
            .trim()
            .trim_start_matches('$')
            .replace(',', "")
            .parse()
            .ok(),
        _ => None,
    }
}

/// Epoch seconds/millis (number or numeric string), RFC 3339, or a naive
/// UTC date-time / date
fn timestamp_millis(value: &Value) -> Option<i64> {
    if let Some(n) = number_i64(value) {
        let millis = if n.unsigned_abs() < SECONDS_CUTOFF {
            n.checked_mul(1000)?
        } else {
            n
        };
        return (millis.unsigned_abs() <= MAX_TIMESTAMP_MILLIS).then_some(millis);
    }
    let Value::String(s) = value else {
        return None;
    };
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}
