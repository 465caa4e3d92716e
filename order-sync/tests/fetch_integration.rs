// order-sync/tests/fetch_integration.rs
// REST fetch layer against an in-process backend

mod common;

use axum::http::StatusCode;
use common::{Backend, TOKEN};
use order_sync::{
    ApiError, HttpClient, OrderDraft, OrderFetcher, OrderStatus, OrderStore, SyncConfig,
};
use serde_json::json;
use shared::order::OrderItem;
use std::sync::Arc;

async fn setup() -> (Backend, OrderFetcher, Arc<OrderStore>) {
    let backend = Backend::default();
    let base = backend.spawn().await;
    let http = HttpClient::new(&SyncConfig::new(base).with_token(TOKEN)).unwrap();
    let store = Arc::new(OrderStore::new());
    (backend, OrderFetcher::new(http, store.clone()), store)
}

#[tokio::test]
async fn test_refresh_merges_each_order() {
    let (backend, fetcher, store) = setup().await;
    backend.set_orders(vec![
        json!({ "orderNumber": "ORD-1", "status": "processing", "user": "u-1", "updatedAt": 10 }),
        json!({ "orderNumber": "ORD-2", "status": "Shipped", "trackingNumber": "1Z9", "updatedAt": 20 }),
        json!({ "status": "pending" }),
    ]);

    let summary = fetcher.refresh_my_orders().await.unwrap();
    assert_eq!(summary.received, 3);
    assert_eq!(summary.changed, 2);
    assert_eq!(summary.dropped, 1);

    let first = store.get("ORD-1").unwrap();
    assert_eq!(first.status, OrderStatus::Processing);
    assert_eq!(first.owner_ref.as_deref(), Some("u-1"));

    // Same data again changes nothing
    let again = fetcher.refresh_my_orders().await.unwrap();
    assert_eq!(again.changed, 0);
}

#[tokio::test]
async fn test_failed_refresh_leaves_cache_untouched() {
    let (backend, fetcher, store) = setup().await;
    backend.set_orders(vec![json!({ "orderNumber": "ORD-1", "status": "pending", "updatedAt": 10 })]);
    fetcher.refresh_my_orders().await.unwrap();

    backend.set_orders(vec![json!({ "orderNumber": "ORD-1", "status": "shipped", "updatedAt": 20 })]);
    backend.fail_with(Some(StatusCode::INTERNAL_SERVER_ERROR));
    match fetcher.refresh_my_orders().await {
        Err(ApiError::Server { status, message }) => {
            assert_eq!(status, 500);
            assert_eq!(message, "backend unavailable");
        }
        other => panic!("expected server error, got {:?}", other),
    }
    assert_eq!(store.get("ORD-1").unwrap().status, OrderStatus::Pending);

    backend.fail_with(None);
    backend.reject_with(Some("maintenance"));
    assert!(matches!(
        fetcher.refresh_my_orders().await,
        Err(ApiError::Rejected(m)) if m == "maintenance"
    ));
    assert_eq!(store.get("ORD-1").unwrap().status, OrderStatus::Pending);
}

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let backend = Backend::default();
    let base = backend.spawn().await;
    let http = HttpClient::new(&SyncConfig::new(base)).unwrap();
    let fetcher = OrderFetcher::new(http, Arc::new(OrderStore::new()));
    assert!(matches!(
        fetcher.refresh_my_orders().await,
        Err(ApiError::Unauthorized)
    ));
}

#[tokio::test]
async fn test_track_by_tracking_number() {
    let (backend, fetcher, store) = setup().await;
    backend.set_orders(vec![json!({
        "orderNumber": "ORD-9",
        "status": "out_for_delivery",
        "trackingNumber": "1Z999",
        "updatedAt": 30
    })]);

    let order = fetcher.track("1Z999").await.unwrap();
    assert_eq!(order.order_number, "ORD-9");
    assert_eq!(order.status, OrderStatus::OutForDelivery);
    assert!(store.get("ORD-9").is_some());

    assert!(matches!(
        fetcher.track("nope").await,
        Err(ApiError::NotFound(m)) if m == "order not found"
    ));
}

#[tokio::test]
async fn test_place_order_folds_identity() {
    let (backend, fetcher, store) = setup().await;
    let draft = OrderDraft::new(vec![OrderItem {
        product_id: "p-1".into(),
        name: "Mug".into(),
        quantity: 1,
        price: "12.50".parse().unwrap(),
        ..OrderItem::default()
    }])
    .with_owner("u-1");

    let confirmed = fetcher.place_order(draft).await.unwrap();
    assert_eq!(confirmed.id.as_deref(), Some("srv-1"));
    assert_eq!(confirmed.status, OrderStatus::Processing);
    let temp_id = confirmed.client_temp_id.clone().unwrap();
    assert!(temp_id.starts_with("tmp-"));

    assert_eq!(store.len(), 1);
    assert_eq!(store.alias_of(&temp_id).as_deref(), Some("srv-1"));
    assert_eq!(store.resolve(&temp_id).unwrap().order_number, confirmed.order_number);

    // The server received the client-generated order number
    let created = backend.created();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0]["orderNumber"], json!(confirmed.order_number));
}

#[tokio::test]
async fn test_failed_checkout_keeps_optimistic_record() {
    let (backend, fetcher, store) = setup().await;
    backend.fail_with(Some(StatusCode::BAD_GATEWAY));

    let mut draft = OrderDraft::new(Vec::new());
    draft.order_number = Some("ORD-77".into());
    let result = fetcher.place_order(draft).await;
    assert!(matches!(result, Err(ApiError::Server { status: 502, .. })));

    let local = store.get("ORD-77").unwrap();
    assert_eq!(local.status, OrderStatus::Pending);
    assert!(local.id.is_none());
    assert!(local.client_temp_id.is_some());
}
