//! Fake order backend for integration tests
#![allow(dead_code)]

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use shared::ApiResponse;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TOKEN: &str = "test-token";

#[derive(Default)]
struct BackendState {
    orders: Vec<Value>,
    created: Vec<Value>,
    fail_with: Option<StatusCode>,
    reject_with: Option<String>,
    next_id: u32,
}

/// In-process REST backend on `127.0.0.1:0`
#[derive(Clone, Default)]
pub struct Backend {
    state: Arc<Mutex<BackendState>>,
}

impl Backend {
    /// Start serving; returns the API base URL
    pub async fn spawn(&self) -> String {
        let app = Router::new()
            .route("/api/orders/my-orders", get(my_orders))
            .route("/api/orders/track/{token}", get(track))
            .route("/api/orders", post(create_order))
            .with_state(self.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/api", addr)
    }

    pub fn set_orders(&self, orders: Vec<Value>) {
        self.state.lock().unwrap().orders = orders;
    }

    /// Answer every request with this status until cleared
    pub fn fail_with(&self, status: Option<StatusCode>) {
        self.state.lock().unwrap().fail_with = status;
    }

    /// Answer with `success: false` until cleared
    pub fn reject_with(&self, message: Option<&str>) {
        self.state.lock().unwrap().reject_with = message.map(str::to_string);
    }

    pub fn created(&self) -> Vec<Value> {
        self.state.lock().unwrap().created.clone()
    }

    fn guard(&self, headers: &HeaderMap) -> Result<(), (StatusCode, Json<Value>)> {
        let state = self.state.lock().unwrap();
        if let Some(status) = state.fail_with {
            return Err(error(status, "backend unavailable"));
        }
        if let Some(message) = &state.reject_with {
            return Err((StatusCode::OK, Json(json!(ApiResponse::<Value>::error(message.clone())))));
        }
        let authorized = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == format!("Bearer {}", TOKEN));
        if !authorized {
            return Err(error(StatusCode::UNAUTHORIZED, "login required"));
        }
        Ok(())
    }
}

fn error(status: StatusCode, message: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!(ApiResponse::<Value>::error(message))))
}

fn ok(data: Value) -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!(ApiResponse::ok(data))))
}

async fn my_orders(State(backend): State<Backend>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    if let Err(response) = backend.guard(&headers) {
        return response;
    }
    let orders = backend.state.lock().unwrap().orders.clone();
    ok(Value::Array(orders))
}

async fn track(
    State(backend): State<Backend>,
    Path(token): Path<String>,
) -> (StatusCode, Json<Value>) {
    // Anonymous lookup: no token required
    let state = backend.state.lock().unwrap();
    if let Some(status) = state.fail_with {
        return error(status, "backend unavailable");
    }
    let found = state.orders.iter().find(|o| {
        o.get("orderNumber").and_then(Value::as_str) == Some(token.as_str())
            || o.get("trackingNumber").and_then(Value::as_str) == Some(token.as_str())
    });
    match found {
        Some(order) => ok(json!({ "order": order })),
        None => error(StatusCode::NOT_FOUND, "order not found"),
    }
}

async fn create_order(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Json(mut body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if let Err(response) = backend.guard(&headers) {
        return response;
    }
    let mut state = backend.state.lock().unwrap();
    state.next_id += 1;
    let id = format!("srv-{}", state.next_id);
    if let Some(map) = body.as_object_mut() {
        map.remove("id");
        map.remove("clientTempId");
        map.insert("_id".into(), json!(id));
        map.insert("status".into(), json!("processing"));
        let updated = map.get("updatedAt").and_then(Value::as_i64).unwrap_or(0);
        map.insert("updatedAt".into(), json!(updated + 1));
    }
    state.created.push(body.clone());
    state.orders.push(body.clone());
    ok(body)
}

/// Poll `f` until it holds or five seconds pass
pub async fn eventually(mut f: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !f() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met within 5s");
}
