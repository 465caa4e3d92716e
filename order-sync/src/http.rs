//! HTTP client for the order REST endpoints
//!
//! Every endpoint answers with the `{ success, message, data }` envelope. Order
//! payloads are returned as raw JSON; the fetch layer normalizes them.

use crate::config::SyncConfig;
use crate::error::{ApiError, ApiResult};
use reqwest::{Client, StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::ApiResponse;

/// HTTP client for the order backend
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpClient {
    /// Create a new HTTP client from configuration
    pub fn new(config: &SyncConfig) -> ApiResult<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        let base_url = Url::parse(&config.api_base_url)
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", config.api_base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(config.api_base_url.clone()));
        }

        Ok(Self {
            client,
            base_url,
            token: config.token.clone(),
        })
    }

    /// Set the authentication token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Get the current token
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Build authorization header value
    fn auth_header(&self) -> Option<String> {
        self.token.as_ref().map(|t| format!("Bearer {}", t))
    }

    /// Base URL joined with percent-encoded path segments
    fn url(&self, segments: &[&str]) -> ApiResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> ApiResult<T> {
        let mut request = self.client.get(self.url(segments)?);

        if let Some(auth) = self.auth_header() {
            request = request.header(reqwest::header::AUTHORIZATION, auth);
        }

        let response = request.send().await?;
        Self::handle_response(response).await
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> ApiResult<T> {
        let mut request = self.client.post(self.url(segments)?).json(body);

        if let Some(auth) = self.auth_header() {
            request = request.header(reqwest::header::AUTHORIZATION, auth);
        }

        let response = request.send().await?;
        Self::handle_response(response).await
    }

    /// Handle the HTTP response
    async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> ApiResult<T> {
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await?;
            let message = error_message(&text);
            return match status {
                StatusCode::UNAUTHORIZED => Err(ApiError::Unauthorized),
                StatusCode::FORBIDDEN => Err(ApiError::Forbidden(message)),
                StatusCode::NOT_FOUND => Err(ApiError::NotFound(message)),
                StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                    Err(ApiError::Validation(message))
                }
                _ => Err(ApiError::Server {
                    status: status.as_u16(),
                    message,
                }),
            };
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(Into::into)
    }

    /// Unwrap a `{success, data}` envelope
    fn data(envelope: ApiResponse<Value>, what: &str) -> ApiResult<Value> {
        envelope
            .into_result()
            .map_err(ApiError::Rejected)?
            .ok_or_else(|| ApiError::InvalidResponse(format!("Missing {} data", what)))
    }

    // ========== Order API ==========

    /// `GET /orders/my-orders`: raw orders of the authenticated owner
    pub async fn my_orders(&self) -> ApiResult<Vec<Value>> {
        let envelope: ApiResponse<Value> = self.get(&["orders", "my-orders"]).await?;
        let data = Self::data(envelope, "order list")?;
        match data {
            Value::Array(items) => Ok(items),
            Value::Object(mut map) => match map.remove("orders") {
                Some(Value::Array(items)) => Ok(items),
                _ => Err(ApiError::InvalidResponse(
                    "Order list is neither an array nor {orders: [...]}".into(),
                )),
            },
            other => Err(ApiError::InvalidResponse(format!(
                "Unexpected order list: {}",
                other
            ))),
        }
    }

    /// `GET /orders/track/:token`: one raw order by order or tracking number
    pub async fn track(&self, token: &str) -> ApiResult<Value> {
        let envelope: ApiResponse<Value> = self.get(&["orders", "track", token]).await?;
        Ok(unwrap_order(Self::data(envelope, "tracked order")?))
    }

    /// `POST /orders`: create an order, returning the server echo
    pub async fn create_order<B: Serialize>(&self, order: &B) -> ApiResult<Value> {
        let envelope: ApiResponse<Value> = self.post(&["orders"], order).await?;
        Ok(unwrap_order(Self::data(envelope, "created order")?))
    }
}

/// Accept both `data: {...order}` and `data: {order: {...}}`
fn unwrap_order(data: Value) -> Value {
    match data {
        Value::Object(mut map) if map.len() == 1 && map.contains_key("order") => {
            map.remove("order").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Prefer the envelope message of an error body over the raw text
fn error_message(body: &str) -> String {
    serde_json::from_str::<ApiResponse<Value>>(body)
        .ok()
        .and_then(|envelope| envelope.message)
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client(base: &str) -> HttpClient {
        HttpClient::new(&SyncConfig::new(base)).unwrap()
    }

    #[test]
    fn test_url_joins_and_encodes_segments() {
        let c = client("http://shop.test/api/");
        assert_eq!(
            c.url(&["orders", "my-orders"]).unwrap().as_str(),
            "http://shop.test/api/orders/my-orders"
        );
        assert_eq!(
            c.url(&["orders", "track", "1Z 99/A"]).unwrap().as_str(),
            "http://shop.test/api/orders/track/1Z%2099%2FA"
        );
        assert_eq!(
            client("http://shop.test/api").url(&["orders"]).unwrap().as_str(),
            "http://shop.test/api/orders"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            HttpClient::new(&SyncConfig::new("not a url")),
            Err(ApiError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_unwrap_order_shapes() {
        let order = json!({ "orderNumber": "ORD-1" });
        assert_eq!(unwrap_order(json!({ "order": order.clone() })), order);
        assert_eq!(unwrap_order(order.clone()), order);
    }

    #[test]
    fn test_error_message_prefers_envelope() {
        assert_eq!(error_message(r#"{"success":false,"message":"nope"}"#), "nope");
        assert_eq!(error_message("plain text"), "plain text");
    }
}
