//! API Response types
//!
//! Every order endpoint answers with the same envelope:
//! ```json
//! {
//!     "success": true,
//!     "message": "optional text",
//!     "data": { ... }
//! }
//! ```

use serde::{Deserialize, Serialize};

/// Unified API response structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the backend accepted the request
    pub success: bool,
    /// Human-readable message (usually only on failure)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Response data (optional)
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Create a successful response
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    /// Create an error response
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
        }
    }

    /// Unwrap the data of a successful response, or the failure message
    pub fn into_result(self) -> Result<Option<T>, String> {
        if self.success {
            Ok(self.data)
        } else {
            Err(self
                .message
                .unwrap_or_else(|| "request was not successful".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_data_is_none() {
        let resp: ApiResponse<Vec<u32>> = serde_json::from_value(json!({ "success": true })).unwrap();
        assert_eq!(resp.into_result().unwrap(), None);
    }

    #[test]
    fn test_failure_carries_message() {
        let resp: ApiResponse<u32> =
            serde_json::from_value(json!({ "success": false, "message": "Order not found" })).unwrap();
        assert_eq!(resp.into_result().unwrap_err(), "Order not found");
    }
}
