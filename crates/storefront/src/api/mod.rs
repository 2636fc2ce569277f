//! REST backend collaborator.
//!
//! # Architecture
//!
//! - `StoreApi` is the seam: one method per backend operation the engine
//!   consumes. `ApiClient` implements it over `reqwest`; tests inject fakes.
//! - Every response goes through [`classify_response`], which maps HTTP status
//!   codes to [`ApiError`] and unwraps the `{success, data, error}` envelope.
//! - Wire DTOs in [`types`] tolerate backend schema drift; [`conversions`]
//!   normalises them into the canonical cart model.
//!
//! # Example
//!
//! ```rust,ignore
//! use hearth_storefront::api::{ApiClient, StoreApi};
//!
//! let client = ApiClient::new(&config.api, config.session.clone())?;
//! let items = client.get_cart().await?;
//! ```

mod client;
pub mod conversions;
pub mod types;

pub use client::ApiClient;
pub use types::{
    CouponRequest, CouponVerdict, NewCartLine, OrderReceipt, PaymentIntent, PaymentIntentRequest,
};

use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use hearth_core::CartItemId;

use crate::cart::CartItem;
use crate::checkout::CheckoutOrder;
use crate::orders::OrderTracking;

/// Errors that can occur when talking to the REST backend.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP request failed (connection, timeout, body read).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered 401, or the call needs a session and none is set.
    #[error("Unauthorized")]
    Unauthorized,

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The backend refused the request with a reason.
    #[error("Rejected: {0}")]
    Rejected(String),

    /// Any other non-success status.
    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    /// Rate limited by the backend.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Operations the engine consumes from the REST backend.
///
/// Cart routes act on the cart of the authenticated session. Implementations
/// must bound every call with a timeout.
pub trait StoreApi: Send + Sync {
    /// `GET /cart`
    async fn get_cart(&self) -> Result<Vec<CartItem>, ApiError>;

    /// `GET /cart/total`; `None` when the backend does not report one.
    async fn get_cart_total(&self) -> Result<Option<Decimal>, ApiError>;

    /// `POST /cart/items/{product_id}`
    async fn add_item(&self, line: &NewCartLine) -> Result<(), ApiError>;

    /// `PUT /cart/items/{item_id}`
    async fn update_item(
        &self,
        item_id: &CartItemId,
        quantity: u8,
        measure: Option<&str>,
    ) -> Result<(), ApiError>;

    /// `DELETE /cart/items/{item_id}`
    async fn remove_item(&self, item_id: &CartItemId) -> Result<(), ApiError>;

    /// `DELETE /cart`
    async fn empty_cart(&self) -> Result<(), ApiError>;

    /// `POST /coupons/validate`
    async fn validate_coupon(&self, request: &CouponRequest) -> Result<CouponVerdict, ApiError>;

    /// `POST /payments/stripe-intent`; `None` when no client secret came back.
    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> Result<Option<PaymentIntent>, ApiError>;

    /// `POST /orders`, deduplicated by `idempotency_key` on the backend.
    async fn create_order(
        &self,
        order: &CheckoutOrder,
        idempotency_key: Uuid,
    ) -> Result<OrderReceipt, ApiError>;

    /// `GET /orders/track/{tracking_number}`, public.
    async fn track_order(&self, tracking_number: &str) -> Result<OrderTracking, ApiError>;
}

/// Classify a backend response and unwrap its payload.
///
/// - 401 → [`ApiError::Unauthorized`], 404 → [`ApiError::NotFound`]
/// - 400/409/422 → [`ApiError::Rejected`] with the body's `message` or `error`
/// - 429 → [`ApiError::RateLimited`] (defaults to 1 second)
/// - other non-2xx → [`ApiError::Server`]
/// - 2xx: a `{success, data, error}` envelope yields `data`, or `Rejected` when
///   `success` is false; any other body is the payload itself. An empty body
///   is `Value::Null`.
///
/// # Errors
///
/// Returns the classified error for non-success responses, refused
/// envelopes and unparseable success bodies.
pub fn classify_response(
    status: StatusCode,
    body: &str,
    retry_after: Option<u64>,
) -> Result<Value, ApiError> {
    if !status.is_success() {
        let reason = error_reason(body);
        return Err(match status.as_u16() {
            401 => ApiError::Unauthorized,
            404 => ApiError::NotFound(reason),
            400 | 409 | 422 => ApiError::Rejected(reason),
            429 => ApiError::RateLimited(retry_after.unwrap_or(1)),
            code => ApiError::Server {
                status: code,
                message: reason,
            },
        });
    }

    if body.trim().is_empty() {
        return Ok(Value::Null);
    }

    let value: Value = serde_json::from_str(body)?;
    match value {
        Value::Object(mut map) if matches!(map.get("success"), Some(Value::Bool(_))) => {
            if map.get("success") == Some(&Value::Bool(true)) {
                Ok(map.remove("data").unwrap_or(Value::Null))
            } else {
                Err(ApiError::Rejected(error_reason(body)))
            }
        }
        other => Ok(other),
    }
}

/// Extract a human-readable reason from an error body.
fn error_reason(body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|value| {
        ["message", "error"].iter().find_map(|key| {
            value
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string)
        })
    });

    from_json.unwrap_or_else(|| {
        let text = body.trim();
        if text.is_empty() {
            "unknown error".to_string()
        } else {
            text.chars().take(200).collect()
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn status(code: u16) -> StatusCode {
        StatusCode::from_u16(code).unwrap()
    }

    #[test]
    fn test_unwraps_success_envelope() {
        let body = r#"{"success": true, "data": {"total": 12.5}, "error": null}"#;
        let value = classify_response(status(200), body, None).unwrap();
        assert_eq!(value["total"], 12.5);
    }

    #[test]
    fn test_plain_body_is_payload() {
        let body = r#"{"items": []}"#;
        let value = classify_response(status(200), body, None).unwrap();
        assert!(value["items"].is_array());
    }

    #[test]
    fn test_empty_body_is_null() {
        assert_eq!(classify_response(status(204), "", None).unwrap(), Value::Null);
    }

    #[test]
    fn test_refused_envelope_is_rejected() {
        let body = r#"{"success": false, "data": null, "error": "Cupón no válido"}"#;
        let err = classify_response(status(200), body, None).unwrap_err();
        assert!(matches!(err, ApiError::Rejected(msg) if msg == "Cupón no válido"));
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_response(status(401), "{}", None),
            Err(ApiError::Unauthorized)
        ));
        assert!(matches!(
            classify_response(status(404), "", None),
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            classify_response(status(422), r#"{"message": "Stock insuficiente"}"#, None),
            Err(ApiError::Rejected(msg)) if msg == "Stock insuficiente"
        ));
        assert!(matches!(
            classify_response(status(429), "", Some(7)),
            Err(ApiError::RateLimited(7))
        ));
        assert!(matches!(
            classify_response(status(502), "bad gateway", None),
            Err(ApiError::Server { status: 502, message }) if message == "bad gateway"
        ));
    }

    #[test]
    fn test_error_reason_prefers_message_then_error() {
        assert_eq!(error_reason(r#"{"message": "a", "error": "b"}"#), "a");
        assert_eq!(error_reason(r#"{"error": "b"}"#), "b");
        assert_eq!(error_reason(""), "unknown error");
    }

    #[test]
    fn test_malformed_success_body_is_parse_error() {
        assert!(matches!(
            classify_response(status(200), "<html>", None),
            Err(ApiError::Parse(_))
        ));
    }
}
