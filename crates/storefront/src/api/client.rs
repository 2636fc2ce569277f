//! `reqwest` implementation of [`StoreApi`].

use std::sync::Arc;

use reqwest::{Method, RequestBuilder};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;
use uuid::Uuid;

use hearth_core::CartItemId;

use super::conversions::{convert_cart_items, convert_coupon_verdict, convert_payment_intent};
use super::types::{
    CartLineBody, CouponRequest, CouponVerdict, NewCartLine, OrderReceipt, PaymentIntent,
    PaymentIntentRequest, WireCart, WireCartTotal, WireCouponVerdict, WirePaymentIntent,
};
use super::{ApiError, StoreApi, classify_response};
use crate::cart::CartItem;
use crate::checkout::CheckoutOrder;
use crate::config::{ApiConfig, SessionConfig};
use crate::orders::OrderTracking;

const USER_AGENT: &str = concat!("hearth-storefront/", env!("CARGO_PKG_VERSION"));

// =============================================================================
// ApiClient
// =============================================================================

/// Client for the storefront REST backend.
///
/// Cheap to clone; clones share the connection pool. Every request is bounded
/// by the configured timeout.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ApiClientInner>,
}

struct ApiClientInner {
    client: reqwest::Client,
    base_url: Url,
    session: Option<SessionConfig>,
}

impl ApiClient {
    /// Create a new client, optionally bound to a customer session.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built (TLS backend
    /// initialisation).
    pub fn new(config: &ApiConfig, session: Option<SessionConfig>) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            inner: Arc::new(ApiClientInner {
                client,
                base_url: config.base_url.clone(),
                session,
            }),
        })
    }

    /// Whether requests carry a customer session.
    #[must_use]
    pub fn has_session(&self) -> bool {
        self.inner.session.is_some()
    }

    /// Build an endpoint URL by appending path segments to the base URL.
    ///
    /// Segments are percent-encoded, so user input is safe to pass.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.inner.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Start a request that requires the customer session.
    fn authorized(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, ApiError> {
        let session = self.inner.session.as_ref().ok_or(ApiError::Unauthorized)?;
        Ok(self
            .inner
            .client
            .request(method, self.endpoint(segments))
            .header("Authorization", session.bearer()))
    }

    /// Start a request on a public route.
    fn public(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        self.inner.client.request(method, self.endpoint(segments))
    }

    /// Send a request and classify the response.
    async fn execute(&self, request: RequestBuilder) -> Result<Value, ApiError> {
        let response = request.header("Accept", "application/json").send().await?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());

        // Get response body as text first for better error diagnostics
        let response_text = response.text().await?;

        if !status.is_success() && status != reqwest::StatusCode::UNAUTHORIZED {
            tracing::error!(
                status = %status,
                body = %response_text.chars().take(500).collect::<String>(),
                "Store API returned non-success status"
            );
        }

        classify_response(status, &response_text, retry_after)
    }

    /// Send a request and decode the unwrapped payload.
    async fn execute_as<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let data = self.execute(request).await?;
        serde_json::from_value(data.clone()).map_err(|e| {
            tracing::error!(
                error = %e,
                body = %data.to_string().chars().take(500).collect::<String>(),
                "Failed to decode Store API response"
            );
            ApiError::Parse(e)
        })
    }
}

impl StoreApi for ApiClient {
    #[instrument(skip(self))]
    async fn get_cart(&self) -> Result<Vec<CartItem>, ApiError> {
        let request = self.authorized(Method::GET, &["cart"])?;
        let cart: WireCart = self.execute_as(request).await?;
        let items = convert_cart_items(cart.into_items());
        debug!(lines = items.len(), "Fetched cart");
        Ok(items)
    }

    #[instrument(skip(self))]
    async fn get_cart_total(&self) -> Result<Option<Decimal>, ApiError> {
        let request = self.authorized(Method::GET, &["cart", "total"])?;
        let total: WireCartTotal = self.execute_as(request).await?;
        Ok(total.total)
    }

    #[instrument(skip(self, line), fields(product_id = %line.product_id, quantity = line.quantity))]
    async fn add_item(&self, line: &NewCartLine) -> Result<(), ApiError> {
        let product_id = line.product_id.to_string();
        let request = self
            .authorized(Method::POST, &["cart", "items", &product_id])?
            .json(&CartLineBody {
                quantity: line.quantity,
                measure: line.measure.as_deref(),
            });
        self.execute(request).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(item_id = %item_id))]
    async fn update_item(
        &self,
        item_id: &CartItemId,
        quantity: u8,
        measure: Option<&str>,
    ) -> Result<(), ApiError> {
        let request = self
            .authorized(Method::PUT, &["cart", "items", item_id.as_str()])?
            .json(&CartLineBody { quantity, measure });
        self.execute(request).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(item_id = %item_id))]
    async fn remove_item(&self, item_id: &CartItemId) -> Result<(), ApiError> {
        let request = self.authorized(Method::DELETE, &["cart", "items", item_id.as_str()])?;
        self.execute(request).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn empty_cart(&self) -> Result<(), ApiError> {
        let request = self.authorized(Method::DELETE, &["cart"])?;
        self.execute(request).await?;
        Ok(())
    }

    #[instrument(skip(self, request), fields(code = %request.code))]
    async fn validate_coupon(&self, request: &CouponRequest) -> Result<CouponVerdict, ApiError> {
        let builder = self
            .authorized(Method::POST, &["coupons", "validate"])?
            .json(request);
        let wire: WireCouponVerdict = self.execute_as(builder).await?;
        Ok(convert_coupon_verdict(wire))
    }

    #[instrument(skip(self, request), fields(amount = %request.amount, method = %request.payment_method))]
    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> Result<Option<PaymentIntent>, ApiError> {
        let builder = self
            .authorized(Method::POST, &["payments", "stripe-intent"])?
            .json(request);
        let wire: WirePaymentIntent = self.execute_as(builder).await?;
        Ok(convert_payment_intent(wire))
    }

    #[instrument(skip(self, order), fields(total = %order.total, idempotency_key = %idempotency_key))]
    async fn create_order(
        &self,
        order: &CheckoutOrder,
        idempotency_key: Uuid,
    ) -> Result<OrderReceipt, ApiError> {
        let builder = self
            .authorized(Method::POST, &["orders"])?
            .header("Idempotency-Key", idempotency_key.to_string())
            .json(order);
        self.execute_as(builder).await
    }

    #[instrument(skip(self))]
    async fn track_order(&self, tracking_number: &str) -> Result<OrderTracking, ApiError> {
        let request = self.public(Method::GET, &["orders", "track", tracking_number]);
        self.execute_as(request).await
    }
}
