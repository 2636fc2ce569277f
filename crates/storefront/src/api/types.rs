//! Wire types exchanged with the REST backend.
//!
//! The backend's JSON has drifted across releases: ids and amounts arrive as
//! numbers or strings, prices live on the line or on a nested `product`, and
//! the product reference is `product_id` or `product.id`. The `Wire*` types
//! accept all of these; `conversions` turns them into canonical types.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use hearth_core::{DiscountType, Email, OrderId, ProductId, UserId};

// =============================================================================
// Requests
// =============================================================================

/// A line to add to the server cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCartLine {
    pub product_id: ProductId,
    pub quantity: u8,
    pub measure: Option<String>,
}

/// Body of `POST /cart/items/{product_id}` and `PUT /cart/items/{id}`.
#[derive(Debug, Serialize)]
pub(crate) struct CartLineBody<'a> {
    pub quantity: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measure: Option<&'a str>,
}

/// Body of `POST /coupons/validate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CouponRequest {
    pub code: String,
    pub email: Option<Email>,
    #[serde(with = "rust_decimal::serde::float")]
    pub cart_total: Decimal,
    pub cart_products: Vec<ProductId>,
}

/// Body of `POST /payments/stripe-intent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentIntentRequest {
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    /// Method name understood by the payment backend (`card`, `sofort`).
    pub payment_method: String,
    pub user_id: UserId,
}

// =============================================================================
// Canonical responses
// =============================================================================

/// The backend's answer to a coupon validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CouponVerdict {
    pub valid: bool,
    pub kind: Option<DiscountType>,
    pub discount: Decimal,
    pub message: Option<String>,
}

/// Handle of an authorized but unconfirmed charge.
#[derive(Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub client_secret: String,
}

impl std::fmt::Debug for PaymentIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentIntent")
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

/// Acknowledgement of a created order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OrderReceipt {
    #[serde(alias = "order_code")]
    pub tracking_number: String,
    #[serde(default, alias = "id", deserialize_with = "lenient_i64")]
    pub order_id: Option<i64>,
}

impl OrderReceipt {
    /// Backend id of the order, when reported.
    #[must_use]
    pub fn order_id(&self) -> Option<OrderId> {
        self.order_id.map(OrderId::new)
    }
}

// =============================================================================
// Wire responses
// =============================================================================

/// `GET /cart` payload: either `{items: [...]}` or a bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum WireCart {
    Wrapped {
        #[serde(default)]
        items: Vec<WireCartItem>,
    },
    Bare(Vec<WireCartItem>),
}

impl WireCart {
    #[must_use]
    pub fn into_items(self) -> Vec<WireCartItem> {
        match self {
            Self::Wrapped { items } | Self::Bare(items) => items,
        }
    }
}

/// A cart line as the backend sends it.
#[derive(Debug, Default, Deserialize)]
pub struct WireCartItem {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub product_id: Option<i64>,
    #[serde(default, alias = "product_name")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub price: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub promo_price: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub quantity: Option<i64>,
    #[serde(default)]
    pub measure: Option<String>,
    #[serde(default)]
    pub logistic_type: Option<String>,
    #[serde(default)]
    pub product: Option<WireProduct>,
}

/// Product fields nested inside a cart line.
#[derive(Debug, Default, Deserialize)]
pub struct WireProduct {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub price: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub promo_price: Option<Decimal>,
    #[serde(default)]
    pub logistic_type: Option<String>,
}

/// `GET /cart/total` payload.
#[derive(Debug, Deserialize)]
pub struct WireCartTotal {
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub total: Option<Decimal>,
}

/// `POST /coupons/validate` payload.
#[derive(Debug, Deserialize)]
pub struct WireCouponVerdict {
    #[serde(default)]
    pub valid: bool,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub discount: Option<Decimal>,
    #[serde(default)]
    pub message: Option<String>,
}

/// `POST /payments/stripe-intent` payload.
#[derive(Debug, Deserialize)]
pub struct WirePaymentIntent {
    #[serde(default, rename = "clientSecret", alias = "client_secret")]
    pub client_secret: Option<String>,
}

// =============================================================================
// Lenient field decoders
// =============================================================================

fn lenient_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(decimal_from_value))
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    })
}

/// Read a decimal from a JSON number or numeric string.
pub(crate) fn decimal_from_value(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().replace(',', "."),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}
