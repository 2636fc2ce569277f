//! Domain enums shared by cart, shipping and checkout.
//!
//! Serde names follow the backend's wire values, which is why some variants
//! serialize to Spanish words.

use serde::{Deserialize, Serialize};

/// Shipping-handling tier of a product.
///
/// Variants are ordered by severity so the class of a whole cart is the
/// maximum over its lines.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum LogisticType {
    #[default]
    Small,
    Medium,
    Heavy,
}

impl std::fmt::Display for LogisticType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Small => write!(f, "small"),
            Self::Medium => write!(f, "medium"),
            Self::Heavy => write!(f, "heavy"),
        }
    }
}

impl std::str::FromStr for LogisticType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "small" => Ok(Self::Small),
            "medium" => Ok(Self::Medium),
            "heavy" => Ok(Self::Heavy),
            _ => Err(format!("invalid logistic type: {s}")),
        }
    }
}

/// How the order reaches the customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DeliveryType {
    /// Delivered to the customer's address.
    #[default]
    #[serde(rename = "domicilio")]
    HomeDelivery,
    /// Collected at the store.
    #[serde(rename = "local")]
    StorePickup,
}

impl std::fmt::Display for DeliveryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HomeDelivery => write!(f, "domicilio"),
            Self::StorePickup => write!(f, "local"),
        }
    }
}

impl std::str::FromStr for DeliveryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "domicilio" | "home" => Ok(Self::HomeDelivery),
            "local" | "pickup" => Ok(Self::StorePickup),
            _ => Err(format!("invalid delivery type: {s}")),
        }
    }
}

/// Payment method offered at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Card payment confirmed by the external payment provider.
    Card,
    /// Bizum instant transfer, also confirmed by the payment provider.
    Bizum,
    /// Paid in cash on pickup or delivery.
    Cash,
}

impl PaymentMethod {
    /// Whether the method needs an external confirmation before the order
    /// can be submitted.
    #[must_use]
    pub const fn requires_confirmation(&self) -> bool {
        matches!(self, Self::Card | Self::Bizum)
    }

    /// Method name understood by the payment-intent endpoint.
    #[must_use]
    pub const fn intent_method(&self) -> &'static str {
        match self {
            Self::Card => "card",
            Self::Bizum => "sofort",
            Self::Cash => "cash",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Card => write!(f, "card"),
            Self::Bizum => write!(f, "bizum"),
            Self::Cash => write!(f, "cash"),
        }
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "card" => Ok(Self::Card),
            "bizum" => Ok(Self::Bizum),
            "cash" => Ok(Self::Cash),
            _ => Err(format!("invalid payment method: {s}")),
        }
    }
}

/// How a coupon discount is expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    /// Percentage of the subtotal.
    Percent,
    /// Flat amount.
    Fixed,
}

/// Order fulfillment status as reported by order tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderStatus {
    #[default]
    #[serde(rename = "pendiente", alias = "pending")]
    Pending,
    #[serde(rename = "procesando", alias = "processing")]
    Processing,
    #[serde(rename = "enviado", alias = "shipped")]
    Shipped,
    #[serde(rename = "en_ruta", alias = "in_transit")]
    InTransit,
    #[serde(rename = "entregado", alias = "delivered")]
    Delivered,
    #[serde(rename = "cancelado", alias = "cancelled")]
    Cancelled,
}

impl OrderStatus {
    /// Whether no further status changes are expected.
    #[must_use]
    pub const fn is_final(&self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Shipped => write!(f, "shipped"),
            Self::InTransit => write!(f, "in transit"),
            Self::Delivered => write!(f, "delivered"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}
