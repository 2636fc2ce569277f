//! Cart model and state management.
//!
//! # Architecture
//!
//! - [`CartItem`] is the canonical line shape; backend drift is absorbed by
//!   `api::conversions` before it gets here.
//! - Guests keep their cart in a [`KeyValueStore`] under [`GUEST_CART_KEY`];
//!   authenticated carts live on the server and are fetched on demand.
//! - [`CartManager`] is the single owner of cart state and publishes every
//!   change as a [`CartSnapshot`].

mod manager;
mod store;

pub use manager::{AddItemRequest, CartManager, ProductSnapshot};
pub use store::{FileStore, GUEST_CART_KEY, KeyValueStore, MemoryStore, load_guest_items, save_guest_items};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use hearth_core::{CartItemId, LogisticType, ProductId, round_cents};

use crate::error::{Result, StoreError};

/// Maximum units of one product per cart line.
pub const MAX_LINE_QUANTITY: u8 = 5;

/// Maximum value of a guest cart.
pub const GUEST_CART_CEILING: Decimal = Decimal::ONE_THOUSAND;

/// Size variants with their fixed price adjustment.
pub const MEASURE_ADJUSTMENTS: &[(&str, i64)] = &[("90x190", -100), ("135x190", 0), ("150x190", 80)];

/// A line of the cart.
///
/// Persisted guest lines use the backend's field names so a stored cart can
/// be replayed as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: CartItemId,
    #[serde(rename = "product_id")]
    pub product_ref: ProductId,
    pub name: String,
    /// Effective price: promotional if present, measure adjustment applied.
    #[serde(rename = "price")]
    pub unit_price: Decimal,
    pub quantity: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measure: Option<String>,
    #[serde(default)]
    pub logistic_type: LogisticType,
}

impl CartItem {
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Where the cart lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CartOrigin {
    #[default]
    Guest,
    Authenticated,
}

/// Published state of the cart.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CartSnapshot {
    pub items: Vec<CartItem>,
    /// Server total when reported, otherwise the sum of line totals.
    pub total: Decimal,
    pub origin: CartOrigin,
    /// Reason of the last failed fetch, for display.
    pub error: Option<String>,
}

impl CartSnapshot {
    /// An empty cart of the given origin.
    #[must_use]
    pub fn empty(origin: CartOrigin) -> Self {
        Self {
            origin,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of distinct lines.
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.items.len()
    }

    /// Total number of units across lines.
    #[must_use]
    pub fn unit_count(&self) -> u32 {
        self.items.iter().map(|item| u32::from(item.quantity)).sum()
    }

    /// Sum of line totals, recomputed from the items.
    #[must_use]
    pub fn subtotal(&self) -> Decimal {
        subtotal(&self.items)
    }

    /// Distinct products in the cart, in line order.
    #[must_use]
    pub fn product_refs(&self) -> Vec<ProductId> {
        let mut refs: Vec<ProductId> = Vec::with_capacity(self.items.len());
        for item in &self.items {
            if !refs.contains(&item.product_ref) {
                refs.push(item.product_ref);
            }
        }
        refs
    }

    #[must_use]
    pub fn find(&self, id: &CartItemId) -> Option<&CartItem> {
        self.items.iter().find(|item| &item.id == id)
    }
}

/// Sum of line totals, rounded to cents.
#[must_use]
pub fn subtotal(items: &[CartItem]) -> Decimal {
    round_cents(items.iter().map(CartItem::line_total).sum())
}

/// Clamp a requested quantity into `1..=MAX_LINE_QUANTITY`.
#[must_use]
pub fn clamp_quantity(quantity: i64) -> u8 {
    // The clamp keeps the value inside u8 range.
    u8::try_from(quantity.clamp(1, i64::from(MAX_LINE_QUANTITY))).unwrap_or(MAX_LINE_QUANTITY)
}

/// Price adjustment of a known measure.
#[must_use]
pub fn measure_adjustment(measure: &str) -> Option<Decimal> {
    MEASURE_ADJUSTMENTS
        .iter()
        .find(|(name, _)| *name == measure)
        .map(|(_, delta)| Decimal::from(*delta))
}

/// Effective unit price of a product in a given measure, floored at zero.
///
/// # Errors
///
/// Returns `StoreError::Validation` for an unknown measure.
pub fn effective_unit_price(
    price: Decimal,
    promo_price: Option<Decimal>,
    measure: Option<&str>,
) -> Result<Decimal> {
    let base = promo_price.filter(|p| *p > Decimal::ZERO).unwrap_or(price);
    let adjustment = match measure {
        None => Decimal::ZERO,
        Some(m) => measure_adjustment(m)
            .ok_or_else(|| StoreError::Validation(format!("Unknown measure '{m}'")))?,
    };
    Ok((base + adjustment).max(Decimal::ZERO))
}
