//! Conversion from wire DTOs to canonical engine types.

use rust_decimal::Decimal;
use tracing::warn;

use hearth_core::{CartItemId, DiscountType, LogisticType, ProductId};

use super::types::{WireCartItem, WireCouponVerdict, WirePaymentIntent};
use super::{CouponVerdict, PaymentIntent};
use crate::cart::{CartItem, clamp_quantity};

/// Convert backend cart lines, dropping lines without a product reference.
#[must_use]
pub fn convert_cart_items(items: Vec<WireCartItem>) -> Vec<CartItem> {
    items.into_iter().filter_map(convert_cart_item).collect()
}

/// Convert one backend cart line into a [`CartItem`].
///
/// Returns `None` when no product reference can be found.
#[must_use]
pub fn convert_cart_item(item: WireCartItem) -> Option<CartItem> {
    let product = item.product.unwrap_or_default();

    let Some(product_id) = item.product_id.or(product.id) else {
        warn!(line_id = ?item.id, "Dropping cart line without product reference");
        return None;
    };
    let product_ref = ProductId::new(product_id);

    let id = item
        .id
        .map_or_else(|| CartItemId::from(product_id), CartItemId::new);

    // Line-level prices are the server's snapshot and win over catalog prices.
    let unit_price = effective_price(item.promo_price, item.price)
        .or_else(|| effective_price(product.promo_price, product.price))
        .unwrap_or_else(|| {
            warn!(product_id, "Cart line has no price, using 0");
            Decimal::ZERO
        })
        .max(Decimal::ZERO);

    let logistic_type = item
        .logistic_type
        .or(product.logistic_type)
        .and_then(|raw| {
            raw.parse::<LogisticType>()
                .inspect_err(|e| warn!(product_id, error = %e, "Unknown logistic type"))
                .ok()
        })
        .unwrap_or_else(|| {
            warn!(product_id, "Cart line has no logistic type, assuming small");
            LogisticType::Small
        });

    let name = item
        .name
        .or(product.name)
        .unwrap_or_else(|| format!("Product {product_id}"));

    Some(CartItem {
        id,
        product_ref,
        name,
        unit_price,
        quantity: clamp_quantity(item.quantity.unwrap_or(1)),
        measure: item.measure.filter(|m| !m.trim().is_empty()),
        logistic_type,
    })
}

/// Promotional price when set and positive, otherwise the base price.
fn effective_price(promo: Option<Decimal>, base: Option<Decimal>) -> Option<Decimal> {
    promo.filter(|p| *p > Decimal::ZERO).or(base)
}

/// Convert a coupon validation payload.
///
/// Any type other than `percent` is treated as a flat amount.
#[must_use]
pub fn convert_coupon_verdict(wire: WireCouponVerdict) -> CouponVerdict {
    let kind = wire.kind.map(|raw| {
        if raw.eq_ignore_ascii_case("percent") {
            DiscountType::Percent
        } else {
            DiscountType::Fixed
        }
    });

    CouponVerdict {
        valid: wire.valid,
        kind,
        discount: wire.discount.unwrap_or(Decimal::ZERO).max(Decimal::ZERO),
        message: wire.message.filter(|m| !m.trim().is_empty()),
    }
}

/// Convert a payment intent payload; `None` when the secret is missing.
#[must_use]
pub fn convert_payment_intent(wire: WirePaymentIntent) -> Option<PaymentIntent> {
    wire.client_secret
        .filter(|s| !s.trim().is_empty())
        .map(|client_secret| PaymentIntent { client_secret })
}
