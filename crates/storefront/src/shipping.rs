//! Distance and transport-fee calculation.
//!
//! The fee is a pure function of the cart's logistics class, the distance
//! from the store and the subtotal after discount:
//!
//! | Class | Within free radius | Beyond free radius | Distance unknown |
//! |---|---|---|---|
//! | heavy | flat heavy fee | flat heavy fee | flat heavy fee |
//! | medium | 0 | banded by subtotal | 0 (pending) |
//! | small | 0 | flat small fee | 0 (pending) |

use rust_decimal::Decimal;
use serde::Serialize;

use hearth_core::LogisticType;

use crate::cart::CartItem;
use crate::geo::{Coordinates, haversine_km};

/// One subtotal band of the medium-class fee schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeBand {
    /// Band applies while the subtotal is strictly below this bound;
    /// `None` is the open top band.
    pub below: Option<Decimal>,
    pub fee: Decimal,
}

/// Store location and fee schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct ShippingPolicy {
    pub store_location: Coordinates,
    /// Distance up to which non-heavy delivery is free, inclusive.
    pub free_radius_km: Decimal,
    pub heavy_fee: Decimal,
    pub small_fee: Decimal,
    /// Medium-class fees, ordered by ascending bound.
    pub medium_bands: Vec<FeeBand>,
}

impl Default for ShippingPolicy {
    fn default() -> Self {
        Self {
            store_location: Coordinates::new(37.4602, -3.922_74),
            free_radius_km: Decimal::from(20),
            heavy_fee: Decimal::from(50),
            small_fee: Decimal::from(10),
            medium_bands: vec![
                FeeBand {
                    below: Some(Decimal::from(200)),
                    fee: Decimal::from(30),
                },
                FeeBand {
                    below: Some(Decimal::from(500)),
                    fee: Decimal::from(20),
                },
                FeeBand {
                    below: None,
                    fee: Decimal::from(10),
                },
            ],
        }
    }
}

impl ShippingPolicy {
    /// Over-radius fee for a non-heavy class.
    #[must_use]
    pub fn over_radius_fee(&self, class: LogisticType, subtotal_after_discount: Decimal) -> Decimal {
        match class {
            LogisticType::Heavy => self.heavy_fee,
            LogisticType::Small => self.small_fee,
            LogisticType::Medium => self
                .medium_bands
                .iter()
                .find(|band| band.below.is_none_or(|bound| subtotal_after_discount < bound))
                .map_or(Decimal::ZERO, |band| band.fee),
        }
    }
}

/// Computed delivery quote.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ShippingQuote {
    /// `None` until the destination has been located.
    pub distance_km: Option<f64>,
    pub logistic_type: LogisticType,
    pub fee: Decimal,
}

impl ShippingQuote {
    /// Whether the fee may still change once a location is known.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.distance_km.is_none() && self.logistic_type != LogisticType::Heavy
    }
}

/// Most severe logistics class across the items; `small` for an empty cart.
#[must_use]
pub fn cart_logistic_type(items: &[CartItem]) -> LogisticType {
    items
        .iter()
        .map(|item| item.logistic_type)
        .max()
        .unwrap_or_default()
}

/// Compute the transport quote for a destination and cart.
#[must_use]
pub fn compute_shipping(
    policy: &ShippingPolicy,
    origin: Option<Coordinates>,
    items: &[CartItem],
    subtotal_after_discount: Decimal,
) -> ShippingQuote {
    let logistic_type = cart_logistic_type(items);
    let distance_km = origin.map(|point| haversine_km(point, policy.store_location));

    let fee = match (logistic_type, distance_km) {
        (LogisticType::Heavy, _) => policy.heavy_fee,
        (_, None) => Decimal::ZERO,
        (class, Some(distance)) => {
            if within_radius(distance, policy.free_radius_km) {
                Decimal::ZERO
            } else {
                policy.over_radius_fee(class, subtotal_after_discount)
            }
        }
    };

    ShippingQuote {
        distance_km,
        logistic_type,
        fee: fee.max(Decimal::ZERO),
    }
}

fn within_radius(distance_km: f64, radius_km: Decimal) -> bool {
    // Non-finite distances cannot be compared; treat them as beyond the radius.
    Decimal::from_f64_retain(distance_km).is_some_and(|d| d <= radius_km)
}
