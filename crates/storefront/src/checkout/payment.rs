//! Payment method eligibility and the external confirmation step.

use rust_decimal::Decimal;

use hearth_core::{DeliveryType, PaymentMethod};

use crate::api::PaymentIntent;

/// Payment methods offered for a delivery, most preferred first.
///
/// | Delivery | Country | Located | Methods |
/// |---|---|---|---|
/// | store pickup | any | any | cash, card, bizum |
/// | home | Spain | yes | card, bizum |
/// | home | Spain | no | card |
/// | home | elsewhere | any | card |
///
/// Cash on delivery is never offered for home delivery. Bizum only works for
/// Spanish accounts, and is held back until the address has been located.
#[must_use]
pub fn eligible_payment_methods(
    delivery: DeliveryType,
    country: &str,
    has_location: bool,
) -> Vec<PaymentMethod> {
    match delivery {
        DeliveryType::StorePickup => {
            vec![PaymentMethod::Cash, PaymentMethod::Card, PaymentMethod::Bizum]
        }
        DeliveryType::HomeDelivery if is_spain(country) && has_location => {
            vec![PaymentMethod::Card, PaymentMethod::Bizum]
        }
        DeliveryType::HomeDelivery => vec![PaymentMethod::Card],
    }
}

/// Whether a country field names Spain, by ISO code or name.
#[must_use]
pub fn is_spain(country: &str) -> bool {
    matches!(
        country.trim().to_lowercase().as_str(),
        "es" | "esp" | "spain" | "españa" | "espana"
    )
}

/// Result of the external payment step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// The charge succeeded; carries the provider's payment intent id.
    Confirmed { payment_intent: String },
    /// The provider declined or errored.
    Failed { reason: String },
    /// The customer abandoned the payment.
    Cancelled,
}

/// The external payment collaborator (card form, Bizum redirect, ...).
pub trait PaymentConfirmer: Send + Sync {
    /// Ask the customer to confirm a charge for `intent`.
    async fn confirm(
        &self,
        intent: &PaymentIntent,
        method: PaymentMethod,
        amount: Decimal,
    ) -> PaymentOutcome;
}
