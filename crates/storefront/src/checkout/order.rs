//! Checkout form, totals and the order submission payload.

use rust_decimal::Decimal;
use serde::Serialize;

use hearth_core::{DeliveryType, PaymentMethod, ProductId, round_cents};

use crate::cart::CartItem;
use crate::error::{Result, StoreError};

/// Country sent when the form leaves it blank.
pub const DEFAULT_COUNTRY: &str = "ES";

/// Customer input collected at address entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CheckoutForm {
    pub delivery: DeliveryType,
    /// `None` picks the first eligible method.
    pub payment_method: Option<PaymentMethod>,
    pub line1: String,
    pub line2: Option<String>,
    pub city: Option<String>,
    pub zipcode: Option<String>,
    pub country: Option<String>,
    pub mobile1: String,
    pub mobile2: Option<String>,
    pub additional_info: Option<String>,
}

impl CheckoutForm {
    /// Country for eligibility and the payload.
    #[must_use]
    pub fn country(&self) -> &str {
        self.country
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_COUNTRY)
    }

    /// Check required fields.
    ///
    /// # Errors
    ///
    /// Returns `Validation` when home delivery has no address line, or no
    /// contact number is given.
    pub fn validate(&self) -> Result<()> {
        if self.delivery == DeliveryType::HomeDelivery && self.line1.trim().is_empty() {
            return Err(StoreError::Validation(
                "Please enter your full delivery address".to_string(),
            ));
        }
        if self.mobile1.trim().is_empty() {
            return Err(StoreError::Validation(
                "Please enter at least one phone number".to_string(),
            ));
        }
        Ok(())
    }
}

/// Money snapshot of a checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub transport_fee: Decimal,
    pub total: Decimal,
}

impl Totals {
    /// `total = max(subtotal - discount, 0) + fee`, so a discount never eats
    /// into the fee.
    #[must_use]
    pub fn compute(subtotal: Decimal, discount: Decimal, transport_fee: Decimal) -> Self {
        let subtotal = round_cents(subtotal);
        let discount = round_cents(discount.max(Decimal::ZERO));
        let transport_fee = round_cents(transport_fee.max(Decimal::ZERO));
        Self {
            subtotal,
            discount,
            transport_fee,
            total: discounted_subtotal(subtotal, discount) + transport_fee,
        }
    }
}

/// Subtotal after discount, floored at zero.
#[must_use]
pub fn discounted_subtotal(subtotal: Decimal, discount: Decimal) -> Decimal {
    (subtotal - discount).max(Decimal::ZERO)
}

/// Price snapshot of one ordered line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: u8,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
}

/// Body of `POST /orders`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutOrder {
    pub payment_method: PaymentMethod,
    pub promo_code: Option<String>,
    pub line1: String,
    pub line2: Option<String>,
    pub city: Option<String>,
    pub zipcode: Option<String>,
    pub country: String,
    pub mobile1: String,
    pub mobile2: Option<String>,
    #[serde(rename = "type")]
    pub delivery: DeliveryType,
    pub address_type: String,
    pub additional_info: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub subtotal: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub discount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub transport_fee: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total: Decimal,
    pub items: Vec<OrderLine>,
    pub payment_intent: Option<String>,
}

impl CheckoutOrder {
    /// Assemble the payload from a validated form and a totals snapshot.
    #[must_use]
    pub fn build(
        form: &CheckoutForm,
        method: PaymentMethod,
        items: &[CartItem],
        totals: Totals,
        promo_code: Option<String>,
        payment_intent: Option<String>,
    ) -> Self {
        Self {
            payment_method: method,
            promo_code,
            line1: form.line1.trim().to_string(),
            line2: non_empty(form.line2.as_deref()),
            city: non_empty(form.city.as_deref()),
            zipcode: non_empty(form.zipcode.as_deref()),
            country: form.country().to_string(),
            mobile1: form.mobile1.trim().to_string(),
            mobile2: non_empty(form.mobile2.as_deref()),
            delivery: form.delivery,
            address_type: "default".to_string(),
            additional_info: form
                .additional_info
                .as_deref()
                .map(str::trim)
                .unwrap_or_default()
                .to_string(),
            subtotal: totals.subtotal,
            discount: totals.discount,
            transport_fee: totals.transport_fee,
            total: totals.total,
            items: items
                .iter()
                .map(|item| OrderLine {
                    product_id: item.product_ref,
                    quantity: item.quantity,
                    price: item.unit_price,
                })
                .collect(),
            payment_intent,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use hearth_core::{CartItemId, LogisticType};

    use super::*;

    fn form() -> CheckoutForm {
        CheckoutForm {
            line1: "Avenida Andalucía 8".to_string(),
            city: Some("Alcalá la Real".to_string()),
            zipcode: Some("23680".to_string()),
            mobile1: "600111222".to_string(),
            mobile2: Some("  ".to_string()),
            ..CheckoutForm::default()
        }
    }

    #[test]
    fn test_total_invariant() {
        let cases = [
            (150, 15, 10),
            (50, 80, 30),
            (0, 0, 50),
            (100, 100, 0),
            (999, 0, 0),
        ];
        for (subtotal, discount, fee) in cases {
            let totals = Totals::compute(
                Decimal::from(subtotal),
                Decimal::from(discount),
                Decimal::from(fee),
            );
            let expected =
                (Decimal::from(subtotal) - Decimal::from(discount)).max(Decimal::ZERO)
                    + Decimal::from(fee);
            assert_eq!(totals.total, expected);
            assert!(totals.total >= totals.transport_fee);
        }
    }

    #[test]
    fn test_validate_requires_address_for_home_delivery() {
        let mut home = form();
        home.line1 = "  ".to_string();
        assert!(matches!(home.validate(), Err(StoreError::Validation(_))));

        let pickup = CheckoutForm {
            delivery: DeliveryType::StorePickup,
            line1: String::new(),
            ..form()
        };
        assert!(pickup.validate().is_ok());
    }

    #[test]
    fn test_validate_requires_phone() {
        let pickup = CheckoutForm {
            delivery: DeliveryType::StorePickup,
            mobile1: String::new(),
            ..form()
        };
        assert!(matches!(pickup.validate(), Err(StoreError::Validation(_))));
    }

    #[test]
    fn test_payload_shape() {
        let items = [CartItem {
            id: CartItemId::from(5),
            product_ref: ProductId::new(42),
            name: "Colchón".to_string(),
            unit_price: Decimal::new(29_900, 2),
            quantity: 1,
            measure: Some("135x190".to_string()),
            logistic_type: LogisticType::Heavy,
        }];
        let totals = Totals::compute(Decimal::new(29_900, 2), Decimal::new(2_990, 2), Decimal::from(50));
        let order = CheckoutOrder::build(
            &form(),
            PaymentMethod::Card,
            &items,
            totals,
            Some("SAVE10".to_string()),
            Some("pi_123".to_string()),
        );

        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["type"], "domicilio");
        assert_eq!(json["payment_method"], "card");
        assert_eq!(json["country"], "ES");
        assert_eq!(json["address_type"], "default");
        assert_eq!(json["mobile2"], serde_json::Value::Null);
        assert_eq!(json["total"], 319.1);
        assert_eq!(json["items"][0]["product_id"], 42);
        assert_eq!(json["items"][0]["price"], 299.0);
        assert_eq!(json["payment_intent"], "pi_123");
    }
}
