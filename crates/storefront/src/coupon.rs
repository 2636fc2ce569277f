//! Coupon validation and discount state.
//!
//! Validity (expiry, usage caps, product eligibility) is the backend's call.
//! The resolver derives the amount and enforces the minimum-subtotal gate on
//! its own, even for coupons the backend accepted. The backend must enforce
//! the same gate.

use std::sync::{Mutex, MutexGuard, PoisonError};

use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use hearth_core::{DiscountType, Email, Price, ProductId, round_cents};

use crate::api::{CouponRequest, StoreApi};
use crate::error::{Result, StoreError, add_breadcrumb};

/// A discount only applies to subtotals strictly above this amount.
pub const COUPON_MIN_SUBTOTAL: Decimal = Decimal::from_parts(99, 0, 0, false, 0);

/// The applied discount, if any.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiscountState {
    /// Amount computed against the subtotal at application time.
    pub amount: Decimal,
    pub kind: Option<DiscountType>,
    /// Percentage or flat value as granted by the backend.
    pub value: Decimal,
    pub code: Option<String>,
}

impl DiscountState {
    #[must_use]
    pub fn is_applied(&self) -> bool {
        self.kind.is_some()
    }

    /// Discount for a given subtotal: percentages follow the subtotal, flat
    /// amounts do not. Zero when the subtotal does not pass the gate.
    #[must_use]
    pub fn amount_for(&self, subtotal: Decimal) -> Decimal {
        if !passes_gate(subtotal) {
            return Decimal::ZERO;
        }
        self.kind
            .map_or(Decimal::ZERO, |kind| discount_amount(kind, self.value, subtotal))
    }
}

/// Amount granted by a coupon of `kind` worth `value` on `subtotal`.
#[must_use]
pub fn discount_amount(kind: DiscountType, value: Decimal, subtotal: Decimal) -> Decimal {
    let amount = match kind {
        DiscountType::Percent => subtotal * value / Decimal::ONE_HUNDRED,
        DiscountType::Fixed => value,
    };
    round_cents(amount.max(Decimal::ZERO))
}

fn passes_gate(subtotal: Decimal) -> bool {
    subtotal > COUPON_MIN_SUBTOTAL
}

fn gate_error() -> StoreError {
    StoreError::Validation(format!(
        "Coupons apply to orders over {}",
        Price::eur(COUPON_MIN_SUBTOTAL)
    ))
}

#[derive(Debug, Default)]
struct CouponState {
    discount: DiscountState,
    locked: bool,
    in_flight: bool,
}

/// Applies coupon codes through the backend and holds the resulting discount.
pub struct CouponResolver<A> {
    api: A,
    state: Mutex<CouponState>,
}

/// Clears the in-flight flag when a validation finishes or is dropped.
struct InFlight<'a> {
    state: &'a Mutex<CouponState>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_flight = false;
    }
}

impl<A: StoreApi> CouponResolver<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            state: Mutex::new(CouponState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, CouponState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The current discount.
    #[must_use]
    pub fn current(&self) -> DiscountState {
        self.state().discount.clone()
    }

    /// Whether a coupon is applied and further codes are blocked.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.state().locked
    }

    /// Validate `code` and apply its discount.
    ///
    /// # Errors
    ///
    /// - `Validation` for an empty code (no network call), when a coupon is
    ///   already applied or being validated, or when `subtotal` does not
    ///   exceed €99.00 (the discount is zeroed)
    /// - `BackendRejected` when the backend declares the code invalid
    /// - `Unauthorized` / `Network` from the backend call
    ///
    /// On any error other than the gate, the previous discount is kept.
    #[instrument(skip(self, product_refs, email), fields(subtotal = %subtotal))]
    pub async fn apply(
        &self,
        code: &str,
        subtotal: Decimal,
        product_refs: &[ProductId],
        email: Option<&Email>,
    ) -> Result<DiscountState> {
        let code = code.trim();
        if code.is_empty() {
            return Err(StoreError::Validation("Enter a coupon code".to_string()));
        }

        let _in_flight = {
            let mut state = self.state();
            if state.locked {
                return Err(StoreError::Validation(format!(
                    "Coupon {} is already applied",
                    state.discount.code.as_deref().unwrap_or_default()
                )));
            }
            if state.in_flight {
                return Err(StoreError::Validation(
                    "A coupon is already being checked".to_string(),
                ));
            }
            state.in_flight = true;
            InFlight { state: &self.state }
        };

        let request = CouponRequest {
            code: code.to_string(),
            email: email.cloned(),
            cart_total: subtotal,
            cart_products: product_refs.to_vec(),
        };
        let verdict = self
            .api
            .validate_coupon(&request)
            .await
            .map_err(StoreError::from)?;

        if !verdict.valid {
            return Err(StoreError::BackendRejected(
                verdict
                    .message
                    .unwrap_or_else(|| format!("Coupon {code} is not valid")),
            ));
        }

        let kind = verdict.kind.unwrap_or(DiscountType::Fixed);
        let mut state = self.state();

        if !passes_gate(subtotal) {
            warn!(code, "Coupon accepted by backend but subtotal is below the minimum");
            state.discount = DiscountState::default();
            return Err(gate_error());
        }

        state.discount = DiscountState {
            amount: discount_amount(kind, verdict.discount, subtotal),
            kind: Some(kind),
            value: verdict.discount,
            code: Some(code.to_string()),
        };
        state.locked = true;
        info!(code, amount = %state.discount.amount, "Coupon applied");
        add_breadcrumb("checkout", "Applied coupon", Some(&[("code", code)]));

        Ok(state.discount.clone())
    }

    /// Re-check the gate against a changed subtotal.
    ///
    /// # Errors
    ///
    /// Returns `Validation` and drops the discount when an applied coupon no
    /// longer passes the gate.
    pub fn enforce_minimum(&self, subtotal: Decimal) -> Result<()> {
        let mut state = self.state();
        if state.discount.is_applied() && !passes_gate(subtotal) {
            warn!(subtotal = %subtotal, "Subtotal fell below the coupon minimum, dropping discount");
            state.discount = DiscountState::default();
            state.locked = false;
            return Err(gate_error());
        }
        Ok(())
    }

    /// Drop the discount and unlock coupon entry.
    pub fn reset(&self) {
        let mut state = self.state();
        state.discount = DiscountState::default();
        state.locked = false;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_discount_amount() {
        let subtotal = Decimal::new(15_050, 2);
        assert_eq!(
            discount_amount(DiscountType::Percent, Decimal::from(10), subtotal),
            Decimal::new(1505, 2)
        );
        assert_eq!(
            discount_amount(DiscountType::Fixed, Decimal::from(25), subtotal),
            Decimal::from(25)
        );
        assert_eq!(
            discount_amount(DiscountType::Fixed, Decimal::from(-5), subtotal),
            Decimal::ZERO
        );
    }

    #[test]
    fn test_gate_is_strict() {
        assert!(!passes_gate(Decimal::from(99)));
        assert!(!passes_gate(Decimal::new(9_899, 2)));
        assert!(passes_gate(Decimal::new(9_901, 2)));
    }

    #[test]
    fn test_amount_for_follows_subtotal() {
        let discount = DiscountState {
            amount: Decimal::from(20),
            kind: Some(DiscountType::Percent),
            value: Decimal::from(10),
            code: Some("SAVE10".to_string()),
        };
        assert_eq!(discount.amount_for(Decimal::from(300)), Decimal::from(30));
        assert_eq!(discount.amount_for(Decimal::from(90)), Decimal::ZERO);
        assert_eq!(DiscountState::default().amount_for(Decimal::from(300)), Decimal::ZERO);
    }
}
