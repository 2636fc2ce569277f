//! Checkout orchestrator.
//!
//! Composes the cart, coupon resolver, geocoder and shipping calculator with
//! the external payment step into one order submission. Totals are always
//! recomputed from a fresh cart fetch right before the order is sent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rust_decimal::Decimal;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use hearth_core::{DeliveryType, PaymentMethod, Price};

use super::order::{CheckoutForm, CheckoutOrder, Totals, discounted_subtotal};
use super::payment::{PaymentConfirmer, PaymentOutcome, eligible_payment_methods};
use super::CheckoutState;
use crate::api::{OrderReceipt, PaymentIntent, PaymentIntentRequest, StoreApi};
use crate::cart::{CartManager, CartSnapshot, KeyValueStore};
use crate::coupon::CouponResolver;
use crate::error::{Result, StoreError, add_breadcrumb};
use crate::geo::{Coordinates, Geocoder};
use crate::shipping::{ShippingPolicy, ShippingQuote, cart_logistic_type, compute_shipping};

/// Prices and options shown while the customer fills in the form.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutPreview {
    pub origin: Option<Coordinates>,
    pub quote: ShippingQuote,
    pub totals: Totals,
    pub payment_methods: Vec<PaymentMethod>,
    /// Why an applied coupon was dropped, when the cart no longer qualifies.
    pub coupon_notice: Option<String>,
}

#[derive(Clone)]
struct PendingPayment {
    form: CheckoutForm,
    method: PaymentMethod,
    origin: Option<Coordinates>,
    intent: PaymentIntent,
    /// Amount the customer is asked to authorise.
    amount: Decimal,
    /// Reference returned by a confirmed payment. Kept until an order is
    /// accepted for it or definitively refused.
    confirmed: Option<String>,
}

impl PendingPayment {
    const fn is_confirmed(&self) -> bool {
        self.confirmed.is_some()
    }
}

/// A confirmed payment an order must match.
struct Authorised {
    payment_intent: String,
    amount: Decimal,
}

struct Machine {
    state: CheckoutState,
    pending: Option<PendingPayment>,
    last_failure: Option<String>,
    /// Sent with every submission of the current attempt; renewed once the
    /// backend has answered definitively.
    idempotency_key: Uuid,
}

enum Step {
    AwaitingPayment,
    Placed(OrderReceipt),
}

/// Releases the single-flight flag.
struct Busy<'a>(&'a AtomicBool);

impl Drop for Busy<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives one customer's checkout.
pub struct CheckoutOrchestrator<A, S, G> {
    cart: CartManager<A, S>,
    coupons: Arc<CouponResolver<A>>,
    geocoder: G,
    policy: ShippingPolicy,
    machine: Mutex<Machine>,
    busy: AtomicBool,
}

impl<A: StoreApi, S: KeyValueStore, G: Geocoder> CheckoutOrchestrator<A, S, G> {
    pub fn new(
        cart: CartManager<A, S>,
        coupons: Arc<CouponResolver<A>>,
        geocoder: G,
        policy: ShippingPolicy,
    ) -> Self {
        Self {
            cart,
            coupons,
            geocoder,
            policy,
            machine: Mutex::new(Machine {
                state: CheckoutState::Idle,
                pending: None,
                last_failure: None,
                idempotency_key: Uuid::new_v4(),
            }),
            busy: AtomicBool::new(false),
        }
    }

    fn machine(&self) -> MutexGuard<'_, Machine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn state(&self) -> CheckoutState {
        self.machine().state.clone()
    }

    /// Reason of the last failed step, for display on the form.
    #[must_use]
    pub fn last_failure(&self) -> Option<String> {
        self.machine().last_failure.clone()
    }

    fn transition(&self, to: CheckoutState) {
        let mut machine = self.machine();
        info!(from = machine.state.name(), to = to.name(), "Checkout transition");
        machine.state = to;
    }

    fn acquire(&self) -> Result<Busy<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .map(|_| Busy(&self.busy))
            .map_err(|_| StoreError::SubmissionInFlight)
    }

    /// Record a failed step and move to the state it leads to.
    ///
    /// A confirmed payment survives every failure except a refused order or
    /// an amount mismatch, so a retry submits it again instead of charging
    /// twice.
    fn settle<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            e.report();
            if !matches!(
                e,
                StoreError::InvalidTransition { .. } | StoreError::SubmissionInFlight
            ) {
                let mut machine = self.machine();
                let reason = e.user_message();
                let keep = machine.pending.as_ref().is_some_and(PendingPayment::is_confirmed)
                    && !matches!(
                        e,
                        StoreError::BackendRejected(_) | StoreError::PaymentNotConfirmed(_)
                    );
                if keep {
                    warn!(error = %e, "Order not placed, confirmed payment kept for retry");
                } else {
                    machine.pending = None;
                }
                machine.state = if matches!(e, StoreError::Unauthorized(_)) {
                    CheckoutState::Failed {
                        reason: reason.clone(),
                    }
                } else {
                    CheckoutState::AddressEntry
                };
                machine.last_failure = Some(reason);
            }
        }
        result
    }

    // =========================================================================
    // Steps
    // =========================================================================

    /// Enter checkout.
    ///
    /// # Errors
    ///
    /// - `Unauthorized` when no customer is signed in
    /// - `Validation` when the cart is empty
    /// - `InvalidTransition` while a payment or submission is pending
    #[instrument(skip(self))]
    pub async fn begin(&self) -> Result<()> {
        {
            let machine = self.machine();
            if !machine.state.can_begin() {
                return Err(StoreError::InvalidTransition {
                    from: machine.state.name(),
                    to: CheckoutState::AddressEntry.name(),
                });
            }
        }

        if self.cart.customer().is_none() {
            return Err(StoreError::Unauthorized(
                "Sign in to place an order".to_string(),
            ));
        }
        let snapshot = self.fresh_cart().await?;
        if snapshot.is_empty() {
            return Err(StoreError::Validation("Your cart is empty".to_string()));
        }

        {
            let mut machine = self.machine();
            machine.last_failure = None;
            // A confirmed payment still belongs to the attempt that created
            // it, together with its key.
            if !machine.pending.as_ref().is_some_and(PendingPayment::is_confirmed) {
                machine.pending = None;
                machine.idempotency_key = Uuid::new_v4();
            }
        }
        self.transition(CheckoutState::AddressEntry);
        add_breadcrumb("checkout", "Started checkout", None);
        Ok(())
    }

    /// Abandon the current attempt, including a confirmed payment that no
    /// order was accepted for.
    pub fn cancel(&self) {
        {
            let mut machine = self.machine();
            if let Some(reference) = machine.pending.take().and_then(|p| p.confirmed) {
                warn!(payment_intent = %reference, "Checkout cancelled with a confirmed payment");
            }
        }
        self.transition(CheckoutState::Idle);
    }

    /// Shipping quote, totals and payment options for a tentative
    /// destination.
    ///
    /// The only side effect is dropping a coupon whose minimum the current
    /// cart no longer reaches; `coupon_notice` then carries the reason.
    pub async fn preview(
        &self,
        delivery: DeliveryType,
        postal_code: Option<&str>,
        country: &str,
    ) -> CheckoutPreview {
        let origin = self.locate(delivery, postal_code).await;
        let snapshot = self.cart.snapshot();
        let coupon_notice = self
            .coupons
            .enforce_minimum(snapshot.total)
            .err()
            .map(|e| e.user_message());
        let (quote, totals) = self.price(&snapshot, delivery, origin);
        CheckoutPreview {
            origin,
            quote,
            totals,
            payment_methods: eligible_payment_methods(delivery, country, origin.is_some()),
            coupon_notice,
        }
    }

    /// Submit the address form.
    ///
    /// Card and Bizum create a payment intent and wait in `PaymentPending`
    /// for [`complete_payment`](Self::complete_payment). Cash submits the
    /// order right away. When an earlier attempt was paid but its order
    /// could not be placed, the same form resubmits that payment without a
    /// new charge.
    ///
    /// # Errors
    ///
    /// - `SubmissionInFlight` while another step is running
    /// - `InvalidTransition` outside `AddressEntry`
    /// - `Validation` for missing fields, an ineligible method, a coupon
    ///   that no longer passes the minimum, or a form that differs from an
    ///   already paid attempt
    /// - `PaymentNotConfirmed` when no payment intent could be created
    /// - order submission failures (cash)
    #[instrument(skip(self, form), fields(delivery = %form.delivery))]
    pub async fn confirm_details(&self, form: CheckoutForm) -> Result<CheckoutState> {
        let _busy = self.acquire()?;
        let step = self.confirm_step(form).await;
        self.settle(step).map(|_| self.state())
    }

    /// Feed the outcome of the external payment step.
    ///
    /// # Errors
    ///
    /// - `SubmissionInFlight` while another step is running
    /// - `InvalidTransition` outside `PaymentPending`
    /// - `PaymentNotConfirmed` for a failed or cancelled payment, or when the
    ///   cart total changed during payment; back to `AddressEntry` without an
    ///   order
    /// - order submission failures
    #[instrument(skip(self, outcome))]
    pub async fn complete_payment(&self, outcome: PaymentOutcome) -> Result<OrderReceipt> {
        let _busy = self.acquire()?;
        let result = self.complete_step(outcome).await;
        self.settle(result)
    }

    /// Run the whole checkout with `confirmer` as the payment step.
    ///
    /// # Errors
    ///
    /// Any error of [`confirm_details`](Self::confirm_details) or
    /// [`complete_payment`](Self::complete_payment).
    #[instrument(skip(self, form, confirmer))]
    pub async fn place_order<P: PaymentConfirmer>(
        &self,
        form: CheckoutForm,
        confirmer: &P,
    ) -> Result<OrderReceipt> {
        let _busy = self.acquire()?;
        let step = self.confirm_step(form).await;
        match self.settle(step)? {
            Step::Placed(receipt) => Ok(receipt),
            Step::AwaitingPayment => {
                let CheckoutState::PaymentPending { method, amount } = self.state() else {
                    return self.settle(Err(StoreError::Internal(
                        "payment step without pending payment".to_string(),
                    )));
                };
                let intent = self.machine().pending.as_ref().map(|p| p.intent.clone());
                let outcome = match intent {
                    Some(intent) => confirmer.confirm(&intent, method, amount).await,
                    None => PaymentOutcome::Failed {
                        reason: "payment intent missing".to_string(),
                    },
                };
                let result = self.complete_step(outcome).await;
                self.settle(result)
            }
        }
    }

    async fn confirm_step(&self, form: CheckoutForm) -> Result<Step> {
        let held = {
            let machine = self.machine();
            if machine.state != CheckoutState::AddressEntry {
                return Err(StoreError::InvalidTransition {
                    from: machine.state.name(),
                    to: "payment_pending",
                });
            }
            machine.pending.clone().filter(PendingPayment::is_confirmed)
        };

        form.validate()?;
        if let Some(held) = held {
            if held.form != form {
                return Err(StoreError::Validation(
                    "This order is already paid. Submit it with the same details or cancel the checkout"
                        .to_string(),
                ));
            }
            info!("Resubmitting order with the confirmed payment");
            return self.submit_confirmed(held).await.map(Step::Placed);
        }
        let customer = self
            .cart
            .customer()
            .ok_or_else(|| StoreError::Unauthorized("Your session has ended".to_string()))?;

        let origin = self.locate(form.delivery, form.zipcode.as_deref()).await;
        let methods = eligible_payment_methods(form.delivery, form.country(), origin.is_some());
        let method = match form.payment_method {
            Some(method) if methods.contains(&method) => method,
            Some(method) => {
                return Err(StoreError::Validation(format!(
                    "Payment by {method} is not available for this delivery"
                )));
            }
            None => methods.first().copied().ok_or_else(|| {
                StoreError::Internal("no eligible payment method".to_string())
            })?,
        };

        let snapshot = self.fresh_cart().await?;
        if snapshot.is_empty() {
            return Err(StoreError::Validation("Your cart is empty".to_string()));
        }
        self.coupons.enforce_minimum(snapshot.total)?;

        if !method.requires_confirmation() {
            return self.submit(&form, method, origin, None).await.map(Step::Placed);
        }

        let (_, totals) = self.price(&snapshot, form.delivery, origin);
        let request = PaymentIntentRequest {
            amount: totals.total,
            payment_method: method.intent_method().to_string(),
            user_id: customer.id,
        };
        let intent = self
            .cart
            .api()
            .create_payment_intent(&request)
            .await?
            .ok_or_else(|| {
                StoreError::PaymentNotConfirmed("The payment could not be started".to_string())
            })?;

        {
            let mut machine = self.machine();
            machine.pending = Some(PendingPayment {
                form,
                method,
                origin,
                intent,
                amount: totals.total,
                confirmed: None,
            });
        }
        self.transition(CheckoutState::PaymentPending {
            method,
            amount: totals.total,
        });
        Ok(Step::AwaitingPayment)
    }

    async fn complete_step(&self, outcome: PaymentOutcome) -> Result<OrderReceipt> {
        let mut pending = {
            let mut machine = self.machine();
            if !matches!(machine.state, CheckoutState::PaymentPending { .. }) {
                return Err(StoreError::InvalidTransition {
                    from: machine.state.name(),
                    to: CheckoutState::Submitting.name(),
                });
            }
            machine.pending.take()
        }
        .ok_or_else(|| StoreError::Internal("payment pending without checkout data".to_string()))?;

        match outcome {
            PaymentOutcome::Confirmed { payment_intent } => {
                add_breadcrumb("checkout", "Payment confirmed", None);
                pending.confirmed = Some(payment_intent);
                self.submit_confirmed(pending).await
            }
            PaymentOutcome::Failed { reason } => Err(StoreError::PaymentNotConfirmed(reason)),
            PaymentOutcome::Cancelled => Err(StoreError::PaymentNotConfirmed(
                "The payment was cancelled".to_string(),
            )),
        }
    }

    /// Hold a confirmed payment on the machine and submit its order.
    async fn submit_confirmed(&self, payment: PendingPayment) -> Result<OrderReceipt> {
        let Some(payment_intent) = payment.confirmed.clone() else {
            return Err(StoreError::Internal(
                "submitting an unconfirmed payment".to_string(),
            ));
        };
        let form = payment.form.clone();
        let (method, origin, amount) = (payment.method, payment.origin, payment.amount);
        self.machine().pending = Some(payment);
        let authorised = Authorised {
            payment_intent,
            amount,
        };
        self.submit(&form, method, origin, Some(authorised)).await
    }

    /// Send the order. The cart is cleared only after the backend accepts it.
    async fn submit(
        &self,
        form: &CheckoutForm,
        method: PaymentMethod,
        origin: Option<Coordinates>,
        authorised: Option<Authorised>,
    ) -> Result<OrderReceipt> {
        self.transition(CheckoutState::Submitting);

        let snapshot = self.fresh_cart().await?;
        if snapshot.is_empty() {
            return Err(StoreError::Validation("Your cart is empty".to_string()));
        }
        let (quote, totals) = self.price(&snapshot, form.delivery, origin);
        if let Some(authorised) = &authorised
            && totals.total != authorised.amount
        {
            warn!(
                authorised = %authorised.amount,
                total = %totals.total,
                "Cart changed during payment"
            );
            return Err(StoreError::PaymentNotConfirmed(format!(
                "Your cart changed during payment. The order total is now {} and was not placed",
                Price::eur(totals.total)
            )));
        }
        let promo_code = self
            .coupons
            .current()
            .code
            .filter(|_| totals.discount > Decimal::ZERO);
        let order = CheckoutOrder::build(
            form,
            method,
            &snapshot.items,
            totals,
            promo_code,
            authorised.map(|a| a.payment_intent),
        );

        let key = self.machine().idempotency_key;
        info!(
            total = %totals.total,
            transport_fee = %quote.fee,
            idempotency_key = %key,
            "Submitting order"
        );

        let receipt = match self.cart.api().create_order(&order, key).await {
            Ok(receipt) => receipt,
            Err(e) => {
                let err = StoreError::from(e);
                // An unanswered request may still have created the order, so
                // a retry must reuse the key.
                if !err.is_transient() {
                    self.machine().idempotency_key = Uuid::new_v4();
                }
                return Err(err);
            }
        };

        {
            let mut machine = self.machine();
            machine.pending = None;
            machine.last_failure = None;
            machine.idempotency_key = Uuid::new_v4();
        }
        self.transition(CheckoutState::Completed {
            tracking_number: receipt.tracking_number.clone(),
        });

        self.coupons.reset();
        if let Err(e) = self.cart.clear().await {
            warn!(error = %e, "Order placed but the cart could not be cleared");
        }
        add_breadcrumb(
            "checkout",
            "Order placed",
            Some(&[("tracking_number", receipt.tracking_number.as_str())]),
        );
        Ok(receipt)
    }

    // =========================================================================
    // Pricing
    // =========================================================================

    async fn fresh_cart(&self) -> Result<CartSnapshot> {
        let snapshot = self.cart.fetch_cart().await;
        match &snapshot.error {
            Some(reason) => Err(StoreError::Network(reason.clone())),
            None => Ok(snapshot),
        }
    }

    async fn locate(&self, delivery: DeliveryType, postal_code: Option<&str>) -> Option<Coordinates> {
        match (delivery, postal_code) {
            (DeliveryType::HomeDelivery, Some(code)) => self.geocoder.locate(code).await,
            _ => None,
        }
    }

    /// Store pickup carries no transport fee.
    fn price(
        &self,
        snapshot: &CartSnapshot,
        delivery: DeliveryType,
        origin: Option<Coordinates>,
    ) -> (ShippingQuote, Totals) {
        let subtotal = snapshot.total;
        let discount = self.coupons.current().amount_for(subtotal);
        let quote = match delivery {
            DeliveryType::HomeDelivery => compute_shipping(
                &self.policy,
                origin,
                &snapshot.items,
                discounted_subtotal(subtotal, discount),
            ),
            DeliveryType::StorePickup => ShippingQuote {
                distance_km: None,
                logistic_type: cart_logistic_type(&snapshot.items),
                fee: Decimal::ZERO,
            },
        };
        (quote, Totals::compute(subtotal, discount, quote.fee))
    }
}
