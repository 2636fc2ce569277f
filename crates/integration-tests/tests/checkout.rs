//! Checkout scenarios: the state machine, payment confirmation, submission
//! failures and totals.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use rust_decimal::Decimal;

use hearth_core::{DeliveryType, DiscountType, LogisticType, PaymentMethod};
use hearth_integration_tests::{
    Call, FAR_POSTAL_CODE, Failure, Harness, NEARBY_POSTAL_CODE, Op, ScriptedPayments,
    home_form, pickup_form, product,
};
use hearth_storefront::cart::AddItemRequest;
use hearth_storefront::checkout::{CheckoutForm, CheckoutState, PaymentOutcome};
use hearth_storefront::error::StoreError;

fn intent_requests(h: &Harness) -> Vec<hearth_storefront::api::PaymentIntentRequest> {
    h.api
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            Call::CreatePaymentIntent(request) => Some(request),
            _ => None,
        })
        .collect()
}

// =============================================================================
// Entering checkout
// =============================================================================

#[tokio::test]
async fn test_guest_cannot_check_out() {
    let h = Harness::guest();
    h.cart
        .add_item(AddItemRequest::new(product(1, "Mesa", 150, LogisticType::Medium), 1))
        .await
        .unwrap();

    let result = h.checkout.begin().await;
    assert!(matches!(result, Err(StoreError::Unauthorized(_))));
    assert_eq!(h.checkout.state(), CheckoutState::Idle);
}

#[tokio::test]
async fn test_empty_cart_cannot_check_out() {
    let h = Harness::signed_in(&[]).await;

    let result = h.checkout.begin().await;
    assert!(matches!(result, Err(StoreError::Validation(_))));
    assert_eq!(h.checkout.state(), CheckoutState::Idle);
}

#[tokio::test]
async fn test_details_before_begin_is_an_invalid_transition() {
    let h = Harness::signed_in(&[(product(1, "Mesa", 150, LogisticType::Medium), 1)]).await;

    let result = h.checkout.confirm_details(pickup_form(PaymentMethod::Cash)).await;
    assert!(matches!(result, Err(StoreError::InvalidTransition { from: "idle", .. })));
    assert_eq!(h.api.count(Op::CreateOrder), 0);
}

// =============================================================================
// Happy paths
// =============================================================================

#[tokio::test]
async fn test_cash_pickup_order() {
    let h = Harness::signed_in(&[(product(1, "Mesa", 150, LogisticType::Medium), 1)]).await;
    let payments = ScriptedPayments::default();

    h.checkout.begin().await.unwrap();
    assert_eq!(h.checkout.state(), CheckoutState::AddressEntry);
    let receipt = h
        .checkout
        .place_order(pickup_form(PaymentMethod::Cash), &payments)
        .await
        .unwrap();

    assert_eq!(receipt.tracking_number, "HRT-0001");
    assert_eq!(
        h.checkout.state(),
        CheckoutState::Completed {
            tracking_number: "HRT-0001".to_string()
        }
    );
    assert!(payments.requests().is_empty());
    assert_eq!(h.api.count(Op::CreatePaymentIntent), 0);

    let (order, _) = h.api.submitted_orders().pop().unwrap();
    assert_eq!(order.delivery, DeliveryType::StorePickup);
    assert_eq!(order.payment_method, PaymentMethod::Cash);
    assert_eq!(order.transport_fee, Decimal::ZERO);
    assert_eq!(order.total, Decimal::from(150));
    assert_eq!(order.payment_intent, None);

    // Cleared only after the order was accepted.
    assert!(h.api.server_lines().is_empty());
    assert!(h.cart.snapshot().is_empty());
}

#[tokio::test]
async fn test_card_home_delivery_with_heavy_fee() {
    let h = Harness::signed_in(&[(product(2, "Sofá", 300, LogisticType::Heavy), 1)]).await;
    let payments = ScriptedPayments::approving("pi_123");

    h.checkout.begin().await.unwrap();
    let receipt = h
        .checkout
        .place_order(home_form(FAR_POSTAL_CODE), &payments)
        .await
        .unwrap();

    let requests = intent_requests(&h);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].amount, Decimal::from(350));
    assert_eq!(requests[0].payment_method, "card");
    assert_eq!(payments.requests(), vec![(PaymentMethod::Card, Decimal::from(350))]);

    let (order, _) = h.api.submitted_orders().pop().unwrap();
    assert_eq!(order.transport_fee, Decimal::from(50));
    assert_eq!(order.total, Decimal::from(350));
    assert_eq!(order.payment_intent.as_deref(), Some("pi_123"));
    assert_eq!(order.zipcode.as_deref(), Some(FAR_POSTAL_CODE));
    assert!(!receipt.tracking_number.is_empty());
}

#[tokio::test]
async fn test_step_by_step_bizum_payment() {
    let h = Harness::signed_in(&[(product(3, "Lámpara", 50, LogisticType::Small), 1)]).await;
    h.checkout.begin().await.unwrap();

    let form = CheckoutForm {
        payment_method: Some(PaymentMethod::Bizum),
        ..home_form(NEARBY_POSTAL_CODE)
    };
    let state = h.checkout.confirm_details(form).await.unwrap();
    // Beyond the free radius, small items pay the flat fee.
    assert_eq!(
        state,
        CheckoutState::PaymentPending {
            method: PaymentMethod::Bizum,
            amount: Decimal::from(60),
        }
    );
    assert_eq!(intent_requests(&h)[0].payment_method, "sofort");

    let receipt = h
        .checkout
        .complete_payment(PaymentOutcome::Confirmed {
            payment_intent: "pi_bizum".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(
        h.checkout.state(),
        CheckoutState::Completed {
            tracking_number: receipt.tracking_number
        }
    );
}

#[tokio::test]
async fn test_coupon_discount_reaches_the_order() {
    let h = Harness::signed_in(&[(product(1, "Mesa", 200, LogisticType::Medium), 1)]).await;
    h.api.offer_coupon("SAVE10", DiscountType::Percent, Decimal::from(10));
    h.checkout.begin().await.unwrap();
    h.coupons
        .apply("SAVE10", h.cart.snapshot().total, &h.cart.snapshot().product_refs(), None)
        .await
        .unwrap();

    h.checkout
        .place_order(pickup_form(PaymentMethod::Cash), &ScriptedPayments::default())
        .await
        .unwrap();

    let (order, _) = h.api.submitted_orders().pop().unwrap();
    assert_eq!(order.subtotal, Decimal::from(200));
    assert_eq!(order.discount, Decimal::from(20));
    assert_eq!(order.total, Decimal::from(180));
    assert_eq!(order.promo_code.as_deref(), Some("SAVE10"));
    assert!(!h.coupons.is_locked());
}

#[tokio::test]
async fn test_preview_drops_coupon_below_minimum() {
    let h = Harness::signed_in(&[(product(3, "Lámpara", 60, LogisticType::Small), 2)]).await;
    h.api.offer_coupon("MINUS20", DiscountType::Fixed, Decimal::from(20));
    h.coupons
        .apply("MINUS20", h.cart.snapshot().total, &[], None)
        .await
        .unwrap();

    let preview = h.checkout.preview(DeliveryType::StorePickup, None, "ES").await;
    assert_eq!(preview.coupon_notice, None);
    assert_eq!(preview.totals.discount, Decimal::from(20));

    let line = h.cart.snapshot().items[0].id.clone();
    h.cart.update_item_quantity(&line, 1, None).await.unwrap();
    let preview = h.checkout.preview(DeliveryType::StorePickup, None, "ES").await;

    assert!(preview.coupon_notice.is_some());
    assert_eq!(preview.totals.discount, Decimal::ZERO);
    assert_eq!(preview.totals.total, Decimal::from(60));
    assert!(!h.coupons.current().is_applied());
    assert!(!h.coupons.is_locked());
}

// =============================================================================
// Payment failures
// =============================================================================

#[tokio::test]
async fn test_failed_payment_places_no_order() {
    let h = Harness::signed_in(&[(product(2, "Sofá", 300, LogisticType::Heavy), 1)]).await;
    let declined = ScriptedPayments::new([PaymentOutcome::Failed {
        reason: "Tarjeta rechazada".to_string(),
    }]);

    h.checkout.begin().await.unwrap();
    let result = h
        .checkout
        .place_order(home_form(FAR_POSTAL_CODE), &declined)
        .await;

    assert!(matches!(result, Err(StoreError::PaymentNotConfirmed(ref reason)) if reason == "Tarjeta rechazada"));
    assert_eq!(h.checkout.state(), CheckoutState::AddressEntry);
    assert_eq!(h.checkout.last_failure().as_deref(), Some("Tarjeta rechazada"));
    assert_eq!(h.api.count(Op::CreateOrder), 0);
    assert_eq!(h.api.server_lines().len(), 1);

    // The customer can retry from the form.
    h.checkout
        .place_order(home_form(FAR_POSTAL_CODE), &ScriptedPayments::approving("pi_2"))
        .await
        .unwrap();
    assert_eq!(h.api.count(Op::CreateOrder), 1);
}

#[tokio::test]
async fn test_cancelled_payment_returns_to_address_entry() {
    let h = Harness::signed_in(&[(product(3, "Lámpara", 50, LogisticType::Small), 2)]).await;
    h.checkout.begin().await.unwrap();
    h.checkout
        .confirm_details(home_form(FAR_POSTAL_CODE))
        .await
        .unwrap();

    let result = h.checkout.complete_payment(PaymentOutcome::Cancelled).await;

    assert!(matches!(result, Err(StoreError::PaymentNotConfirmed(_))));
    assert_eq!(h.checkout.state(), CheckoutState::AddressEntry);
    assert_eq!(h.api.count(Op::CreateOrder), 0);

    let again = h.checkout.complete_payment(PaymentOutcome::Cancelled).await;
    assert!(matches!(again, Err(StoreError::InvalidTransition { .. })));
}

#[tokio::test]
async fn test_missing_client_secret_blocks_card_payment() {
    let h = Harness::signed_in(&[(product(2, "Sofá", 300, LogisticType::Heavy), 1)]).await;
    h.api.backend().client_secret = None;
    let payments = ScriptedPayments::approving("pi_never");

    h.checkout.begin().await.unwrap();
    let result = h
        .checkout
        .place_order(home_form(FAR_POSTAL_CODE), &payments)
        .await;

    assert!(matches!(result, Err(StoreError::PaymentNotConfirmed(_))));
    assert!(payments.requests().is_empty());
    assert_eq!(h.checkout.state(), CheckoutState::AddressEntry);
    assert_eq!(h.api.count(Op::CreateOrder), 0);
}

// =============================================================================
// Eligibility and validation
// =============================================================================

#[tokio::test]
async fn test_cash_is_refused_for_home_delivery() {
    let h = Harness::signed_in(&[(product(1, "Mesa", 150, LogisticType::Medium), 1)]).await;
    h.checkout.begin().await.unwrap();

    let form = CheckoutForm {
        payment_method: Some(PaymentMethod::Cash),
        ..home_form(NEARBY_POSTAL_CODE)
    };
    let result = h.checkout.confirm_details(form).await;

    assert!(matches!(result, Err(StoreError::Validation(_))));
    assert_eq!(h.checkout.state(), CheckoutState::AddressEntry);
    assert_eq!(h.api.count(Op::CreatePaymentIntent), 0);
}

#[tokio::test]
async fn test_bizum_needs_a_located_address() {
    let h = Harness::signed_in(&[(product(1, "Mesa", 150, LogisticType::Medium), 1)]).await;
    h.checkout.begin().await.unwrap();

    let form = CheckoutForm {
        payment_method: Some(PaymentMethod::Bizum),
        ..home_form("99999")
    };
    let result = h.checkout.confirm_details(form).await;
    assert!(matches!(result, Err(StoreError::Validation(_))));
    assert_eq!(h.geocoder.lookups(), 1);
}

#[tokio::test]
async fn test_incomplete_form_is_refused() {
    let h = Harness::signed_in(&[(product(1, "Mesa", 150, LogisticType::Medium), 1)]).await;
    h.checkout.begin().await.unwrap();

    let form = CheckoutForm {
        line1: String::new(),
        ..home_form(NEARBY_POSTAL_CODE)
    };
    let result = h.checkout.confirm_details(form).await;
    assert!(matches!(result, Err(StoreError::Validation(_))));
    assert_eq!(h.geocoder.lookups(), 0);
}

#[tokio::test]
async fn test_coupon_gate_is_rechecked_at_submission() {
    let h = Harness::signed_in(&[(product(1, "Mesa", 120, LogisticType::Medium), 1)]).await;
    h.api.offer_coupon("MINUS20", DiscountType::Fixed, Decimal::from(20));
    h.checkout.begin().await.unwrap();
    h.coupons
        .apply("MINUS20", Decimal::from(120), &[], None)
        .await
        .unwrap();

    // The price dropped on the server after the coupon was applied.
    h.api.backend().lines[0].unit_price = Decimal::from(90);
    let result = h
        .checkout
        .place_order(pickup_form(PaymentMethod::Cash), &ScriptedPayments::default())
        .await;

    assert!(matches!(result, Err(StoreError::Validation(_))));
    assert!(!h.coupons.current().is_applied());
    assert_eq!(h.api.count(Op::CreateOrder), 0);
    assert_eq!(h.checkout.state(), CheckoutState::AddressEntry);
}

// =============================================================================
// Submission failures
// =============================================================================

#[tokio::test]
async fn test_rejected_order_keeps_cart() {
    let h = Harness::signed_in(&[(product(1, "Mesa", 150, LogisticType::Medium), 2)]).await;
    h.api
        .fail(Op::CreateOrder, Failure::Rejected("Sin stock".to_string()), 1);

    h.checkout.begin().await.unwrap();
    let result = h
        .checkout
        .place_order(pickup_form(PaymentMethod::Cash), &ScriptedPayments::default())
        .await;

    assert!(matches!(result, Err(StoreError::BackendRejected(ref reason)) if reason == "Sin stock"));
    assert_eq!(h.checkout.state(), CheckoutState::AddressEntry);
    assert_eq!(h.checkout.last_failure().as_deref(), Some("Sin stock"));
    assert_eq!(h.api.count(Op::EmptyCart), 0);
    assert_eq!(h.cart.snapshot().unit_count(), 2);

    h.checkout
        .place_order(pickup_form(PaymentMethod::Cash), &ScriptedPayments::default())
        .await
        .unwrap();
    let orders = h.api.submitted_orders();
    assert_eq!(orders.len(), 2);
    assert_ne!(orders[0].1, orders[1].1);
}

#[tokio::test]
async fn test_network_failure_retries_with_same_key() {
    let h = Harness::signed_in(&[(product(1, "Mesa", 150, LogisticType::Medium), 1)]).await;
    h.api.fail(Op::CreateOrder, Failure::Unavailable, 1);

    h.checkout.begin().await.unwrap();
    let result = h
        .checkout
        .place_order(pickup_form(PaymentMethod::Cash), &ScriptedPayments::default())
        .await;
    assert!(matches!(result, Err(StoreError::Network(_))));
    assert_eq!(h.api.server_lines().len(), 1);

    h.checkout
        .place_order(pickup_form(PaymentMethod::Cash), &ScriptedPayments::default())
        .await
        .unwrap();
    let orders = h.api.submitted_orders();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].1, orders[1].1);
}

#[tokio::test]
async fn test_network_failure_after_payment_reuses_confirmed_payment() {
    let h = Harness::signed_in(&[(product(2, "Sofá", 300, LogisticType::Heavy), 1)]).await;
    h.api.fail(Op::CreateOrder, Failure::Unavailable, 1);
    let payments = ScriptedPayments::approving("pi_1");

    h.checkout.begin().await.unwrap();
    let result = h
        .checkout
        .place_order(home_form(FAR_POSTAL_CODE), &payments)
        .await;
    assert!(matches!(result, Err(StoreError::Network(_))));
    assert_eq!(h.checkout.state(), CheckoutState::AddressEntry);

    // Re-entering checkout keeps the paid attempt.
    h.checkout.begin().await.unwrap();
    h.checkout
        .place_order(home_form(FAR_POSTAL_CODE), &payments)
        .await
        .unwrap();

    assert_eq!(intent_requests(&h).len(), 1);
    assert_eq!(payments.requests(), vec![(PaymentMethod::Card, Decimal::from(350))]);
    let orders = h.api.submitted_orders();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].0.payment_intent.as_deref(), Some("pi_1"));
    assert_eq!(orders[1].0.payment_intent.as_deref(), Some("pi_1"));
    assert_eq!(orders[0].1, orders[1].1);
    assert!(h.api.server_lines().is_empty());
}

#[tokio::test]
async fn test_confirmed_payment_requires_the_same_details() {
    let h = Harness::signed_in(&[(product(2, "Sofá", 300, LogisticType::Heavy), 1)]).await;
    h.api.fail(Op::CreateOrder, Failure::Unavailable, 1);

    h.checkout.begin().await.unwrap();
    let result = h
        .checkout
        .place_order(home_form(FAR_POSTAL_CODE), &ScriptedPayments::approving("pi_1"))
        .await;
    assert!(matches!(result, Err(StoreError::Network(_))));

    let changed = h
        .checkout
        .place_order(home_form(NEARBY_POSTAL_CODE), &ScriptedPayments::approving("pi_2"))
        .await;
    assert!(matches!(changed, Err(StoreError::Validation(_))));
    assert_eq!(h.api.count(Op::CreateOrder), 1);
    assert_eq!(intent_requests(&h).len(), 1);

    // Cancelling gives up the paid attempt; the next one pays again.
    h.checkout.cancel();
    h.checkout.begin().await.unwrap();
    h.checkout
        .place_order(home_form(NEARBY_POSTAL_CODE), &ScriptedPayments::approving("pi_2"))
        .await
        .unwrap();
    let (order, _) = h.api.submitted_orders().pop().unwrap();
    assert_eq!(order.payment_intent.as_deref(), Some("pi_2"));
    assert_eq!(intent_requests(&h).len(), 2);
}

#[tokio::test]
async fn test_rejected_order_drops_confirmed_payment() {
    let h = Harness::signed_in(&[(product(2, "Sofá", 300, LogisticType::Heavy), 1)]).await;
    h.api
        .fail(Op::CreateOrder, Failure::Rejected("Sin stock".to_string()), 1);

    h.checkout.begin().await.unwrap();
    let result = h
        .checkout
        .place_order(home_form(FAR_POSTAL_CODE), &ScriptedPayments::approving("pi_1"))
        .await;
    assert!(matches!(result, Err(StoreError::BackendRejected(_))));

    h.checkout
        .place_order(home_form(FAR_POSTAL_CODE), &ScriptedPayments::approving("pi_2"))
        .await
        .unwrap();
    assert_eq!(intent_requests(&h).len(), 2);
    let orders = h.api.submitted_orders();
    assert_eq!(orders[1].0.payment_intent.as_deref(), Some("pi_2"));
    assert_ne!(orders[0].1, orders[1].1);
}

#[tokio::test]
async fn test_cart_change_during_payment_blocks_order() {
    let h = Harness::signed_in(&[(product(3, "Lámpara", 50, LogisticType::Small), 1)]).await;
    let chair = product(4, "Silla", 40, LogisticType::Small);
    h.api.stock(&chair);

    h.checkout.begin().await.unwrap();
    let state = h
        .checkout
        .confirm_details(home_form(FAR_POSTAL_CODE))
        .await
        .unwrap();
    assert_eq!(
        state,
        CheckoutState::PaymentPending {
            method: PaymentMethod::Card,
            amount: Decimal::from(60),
        }
    );

    h.cart.add_item(AddItemRequest::new(chair, 1)).await.unwrap();
    let result = h
        .checkout
        .complete_payment(PaymentOutcome::Confirmed {
            payment_intent: "pi_1".to_string(),
        })
        .await;

    assert!(matches!(result, Err(StoreError::PaymentNotConfirmed(_))));
    assert_eq!(h.checkout.state(), CheckoutState::AddressEntry);
    assert_eq!(h.api.count(Op::CreateOrder), 0);

    // A fresh attempt charges the new total.
    h.checkout
        .place_order(home_form(FAR_POSTAL_CODE), &ScriptedPayments::approving("pi_2"))
        .await
        .unwrap();
    let requests = intent_requests(&h);
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].amount, Decimal::from(100));
    let (order, _) = h.api.submitted_orders().pop().unwrap();
    assert_eq!(order.total, Decimal::from(100));
    assert_eq!(order.payment_intent.as_deref(), Some("pi_2"));
}

#[tokio::test]
async fn test_expired_session_fails_checkout() {
    let h = Harness::signed_in(&[(product(1, "Mesa", 150, LogisticType::Medium), 1)]).await;
    h.api.fail(Op::CreateOrder, Failure::Unauthorized, 1);

    h.checkout.begin().await.unwrap();
    let result = h
        .checkout
        .place_order(pickup_form(PaymentMethod::Cash), &ScriptedPayments::default())
        .await;

    assert!(matches!(result, Err(StoreError::Unauthorized(_))));
    assert!(matches!(h.checkout.state(), CheckoutState::Failed { .. }));
    assert_eq!(h.api.server_lines().len(), 1);
}

#[tokio::test]
async fn test_concurrent_submission_is_single_flight() {
    let h = Harness::signed_in(&[(product(1, "Mesa", 150, LogisticType::Medium), 1)]).await;
    h.checkout.begin().await.unwrap();
    h.api.delay_next_get_cart(Duration::from_millis(50));
    let payments = ScriptedPayments::default();

    let (first, second) = tokio::join!(
        h.checkout.place_order(pickup_form(PaymentMethod::Cash), &payments),
        h.checkout.place_order(pickup_form(PaymentMethod::Cash), &payments),
    );

    assert!(first.is_ok());
    assert!(matches!(second, Err(StoreError::SubmissionInFlight)));
    assert_eq!(h.api.count(Op::CreateOrder), 1);
    assert!(matches!(h.checkout.state(), CheckoutState::Completed { .. }));
}

#[tokio::test]
async fn test_new_checkout_after_completion() {
    let h = Harness::signed_in(&[(product(1, "Mesa", 150, LogisticType::Medium), 1)]).await;
    h.checkout.begin().await.unwrap();
    h.checkout
        .place_order(pickup_form(PaymentMethod::Cash), &ScriptedPayments::default())
        .await
        .unwrap();

    // The cart was cleared, so a second checkout has nothing to order.
    let result = h.checkout.begin().await;
    assert!(matches!(result, Err(StoreError::Validation(_))));
}
