//! Guest to authenticated transitions and stale response handling.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use hearth_core::LogisticType;
use hearth_integration_tests::{Call, Failure, Harness, Op, customer, product};
use hearth_storefront::api::{NewCartLine, StoreApi};
use hearth_storefront::cart::{AddItemRequest, CartOrigin, GUEST_CART_KEY, KeyValueStore, load_guest_items};
use hearth_storefront::error::StoreError;

#[tokio::test]
async fn test_sign_in_replays_guest_lines_in_order() {
    let h = Harness::guest();
    let sofa = product(1, "Sofá", 450, LogisticType::Heavy);
    let lamp = product(3, "Lámpara", 25, LogisticType::Small);
    h.api.stock(&sofa);
    h.api.stock(&lamp);

    h.cart.add_item(AddItemRequest::new(sofa.clone(), 1)).await.unwrap();
    h.cart.add_item(AddItemRequest::new(lamp.clone(), 3)).await.unwrap();
    assert_eq!(h.api.count(Op::AddItem), 0);

    let snapshot = h.cart.sign_in(customer()).await.unwrap();

    let adds: Vec<NewCartLine> = h
        .api
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            Call::AddItem(line) => Some(line),
            _ => None,
        })
        .collect();
    assert_eq!(adds.len(), 2);
    assert_eq!(adds[0].product_id, sofa.id);
    assert_eq!(adds[1].product_id, lamp.id);
    assert_eq!(adds[1].quantity, 3);

    assert_eq!(snapshot.origin, CartOrigin::Authenticated);
    assert_eq!(snapshot.unit_count(), 4);
    assert_eq!(h.store.get(GUEST_CART_KEY).unwrap(), None);
}

#[tokio::test]
async fn test_partial_sync_keeps_unsynced_lines_for_retry() {
    let h = Harness::guest();
    let sofa = product(1, "Sofá", 450, LogisticType::Heavy);
    let lamp = product(3, "Lámpara", 25, LogisticType::Small);
    h.api.stock(&sofa);
    // The lamp is unknown to the backend, so its line is refused.
    h.cart.add_item(AddItemRequest::new(sofa, 1)).await.unwrap();
    h.cart.add_item(AddItemRequest::new(lamp.clone(), 2)).await.unwrap();

    let result = h.cart.sign_in(customer()).await;
    assert!(matches!(result, Err(StoreError::BackendRejected(_))));
    assert_eq!(h.cart.origin(), CartOrigin::Authenticated);

    let left = load_guest_items(&h.store).unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].product_ref, lamp.id);

    h.api.stock(&lamp);
    let snapshot = h
        .cart
        .sync_guest_cart_on_authentication(left)
        .await
        .unwrap();

    // Three attempts in total and no duplicated sofa.
    assert_eq!(h.api.count(Op::AddItem), 3);
    assert_eq!(snapshot.line_count(), 2);
    assert_eq!(snapshot.unit_count(), 3);
    assert!(load_guest_items(&h.store).unwrap().is_empty());
}

#[tokio::test]
async fn test_syncing_a_subset_keeps_other_stored_lines() {
    let h = Harness::guest();
    let sofa = product(1, "Sofá", 450, LogisticType::Heavy);
    let chair = product(2, "Silla", 40, LogisticType::Small);
    let lamp = product(3, "Lámpara", 25, LogisticType::Small);
    for item in [&sofa, &chair, &lamp] {
        h.api.stock(item);
        h.cart.add_item(AddItemRequest::new(item.clone(), 1)).await.unwrap();
    }
    h.api.fail(Op::AddItem, Failure::Unavailable, 1);
    assert!(h.cart.sign_in(customer()).await.is_err());

    let stored = load_guest_items(&h.store).unwrap();
    assert_eq!(stored.len(), 3);
    let sofa_line: Vec<_> = stored
        .into_iter()
        .filter(|item| item.product_ref == sofa.id)
        .collect();

    let snapshot = h
        .cart
        .sync_guest_cart_on_authentication(sofa_line)
        .await
        .unwrap();

    assert_eq!(snapshot.line_count(), 1);
    let left = load_guest_items(&h.store).unwrap();
    assert_eq!(left.len(), 2);
    assert_eq!(left[0].product_ref, chair.id);
    assert_eq!(left[1].product_ref, lamp.id);
}

#[tokio::test]
async fn test_sync_stops_at_first_failure() {
    let h = Harness::guest();
    for (id, name) in [(1, "Sofá"), (2, "Silla"), (3, "Lámpara")] {
        let item = product(id, name, 30, LogisticType::Small);
        h.api.stock(&item);
        h.cart.add_item(AddItemRequest::new(item, 1)).await.unwrap();
    }
    h.api.fail(Op::AddItem, Failure::Unavailable, 1);

    let result = h.cart.sign_in(customer()).await;

    assert!(matches!(result, Err(StoreError::Network(_))));
    assert_eq!(h.api.count(Op::AddItem), 1);
    assert_eq!(load_guest_items(&h.store).unwrap().len(), 3);
    assert!(h.api.server_lines().is_empty());
}

#[tokio::test]
async fn test_sync_requires_authentication() {
    let h = Harness::guest();
    let chair = product(2, "Silla", 40, LogisticType::Small);
    let snapshot = h.cart.add_item(AddItemRequest::new(chair, 1)).await.unwrap();

    let result = h
        .cart
        .sync_guest_cart_on_authentication(snapshot.items)
        .await;
    assert!(matches!(result, Err(StoreError::Unauthorized(_))));
    assert_eq!(h.api.count(Op::AddItem), 0);
}

#[tokio::test]
async fn test_sign_out_returns_to_guest_cart() {
    let chair = product(2, "Silla", 40, LogisticType::Small);
    let h = Harness::signed_in(&[(chair, 2)]).await;
    assert_eq!(h.cart.snapshot().origin, CartOrigin::Authenticated);

    let snapshot = h.cart.sign_out().await;

    assert_eq!(snapshot.origin, CartOrigin::Guest);
    assert!(snapshot.is_empty());
    assert_eq!(h.api.server_lines().len(), 1);
}

#[tokio::test]
async fn test_stale_fetch_is_discarded() {
    let chair = product(2, "Silla", 40, LogisticType::Small);
    let lamp = product(3, "Lámpara", 25, LogisticType::Small);
    let h = Harness::signed_in(&[(chair, 1)]).await;
    h.api.stock(&lamp);
    h.api.delay_next_get_cart(Duration::from_millis(200));

    let slow = h.cart.fetch_cart();
    let fast = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.api
            .add_item(&NewCartLine {
                product_id: lamp.id,
                quantity: 1,
                measure: None,
            })
            .await
            .unwrap();
        h.cart.fetch_cart().await
    };
    let (slow_result, fast_result) = tokio::join!(slow, fast);

    assert_eq!(fast_result.line_count(), 2);
    // The slow response saw one line; it must not overwrite the newer cart.
    assert_eq!(slow_result.line_count(), 2);
    assert_eq!(h.cart.snapshot().line_count(), 2);
}

#[tokio::test]
async fn test_invalidate_pending_drops_in_flight_fetch() {
    let chair = product(2, "Silla", 40, LogisticType::Small);
    let h = Harness::signed_in(&[(chair, 1)]).await;
    let before = h.cart.snapshot();
    h.api.backend().lines.clear();
    h.api.delay_next_get_cart(Duration::from_millis(100));

    let fetch = h.cart.fetch_cart();
    let invalidate = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.cart.invalidate_pending();
    };
    let (snapshot, ()) = tokio::join!(fetch, invalidate);

    assert_eq!(snapshot, before);
    assert_eq!(h.cart.snapshot().line_count(), 1);
}
