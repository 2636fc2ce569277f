//! Cart state manager.
//!
//! `CartManager` is the single owner of cart state. Guests mutate the local
//! store; authenticated customers mutate the server cart. Every successful
//! mutation ends with a refetch, so published state always reflects the
//! authoritative source rather than a local recomputation.
//!
//! Concurrent mutations are not serialized: the last response to land wins.
//! Fetches are stamped with a request id and only the latest issued fetch may
//! publish, so a late response never overwrites newer state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use hearth_core::{CartItemId, Email, LogisticType, Price, ProductId, round_cents};

use super::store::{GUEST_CART_KEY, KeyValueStore, load_guest_items, save_guest_items};
use super::{
    CartItem, CartOrigin, CartSnapshot, GUEST_CART_CEILING, MAX_LINE_QUANTITY, clamp_quantity,
    effective_unit_price, measure_adjustment, subtotal,
};
use crate::api::{ApiError, NewCartLine, StoreApi};
use crate::error::{Result, StoreError, add_breadcrumb, clear_sentry_user, set_sentry_user};
use crate::session::Customer;

/// Catalog data of the product being added.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductSnapshot {
    pub id: ProductId,
    pub name: String,
    pub price: Decimal,
    pub promo_price: Option<Decimal>,
    pub logistic_type: LogisticType,
}

/// Input of [`CartManager::add_item`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddItemRequest {
    pub product: ProductSnapshot,
    pub quantity: i64,
    pub measure: Option<String>,
}

impl AddItemRequest {
    #[must_use]
    pub const fn new(product: ProductSnapshot, quantity: i64) -> Self {
        Self {
            product,
            quantity,
            measure: None,
        }
    }

    #[must_use]
    pub fn with_measure(mut self, measure: impl Into<String>) -> Self {
        self.measure = Some(measure.into());
        self
    }
}

/// Owner of the cart.
///
/// Cheap to clone; clones share state and subscribers.
pub struct CartManager<A, S> {
    inner: Arc<CartManagerInner<A, S>>,
}

struct CartManagerInner<A, S> {
    api: A,
    store: S,
    customer: RwLock<Option<Customer>>,
    latest_request: AtomicU64,
    state: watch::Sender<CartSnapshot>,
}

impl<A, S> Clone for CartManager<A, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: StoreApi, S: KeyValueStore> CartManager<A, S> {
    /// Create a manager for a guest; call [`fetch_cart`](Self::fetch_cart)
    /// to load the stored cart.
    pub fn new(api: A, store: S) -> Self {
        let (state, _) = watch::channel(CartSnapshot::empty(CartOrigin::Guest));
        Self {
            inner: Arc::new(CartManagerInner {
                api,
                store,
                customer: RwLock::new(None),
                latest_request: AtomicU64::new(0),
                state,
            }),
        }
    }

    /// The backend collaborator this cart talks to.
    pub fn api(&self) -> &A {
        &self.inner.api
    }

    /// Observe cart changes, including fetch failures in
    /// [`CartSnapshot::error`].
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CartSnapshot> {
        self.inner.state.subscribe()
    }

    /// Last published state.
    #[must_use]
    pub fn snapshot(&self) -> CartSnapshot {
        self.inner.state.borrow().clone()
    }

    #[must_use]
    pub fn customer(&self) -> Option<Customer> {
        self.inner
            .customer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn origin(&self) -> CartOrigin {
        if self.customer().is_some() {
            CartOrigin::Authenticated
        } else {
            CartOrigin::Guest
        }
    }

    /// Discard every fetch currently in flight; their responses will not be
    /// published.
    pub fn invalidate_pending(&self) {
        self.inner.latest_request.fetch_add(1, Ordering::SeqCst);
    }

    fn begin_request(&self) -> u64 {
        self.inner.latest_request.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn set_customer(&self, customer: Option<Customer>) {
        *self
            .inner
            .customer
            .write()
            .unwrap_or_else(PoisonError::into_inner) = customer;
    }

    // =========================================================================
    // Fetch
    // =========================================================================

    /// Load the authoritative cart and publish it.
    ///
    /// Never fails: on error the published cart is reset to empty and the
    /// reason is carried in [`CartSnapshot::error`].
    #[instrument(skip(self))]
    pub async fn fetch_cart(&self) -> CartSnapshot {
        let request_id = self.begin_request();
        let origin = self.origin();

        let snapshot = match self.load(origin).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Cart fetch failed, resetting to empty");
                e.report();
                CartSnapshot {
                    error: Some(e.user_message()),
                    ..CartSnapshot::empty(origin)
                }
            }
        };

        self.publish(request_id, snapshot)
    }

    async fn load(&self, origin: CartOrigin) -> Result<CartSnapshot> {
        let (items, total) = match origin {
            CartOrigin::Guest => {
                let items = load_guest_items(&self.inner.store)?;
                let total = subtotal(&items);
                (items, total)
            }
            CartOrigin::Authenticated => {
                let items = self.inner.api.get_cart().await?;
                let total = match self.inner.api.get_cart_total().await {
                    Ok(Some(total)) => round_cents(total.max(Decimal::ZERO)),
                    Ok(None) => subtotal(&items),
                    Err(e) => {
                        warn!(error = %e, "Cart total unavailable, using line totals");
                        subtotal(&items)
                    }
                };
                (items, total)
            }
        };

        Ok(CartSnapshot {
            items,
            total,
            origin,
            error: None,
        })
    }

    /// Publish a fetched snapshot if it answers the latest request.
    fn publish(&self, request_id: u64, snapshot: CartSnapshot) -> CartSnapshot {
        let latest = &self.inner.latest_request;
        let published = self.inner.state.send_if_modified(|current| {
            if latest.load(Ordering::SeqCst) != request_id {
                return false;
            }
            *current = snapshot;
            true
        });

        if !published {
            debug!(request_id, "Discarding stale cart response");
        }
        self.snapshot()
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Add units of a product, merging into an existing line of the same
    /// product and measure.
    ///
    /// # Errors
    ///
    /// - `Validation` for a quantity below 1 or an unknown measure
    /// - `LimitExceeded` when the line would exceed 5 units or a guest cart
    ///   would exceed €1000.00; the cart is left unchanged
    /// - backend failures for authenticated carts
    #[instrument(skip(self, request), fields(product_id = %request.product.id, quantity = request.quantity))]
    pub async fn add_item(&self, request: AddItemRequest) -> Result<CartSnapshot> {
        reported(self.try_add_item(request).await)
    }

    async fn try_add_item(&self, request: AddItemRequest) -> Result<CartSnapshot> {
        if request.quantity < 1 {
            return Err(StoreError::Validation(
                "Quantity must be at least 1".to_string(),
            ));
        }
        let quantity = u8::try_from(request.quantity)
            .ok()
            .filter(|q| *q <= MAX_LINE_QUANTITY)
            .ok_or_else(line_limit)?;
        let measure = normalize_measure(request.measure.as_deref());
        let product = &request.product;
        let unit_price = effective_unit_price(product.price, product.promo_price, measure)?;

        match self.origin() {
            CartOrigin::Guest => self.add_guest_line(product, quantity, measure, unit_price)?,
            CartOrigin::Authenticated => {
                let existing: u32 = self
                    .snapshot()
                    .items
                    .iter()
                    .filter(|item| item.product_ref == product.id && item.measure.as_deref() == measure)
                    .map(|item| u32::from(item.quantity))
                    .sum();
                if existing + u32::from(quantity) > u32::from(MAX_LINE_QUANTITY) {
                    return Err(line_limit());
                }
                self.inner
                    .api
                    .add_item(&NewCartLine {
                        product_id: product.id,
                        quantity,
                        measure: measure.map(str::to_string),
                    })
                    .await?;
            }
        }

        add_breadcrumb(
            "cart",
            "Added item",
            Some(&[
                ("product_id", product.id.to_string().as_str()),
                ("quantity", quantity.to_string().as_str()),
            ]),
        );
        Ok(self.fetch_cart().await)
    }

    fn add_guest_line(
        &self,
        product: &ProductSnapshot,
        quantity: u8,
        measure: Option<&str>,
        unit_price: Decimal,
    ) -> Result<()> {
        let mut items = load_guest_items(&self.inner.store)?;
        let id = CartItemId::guest(product.id, measure);

        if let Some(line) = items.iter_mut().find(|item| item.id == id) {
            if line.quantity + quantity > MAX_LINE_QUANTITY {
                return Err(line_limit());
            }
            line.quantity += quantity;
            line.unit_price = unit_price;
        } else {
            items.push(CartItem {
                id,
                product_ref: product.id,
                name: product.name.clone(),
                unit_price,
                quantity,
                measure: measure.map(str::to_string),
                logistic_type: product.logistic_type,
            });
        }

        check_guest_ceiling(&items)?;
        save_guest_items(&self.inner.store, &items)
    }

    /// Set the quantity of a line, clamped to at most 5.
    ///
    /// A `measure` different from the line's switches the variant.
    ///
    /// # Errors
    ///
    /// - `RemoveInstead` for a quantity below 1; the line is untouched
    /// - `Validation` for an unknown line or measure
    /// - `LimitExceeded` when a guest cart would exceed €1000.00
    /// - backend failures for authenticated carts
    #[instrument(skip(self), fields(item_id = %item_id))]
    pub async fn update_item_quantity(
        &self,
        item_id: &CartItemId,
        quantity: i64,
        measure: Option<&str>,
    ) -> Result<CartSnapshot> {
        reported(self.try_update_item(item_id, quantity, measure).await)
    }

    async fn try_update_item(
        &self,
        item_id: &CartItemId,
        quantity: i64,
        measure: Option<&str>,
    ) -> Result<CartSnapshot> {
        if quantity < 1 {
            return Err(StoreError::RemoveInstead(item_id.clone()));
        }
        let quantity = clamp_quantity(quantity);
        let measure = normalize_measure(measure);
        if let Some(m) = measure
            && measure_adjustment(m).is_none()
        {
            return Err(StoreError::Validation(format!("Unknown measure '{m}'")));
        }

        match self.origin() {
            CartOrigin::Guest => self.update_guest_line(item_id, quantity, measure)?,
            CartOrigin::Authenticated => {
                self.inner
                    .api
                    .update_item(item_id, quantity, measure)
                    .await?;
            }
        }

        add_breadcrumb(
            "cart",
            "Updated quantity",
            Some(&[
                ("item_id", item_id.as_str()),
                ("quantity", quantity.to_string().as_str()),
            ]),
        );
        Ok(self.fetch_cart().await)
    }

    fn update_guest_line(
        &self,
        item_id: &CartItemId,
        quantity: u8,
        measure: Option<&str>,
    ) -> Result<()> {
        let mut items = load_guest_items(&self.inner.store)?;
        let not_found = || StoreError::Validation(format!("Item {item_id} is not in the cart"));
        let current = items
            .iter()
            .find(|item| &item.id == item_id)
            .ok_or_else(not_found)?;

        // Switching measure re-keys the line and re-prices it.
        let variant = match measure {
            Some(new) if current.measure.as_deref() != Some(new) => {
                let new_id = CartItemId::guest(current.product_ref, Some(new));
                if items.iter().any(|item| item.id == new_id) {
                    return Err(StoreError::Validation(format!(
                        "This product is already in the cart in size {new}"
                    )));
                }
                let old_adjustment = current
                    .measure
                    .as_deref()
                    .and_then(measure_adjustment)
                    .unwrap_or_default();
                let new_adjustment = measure_adjustment(new).unwrap_or_default();
                let unit_price =
                    (current.unit_price - old_adjustment + new_adjustment).max(Decimal::ZERO);
                Some((new_id, new.to_string(), unit_price))
            }
            _ => None,
        };

        let line = items
            .iter_mut()
            .find(|item| &item.id == item_id)
            .ok_or_else(not_found)?;
        line.quantity = quantity;
        if let Some((id, measure, unit_price)) = variant {
            line.id = id;
            line.measure = Some(measure);
            line.unit_price = unit_price;
        }

        check_guest_ceiling(&items)?;
        save_guest_items(&self.inner.store, &items)
    }

    /// Remove a line. Removing an absent line succeeds.
    ///
    /// # Errors
    ///
    /// Returns storage or backend failures other than "not found".
    #[instrument(skip(self), fields(item_id = %item_id))]
    pub async fn remove_item(&self, item_id: &CartItemId) -> Result<CartSnapshot> {
        reported(self.try_remove_item(item_id).await)
    }

    async fn try_remove_item(&self, item_id: &CartItemId) -> Result<CartSnapshot> {
        match self.origin() {
            CartOrigin::Guest => {
                let mut items = load_guest_items(&self.inner.store)?;
                let before = items.len();
                items.retain(|item| &item.id != item_id);
                if items.len() == before {
                    debug!("Item already absent");
                } else {
                    save_guest_items(&self.inner.store, &items)?;
                }
            }
            CartOrigin::Authenticated => match self.inner.api.remove_item(item_id).await {
                Ok(()) => {}
                Err(ApiError::NotFound(_)) => debug!("Item already absent"),
                Err(e) => return Err(e.into()),
            },
        }

        add_breadcrumb("cart", "Removed item", Some(&[("item_id", item_id.as_str())]));
        Ok(self.fetch_cart().await)
    }

    /// Empty the cart.
    ///
    /// # Errors
    ///
    /// On failure the published cart is left as it was and the error is
    /// returned.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<CartSnapshot> {
        reported(self.try_clear().await)
    }

    async fn try_clear(&self) -> Result<CartSnapshot> {
        match self.origin() {
            CartOrigin::Guest => self.inner.store.remove(GUEST_CART_KEY)?,
            CartOrigin::Authenticated => self.inner.api.empty_cart().await?,
        }
        info!("Cart cleared");
        add_breadcrumb("cart", "Cleared cart", None);
        Ok(self.fetch_cart().await)
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    /// Switch to the customer's server cart, replaying any stored guest lines
    /// into it first.
    ///
    /// # Errors
    ///
    /// Returns the failure that aborted the guest sync. The customer stays
    /// signed in and the unsynced lines stay in the local store.
    #[instrument(skip(self, customer), fields(user_id = %customer.id))]
    pub async fn sign_in(&self, customer: Customer) -> Result<CartSnapshot> {
        set_sentry_user(&customer.id, customer.email.as_ref().map(Email::as_str));
        self.set_customer(Some(customer));
        self.invalidate_pending();

        let guest_items = match load_guest_items(&self.inner.store) {
            Ok(items) => items,
            Err(e) => {
                e.report();
                self.fetch_cart().await;
                return Err(e);
            }
        };

        if guest_items.is_empty() {
            Ok(self.fetch_cart().await)
        } else {
            self.sync_guest_cart_on_authentication(guest_items).await
        }
    }

    /// Return to the locally stored guest cart.
    #[instrument(skip(self))]
    pub async fn sign_out(&self) -> CartSnapshot {
        self.set_customer(None);
        clear_sentry_user();
        self.invalidate_pending();
        self.fetch_cart().await
    }

    /// Replay guest lines into the server cart, one `add` per line, in order.
    ///
    /// Each accepted line is dropped from the local store right away, so a
    /// retry after a partial failure only replays what is left. On the first
    /// failure the remaining lines are not attempted. Stored lines that are
    /// not in `guest_items` are left untouched.
    ///
    /// # Errors
    ///
    /// - `Unauthorized` when no customer is signed in
    /// - the failure that aborted the replay
    #[instrument(skip(self, guest_items), fields(lines = guest_items.len()))]
    pub async fn sync_guest_cart_on_authentication(
        &self,
        guest_items: Vec<CartItem>,
    ) -> Result<CartSnapshot> {
        let result = self.replay_guest_items(guest_items).await;
        let snapshot = self.fetch_cart().await;
        reported(result.map(|()| snapshot))
    }

    async fn replay_guest_items(&self, guest_items: Vec<CartItem>) -> Result<()> {
        if self.origin() != CartOrigin::Authenticated {
            return Err(StoreError::Unauthorized(
                "sign in before syncing the guest cart".to_string(),
            ));
        }

        let mut synced: Vec<CartItemId> = Vec::with_capacity(guest_items.len());
        for item in guest_items {
            let line = NewCartLine {
                product_id: item.product_ref,
                quantity: clamp_quantity(i64::from(item.quantity)),
                measure: item.measure.clone(),
            };

            if let Err(e) = self.inner.api.add_item(&line).await {
                let err = StoreError::from(e);
                warn!(
                    synced = ?synced,
                    failed = %item.id,
                    error = %err,
                    "Guest cart sync aborted, unsynced lines kept for retry"
                );
                return Err(err);
            }

            self.forget_guest_line(&item.id)?;
            debug!(item_id = %item.id, "Guest line synced");
            synced.push(item.id);
        }

        // Saving an empty guest cart removes the key; lines that were not
        // part of this replay stay stored.
        let remaining = load_guest_items(&self.inner.store)?.len();
        info!(lines = synced.len(), remaining, "Guest cart synced");
        add_breadcrumb("cart", "Synced guest cart", None);
        Ok(())
    }

    fn forget_guest_line(&self, item_id: &CartItemId) -> Result<()> {
        let mut items = load_guest_items(&self.inner.store)?;
        items.retain(|item| &item.id != item_id);
        save_guest_items(&self.inner.store, &items)
    }
}

fn reported<T>(result: Result<T>) -> Result<T> {
    result.inspect_err(StoreError::report)
}

fn line_limit() -> StoreError {
    StoreError::LimitExceeded(format!(
        "At most {MAX_LINE_QUANTITY} units of a product per order"
    ))
}

fn check_guest_ceiling(items: &[CartItem]) -> Result<()> {
    if subtotal(items) > GUEST_CART_CEILING {
        return Err(StoreError::LimitExceeded(format!(
            "Carts without an account are limited to {}",
            Price::eur(GUEST_CART_CEILING)
        )));
    }
    Ok(())
}

fn normalize_measure(measure: Option<&str>) -> Option<&str> {
    measure.map(str::trim).filter(|m| !m.is_empty())
}
