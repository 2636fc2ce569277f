//! Scenario tests for the Hearth engine.
//!
//! The engine's collaborators are replaced by in-process fakes so every
//! scenario runs without a backend:
//!
//! - [`FakeStoreApi`] - an in-memory REST backend with failure injection and
//!   a call log
//! - [`FakeGeocoder`] - a fixed postal code table
//! - [`ScriptedPayments`] - payment outcomes played back in order
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p hearth-integration-tests
//! ```

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rust_decimal::Decimal;
use uuid::Uuid;

use hearth_core::{CartItemId, DeliveryType, DiscountType, LogisticType, PaymentMethod, ProductId, UserId};
use hearth_storefront::api::{
    ApiError, CouponRequest, CouponVerdict, NewCartLine, OrderReceipt, PaymentIntent,
    PaymentIntentRequest, StoreApi,
};
use hearth_storefront::cart::{CartItem, CartManager, MemoryStore, ProductSnapshot, effective_unit_price};
use hearth_storefront::checkout::{CheckoutForm, CheckoutOrchestrator, CheckoutOrder, PaymentConfirmer, PaymentOutcome};
use hearth_storefront::coupon::CouponResolver;
use hearth_storefront::geo::{Coordinates, Geocoder};
use hearth_storefront::orders::OrderTracking;
use hearth_storefront::session::Customer;
use hearth_storefront::shipping::ShippingPolicy;

// =============================================================================
// Locations
// =============================================================================

/// Postal code of the store itself.
pub const STORE_POSTAL_CODE: &str = "23680";
/// About 37 km from the store.
pub const NEARBY_POSTAL_CODE: &str = "23001";
/// About 330 km from the store.
pub const FAR_POSTAL_CODE: &str = "28001";

/// Store coordinates used by the default shipping policy.
#[must_use]
pub fn store_location() -> Coordinates {
    ShippingPolicy::default().store_location
}

// =============================================================================
// FakeStoreApi
// =============================================================================

/// Backend operation, for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    GetCart,
    GetCartTotal,
    AddItem,
    UpdateItem,
    RemoveItem,
    EmptyCart,
    ValidateCoupon,
    CreatePaymentIntent,
    CreateOrder,
    TrackOrder,
}

/// Recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    GetCart,
    GetCartTotal,
    AddItem(NewCartLine),
    UpdateItem {
        item_id: CartItemId,
        quantity: u8,
        measure: Option<String>,
    },
    RemoveItem(CartItemId),
    EmptyCart,
    ValidateCoupon(CouponRequest),
    CreatePaymentIntent(PaymentIntentRequest),
    CreateOrder {
        order: CheckoutOrder,
        idempotency_key: Uuid,
    },
    TrackOrder(String),
}

impl Call {
    const fn op(&self) -> Op {
        match self {
            Self::GetCart => Op::GetCart,
            Self::GetCartTotal => Op::GetCartTotal,
            Self::AddItem(_) => Op::AddItem,
            Self::UpdateItem { .. } => Op::UpdateItem,
            Self::RemoveItem(_) => Op::RemoveItem,
            Self::EmptyCart => Op::EmptyCart,
            Self::ValidateCoupon(_) => Op::ValidateCoupon,
            Self::CreatePaymentIntent(_) => Op::CreatePaymentIntent,
            Self::CreateOrder { .. } => Op::CreateOrder,
            Self::TrackOrder(_) => Op::TrackOrder,
        }
    }
}

/// Injected failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// 503, reads as a network failure.
    Unavailable,
    Unauthorized,
    NotFound,
    Rejected(String),
}

impl Failure {
    fn into_error(self) -> ApiError {
        match self {
            Self::Unavailable => ApiError::Server {
                status: 503,
                message: "service unavailable".to_string(),
            },
            Self::Unauthorized => ApiError::Unauthorized,
            Self::NotFound => ApiError::NotFound("no such resource".to_string()),
            Self::Rejected(reason) => ApiError::Rejected(reason),
        }
    }
}

/// Catalog entry known to the fake backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: String,
    pub price: Decimal,
    pub promo_price: Option<Decimal>,
    pub logistic_type: LogisticType,
}

/// State of the fake backend.
#[derive(Debug, Default)]
pub struct Backend {
    pub catalog: HashMap<ProductId, CatalogEntry>,
    pub lines: Vec<CartItem>,
    next_line_id: i64,
    /// Reported by `GET /cart/total` instead of the line sum.
    pub total_override: Option<Decimal>,
    pub coupons: HashMap<String, CouponVerdict>,
    /// Client secret returned by the payment intent endpoint; `None` answers
    /// without one.
    pub client_secret: Option<String>,
    /// Receipts by idempotency key.
    pub orders: Vec<(Uuid, OrderReceipt)>,
    pub tracking: HashMap<String, OrderTracking>,
    pub calls: Vec<Call>,
    failures: HashMap<Op, VecDeque<Failure>>,
    get_cart_delays: VecDeque<Duration>,
}

/// In-memory REST backend. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct FakeStoreApi {
    backend: Arc<Mutex<Backend>>,
}

impl FakeStoreApi {
    #[must_use]
    pub fn new() -> Self {
        let api = Self::default();
        api.backend().client_secret = Some("pi_test_secret".to_string());
        api
    }

    pub fn backend(&self) -> MutexGuard<'_, Backend> {
        self.backend.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a product the backend can add to carts.
    pub fn stock(&self, product: &ProductSnapshot) {
        self.backend().catalog.insert(
            product.id,
            CatalogEntry {
                name: product.name.clone(),
                price: product.price,
                promo_price: product.promo_price,
                logistic_type: product.logistic_type,
            },
        );
    }

    /// Register a coupon the backend accepts.
    pub fn offer_coupon(&self, code: &str, kind: DiscountType, discount: Decimal) {
        self.backend().coupons.insert(
            code.to_string(),
            CouponVerdict {
                valid: true,
                kind: Some(kind),
                discount,
                message: None,
            },
        );
    }

    /// Fail the next `times` calls of `op`.
    pub fn fail(&self, op: Op, failure: Failure, times: usize) {
        let mut backend = self.backend();
        let queue = backend.failures.entry(op).or_default();
        for _ in 0..times {
            queue.push_back(failure.clone());
        }
    }

    /// Delay the next `GET /cart`.
    pub fn delay_next_get_cart(&self, delay: Duration) {
        self.backend().get_cart_delays.push_back(delay);
    }

    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.backend().calls.clone()
    }

    #[must_use]
    pub fn count(&self, op: Op) -> usize {
        self.backend().calls.iter().filter(|call| call.op() == op).count()
    }

    /// Order submissions, in order.
    #[must_use]
    pub fn submitted_orders(&self) -> Vec<(CheckoutOrder, Uuid)> {
        self.backend()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::CreateOrder {
                    order,
                    idempotency_key,
                } => Some((order.clone(), *idempotency_key)),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn server_lines(&self) -> Vec<CartItem> {
        self.backend().lines.clone()
    }

    /// Record a call and pop an injected failure for it.
    fn record(&self, call: Call) -> Result<(), ApiError> {
        let mut backend = self.backend();
        let op = call.op();
        backend.calls.push(call);
        match backend.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(failure) => Err(failure.into_error()),
            None => Ok(()),
        }
    }
}

impl StoreApi for FakeStoreApi {
    async fn get_cart(&self) -> Result<Vec<CartItem>, ApiError> {
        let delay = self.backend().get_cart_delays.pop_front();
        // Snapshot before the delay, like a response that was already built.
        let lines = self.backend().lines.clone();
        self.record(Call::GetCart)?;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(lines)
    }

    async fn get_cart_total(&self) -> Result<Option<Decimal>, ApiError> {
        self.record(Call::GetCartTotal)?;
        let backend = self.backend();
        Ok(backend.total_override.or_else(|| {
            Some(
                backend
                    .lines
                    .iter()
                    .map(CartItem::line_total)
                    .sum::<Decimal>(),
            )
        }))
    }

    async fn add_item(&self, line: &NewCartLine) -> Result<(), ApiError> {
        self.record(Call::AddItem(line.clone()))?;
        let mut backend = self.backend();
        let entry = backend
            .catalog
            .get(&line.product_id)
            .cloned()
            .ok_or_else(|| ApiError::Rejected(format!("unknown product {}", line.product_id)))?;

        if let Some(existing) = backend
            .lines
            .iter_mut()
            .find(|item| item.product_ref == line.product_id && item.measure == line.measure)
        {
            existing.quantity += line.quantity;
            return Ok(());
        }

        backend.next_line_id += 1;
        let id = CartItemId::from(backend.next_line_id);
        let unit_price =
            effective_unit_price(entry.price, entry.promo_price, line.measure.as_deref())
                .map_err(|e| ApiError::Rejected(e.to_string()))?;
        backend.lines.push(CartItem {
            id,
            product_ref: line.product_id,
            name: entry.name,
            unit_price,
            quantity: line.quantity,
            measure: line.measure.clone(),
            logistic_type: entry.logistic_type,
        });
        Ok(())
    }

    async fn update_item(
        &self,
        item_id: &CartItemId,
        quantity: u8,
        measure: Option<&str>,
    ) -> Result<(), ApiError> {
        self.record(Call::UpdateItem {
            item_id: item_id.clone(),
            quantity,
            measure: measure.map(str::to_string),
        })?;
        let mut backend = self.backend();
        let line = backend
            .lines
            .iter_mut()
            .find(|item| &item.id == item_id)
            .ok_or_else(|| ApiError::NotFound(format!("cart item {item_id}")))?;
        line.quantity = quantity;
        if let Some(measure) = measure {
            line.measure = Some(measure.to_string());
        }
        Ok(())
    }

    async fn remove_item(&self, item_id: &CartItemId) -> Result<(), ApiError> {
        self.record(Call::RemoveItem(item_id.clone()))?;
        let mut backend = self.backend();
        let before = backend.lines.len();
        backend.lines.retain(|item| &item.id != item_id);
        if backend.lines.len() == before {
            return Err(ApiError::NotFound(format!("cart item {item_id}")));
        }
        Ok(())
    }

    async fn empty_cart(&self) -> Result<(), ApiError> {
        self.record(Call::EmptyCart)?;
        self.backend().lines.clear();
        Ok(())
    }

    async fn validate_coupon(&self, request: &CouponRequest) -> Result<CouponVerdict, ApiError> {
        self.record(Call::ValidateCoupon(request.clone()))?;
        Ok(self
            .backend()
            .coupons
            .get(&request.code)
            .cloned()
            .unwrap_or(CouponVerdict {
                valid: false,
                kind: None,
                discount: Decimal::ZERO,
                message: Some("Cupón no válido".to_string()),
            }))
    }

    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> Result<Option<PaymentIntent>, ApiError> {
        self.record(Call::CreatePaymentIntent(request.clone()))?;
        Ok(self
            .backend()
            .client_secret
            .clone()
            .map(|client_secret| PaymentIntent { client_secret }))
    }

    async fn create_order(
        &self,
        order: &CheckoutOrder,
        idempotency_key: Uuid,
    ) -> Result<OrderReceipt, ApiError> {
        self.record(Call::CreateOrder {
            order: order.clone(),
            idempotency_key,
        })?;
        let mut backend = self.backend();
        if let Some((_, receipt)) = backend.orders.iter().find(|(key, _)| *key == idempotency_key) {
            return Ok(receipt.clone());
        }
        let number = backend.orders.len() + 1;
        let receipt = OrderReceipt {
            tracking_number: format!("HRT-{number:04}"),
            order_id: i64::try_from(number).ok(),
        };
        backend.orders.push((idempotency_key, receipt.clone()));
        Ok(receipt)
    }

    async fn track_order(&self, tracking_number: &str) -> Result<OrderTracking, ApiError> {
        self.record(Call::TrackOrder(tracking_number.to_string()))?;
        self.backend()
            .tracking
            .get(tracking_number)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("order {tracking_number}")))
    }
}

// =============================================================================
// FakeGeocoder
// =============================================================================

/// Postal code table. Unknown codes do not resolve.
#[derive(Debug, Clone)]
pub struct FakeGeocoder {
    table: Arc<HashMap<String, Coordinates>>,
    lookups: Arc<AtomicUsize>,
}

impl FakeGeocoder {
    /// Knows the store, a nearby town and a distant city.
    #[must_use]
    pub fn spain() -> Self {
        let table = HashMap::from([
            (STORE_POSTAL_CODE.to_string(), store_location()),
            (NEARBY_POSTAL_CODE.to_string(), Coordinates::new(37.7796, -3.7849)),
            (FAR_POSTAL_CODE.to_string(), Coordinates::new(40.4168, -3.7038)),
        ]);
        Self {
            table: Arc::new(table),
            lookups: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[must_use]
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl Geocoder for FakeGeocoder {
    async fn locate(&self, postal_code: &str) -> Option<Coordinates> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.table.get(postal_code.trim()).copied()
    }
}

// =============================================================================
// ScriptedPayments
// =============================================================================

/// Plays back payment outcomes; `Cancelled` once the script runs out.
#[derive(Debug, Default)]
pub struct ScriptedPayments {
    outcomes: Mutex<VecDeque<PaymentOutcome>>,
    requests: Mutex<Vec<(PaymentMethod, Decimal)>>,
}

impl ScriptedPayments {
    #[must_use]
    pub fn new(outcomes: impl IntoIterator<Item = PaymentOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every charge confirmed with the given intent id.
    #[must_use]
    pub fn approving(payment_intent: &str) -> Self {
        Self::new([PaymentOutcome::Confirmed {
            payment_intent: payment_intent.to_string(),
        }])
    }

    /// Charges requested so far.
    #[must_use]
    pub fn requests(&self) -> Vec<(PaymentMethod, Decimal)> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl PaymentConfirmer for ScriptedPayments {
    async fn confirm(
        &self,
        _intent: &PaymentIntent,
        method: PaymentMethod,
        amount: Decimal,
    ) -> PaymentOutcome {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((method, amount));
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(PaymentOutcome::Cancelled)
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub type TestCart = CartManager<FakeStoreApi, Arc<MemoryStore>>;
pub type TestCheckout = CheckoutOrchestrator<FakeStoreApi, Arc<MemoryStore>, FakeGeocoder>;

/// A catalog product.
#[must_use]
pub fn product(id: i64, name: &str, price: i64, logistic_type: LogisticType) -> ProductSnapshot {
    ProductSnapshot {
        id: ProductId::new(id),
        name: name.to_string(),
        price: Decimal::from(price),
        promo_price: None,
        logistic_type,
    }
}

#[must_use]
pub fn customer() -> Customer {
    Customer::new(UserId::new(7), hearth_core::Email::parse("ana@example.com").ok())
}

/// Home delivery form with a valid address.
#[must_use]
pub fn home_form(postal_code: &str) -> CheckoutForm {
    CheckoutForm {
        delivery: DeliveryType::HomeDelivery,
        line1: "Calle Real 12".to_string(),
        city: Some("Jaén".to_string()),
        zipcode: Some(postal_code.to_string()),
        country: Some("ES".to_string()),
        mobile1: "600111222".to_string(),
        ..CheckoutForm::default()
    }
}

/// Store pickup form paying `method`.
#[must_use]
pub fn pickup_form(method: PaymentMethod) -> CheckoutForm {
    CheckoutForm {
        delivery: DeliveryType::StorePickup,
        payment_method: Some(method),
        mobile1: "600111222".to_string(),
        ..CheckoutForm::default()
    }
}

/// Engine wired to fakes.
pub struct Harness {
    pub api: FakeStoreApi,
    pub store: Arc<MemoryStore>,
    pub geocoder: FakeGeocoder,
    pub cart: TestCart,
    pub coupons: Arc<CouponResolver<FakeStoreApi>>,
    pub checkout: TestCheckout,
}

impl Harness {
    /// A guest session with an empty store.
    #[must_use]
    pub fn guest() -> Self {
        let api = FakeStoreApi::new();
        let store = Arc::new(MemoryStore::new());
        let geocoder = FakeGeocoder::spain();
        let cart = CartManager::new(api.clone(), Arc::clone(&store));
        let coupons = Arc::new(CouponResolver::new(api.clone()));
        let checkout = CheckoutOrchestrator::new(
            cart.clone(),
            Arc::clone(&coupons),
            geocoder.clone(),
            ShippingPolicy::default(),
        );
        Self {
            api,
            store,
            geocoder,
            cart,
            coupons,
            checkout,
        }
    }

    /// A signed-in customer whose server cart holds `lines` of `(product, quantity)`.
    pub async fn signed_in(lines: &[(ProductSnapshot, u8)]) -> Self {
        let harness = Self::guest();
        for (product, quantity) in lines {
            harness.api.stock(product);
            harness
                .api
                .add_item(&NewCartLine {
                    product_id: product.id,
                    quantity: *quantity,
                    measure: None,
                })
                .await
                .unwrap();
        }
        harness.api.backend().calls.clear();
        harness.cart.sign_in(customer()).await.unwrap();
        harness
    }
}
