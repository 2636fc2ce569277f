//! Engine wiring shared by every front end.

use std::sync::Arc;

use crate::api::{ApiClient, ApiError};
use crate::cart::{CartManager, CartSnapshot, FileStore};
use crate::checkout::CheckoutOrchestrator;
use crate::config::StorefrontConfig;
use crate::coupon::CouponResolver;
use crate::error::{Result, StoreError};
use crate::geo::{GeocodeError, NominatimGeocoder};
use crate::session::Customer;

/// Error assembling the engine.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("api client: {0}")]
    Api(#[from] ApiError),
    #[error("geocoder: {0}")]
    Geocoder(#[from] GeocodeError),
    #[error("cart storage: {0}")]
    Storage(#[from] StoreError),
}

pub type StoreCart = CartManager<ApiClient, FileStore>;
pub type StoreCheckout = CheckoutOrchestrator<ApiClient, FileStore, NominatimGeocoder>;

/// The cart, coupon and checkout services over one backend connection.
///
/// Cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct Storefront {
    inner: Arc<StorefrontInner>,
}

struct StorefrontInner {
    config: StorefrontConfig,
    api: ApiClient,
    geocoder: NominatimGeocoder,
    cart: StoreCart,
    coupons: Arc<CouponResolver<ApiClient>>,
    checkout: StoreCheckout,
}

impl Storefront {
    /// Build every service from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built or the data
    /// directory cannot be created.
    pub fn new(config: StorefrontConfig) -> std::result::Result<Self, StartupError> {
        let api = ApiClient::new(&config.api, config.session.clone())?;
        let geocoder = NominatimGeocoder::new(&config.geocoder)?;
        let store = FileStore::open(config.data_dir.clone())?;

        let cart = CartManager::new(api.clone(), store);
        let coupons = Arc::new(CouponResolver::new(api.clone()));
        let checkout = CheckoutOrchestrator::new(
            cart.clone(),
            Arc::clone(&coupons),
            geocoder.clone(),
            config.shipping.clone(),
        );

        Ok(Self {
            inner: Arc::new(StorefrontInner {
                config,
                api,
                geocoder,
                cart,
                coupons,
                checkout,
            }),
        })
    }

    /// Load the cart for the configured session.
    ///
    /// With a session the stored guest cart is synced into the customer's
    /// server cart first.
    ///
    /// # Errors
    ///
    /// Returns the first error of the guest cart sync.
    pub async fn resume(&self) -> Result<CartSnapshot> {
        match &self.inner.config.session {
            Some(session) => self.inner.cart.sign_in(Customer::from(session)).await,
            None => Ok(self.inner.cart.fetch_cart().await),
        }
    }

    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    #[must_use]
    pub fn geocoder(&self) -> &NominatimGeocoder {
        &self.inner.geocoder
    }

    #[must_use]
    pub fn cart(&self) -> &StoreCart {
        &self.inner.cart
    }

    #[must_use]
    pub fn coupons(&self) -> &CouponResolver<ApiClient> {
        &self.inner.coupons
    }

    #[must_use]
    pub fn checkout(&self) -> &StoreCheckout {
        &self.inner.checkout
    }
}
