//! Hearth Storefront library.
//!
//! Cart, pricing and checkout engine for a furniture storefront backed by a
//! REST API. Front ends (the `hearth` CLI, tests) drive it through
//! [`state::Storefront`].
//!
//! # Modules
//!
//! - [`api`] - Backend client, wire types and the response adapter
//! - [`cart`] - Guest and authenticated cart state with guest cart sync
//! - [`coupon`] - Coupon validation and the minimum-subtotal gate
//! - [`geo`] - Postal code geolocation and great-circle distance
//! - [`shipping`] - Transport fee calculation
//! - [`checkout`] - Checkout state machine and order submission
//! - [`orders`] - Public order tracking

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod api;
pub mod cart;
pub mod checkout;
pub mod config;
pub mod coupon;
pub mod error;
pub mod geo;
pub mod orders;
pub mod session;
pub mod shipping;
pub mod state;
