//! CLI command implementations.

pub mod cart;
pub mod checkout;
pub mod shipping;
pub mod track;

use thiserror::Error;

use hearth_storefront::error::StoreError;
use hearth_storefront::state::StartupError;

/// Errors that end a command.
#[derive(Debug, Error)]
pub enum CliError {
    /// The engine could not be assembled.
    #[error("{0}")]
    Startup(#[from] StartupError),

    /// A cart, coupon or checkout operation failed.
    #[error("{}", .0.user_message())]
    Store(#[from] StoreError),

    /// Bad command-line input.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}
