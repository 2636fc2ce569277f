//! Unified error handling with Sentry integration.
//!
//! Every public engine operation resolves to `Result<T, StoreError>`. The
//! variants are the failure classes a storefront can render a message for;
//! `user_message` gives that message and `report` captures the classes that
//! point at a broken collaborator or a bug.

use hearth_core::CartItemId;
use thiserror::Error;

use crate::api::ApiError;

/// Engine-level error type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Malformed or missing input, caught before any network call.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A business ceiling would be crossed (line quantity, guest cart value).
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    /// A quantity below one was requested; the caller should remove the line.
    #[error("Quantity below 1 for cart line {0}, remove it instead")]
    RemoveInstead(CartItemId),

    /// Authentication context is absent or expired.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The backend refused the request (invalid coupon, stock issue, ...).
    #[error("Rejected by the store: {0}")]
    BackendRejected(String),

    /// A collaborator was unreachable, timed out or failed transiently.
    #[error("Network error: {0}")]
    Network(String),

    /// The external payment step did not succeed.
    #[error("Payment not confirmed: {0}")]
    PaymentNotConfirmed(String),

    /// An order submission is already running.
    #[error("An order submission is already in progress")]
    SubmissionInFlight,

    /// The checkout state machine cannot take the requested step.
    #[error("Invalid checkout transition from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    /// The local guest store could not be read or written.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Unexpected internal failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Human-readable reason to show the customer.
    ///
    /// Internal details (transport errors, parse failures) are not exposed.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(msg)
            | Self::LimitExceeded(msg)
            | Self::BackendRejected(msg)
            | Self::PaymentNotConfirmed(msg) => msg.clone(),
            Self::RemoveInstead(_) => {
                "Quantity must be at least 1. Remove the item instead.".to_string()
            }
            Self::Unauthorized(_) => "Please sign in to continue.".to_string(),
            Self::Network(_) => {
                "We could not reach the store. Please try again in a moment.".to_string()
            }
            Self::SubmissionInFlight => "Your order is already being submitted.".to_string(),
            Self::InvalidTransition { .. } => {
                "This checkout step is not available right now.".to_string()
            }
            Self::Persistence(_) | Self::Internal(_) => {
                "Something went wrong. Please try again.".to_string()
            }
        }
    }

    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::SubmissionInFlight)
    }

    /// Capture collaborator and internal failures to Sentry.
    ///
    /// Customer-caused failures (validation, limits, rejections) are only
    /// logged at debug level.
    pub fn report(&self) {
        if matches!(
            self,
            Self::Network(_) | Self::Persistence(_) | Self::Internal(_)
        ) {
            let event_id = sentry::capture_error(self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Storefront operation failed"
            );
        } else {
            tracing::debug!(error = %self, "Storefront operation refused");
        }
    }
}

impl From<ApiError> for StoreError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Http(e) => Self::Network(e.to_string()),
            ApiError::Unauthorized => {
                Self::Unauthorized("session missing or expired".to_string())
            }
            ApiError::NotFound(what) => Self::BackendRejected(format!("not found: {what}")),
            ApiError::Rejected(msg) => Self::BackendRejected(msg),
            ApiError::Server { status, message } => {
                Self::Network(format!("server error {status}: {message}"))
            }
            ApiError::RateLimited(secs) => {
                Self::Network(format!("rate limited, retry after {secs} seconds"))
            }
            ApiError::Parse(e) => Self::Internal(format!("unexpected response: {e}")),
        }
    }
}

/// Result type alias for `StoreError`.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Set the Sentry user context from a user ID.
///
/// Call this after successful authentication to associate errors with users.
pub fn set_sentry_user(user_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

/// Add a breadcrumb for a customer action.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of cart and
/// checkout actions leading up to an error.
///
/// # Example
///
/// ```rust,ignore
/// add_breadcrumb("cart", "Added item", Some(&[("product_id", "123")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}
