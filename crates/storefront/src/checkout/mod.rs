//! Checkout state machine and order submission.
//!
//! ```text
//! Idle → AddressEntry → PaymentPending → Submitting → Completed
//!             ↑   │            │             │
//!             │   └── cash ────┼──────→──────┘
//!             └── payment failed / order rejected ──┘
//! ```
//!
//! `Failed` is reserved for failures the customer cannot fix by editing the
//! form (an expired session). Backend rejections and network failures go
//! back to `AddressEntry` with the reason kept in `last_failure`, and the cart
//! is left untouched.

mod orchestrator;
mod order;
mod payment;

pub use orchestrator::{CheckoutOrchestrator, CheckoutPreview};
pub use order::{CheckoutForm, CheckoutOrder, DEFAULT_COUNTRY, OrderLine, Totals, discounted_subtotal};
pub use payment::{PaymentConfirmer, PaymentOutcome, eligible_payment_methods, is_spain};

use rust_decimal::Decimal;

use hearth_core::PaymentMethod;

/// Where a checkout attempt stands.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CheckoutState {
    #[default]
    Idle,
    AddressEntry,
    /// Waiting for the external payment confirmation.
    PaymentPending { method: PaymentMethod, amount: Decimal },
    Submitting,
    Completed { tracking_number: String },
    Failed { reason: String },
}

impl CheckoutState {
    /// Short name for logs and transition errors.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AddressEntry => "address_entry",
            Self::PaymentPending { .. } => "payment_pending",
            Self::Submitting => "submitting",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }

    /// Whether a new checkout may be started from here.
    #[must_use]
    pub const fn can_begin(&self) -> bool {
        matches!(
            self,
            Self::Idle | Self::AddressEntry | Self::Completed { .. } | Self::Failed { .. }
        )
    }
}
