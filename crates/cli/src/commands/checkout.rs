//! Checkout command.
//!
//! Card and Bizum payments are confirmed outside the terminal. Pass the
//! provider's payment intent id with `--payment-intent` once the charge has
//! gone through; without it the payment step reads as cancelled.

use clap::Args;
use rust_decimal::Decimal;

use hearth_core::{DeliveryType, PaymentMethod, Price};
use hearth_storefront::api::PaymentIntent;
use hearth_storefront::checkout::{CheckoutForm, PaymentConfirmer, PaymentOutcome};
use hearth_storefront::state::Storefront;

use super::CliError;

#[derive(Args)]
pub struct CheckoutArgs {
    /// Collect at the store instead of home delivery
    #[arg(long)]
    pickup: bool,

    /// Payment method (`cash`, `card`, `bizum`); first eligible if omitted
    #[arg(long)]
    payment: Option<PaymentMethod>,

    /// Street address
    #[arg(long, default_value = "")]
    line1: String,

    #[arg(long)]
    line2: Option<String>,

    #[arg(long)]
    city: Option<String>,

    #[arg(long)]
    zipcode: Option<String>,

    #[arg(long)]
    country: Option<String>,

    /// Contact phone number
    #[arg(long)]
    mobile: String,

    /// Second contact phone number
    #[arg(long)]
    mobile2: Option<String>,

    /// Delivery notes
    #[arg(long)]
    info: Option<String>,

    /// Coupon code to apply before ordering
    #[arg(long)]
    coupon: Option<String>,

    /// Payment intent id of an already confirmed card or Bizum charge
    #[arg(long)]
    payment_intent: Option<String>,
}

impl CheckoutArgs {
    fn form(&self) -> CheckoutForm {
        CheckoutForm {
            delivery: if self.pickup {
                DeliveryType::StorePickup
            } else {
                DeliveryType::HomeDelivery
            },
            payment_method: self.payment,
            line1: self.line1.clone(),
            line2: self.line2.clone(),
            city: self.city.clone(),
            zipcode: self.zipcode.clone(),
            country: self.country.clone(),
            mobile1: self.mobile.clone(),
            mobile2: self.mobile2.clone(),
            additional_info: self.info.clone(),
        }
    }
}

/// Payment step backed by a charge confirmed elsewhere.
struct ExternalConfirmation {
    payment_intent: Option<String>,
}

impl PaymentConfirmer for ExternalConfirmation {
    async fn confirm(
        &self,
        _intent: &PaymentIntent,
        method: PaymentMethod,
        amount: Decimal,
    ) -> PaymentOutcome {
        match &self.payment_intent {
            Some(id) => {
                tracing::info!(%method, %amount, "Using externally confirmed payment");
                PaymentOutcome::Confirmed {
                    payment_intent: id.clone(),
                }
            }
            None => {
                tracing::warn!(
                    %method,
                    "{method} payments are confirmed outside the CLI; rerun with --payment-intent"
                );
                PaymentOutcome::Cancelled
            }
        }
    }
}

/// Apply the coupon, if any, and place the order.
///
/// # Errors
///
/// Returns the engine's error for a rejected coupon, an invalid form, an
/// unconfirmed payment or a rejected order.
pub async fn run(storefront: &Storefront, args: CheckoutArgs) -> Result<(), CliError> {
    let checkout = storefront.checkout();
    checkout.begin().await?;

    if let Some(code) = &args.coupon {
        let cart = storefront.cart().snapshot();
        let email = storefront.cart().customer().and_then(|c| c.email);
        let discount = storefront
            .coupons()
            .apply(code, cart.total, &cart.product_refs(), email.as_ref())
            .await?;
        tracing::info!(code = %code, amount = %discount.amount, "Coupon applied");
    }

    let confirmer = ExternalConfirmation {
        payment_intent: args.payment_intent.clone(),
    };
    let receipt = checkout.place_order(args.form(), &confirmer).await?;
    print_receipt(&receipt.tracking_number, storefront);
    Ok(())
}

#[allow(clippy::print_stdout)]
fn print_receipt(tracking_number: &str, storefront: &Storefront) {
    println!("Order placed. Tracking number: {tracking_number}");
    let cart = storefront.cart().snapshot();
    if !cart.is_empty() {
        println!(
            "Note: the cart still holds {} ({}); clear it with `hearth cart clear`",
            cart.line_count(),
            Price::eur(cart.total)
        );
    }
}
