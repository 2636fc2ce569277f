//! Shipping quote and payment method commands.

use hearth_core::{DeliveryType, Price};
use hearth_storefront::checkout::{CheckoutPreview, DEFAULT_COUNTRY};
use hearth_storefront::state::Storefront;

use super::CliError;

/// Quote home delivery of the current cart to `postal_code`.
///
/// # Errors
///
/// Returns `InvalidArgument` for a blank postal code.
pub async fn quote(storefront: &Storefront, postal_code: &str) -> Result<(), CliError> {
    if postal_code.trim().is_empty() {
        return Err(CliError::InvalidArgument(
            "postal code must not be empty".to_owned(),
        ));
    }
    let preview = storefront
        .checkout()
        .preview(DeliveryType::HomeDelivery, Some(postal_code), DEFAULT_COUNTRY)
        .await;
    print_preview(&preview);
    Ok(())
}

/// List the payment methods offered for a delivery.
pub async fn payment_methods(
    storefront: &Storefront,
    pickup: bool,
    postal_code: Option<&str>,
    country: &str,
) {
    let delivery = if pickup {
        DeliveryType::StorePickup
    } else {
        DeliveryType::HomeDelivery
    };
    let preview = storefront
        .checkout()
        .preview(delivery, postal_code, country)
        .await;
    print_methods(&preview);
}

#[allow(clippy::print_stdout)]
fn print_preview(preview: &CheckoutPreview) {
    if let Some(notice) = &preview.coupon_notice {
        println!("Coupon:        {notice}");
    }
    match preview.quote.distance_km {
        Some(distance) => println!("Distance:      {distance:.1} km"),
        None => println!("Distance:      unknown (postal code not located)"),
    }
    println!("Logistics:     {}", preview.quote.logistic_type);
    println!("Subtotal:      {}", Price::eur(preview.totals.subtotal));
    if preview.totals.discount > rust_decimal::Decimal::ZERO {
        println!("Discount:     -{}", Price::eur(preview.totals.discount));
    }
    println!("Transport fee: {}", Price::eur(preview.quote.fee));
    if preview.quote.is_pending() {
        println!("               (may change once the address is located)");
    }
    println!("Total:         {}", Price::eur(preview.totals.total));
}

#[allow(clippy::print_stdout)]
fn print_methods(preview: &CheckoutPreview) {
    for method in &preview.payment_methods {
        println!("{method}");
    }
}
