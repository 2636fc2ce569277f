//! Order tracking command.

use hearth_core::Price;
use hearth_storefront::orders::{OrderTracking, track_order};
use hearth_storefront::state::Storefront;

use super::CliError;

/// Print the tracking view of an order.
///
/// # Errors
///
/// Returns the engine's error when the order cannot be found.
pub async fn run(storefront: &Storefront, tracking_number: &str) -> Result<(), CliError> {
    let tracking = track_order(storefront.api(), tracking_number).await?;
    print_tracking(&tracking);
    Ok(())
}

#[allow(clippy::print_stdout)]
fn print_tracking(tracking: &OrderTracking) {
    println!("Order {}: {}", tracking.order_code, tracking.status);
    if let Some(date) = tracking.estimated_delivery_date {
        println!("Estimated delivery: {}", date.format("%d/%m/%Y"));
    }
    if let Some(address) = &tracking.shipping_address {
        println!("Address: {address}");
    }

    for step in &tracking.timeline {
        println!(
            "  - {:<12} {}{}",
            step.status.to_string(),
            step.changed_at.as_deref().unwrap_or_default(),
            step.note
                .as_deref()
                .map(|note| format!("  ({note})"))
                .unwrap_or_default()
        );
    }

    for item in &tracking.items {
        println!(
            "  * {} x {} = {}",
            item.name.as_deref().unwrap_or("Product"),
            item.quantity,
            Price::eur(item.line_total())
        );
    }
}
