//! Cart commands.
//!
//! # Usage
//!
//! ```bash
//! hearth cart show
//! hearth cart add --product-id 7 --name "Colchón Relax" --price 299 --measure 150x190 --logistic heavy
//! hearth cart update 7:150x190 --quantity 2
//! hearth cart remove 7:150x190
//! hearth cart clear
//! ```

use clap::Subcommand;
use rust_decimal::Decimal;

use hearth_core::{CartItemId, LogisticType, Price, ProductId};
use hearth_storefront::cart::{AddItemRequest, CartSnapshot, ProductSnapshot};
use hearth_storefront::state::Storefront;

use super::CliError;

#[derive(Subcommand)]
pub enum CartAction {
    /// Print the cart
    Show,
    /// Add a product
    Add {
        #[arg(long)]
        product_id: i64,

        /// Product name, shown for guest carts
        #[arg(long)]
        name: String,

        /// Catalog price
        #[arg(long)]
        price: Decimal,

        /// Promotional price, if any
        #[arg(long)]
        promo_price: Option<Decimal>,

        /// Size variant (`90x190`, `135x190`, `150x190`)
        #[arg(long)]
        measure: Option<String>,

        /// Logistics class (`small`, `medium`, `heavy`)
        #[arg(long, default_value = "small")]
        logistic: LogisticType,

        #[arg(short, long, default_value_t = 1)]
        quantity: i64,
    },
    /// Change the quantity or measure of a line
    Update {
        /// Line id as printed by `cart show`
        item_id: String,

        #[arg(short, long)]
        quantity: i64,

        #[arg(long)]
        measure: Option<String>,
    },
    /// Remove a line
    Remove {
        /// Line id as printed by `cart show`
        item_id: String,
    },
    /// Remove every line
    Clear,
}

/// Run a cart action and print the resulting cart.
///
/// # Errors
///
/// Returns the engine's error for a rejected change.
pub async fn run(storefront: &Storefront, action: CartAction) -> Result<(), CliError> {
    let cart = storefront.cart();
    let snapshot = match action {
        CartAction::Show => cart.fetch_cart().await,
        CartAction::Add {
            product_id,
            name,
            price,
            promo_price,
            measure,
            logistic,
            quantity,
        } => {
            let product = ProductSnapshot {
                id: ProductId::new(product_id),
                name,
                price,
                promo_price,
                logistic_type: logistic,
            };
            let request = AddItemRequest::new(product, quantity);
            let request = match measure {
                Some(measure) => request.with_measure(measure),
                None => request,
            };
            cart.add_item(request).await?
        }
        CartAction::Update {
            item_id,
            quantity,
            measure,
        } => {
            cart.update_item_quantity(&CartItemId::new(item_id), quantity, measure.as_deref())
                .await?
        }
        CartAction::Remove { item_id } => cart.remove_item(&CartItemId::new(item_id)).await?,
        CartAction::Clear => cart.clear().await?,
    };

    print_cart(&snapshot);
    Ok(())
}

#[allow(clippy::print_stdout)]
fn print_cart(snapshot: &CartSnapshot) {
    if let Some(error) = &snapshot.error {
        println!("! {error}");
    }
    if snapshot.is_empty() {
        println!("Cart is empty ({:?})", snapshot.origin);
        return;
    }

    for item in &snapshot.items {
        println!(
            "{:<16} {:<32} {:>2} x {:>10} = {:>10}  [{}{}]",
            item.id.as_str(),
            item.name,
            item.quantity,
            Price::eur(item.unit_price).to_string(),
            Price::eur(item.line_total()).to_string(),
            item.logistic_type,
            item.measure
                .as_deref()
                .map(|m| format!(", {m}"))
                .unwrap_or_default(),
        );
    }
    println!(
        "{} lines, {} units, total {}",
        snapshot.line_count(),
        snapshot.unit_count(),
        Price::eur(snapshot.total)
    );
}
