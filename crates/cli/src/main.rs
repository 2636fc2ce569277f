//! Hearth CLI - drive the cart and checkout engine from a terminal.
//!
//! # Usage
//!
//! ```bash
//! # Show the cart (guest unless HEARTH_API_TOKEN is set)
//! hearth cart show
//!
//! # Add a product
//! hearth cart add --product-id 42 --name "Sofá Milano" --price 499 --logistic heavy
//!
//! # Quote shipping to a postal code
//! hearth shipping 23680
//!
//! # Place a cash order for store pickup
//! hearth checkout --pickup --mobile 600111222
//!
//! # Track an order
//! hearth track HRT-1042
//! ```
//!
//! # Environment Variables
//!
//! See `hearth_storefront::config` for the full list. `HEARTH_API_URL` is
//! required; `HEARTH_API_TOKEN` and `HEARTH_USER_ID` sign in.

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hearth_storefront::config::StorefrontConfig;
use hearth_storefront::state::Storefront;

mod commands;

use commands::CliError;
use commands::cart::CartAction;
use commands::checkout::CheckoutArgs;

#[derive(Parser)]
#[command(name = "hearth")]
#[command(author, version, about = "Hearth cart and checkout CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and edit the cart
    Cart {
        #[command(subcommand)]
        action: CartAction,
    },
    /// Quote the transport fee to a postal code
    Shipping {
        /// Destination postal code
        postal_code: String,
    },
    /// List payment methods for a delivery
    PaymentMethods {
        /// Collect at the store instead of home delivery
        #[arg(long)]
        pickup: bool,

        /// Destination postal code (home delivery)
        #[arg(long)]
        postal_code: Option<String>,

        /// Destination country
        #[arg(long, default_value = "ES")]
        country: String,
    },
    /// Place an order for the current cart
    Checkout(CheckoutArgs),
    /// Track an order by tracking number
    Track {
        /// Tracking number printed when the order was placed
        tracking_number: String,
    },
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &StorefrontConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

fn init_tracing() {
    // Quiet by default; the command output goes to stdout
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "hearth_storefront=info,hearth_cli=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match StorefrontConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            init_tracing();
            tracing::error!("Invalid configuration: {e}");
            std::process::exit(2);
        }
    };

    // Sentry must be initialized before the tracing subscriber
    let _sentry_guard = init_sentry(&config);
    init_tracing();

    if let Err(e) = run(cli, config).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: StorefrontConfig) -> Result<(), CliError> {
    let storefront = Storefront::new(config)?;
    if let Err(e) = storefront.resume().await {
        tracing::warn!("Guest cart sync incomplete: {}", e.user_message());
    }

    match cli.command {
        Commands::Cart { action } => commands::cart::run(&storefront, action).await,
        Commands::Shipping { postal_code } => {
            commands::shipping::quote(&storefront, &postal_code).await
        }
        Commands::PaymentMethods {
            pickup,
            postal_code,
            country,
        } => {
            commands::shipping::payment_methods(
                &storefront,
                pickup,
                postal_code.as_deref(),
                &country,
            )
            .await;
            Ok(())
        }
        Commands::Checkout(args) => commands::checkout::run(&storefront, args).await,
        Commands::Track { tracking_number } => {
            commands::track::run(&storefront, &tracking_number).await
        }
    }
}
