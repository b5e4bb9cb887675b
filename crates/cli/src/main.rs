//! 404 Store CLI - drive the cart engine from a terminal session.
//!
//! # Usage
//!
//! ```bash
//! # Show the guest cart
//! store404 cart show
//!
//! # Add two units of product 42
//! store404 cart add 42 -q 2
//!
//! # Act as an authenticated user (pairs with XANO_AUTH_TOKEN)
//! store404 --user 7 cart show
//!
//! # Force a reconciliation pass against the remote cart
//! store404 --user 7 cart reconcile
//! ```
//!
//! # Environment Variables
//!
//! - `XANO_STORE_BASE` - Base URL of the Xano commerce API group
//! - `XANO_AUTH_TOKEN` - Bearer token for authenticated sessions
//! - `CART_CACHE_DIR` - Directory for local cart snapshots
//! - `SENTRY_DSN` - Sentry error tracking DSN

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use store404_storefront::config::StorefrontConfig;

mod commands;

#[derive(Parser)]
#[command(name = "store404")]
#[command(author, version, about = "404 Store CLI")]
struct Cli {
    /// Act as this authenticated user ID; omit for a guest session
    #[arg(long, global = true)]
    user: Option<i64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and mutate the cart
    Cart {
        #[command(subcommand)]
        action: CartAction,
    },
}

#[derive(Subcommand)]
enum CartAction {
    /// Print the current cart
    Show,
    /// Add a product to the cart
    Add {
        /// Product ID
        product: i64,

        /// Quantity to add
        #[arg(short, long, default_value_t = 1)]
        quantity: u32,
    },
    /// Set a line's quantity
    Set {
        /// Line ID (remote number or `local-...` placeholder)
        line: String,

        /// New quantity (clamped to 1)
        quantity: u32,
    },
    /// Remove a line from the cart
    Remove {
        /// Line ID (remote number or `local-...` placeholder)
        line: String,
    },
    /// Run one reconciliation pass against the remote cart
    Reconcile,
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &StorefrontConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
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

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Sentry must be initialized before the tracing subscriber
    let config = match StorefrontConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            // Tracing is not up yet
            #[allow(clippy::print_stderr)]
            {
                eprintln!("Failed to load configuration: {e}");
            }
            std::process::exit(1);
        }
    };
    let _sentry_guard = init_sentry(&config);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "store404=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    if let Err(e) = run(cli, config).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: StorefrontConfig) -> Result<(), Box<dyn std::error::Error>> {
    let session = commands::cart::Session::start(&config, cli.user).await;

    match cli.command {
        Commands::Cart { action } => match action {
            CartAction::Show => commands::cart::show(&session),
            CartAction::Add { product, quantity } => {
                commands::cart::add(&session, product, quantity).await;
            }
            CartAction::Set { line, quantity } => {
                commands::cart::set_quantity(&session, &line, quantity).await?;
            }
            CartAction::Remove { line } => {
                commands::cart::remove(&session, &line).await?;
            }
            CartAction::Reconcile => commands::cart::reconcile(&session).await,
        },
    }

    // Flush spawned remote work before the process exits
    session.cart.wait_idle().await;
    Ok(())
}
