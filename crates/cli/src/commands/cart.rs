//! Cart commands: show, add, set, remove, reconcile.
//!
//! Every command starts a full session (identity load, guest migration if
//! the identity changed, remote refresh) so a single invocation behaves
//! like one storefront page view. Mutations apply optimistically; the
//! caller flushes spawned remote work with `wait_idle` before exit.

use std::str::FromStr;

use thiserror::Error;

use store404_core::{ProductId, UserId};
use store404_storefront::cart::types::ParseLineIdError;
use store404_storefront::cart::{CartController, JsonFileStore, LineId, ProductRef};
use store404_storefront::config::StorefrontConfig;
use store404_storefront::xano::XanoClient;

/// Errors from cart command argument handling.
#[derive(Debug, Error)]
pub enum CartCommandError {
    /// Line ID argument did not parse.
    #[error("Invalid line ID: {0}")]
    InvalidLineId(#[from] ParseLineIdError),

    /// Line ID not present in the current cart.
    #[error("No cart line with ID {0}")]
    UnknownLine(String),
}

/// A fully started cart session.
pub struct Session {
    pub cart: CartController<XanoClient, JsonFileStore>,
}

impl Session {
    /// Build the client stack and load state for the given identity.
    pub async fn start(config: &StorefrontConfig, user: Option<i64>) -> Self {
        let backend = XanoClient::new(config);
        let store = JsonFileStore::new(config.cache_dir.clone());
        let cart = CartController::new(backend, store);
        cart.set_identity(user.map(UserId::new)).await;
        Self { cart }
    }

    /// Resolve a line ID argument against the current cart.
    fn resolve_line(&self, raw: &str) -> Result<LineId, CartCommandError> {
        let id = LineId::from_str(raw)?;
        if self.cart.lines().iter().any(|l| l.id == id) {
            Ok(id)
        } else {
            Err(CartCommandError::UnknownLine(raw.to_string()))
        }
    }
}

/// Print the current cart.
#[allow(clippy::print_stdout)]
pub fn show(session: &Session) {
    let lines = session.cart.lines();
    if lines.is_empty() {
        println!("Cart is empty");
        return;
    }

    for line in &lines {
        let name = line
            .product
            .as_ref()
            .map_or("(unknown product)", |p| p.name.as_str());
        println!(
            "{:<14} {:<30} x{:<4} {:>10} {:>12}",
            line.id.to_string(),
            name,
            line.quantity,
            line.unit_price().display(),
            line.subtotal().display(),
        );
    }
    println!();
    println!(
        "{} item(s), total {}",
        session.cart.count(),
        session.cart.total().display()
    );
}

/// Add a product by ID.
pub async fn add(session: &Session, product: i64, quantity: u32) {
    let id = session
        .cart
        .add(ProductRef::Id(ProductId::new(product)), quantity);
    tracing::info!(line = %id, product, quantity, "added to cart");
    session.cart.wait_idle().await;
    show(session);
}

/// Set a line's quantity.
pub async fn set_quantity(
    session: &Session,
    line: &str,
    quantity: u32,
) -> Result<(), CartCommandError> {
    let id = session.resolve_line(line)?;
    session.cart.set_quantity(id, quantity);
    session.cart.wait_idle().await;
    show(session);
    Ok(())
}

/// Remove a line.
pub async fn remove(session: &Session, line: &str) -> Result<(), CartCommandError> {
    let id = session.resolve_line(line)?;
    session.cart.remove(id);
    session.cart.wait_idle().await;
    show(session);
    Ok(())
}

/// Run one reconciliation pass.
pub async fn reconcile(session: &Session) {
    if session.cart.reconcile().await {
        tracing::info!("reconciliation pass complete");
    } else {
        tracing::info!("reconciliation already in flight");
    }
    show(session);
}
