//! The engine's seam to the remote commerce API.
//!
//! The cart engine never talks HTTP directly; it sees the backend through
//! [`CommerceBackend`], which [`crate::xano::XanoClient`] implements in
//! production and an in-process fake implements in tests.

use std::future::Future;

use store404_core::{CartId, ProductId};

use crate::cart::types::{Cart, CartLine, ProductSnapshot};

/// Durable line identifier assigned by the backend.
pub type RemoteLineId = i64;

/// The six remote operations the cart engine consumes.
///
/// Methods return `Send` futures because the controller drives them from
/// spawned tasks. All calls act on behalf of the current session identity;
/// token plumbing is the implementation's concern.
pub trait CommerceBackend: Send + Sync + 'static {
    /// Transport-level error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetch the identity's cart, creating it on first use.
    fn get_or_create_cart(&self) -> impl Future<Output = Result<Cart, Self::Error>> + Send;

    /// List the cart's current lines.
    fn list_cart_lines(
        &self,
        cart: CartId,
    ) -> impl Future<Output = Result<Vec<CartLine>, Self::Error>> + Send;

    /// Create a line; the returned line carries the durable ID.
    fn add_cart_line(
        &self,
        cart: CartId,
        product: ProductId,
        quantity: u32,
    ) -> impl Future<Output = Result<CartLine, Self::Error>> + Send;

    /// Set an existing line's quantity.
    fn update_cart_line_quantity(
        &self,
        line: RemoteLineId,
        quantity: u32,
    ) -> impl Future<Output = Result<CartLine, Self::Error>> + Send;

    /// Delete a line.
    fn delete_cart_line(
        &self,
        line: RemoteLineId,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Fetch a product's display data.
    fn get_product(
        &self,
        product: ProductId,
    ) -> impl Future<Output = Result<ProductSnapshot, Self::Error>> + Send;
}
