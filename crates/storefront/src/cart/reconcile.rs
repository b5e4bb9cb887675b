//! Backend reconciliation: converge the remote cart to the local line list.
//!
//! The hard part is kept pure: [`diff`] takes two line lists and produces
//! three disjoint edit sets, independent of transport, so convergence can
//! be unit-tested without network mocks. [`apply_diff`] then issues the
//! edits best-effort; a failed call is logged and skipped, and a later
//! pass retries because the underlying mismatch persists.

use std::collections::BTreeMap;

use tracing::warn;

use store404_core::{CartId, ProductId};

use crate::cart::backend::{CommerceBackend, RemoteLineId};
use crate::cart::types::CartLine;

/// The minimal edit sets that make the remote cart match the local list.
///
/// Local quantity always wins over remote quantity: the in-memory list
/// reflects the latest user action, while remote acknowledgements may
/// arrive out of order.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CartDiff {
    /// Products present locally but not remotely.
    pub creates: Vec<(ProductId, u32)>,
    /// Remote lines whose quantity differs from the local line.
    pub updates: Vec<(RemoteLineId, u32)>,
    /// Remote lines whose product the user removed locally.
    pub deletes: Vec<RemoteLineId>,
}

impl CartDiff {
    /// True when remote already matches local.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    /// Total number of remote calls this diff will issue.
    #[must_use]
    pub fn len(&self) -> usize {
        self.creates.len() + self.updates.len() + self.deletes.len()
    }
}

/// Compute the edits that converge `remote` to `local`, keyed by product.
///
/// Remote may hold several lines for one product (a slow create confirm
/// racing an earlier pass can double-create); the first survives and the
/// rest are deleted, restoring one line per product.
#[must_use]
pub fn diff(local: &[CartLine], remote: &[CartLine]) -> CartDiff {
    // BTreeMap keeps the edit order deterministic for tests and logs.
    let mut remote_by_product: BTreeMap<ProductId, Vec<&CartLine>> = BTreeMap::new();
    for line in remote {
        remote_by_product
            .entry(line.product_id)
            .or_default()
            .push(line);
    }
    let local_products: BTreeMap<ProductId, &CartLine> =
        local.iter().map(|l| (l.product_id, l)).collect();

    let mut out = CartDiff::default();

    for (product_id, local_line) in &local_products {
        match remote_by_product
            .get(product_id)
            .and_then(|lines| lines.split_first())
        {
            None => out.creates.push((*product_id, local_line.quantity)),
            Some((kept, duplicates)) => {
                if kept.quantity != local_line.quantity
                    && let Some(id) = kept.id.remote()
                {
                    out.updates.push((id, local_line.quantity));
                }
                for duplicate in duplicates {
                    if let Some(id) = duplicate.id.remote() {
                        out.deletes.push(id);
                    }
                }
            }
        }
    }

    for (product_id, lines) in &remote_by_product {
        if !local_products.contains_key(product_id) {
            for line in lines {
                if let Some(id) = line.id.remote() {
                    out.deletes.push(id);
                }
            }
        }
    }

    out
}

/// Apply a diff to the remote cart, logging and skipping failed calls.
///
/// Returns the number of calls that succeeded.
pub async fn apply_diff<B: CommerceBackend>(backend: &B, cart: CartId, edits: &CartDiff) -> usize {
    let mut applied = 0;

    for &(product, quantity) in &edits.creates {
        match backend.add_cart_line(cart, product, quantity).await {
            Ok(_) => applied += 1,
            Err(e) => warn!(%cart, %product, error = %e, "reconcile create failed; skipping"),
        }
    }

    for &(line, quantity) in &edits.updates {
        match backend.update_cart_line_quantity(line, quantity).await {
            Ok(_) => applied += 1,
            Err(e) => warn!(%cart, line, error = %e, "reconcile update failed; skipping"),
        }
    }

    for &line in &edits.deletes {
        match backend.delete_cart_line(line).await {
            Ok(()) => applied += 1,
            Err(e) => warn!(%cart, line, error = %e, "reconcile delete failed; skipping"),
        }
    }

    applied
}
