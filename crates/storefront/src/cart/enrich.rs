//! Product enrichment: backfill display data onto cart lines.
//!
//! Lines that reference a product by ID only cannot render a name or
//! price. This pass computes the unique set of missing product IDs,
//! fetches them concurrently, and attaches each result to every line that
//! references it. A failed fetch leaves that line's snapshot absent rather
//! than failing the batch; the next pass tries again.

use std::collections::{BTreeSet, HashMap};

use futures::future::join_all;
use tracing::warn;

use store404_core::ProductId;

use crate::cart::backend::CommerceBackend;
use crate::cart::types::{CartLine, ProductSnapshot};

/// Attach product snapshots to every line that lacks one.
///
/// Each unique product is fetched once and shared across all lines that
/// reference it.
pub async fn enrich<B: CommerceBackend>(backend: &B, lines: &mut [CartLine]) {
    let missing: BTreeSet<ProductId> = lines
        .iter()
        .filter(|l| l.product.is_none())
        .map(|l| l.product_id)
        .collect();
    if missing.is_empty() {
        return;
    }

    let fetches = missing.into_iter().map(|id| async move {
        match backend.get_product(id).await {
            Ok(snapshot) => Some((id, snapshot)),
            Err(e) => {
                warn!(product = %id, error = %e, "product fetch failed; line left unenriched");
                None
            }
        }
    });
    let resolved: HashMap<ProductId, ProductSnapshot> =
        join_all(fetches).await.into_iter().flatten().collect();

    for line in lines.iter_mut() {
        if line.product.is_none()
            && let Some(snapshot) = resolved.get(&line.product_id)
        {
            line.product = Some(snapshot.clone());
        }
    }
}
