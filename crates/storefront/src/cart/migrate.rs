//! Guest cart migration on login.
//!
//! When an anonymous session acquires an authenticated identity, every
//! guest line is replayed against the remote cart, then the guest snapshot
//! is discarded. Best-effort, at-least-once intent: a line that fails to
//! migrate is logged and dropped, not retried, and never aborts the rest.
//!
//! This runs before the first authenticated load so the subsequent
//! reconciliation pass observes the merged remote state.

use tracing::{info, warn};

use store404_core::CartId;

use crate::cart::backend::CommerceBackend;
use crate::cart::store::CartStore;

/// Replay the guest snapshot into the remote cart, then clear it.
///
/// Clearing is unconditional: once a login transition consumed the guest
/// list, re-running with an empty guest store is a no-op.
///
/// Returns the number of lines migrated.
pub async fn migrate_guest_cart<B, S>(backend: &B, store: &S, cart: CartId) -> usize
where
    B: CommerceBackend,
    S: CartStore,
{
    let guest_lines = store.read_guest();
    if guest_lines.is_empty() {
        return 0;
    }

    let mut migrated = 0;
    for line in &guest_lines {
        match backend
            .add_cart_line(cart, line.product_id, line.quantity)
            .await
        {
            Ok(_) => migrated += 1,
            Err(e) => warn!(
                product = %line.product_id,
                quantity = line.quantity,
                error = %e,
                "guest line failed to migrate; dropping"
            ),
        }
    }

    store.write_guest(&[]);
    info!(migrated, total = guest_lines.len(), "guest cart migrated");
    migrated
}
