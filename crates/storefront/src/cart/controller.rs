//! The cart controller: authoritative in-process cart state.
//!
//! All mutation funnels through [`CartController::add`],
//! [`CartController::set_quantity`], and [`CartController::remove`]. Each
//! applies optimistically to the in-memory line list and the local store
//! before returning, then spawns the remote mutation and a reconciliation
//! pass in the background. The caller never blocks on remote confirmation.
//!
//! Remote failures are logged, never surfaced: the optimistic state stays
//! the working truth and the next reconciliation pass converges the
//! backend to it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use store404_core::{CartId, Price, ProductId, UserId};

use crate::cart::backend::CommerceBackend;
use crate::cart::enrich::enrich;
use crate::cart::migrate::migrate_guest_cart;
use crate::cart::reconcile::{apply_diff, diff};
use crate::cart::store::CartStore;
use crate::cart::types::{self, Cart, CartLine, LineId, LineOrigin, ProductRef};

/// The authoritative in-process state holder for one cart session.
///
/// Cheaply cloneable via `Arc`; clones share state, so UI surfaces and
/// background tasks all observe the same line list.
pub struct CartController<B, S> {
    inner: Arc<Inner<B, S>>,
}

impl<B, S> Clone for CartController<B, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<B, S> {
    backend: B,
    store: S,
    state: Mutex<CartState>,
    /// True while a full remote load is superseding the local cache.
    loading: AtomicBool,
    /// At most one reconciliation pass per controller; a request arriving
    /// while one runs is dropped, not queued.
    reconciling: AtomicBool,
    /// Spawned remote work, drained by [`CartController::wait_idle`].
    pending: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Default)]
struct CartState {
    identity: Option<UserId>,
    cart: Option<Cart>,
    lines: Vec<CartLine>,
    initialized: bool,
    /// Guest migration still owed for this session; consumed only once
    /// the migration actually runs against a resolved remote cart.
    pending_migration: bool,
    /// Monotonic mutation counter; see [`merge_confirmed`].
    generation: u64,
    /// Last mutation generation per product.
    touched: HashMap<ProductId, u64>,
}

impl CartState {
    fn touch(&mut self, product: ProductId) {
        self.generation += 1;
        self.touched.insert(product, self.generation);
    }
}

impl<B, S> CartController<B, S>
where
    B: CommerceBackend,
    S: CartStore,
{
    /// Create an uninitialized controller. Call
    /// [`set_identity`](Self::set_identity) to load state.
    #[must_use]
    pub fn new(backend: B, store: S) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                store,
                state: Mutex::new(CartState::default()),
                loading: AtomicBool::new(false),
                reconciling: AtomicBool::new(false),
                pending: Mutex::new(Vec::new()),
            }),
        }
    }

    // =========================================================================
    // Identity transitions
    // =========================================================================

    /// React to an identity change from the session layer.
    ///
    /// Reloads from the local store immediately. For authenticated
    /// identities this then migrates any guest lines (on the
    /// guest-to-authenticated transition) and runs a full remote load that
    /// supersedes the cached snapshot.
    pub async fn set_identity(&self, identity: Option<UserId>) {
        {
            let mut state = self.lock_state();
            if state.initialized && state.identity == identity {
                return;
            }
            let was_guest = state.identity.is_none();
            state.initialized = true;
            state.identity = identity;
            state.cart = None;
            state.pending_migration = identity.is_some() && was_guest;
            state.lines = match identity {
                None => self.inner.store.read_guest(),
                Some(user) => self.inner.store.read_authenticated(user),
            };
            state.generation += 1;
            state.touched.clear();
        }

        let Some(user) = identity else {
            self.spawn_enrichment();
            return;
        };

        self.inner.loading.store(true, Ordering::SeqCst);
        match self.inner.backend.get_or_create_cart().await {
            Ok(cart) => {
                self.lock_state().cart = Some(cart);
                // Migration runs before the first authenticated load so the
                // load below observes the merged remote state.
                self.run_pending_migration(cart.id).await;
                self.refresh_from_remote(cart.id).await;
            }
            Err(e) => {
                // A pending migration stays pending; the next pass that
                // resolves a remote cart runs it.
                warn!(%user, error = %e, "remote cart load failed; keeping cached snapshot");
            }
        }
        self.inner.loading.store(false, Ordering::SeqCst);
    }

    // =========================================================================
    // Mutations (optimistic)
    // =========================================================================

    /// Add a product to the cart.
    ///
    /// A repeated add for a product already in the cart increments that
    /// line's quantity instead of creating a second line. Returns the ID
    /// of the affected line (a placeholder until remote confirmation).
    pub fn add(&self, product: ProductRef, quantity: u32) -> LineId {
        let quantity = quantity.max(1);
        let product_id = product.product_id();

        enum Action {
            Increment { id: LineId, quantity: u32 },
            Created { id: LineId, authenticated: bool },
        }

        let action = {
            let mut state = self.lock_state();
            if let Some(line) = state.lines.iter().find(|l| l.product_id == product_id) {
                Action::Increment {
                    id: line.id,
                    quantity: line.quantity.saturating_add(quantity),
                }
            } else {
                let authenticated = state.identity.is_some();
                let line = CartLine {
                    id: LineId::new_local(),
                    product_id,
                    quantity,
                    price: None,
                    product: product.into_snapshot(),
                    origin: if authenticated {
                        LineOrigin::Authenticated
                    } else {
                        LineOrigin::Guest
                    },
                };
                let id = line.id;
                state.lines.push(line);
                state.touch(product_id);
                self.persist_locked(&state);
                Action::Created { id, authenticated }
            }
        };

        match action {
            Action::Increment { id, quantity } => {
                self.set_quantity(id, quantity);
                id
            }
            Action::Created { id, authenticated } => {
                if authenticated {
                    self.spawn_confirm_add(id, product_id, quantity);
                }
                self.spawn_enrichment();
                id
            }
        }
    }

    /// Set a line's quantity, clamped to a minimum of 1.
    pub fn set_quantity(&self, line: LineId, quantity: u32) {
        let quantity = quantity.max(1);
        let (authenticated, remote_id) = {
            let mut state = self.lock_state();
            let Some(product_id) = state.lines.iter_mut().find(|l| l.id == line).map(|entry| {
                entry.quantity = quantity;
                entry.product_id
            }) else {
                return;
            };
            state.touch(product_id);
            self.persist_locked(&state);
            (state.identity.is_some(), line.remote())
        };

        // A line whose earlier product fetch failed gets another chance.
        self.spawn_enrichment();

        if !authenticated {
            return;
        }
        if let Some(remote) = remote_id {
            let this = self.clone();
            self.spawn_task(async move {
                if let Err(e) = this
                    .inner
                    .backend
                    .update_cart_line_quantity(remote, quantity)
                    .await
                {
                    warn!(line = remote, error = %e, "remote quantity update failed; keeping optimistic value");
                }
                this.reconcile().await;
            });
        } else {
            // Placeholder line: no remote ID to address yet, the next
            // reconciliation pass carries the quantity.
            self.spawn_reconcile();
        }
    }

    /// Remove a line from the cart.
    ///
    /// The line stays removed locally regardless of remote outcome.
    pub fn remove(&self, line: LineId) {
        let (authenticated, remote_id) = {
            let mut state = self.lock_state();
            let Some(pos) = state.lines.iter().position(|l| l.id == line) else {
                return;
            };
            let removed = state.lines.remove(pos);
            state.touch(removed.product_id);
            self.persist_locked(&state);
            (state.identity.is_some(), removed.id.remote())
        };

        if !authenticated {
            return;
        }
        let this = self.clone();
        self.spawn_task(async move {
            if let Some(remote) = remote_id
                && let Err(e) = this.inner.backend.delete_cart_line(remote).await
            {
                warn!(line = remote, error = %e, "remote delete failed; removal propagates on next reconcile");
            }
            this.reconcile().await;
        });
    }

    // =========================================================================
    // Read surface
    // =========================================================================

    /// Current line list, in insertion order.
    #[must_use]
    pub fn lines(&self) -> Vec<CartLine> {
        self.lock_state().lines.clone()
    }

    /// Whether a full remote load is in progress.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.inner.loading.load(Ordering::SeqCst)
    }

    /// Cart total: sum of `quantity x unit price` over all lines.
    #[must_use]
    pub fn total(&self) -> Price {
        types::total(&self.lock_state().lines)
    }

    /// Total item count across lines.
    #[must_use]
    pub fn count(&self) -> u32 {
        types::item_count(&self.lock_state().lines)
    }

    /// Current session identity.
    #[must_use]
    pub fn identity(&self) -> Option<UserId> {
        self.lock_state().identity
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Run one reconciliation pass, converging the remote cart to the
    /// in-memory line list.
    ///
    /// Returns `false` if a pass was already in flight (the request is
    /// dropped; the next mutation schedules another).
    pub async fn reconcile(&self) -> bool {
        if self.inner.reconciling.swap(true, Ordering::SeqCst) {
            debug!("reconciliation already in flight; dropping request");
            return false;
        }
        self.reconcile_pass().await;
        self.inner.reconciling.store(false, Ordering::SeqCst);
        true
    }

    async fn reconcile_pass(&self) {
        let Some(cart) = self.ensure_cart().await else {
            return;
        };

        // A migration deferred by an unreachable backend at login runs now,
        // followed by the remote load the login would have done.
        if self.run_pending_migration(cart).await {
            self.refresh_from_remote(cart).await;
            return;
        }

        let (local, start_gen) = {
            let state = self.lock_state();
            (state.lines.clone(), state.generation)
        };

        let remote = match self.inner.backend.list_cart_lines(cart).await {
            Ok(remote) => remote,
            Err(e) => {
                warn!(%cart, error = %e, "reconcile aborted: could not list remote lines");
                return;
            }
        };

        let edits = diff(&local, &remote);
        if !edits.is_empty() {
            debug!(
                creates = edits.creates.len(),
                updates = edits.updates.len(),
                deletes = edits.deletes.len(),
                "applying reconciliation edits"
            );
            let applied = apply_diff(&self.inner.backend, cart, &edits).await;
            if applied < edits.len() {
                // Remote still diverges from the optimistic state. Keep the
                // local list as the working truth; the next pass retries.
                warn!(
                    applied,
                    expected = edits.len(),
                    "reconcile left remote diverged; keeping local state"
                );
                return;
            }
        }

        // Replace the working set with the confirmed remote state.
        match self.inner.backend.list_cart_lines(cart).await {
            Ok(mut confirmed) => {
                enrich(&self.inner.backend, &mut confirmed).await;
                let mut state = self.lock_state();
                let merged = merge_confirmed(confirmed, &state.lines, &state.touched, start_gen);
                state.lines = merged;
                self.persist_locked(&state);
            }
            Err(e) => warn!(%cart, error = %e, "reconcile could not refresh confirmed lines"),
        }
    }

    /// Full remote load that supersedes the local cache.
    async fn refresh_from_remote(&self, cart: CartId) {
        let start_gen = self.lock_state().generation;
        match self.inner.backend.list_cart_lines(cart).await {
            Ok(mut confirmed) => {
                enrich(&self.inner.backend, &mut confirmed).await;
                let mut state = self.lock_state();
                let merged = merge_confirmed(confirmed, &state.lines, &state.touched, start_gen);
                state.lines = merged;
                self.persist_locked(&state);
            }
            Err(e) => warn!(%cart, error = %e, "remote line load failed; keeping cached snapshot"),
        }
    }

    /// Run the guest migration if one is still owed for this session.
    ///
    /// The flag is taken before the replay so a concurrent pass cannot
    /// migrate twice; the replay itself clears the guest store.
    async fn run_pending_migration(&self, cart: CartId) -> bool {
        let pending = {
            let mut state = self.lock_state();
            std::mem::take(&mut state.pending_migration)
        };
        if pending {
            migrate_guest_cart(&self.inner.backend, &self.inner.store, cart).await;
        }
        pending
    }

    /// Resolve the session's remote cart ID, creating the cart lazily.
    async fn ensure_cart(&self) -> Option<CartId> {
        {
            let state = self.lock_state();
            state.identity?;
            if let Some(cart) = state.cart {
                return Some(cart.id);
            }
        }
        match self.inner.backend.get_or_create_cart().await {
            Ok(cart) => {
                self.lock_state().cart = Some(cart);
                Some(cart.id)
            }
            Err(e) => {
                warn!(error = %e, "could not resolve remote cart");
                None
            }
        }
    }

    // =========================================================================
    // Background tasks
    // =========================================================================

    /// Await all spawned remote work. The optimistic state is already
    /// final before this; callers use it to flush before shutdown or to
    /// observe confirmed state in tests.
    pub async fn wait_idle(&self) {
        loop {
            let handles: Vec<JoinHandle<()>> = {
                let mut pending = self
                    .inner
                    .pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                std::mem::take(&mut *pending)
            };
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                let _ = handle.await;
            }
        }
    }

    fn spawn_task(&self, fut: impl Future<Output = ()> + Send + 'static) {
        let handle = tokio::spawn(fut);
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    fn spawn_reconcile(&self) {
        let this = self.clone();
        self.spawn_task(async move {
            this.reconcile().await;
        });
    }

    /// Confirm a freshly added line remotely, then swap the placeholder ID
    /// for the durable one.
    fn spawn_confirm_add(&self, placeholder: LineId, product: ProductId, quantity: u32) {
        let this = self.clone();
        self.spawn_task(async move {
            if let Some(cart) = this.ensure_cart().await {
                match this.inner.backend.add_cart_line(cart, product, quantity).await {
                    Ok(confirmed) => this.resolve_placeholder(placeholder, &confirmed),
                    Err(e) => warn!(
                        %product,
                        error = %e,
                        "remote create failed; placeholder kept for next reconcile"
                    ),
                }
            }
            this.reconcile().await;
        });
    }

    /// Swap a placeholder ID for the confirmed remote ID in place,
    /// preserving list order.
    fn resolve_placeholder(&self, placeholder: LineId, confirmed: &CartLine) {
        let mut state = self.lock_state();
        let mut resolved = false;
        if let Some(line) = state.lines.iter_mut().find(|l| l.id == placeholder) {
            line.id = confirmed.id;
            if line.price.is_none() {
                line.price = confirmed.price;
            }
            resolved = true;
        }
        if resolved {
            self.persist_locked(&state);
        }
    }

    /// Backfill product snapshots for lines that lack one.
    fn spawn_enrichment(&self) {
        let needed = self
            .lock_state()
            .lines
            .iter()
            .any(|l| l.product.is_none());
        if !needed {
            return;
        }
        let this = self.clone();
        self.spawn_task(async move {
            let mut lines = this.lock_state().lines.clone();
            enrich(&this.inner.backend, &mut lines).await;
            let mut state = this.lock_state();
            for line in lines {
                if line.product.is_some()
                    && let Some(entry) = state
                        .lines
                        .iter_mut()
                        .find(|l| l.id == line.id && l.product.is_none())
                {
                    entry.product = line.product;
                }
            }
            this.persist_locked(&state);
        });
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Write the current line list to the store for the current identity.
    /// Completes before the optimistic update is considered final.
    fn persist_locked(&self, state: &CartState) {
        match state.identity {
            None => self.inner.store.write_guest(&state.lines),
            Some(user) => self.inner.store.write_authenticated(user, &state.lines),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, CartState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Merge a confirmed remote line set over the current in-memory list.
///
/// A mutation that landed while the pass was running wins: any product
/// touched after `start_gen` keeps its current in-memory quantity (or
/// stays removed / stays added), while untouched products take the
/// confirmed remote state wholesale.
fn merge_confirmed(
    confirmed: Vec<CartLine>,
    current: &[CartLine],
    touched: &HashMap<ProductId, u64>,
    start_gen: u64,
) -> Vec<CartLine> {
    let fresh = |product: ProductId| touched.get(&product).is_some_and(|&g| g > start_gen);
    let current_by_product: HashMap<ProductId, &CartLine> =
        current.iter().map(|l| (l.product_id, l)).collect();

    let mut merged: Vec<CartLine> = Vec::new();
    for mut line in confirmed {
        if fresh(line.product_id) {
            match current_by_product.get(&line.product_id) {
                // Mutated mid-pass: local quantity wins; keep the
                // confirmed ID and enrichment.
                Some(cur) => {
                    line.quantity = cur.quantity;
                    merged.push(line);
                }
                // Removed mid-pass: stays removed.
                None => {}
            }
        } else {
            merged.push(line);
        }
    }

    // Lines added mid-pass that the confirmed set does not know about yet.
    let confirmed_products: std::collections::HashSet<ProductId> =
        merged.iter().map(|l| l.product_id).collect();
    for line in current {
        if fresh(line.product_id) && !confirmed_products.contains(&line.product_id) {
            merged.push(line.clone());
        }
    }

    merged
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex, PoisonError};

    use rust_decimal::Decimal;
    use tokio::sync::Semaphore;

    use store404_core::{CartId, CurrencyCode, Price, ProductId, UserId};

    use super::*;
    use crate::cart::store::MemoryStore;
    use crate::cart::types::ProductSnapshot;

    // =========================================================================
    // FakeBackend (shared with enrich/migrate tests)
    // =========================================================================

    #[derive(Debug, thiserror::Error)]
    #[error("fake backend error: {0}")]
    pub(crate) struct FakeError(&'static str);

    #[derive(Default)]
    struct FakeState {
        next_line_id: i64,
        cart: Option<Cart>,
        /// (line id, product id, quantity)
        lines: Vec<(i64, i64, u32)>,
        products: HashMap<i64, ProductSnapshot>,
        failing_products: HashSet<i64>,
        offline: bool,
        /// When set, `list_cart_lines` consumes a permit before returning.
        list_gate: Option<Arc<Semaphore>>,
        add_calls: usize,
        update_calls: usize,
        delete_calls: usize,
        list_calls: usize,
        product_fetches: usize,
    }

    /// In-process stand-in for the Xano backend.
    #[derive(Clone, Default)]
    pub(crate) struct FakeBackend {
        state: Arc<Mutex<FakeState>>,
    }

    impl FakeBackend {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
            self.state.lock().unwrap_or_else(PoisonError::into_inner)
        }

        pub(crate) fn seed_product(&self, id: i64, name: &str, price: f64) {
            let price = Decimal::try_from(price)
                .ok()
                .map(|amount| Price::new(amount, CurrencyCode::USD));
            self.lock().products.insert(
                id,
                ProductSnapshot {
                    id: ProductId::new(id),
                    name: name.to_string(),
                    price,
                    image_url: None,
                },
            );
        }

        pub(crate) fn seed_remote_line(&self, product: i64, quantity: u32) -> i64 {
            let mut state = self.lock();
            state.next_line_id += 1;
            let id = 100 + state.next_line_id;
            state.lines.push((id, product, quantity));
            id
        }

        pub(crate) async fn ensure_cart(&self) -> CartId {
            self.get_or_create_cart().await.expect("fake cart").id
        }

        pub(crate) fn fail_adds_for_product(&self, product: i64) {
            self.lock().failing_products.insert(product);
        }

        pub(crate) fn clear_failures(&self) {
            self.lock().failing_products.clear();
        }

        pub(crate) fn set_offline(&self, offline: bool) {
            self.lock().offline = offline;
        }

        pub(crate) fn gate_lists(&self, gate: Arc<Semaphore>) {
            self.lock().list_gate = Some(gate);
        }

        /// Remote lines as `(product id, quantity)`, sorted by product.
        pub(crate) fn remote_quantities(&self) -> Vec<(i64, u32)> {
            let mut lines: Vec<(i64, u32)> = self
                .lock()
                .lines
                .iter()
                .map(|&(_, product, quantity)| (product, quantity))
                .collect();
            lines.sort_unstable();
            lines
        }

        pub(crate) fn add_calls(&self) -> usize {
            self.lock().add_calls
        }

        pub(crate) fn update_calls(&self) -> usize {
            self.lock().update_calls
        }

        pub(crate) fn delete_calls(&self) -> usize {
            self.lock().delete_calls
        }

        pub(crate) fn product_fetches(&self) -> usize {
            self.lock().product_fetches
        }

        pub(crate) fn reset_calls(&self) {
            let mut state = self.lock();
            state.add_calls = 0;
            state.update_calls = 0;
            state.delete_calls = 0;
            state.list_calls = 0;
            state.product_fetches = 0;
        }
    }

    impl CommerceBackend for FakeBackend {
        type Error = FakeError;

        async fn get_or_create_cart(&self) -> Result<Cart, FakeError> {
            let mut state = self.lock();
            if state.offline {
                return Err(FakeError("offline"));
            }
            let cart = *state.cart.get_or_insert(Cart {
                id: CartId::new(1),
                owner: Some(UserId::new(7)),
            });
            Ok(cart)
        }

        async fn list_cart_lines(&self, _cart: CartId) -> Result<Vec<CartLine>, FakeError> {
            let gate = self.lock().list_gate.clone();
            if let Some(gate) = gate {
                gate.acquire()
                    .await
                    .map_err(|_| FakeError("gate closed"))?
                    .forget();
            }
            let mut state = self.lock();
            if state.offline {
                return Err(FakeError("offline"));
            }
            state.list_calls += 1;
            Ok(state
                .lines
                .iter()
                .map(|&(id, product, quantity)| CartLine {
                    id: LineId::Remote(id),
                    product_id: ProductId::new(product),
                    quantity,
                    price: None,
                    product: None,
                    origin: LineOrigin::Authenticated,
                })
                .collect())
        }

        async fn add_cart_line(
            &self,
            _cart: CartId,
            product: ProductId,
            quantity: u32,
        ) -> Result<CartLine, FakeError> {
            let mut state = self.lock();
            if state.offline {
                return Err(FakeError("offline"));
            }
            if state.failing_products.contains(&product.as_i64()) {
                return Err(FakeError("add rejected"));
            }
            state.add_calls += 1;
            state.next_line_id += 1;
            let id = 100 + state.next_line_id;
            state.lines.push((id, product.as_i64(), quantity));
            Ok(CartLine {
                id: LineId::Remote(id),
                product_id: product,
                quantity,
                price: None,
                product: None,
                origin: LineOrigin::Authenticated,
            })
        }

        async fn update_cart_line_quantity(
            &self,
            line: i64,
            quantity: u32,
        ) -> Result<CartLine, FakeError> {
            let mut state = self.lock();
            if state.offline {
                return Err(FakeError("offline"));
            }
            state.update_calls += 1;
            let entry = state
                .lines
                .iter_mut()
                .find(|(id, _, _)| *id == line)
                .ok_or(FakeError("line not found"))?;
            entry.2 = quantity;
            let product = entry.1;
            Ok(CartLine {
                id: LineId::Remote(line),
                product_id: ProductId::new(product),
                quantity,
                price: None,
                product: None,
                origin: LineOrigin::Authenticated,
            })
        }

        async fn delete_cart_line(&self, line: i64) -> Result<(), FakeError> {
            let mut state = self.lock();
            if state.offline {
                return Err(FakeError("offline"));
            }
            state.delete_calls += 1;
            let before = state.lines.len();
            state.lines.retain(|(id, _, _)| *id != line);
            if state.lines.len() == before {
                return Err(FakeError("line not found"));
            }
            Ok(())
        }

        async fn get_product(&self, product: ProductId) -> Result<ProductSnapshot, FakeError> {
            let mut state = self.lock();
            if state.offline {
                return Err(FakeError("offline"));
            }
            state.product_fetches += 1;
            state
                .products
                .get(&product.as_i64())
                .cloned()
                .ok_or(FakeError("product not found"))
        }
    }

    fn controller(backend: FakeBackend) -> CartController<FakeBackend, MemoryStore> {
        CartController::new(backend, MemoryStore::new())
    }

    fn controller_with_store(
        backend: FakeBackend,
        store: MemoryStore,
    ) -> CartController<FakeBackend, MemoryStore> {
        CartController::new(backend, store)
    }

    // =========================================================================
    // Guest-mode properties
    // =========================================================================

    #[tokio::test]
    async fn test_repeated_adds_merge_into_one_line() {
        let backend = FakeBackend::new();
        backend.seed_product(1, "Mug", 5.0);
        let cart = controller(backend);
        cart.set_identity(None).await;

        cart.add(ProductRef::Id(ProductId::new(1)), 1);
        cart.add(ProductRef::Id(ProductId::new(1)), 2);
        cart.wait_idle().await;

        let lines = cart.lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines.first().expect("line").quantity, 3);
        assert_eq!(cart.count(), 3);
    }

    #[tokio::test]
    async fn test_set_quantity_clamps_to_one() {
        let backend = FakeBackend::new();
        backend.seed_product(1, "Mug", 5.0);
        let cart = controller(backend);
        cart.set_identity(None).await;

        let id = cart.add(ProductRef::Id(ProductId::new(1)), 4);
        cart.set_quantity(id, 0);
        cart.wait_idle().await;

        assert_eq!(cart.lines().first().expect("line").quantity, 1);
    }

    #[tokio::test]
    async fn test_remove_clears_memory_and_store() {
        let backend = FakeBackend::new();
        backend.seed_product(1, "Mug", 5.0);
        let store = MemoryStore::new();
        let cart = controller_with_store(backend, store);
        cart.set_identity(None).await;

        let id = cart.add(ProductRef::Id(ProductId::new(1)), 2);
        assert!(!cart.inner.store.read_guest().is_empty());
        cart.remove(id);
        cart.wait_idle().await;

        // Removal reaches both memory and the guest snapshot.
        assert!(cart.lines().is_empty());
        assert!(cart.inner.store.read_guest().is_empty());
    }

    #[tokio::test]
    async fn test_increment_add_retries_failed_enrichment() {
        let backend = FakeBackend::new();
        let cart = controller(backend.clone());
        cart.set_identity(None).await;

        // First add: the product cannot be fetched, the line stays bare.
        cart.add(ProductRef::Id(ProductId::new(1)), 1);
        cart.wait_idle().await;
        assert!(cart.lines().first().expect("line").product.is_none());

        // Second add increments the existing line; the mutation schedules
        // another enrichment pass which now succeeds.
        backend.seed_product(1, "Mug", 5.0);
        cart.add(ProductRef::Id(ProductId::new(1)), 1);
        cart.wait_idle().await;

        let lines = cart.lines();
        let line = lines.first().expect("line");
        assert_eq!(line.quantity, 2);
        assert!(line.product.is_some());
    }

    #[tokio::test]
    async fn test_guest_add_with_inline_product_renders_total() {
        let cart = controller(FakeBackend::new());
        cart.set_identity(None).await;

        cart.add(
            ProductRef::Inline(ProductSnapshot {
                id: ProductId::new(1),
                name: "Mug".to_string(),
                price: Some(Price::new(Decimal::new(1050, 2), CurrencyCode::USD)),
                image_url: None,
            }),
            2,
        );
        cart.wait_idle().await;

        assert_eq!(cart.total().amount, Decimal::new(2100, 2));
    }

    // =========================================================================
    // Authenticated-mode behavior
    // =========================================================================

    #[tokio::test]
    async fn test_authenticated_add_swaps_placeholder() {
        let backend = FakeBackend::new();
        backend.seed_product(1, "Mug", 5.0);
        let cart = controller(backend.clone());
        cart.set_identity(Some(UserId::new(7))).await;

        let id = cart.add(ProductRef::Id(ProductId::new(1)), 2);
        assert!(id.is_local());
        assert!(cart.lines().first().expect("line").id.is_local());

        cart.wait_idle().await;

        let lines = cart.lines();
        assert_eq!(lines.len(), 1);
        let line = lines.first().expect("line");
        assert!(!line.id.is_local());
        assert_eq!(line.quantity, 2);
        assert_eq!(backend.remote_quantities(), vec![(1, 2)]);
    }

    #[tokio::test]
    async fn test_failed_create_keeps_placeholder_until_reconcile() {
        let backend = FakeBackend::new();
        backend.seed_product(1, "Mug", 5.0);
        backend.fail_adds_for_product(1);
        let cart = controller(backend.clone());
        cart.set_identity(Some(UserId::new(7))).await;

        cart.add(ProductRef::Id(ProductId::new(1)), 2);
        cart.wait_idle().await;

        // Create failed: line survives in placeholder form, remote empty.
        assert!(cart.lines().first().expect("line").id.is_local());
        assert!(backend.remote_quantities().is_empty());

        // Next pass heals the mismatch.
        backend.clear_failures();
        assert!(cart.reconcile().await);
        assert_eq!(backend.remote_quantities(), vec![(1, 2)]);
        assert!(!cart.lines().first().expect("line").id.is_local());
    }

    #[tokio::test]
    async fn test_login_migrates_guest_cart_and_converges() {
        let backend = FakeBackend::new();
        backend.seed_product(1, "Mug", 5.0);
        let store = MemoryStore::new();
        let cart = controller_with_store(backend.clone(), store);

        // Guest adds P1 qty 1, then qty 2 more.
        cart.set_identity(None).await;
        cart.add(ProductRef::Id(ProductId::new(1)), 1);
        cart.add(ProductRef::Id(ProductId::new(1)), 2);
        cart.wait_idle().await;
        assert_eq!(cart.lines().first().expect("line").quantity, 3);

        // Login: migration creates one remote line with quantity 3.
        cart.set_identity(Some(UserId::new(7))).await;
        cart.wait_idle().await;
        assert_eq!(backend.remote_quantities(), vec![(1, 3)]);

        // Guest snapshot is consumed.
        assert!(cart.inner.store.read_guest().is_empty());

        // First reconciliation pass finds remote already matching and
        // issues no mutation calls.
        backend.reset_calls();
        assert!(cart.reconcile().await);
        assert_eq!(backend.add_calls(), 0);
        assert_eq!(backend.update_calls(), 0);
        assert_eq!(backend.delete_calls(), 0);
    }

    #[tokio::test]
    async fn test_login_with_unreachable_backend_defers_migration() {
        let backend = FakeBackend::new();
        backend.seed_product(1, "Mug", 5.0);
        let cart = controller(backend.clone());

        cart.set_identity(None).await;
        cart.add(ProductRef::Id(ProductId::new(1)), 3);
        cart.wait_idle().await;

        // Login while the backend is unreachable: no remote cart resolves,
        // so the migration cannot run and the guest snapshot stays intact.
        backend.set_offline(true);
        cart.set_identity(Some(UserId::new(7))).await;
        assert!(backend.remote_quantities().is_empty());
        assert_eq!(cart.inner.store.read_guest().len(), 1);

        // Connectivity returns: the next pass migrates, then loads.
        backend.set_offline(false);
        assert!(cart.reconcile().await);
        assert_eq!(backend.remote_quantities(), vec![(1, 3)]);
        assert!(cart.inner.store.read_guest().is_empty());
        assert_eq!(cart.lines().first().expect("line").quantity, 3);
    }

    #[tokio::test]
    async fn test_offline_remove_propagates_as_single_delete() {
        let backend = FakeBackend::new();
        backend.seed_product(2, "Shirt", 20.0);
        backend.seed_remote_line(2, 2);
        let cart = controller(backend.clone());
        cart.set_identity(Some(UserId::new(7))).await;

        let line_id = cart.lines().first().expect("line").id;

        // Offline removal: optimistic state wins, remote calls fail.
        backend.set_offline(true);
        cart.remove(line_id);
        cart.wait_idle().await;
        assert!(cart.lines().is_empty());

        // Connectivity returns: exactly one delete, no creates or updates.
        backend.set_offline(false);
        backend.reset_calls();
        assert!(cart.reconcile().await);
        assert_eq!(backend.delete_calls(), 1);
        assert_eq!(backend.add_calls(), 0);
        assert_eq!(backend.update_calls(), 0);
        assert!(backend.remote_quantities().is_empty());
    }

    #[tokio::test]
    async fn test_quantity_update_failure_keeps_optimistic_value() {
        let backend = FakeBackend::new();
        backend.seed_product(1, "Mug", 5.0);
        backend.seed_remote_line(1, 2);
        let cart = controller(backend.clone());
        cart.set_identity(Some(UserId::new(7))).await;

        let line_id = cart.lines().first().expect("line").id;
        backend.set_offline(true);
        cart.set_quantity(line_id, 5);
        cart.wait_idle().await;

        assert_eq!(cart.lines().first().expect("line").quantity, 5);
    }

    #[tokio::test]
    async fn test_identity_switch_reads_own_cache() {
        let store = MemoryStore::new();
        let alice = UserId::new(1);
        let bob = UserId::new(2);
        store.write_authenticated(
            alice,
            &[CartLine {
                id: LineId::Remote(500),
                product_id: ProductId::new(1),
                quantity: 4,
                price: None,
                product: None,
                origin: LineOrigin::Authenticated,
            }],
        );

        let backend = FakeBackend::new();
        backend.set_offline(true); // remote load fails, cache is kept
        let cart = controller_with_store(backend, store);

        cart.set_identity(Some(alice)).await;
        assert_eq!(cart.count(), 4);

        cart.set_identity(Some(bob)).await;
        assert!(cart.lines().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_converges_arbitrary_divergence() {
        let backend = FakeBackend::new();
        backend.seed_product(1, "Mug", 5.0);
        backend.seed_product(3, "Poster", 8.0);
        backend.seed_remote_line(1, 1);
        backend.seed_remote_line(5, 9);
        let cart = controller(backend.clone());
        cart.set_identity(Some(UserId::new(7))).await;

        // Diverge in all three ways while offline: update P1, add P3,
        // remove P5.
        backend.set_offline(true);
        let lines = cart.lines();
        let p1 = lines
            .iter()
            .find(|l| l.product_id == ProductId::new(1))
            .expect("p1")
            .id;
        let p5 = lines
            .iter()
            .find(|l| l.product_id == ProductId::new(5))
            .expect("p5")
            .id;
        cart.set_quantity(p1, 4);
        cart.add(ProductRef::Id(ProductId::new(3)), 2);
        cart.remove(p5);
        cart.wait_idle().await;

        // One pass converges the remote line set to the local list.
        backend.set_offline(false);
        assert!(cart.reconcile().await);
        assert_eq!(backend.remote_quantities(), vec![(1, 4), (3, 2)]);
        assert!(cart.lines().iter().all(|l| !l.id.is_local()));
    }

    // =========================================================================
    // Reconciliation internals
    // =========================================================================

    #[tokio::test]
    async fn test_reconcile_in_flight_requests_are_dropped() {
        let backend = FakeBackend::new();
        let cart = controller(backend.clone());
        cart.set_identity(Some(UserId::new(7))).await;

        let gate = Arc::new(Semaphore::new(0));
        backend.gate_lists(Arc::clone(&gate));

        let first = {
            let cart = cart.clone();
            tokio::spawn(async move { cart.reconcile().await })
        };
        // Let the first pass start and park on the gated list call.
        tokio::task::yield_now().await;

        assert!(!cart.reconcile().await, "second request should be dropped");

        gate.add_permits(2);
        assert!(first.await.expect("join"), "first pass should complete");
    }

    #[test]
    fn test_merge_confirmed_mid_pass_mutation_wins() {
        let confirmed = vec![
            CartLine {
                id: LineId::Remote(101),
                product_id: ProductId::new(1),
                quantity: 2,
                price: None,
                product: None,
                origin: LineOrigin::Authenticated,
            },
            CartLine {
                id: LineId::Remote(102),
                product_id: ProductId::new(2),
                quantity: 1,
                price: None,
                product: None,
                origin: LineOrigin::Authenticated,
            },
        ];
        // While the pass ran: P1 bumped to 9, P2 removed, P3 added.
        let current = vec![
            CartLine {
                id: LineId::Remote(101),
                product_id: ProductId::new(1),
                quantity: 9,
                price: None,
                product: None,
                origin: LineOrigin::Authenticated,
            },
            CartLine {
                id: LineId::new_local(),
                product_id: ProductId::new(3),
                quantity: 1,
                price: None,
                product: None,
                origin: LineOrigin::Authenticated,
            },
        ];
        let touched = HashMap::from([
            (ProductId::new(1), 11),
            (ProductId::new(2), 12),
            (ProductId::new(3), 13),
        ]);

        let merged = merge_confirmed(confirmed, &current, &touched, 10);

        let by_product: HashMap<i64, u32> = merged
            .iter()
            .map(|l| (l.product_id.as_i64(), l.quantity))
            .collect();
        assert_eq!(by_product.get(&1), Some(&9), "mutation wins over confirm");
        assert_eq!(by_product.get(&2), None, "removal stays removed");
        assert_eq!(by_product.get(&3), Some(&1), "mid-pass add survives");
        // Confirmed ID kept for the mutated line.
        assert!(merged.iter().any(|l| l.id == LineId::Remote(101)));
    }

    #[test]
    fn test_merge_confirmed_untouched_takes_remote_wholesale() {
        let confirmed = vec![CartLine {
            id: LineId::Remote(101),
            product_id: ProductId::new(1),
            quantity: 7,
            price: None,
            product: None,
            origin: LineOrigin::Authenticated,
        }];
        let current = vec![CartLine {
            id: LineId::new_local(),
            product_id: ProductId::new(1),
            quantity: 3,
            price: None,
            product: None,
            origin: LineOrigin::Authenticated,
        }];

        let merged = merge_confirmed(confirmed, &current, &HashMap::new(), 10);

        assert_eq!(merged.len(), 1);
        let line = merged.first().expect("line");
        assert_eq!(line.quantity, 7);
        assert_eq!(line.id, LineId::Remote(101));
    }
}
