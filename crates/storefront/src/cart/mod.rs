//! Cart engine: optimistic local state, background remote convergence.
//!
//! The [`CartController`] is the single entry point. It owns the in-memory
//! line list, persists every change through a [`CartStore`], and keeps an
//! authenticated session's remote cart converged through a
//! [`CommerceBackend`].

pub mod backend;
pub mod controller;
pub mod enrich;
pub mod migrate;
pub mod reconcile;
pub mod store;
pub mod types;

pub use backend::{CommerceBackend, RemoteLineId};
pub use controller::CartController;
pub use store::{CartStore, JsonFileStore, MemoryStore};
pub use types::{Cart, CartLine, LineId, LineOrigin, ProductRef, ProductSnapshot};
