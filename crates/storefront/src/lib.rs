//! 404 Store storefront client library.
//!
//! The storefront talks to a Xano commerce backend. Most of the client is
//! thin pass-through; the part with real design pressure lives in [`cart`]:
//! an optimistic in-memory cart that stays responsive while a background
//! reconciliation pass converges the remote cart to local state.
//!
//! # Architecture
//!
//! - [`config`] - Environment-driven configuration
//! - [`xano`] - REST client for the Xano commerce API
//! - [`cart`] - The cart synchronization engine:
//!   local snapshots, optimistic mutations, guest cart migration on login,
//!   and backend reconciliation
//!
//! # Example
//!
//! ```rust,ignore
//! use store404_storefront::cart::{CartController, JsonFileStore, ProductRef};
//! use store404_storefront::config::StorefrontConfig;
//! use store404_storefront::xano::XanoClient;
//! use store404_core::ProductId;
//!
//! let config = StorefrontConfig::from_env()?;
//! let backend = XanoClient::new(&config);
//! let store = JsonFileStore::new(config.cache_dir.clone());
//! let cart = CartController::new(backend, store);
//!
//! cart.set_identity(None).await; // guest session
//! cart.add(ProductRef::Id(ProductId::new(42)), 1);
//! cart.wait_idle().await;
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod cart;
pub mod config;
pub mod xano;
