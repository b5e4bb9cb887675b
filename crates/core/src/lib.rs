//! 404 Store Core - Shared types library.
//!
//! This crate provides common types used across all 404 Store components:
//! - `storefront` - The storefront client library (cart engine, Xano API client)
//! - `cli` - Command-line tool for driving a cart session
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no HTTP clients. This keeps
//! it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for type-safe IDs and prices

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
