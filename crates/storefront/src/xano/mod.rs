//! Xano commerce API client.
//!
//! # Architecture
//!
//! - Plain REST + JSON over `reqwest`
//! - Xano is source of truth for authenticated carts; the cart engine in
//!   [`crate::cart`] converges toward it rather than mirroring it
//! - In-memory caching via `moka` for product lookups (5 minute TTL)
//!
//! Authentication is a bearer token minted by the auth API group; the
//! token lifecycle itself is owned by the session layer, this module only
//! attaches whatever token it is handed.

mod client;
pub mod types;

pub use client::XanoClient;

use thiserror::Error;

/// Errors that can occur when talking to the Xano API.
#[derive(Debug, Error)]
pub enum XanoError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Token missing, expired, or rejected.
    #[error("Unauthorized")]
    Unauthorized,

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Non-success status from the API.
    #[error("API error {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },
}
