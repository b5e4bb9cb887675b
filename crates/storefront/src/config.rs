//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `XANO_STORE_BASE` - Base URL of the Xano commerce API group
//!
//! ## Optional
//! - `XANO_AUTH_TOKEN` - Bearer token for an authenticated session
//! - `CART_CACHE_DIR` - Directory for local cart snapshots (default: `.store404`)
//! - `SENTRY_DSN` - Sentry error tracking DSN

use std::path::PathBuf;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Storefront application configuration.
///
/// Implements `Debug` manually to redact the auth token.
#[derive(Clone)]
pub struct StorefrontConfig {
    /// Base URL of the Xano commerce API group
    pub store_base: Url,
    /// Bearer token for an authenticated session, if any
    pub auth_token: Option<SecretString>,
    /// Directory for local cart snapshots
    pub cache_dir: PathBuf,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
}

impl std::fmt::Debug for StorefrontConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorefrontConfig")
            .field("store_base", &self.store_base.as_str())
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("cache_dir", &self.cache_dir)
            .field("sentry_dsn", &self.sentry_dsn)
            .finish()
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let store_base = parse_base_url("XANO_STORE_BASE", &get_env("XANO_STORE_BASE")?)?;
        let auth_token = std::env::var("XANO_AUTH_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .map(SecretString::from);
        let cache_dir = PathBuf::from(get_env_or_default("CART_CACHE_DIR", ".store404"));
        let sentry_dsn = std::env::var("SENTRY_DSN").ok().filter(|d| !d.is_empty());

        Ok(Self {
            store_base,
            auth_token,
            cache_dir,
            sentry_dsn,
        })
    }
}

/// Parse and validate an API base URL.
fn parse_base_url(var: &str, value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidEnvVar(var.to_string(), e.to_string()))?;
    if url.cannot_be_a_base() {
        return Err(ConfigError::InvalidEnvVar(
            var.to_string(),
            "URL cannot be a base".to_string(),
        ));
    }
    Ok(url)
}

/// Get a required environment variable.
fn get_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

/// Get an environment variable with a default value.
fn get_env_or_default(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_base_url() {
        let url = parse_base_url("XANO_STORE_BASE", "https://x8ki.example.io/api:3Xncgo9I")
            .expect("valid URL");
        assert_eq!(url.host_str(), Some("x8ki.example.io"));
    }

    #[test]
    fn test_parse_base_url_rejects_garbage() {
        assert!(parse_base_url("XANO_STORE_BASE", "not a url").is_err());
        assert!(parse_base_url("XANO_STORE_BASE", "mailto:foo@bar").is_err());
    }
}
