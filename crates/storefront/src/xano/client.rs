//! Xano REST client implementation.
//!
//! Plain JSON over `reqwest` against the commerce API group. Products are
//! cached with `moka` (5-minute TTL) since they change rarely and every
//! enrichment pass asks for them.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use moka::future::Cache;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use store404_core::{CartId, ProductId};

use crate::cart::backend::{CommerceBackend, RemoteLineId};
use crate::cart::types::{Cart, CartLine, ProductSnapshot};
use crate::config::StorefrontConfig;
use crate::xano::XanoError;
use crate::xano::types::{CartProductRecord, CartRecord, ListResponse, ProductRecord};

// =============================================================================
// XanoClient
// =============================================================================

/// Client for the Xano commerce API group.
///
/// Cheaply cloneable; clones share the HTTP pool, the bearer token, and
/// the product cache.
#[derive(Clone)]
pub struct XanoClient {
    inner: Arc<XanoClientInner>,
}

struct XanoClientInner {
    http: reqwest::Client,
    /// API group base, no trailing slash. Xano bases end in an opaque
    /// `api:...` segment, so paths are joined by string concatenation
    /// rather than `Url::join`.
    base: String,
    /// Session bearer token; absent for anonymous traffic.
    token: RwLock<Option<SecretString>>,
    products: Cache<ProductId, ProductSnapshot>,
}

impl XanoClient {
    /// Create a new client from configuration.
    #[must_use]
    pub fn new(config: &StorefrontConfig) -> Self {
        let products = Cache::builder()
            .max_capacity(1000)
            .time_to_live(Duration::from_secs(300)) // 5 minutes
            .build();

        Self {
            inner: Arc::new(XanoClientInner {
                http: reqwest::Client::new(),
                base: config.store_base.as_str().trim_end_matches('/').to_string(),
                token: RwLock::new(config.auth_token.clone()),
                products,
            }),
        }
    }

    /// Replace the bearer token for subsequent requests.
    ///
    /// Called by the session layer on login and logout; in-flight requests
    /// keep the token they started with.
    pub fn set_token(&self, token: Option<SecretString>) {
        *self
            .inner
            .token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = token;
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.inner.base)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let token = self
            .inner
            .token
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        match token.as_ref() {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    /// Send a request and decode a JSON body.
    ///
    /// The body is read as text first so error responses can be logged
    /// even when they are not valid JSON.
    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<T, XanoError> {
        let text = self.send_text(request, context).await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Send a request where only success matters.
    async fn send_ok(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<(), XanoError> {
        self.send_text(request, context).await.map(|_| ())
    }

    async fn send_text(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> Result<String, XanoError> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(XanoError::Unauthorized);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(XanoError::NotFound(context.to_string()));
        }
        if !status.is_success() {
            tracing::error!(
                status = %status,
                context,
                body = %text.chars().take(500).collect::<String>(),
                "Xano API returned non-success status"
            );
            return Err(XanoError::Status {
                status: status.as_u16(),
                body: text.chars().take(200).collect(),
            });
        }

        Ok(text)
    }
}

// =============================================================================
// CommerceBackend implementation
// =============================================================================

impl CommerceBackend for XanoClient {
    type Error = XanoError;

    /// `GET /cart` returns the session's carts; Xano scopes the list to
    /// the bearer token. The first cart wins; none means we create one.
    #[instrument(skip(self))]
    async fn get_or_create_cart(&self) -> Result<Cart, XanoError> {
        let carts: ListResponse<CartRecord> = self
            .send_json(self.inner.http.get(self.endpoint("cart")), "cart list")
            .await?;

        if let Some(record) = carts.into_items().into_iter().next() {
            return Ok(record.into());
        }

        debug!("no remote cart for session; creating one");
        let created: CartRecord = self
            .send_json(
                self.inner
                    .http
                    .post(self.endpoint("cart"))
                    .json(&serde_json::json!({})),
                "cart create",
            )
            .await?;
        Ok(created.into())
    }

    #[instrument(skip(self))]
    async fn list_cart_lines(&self, cart: CartId) -> Result<Vec<CartLine>, XanoError> {
        let records: ListResponse<CartProductRecord> = self
            .send_json(
                self.inner
                    .http
                    .get(self.endpoint("cart_product"))
                    .query(&[("cart_id", cart.as_i64())]),
                "cart line list",
            )
            .await?;
        Ok(records.into_items().into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn add_cart_line(
        &self,
        cart: CartId,
        product: ProductId,
        quantity: u32,
    ) -> Result<CartLine, XanoError> {
        let record: CartProductRecord = self
            .send_json(
                self.inner
                    .http
                    .post(self.endpoint("cart_product"))
                    .json(&serde_json::json!({
                        "cart_id": cart.as_i64(),
                        "product_id": product.as_i64(),
                        "quantity": quantity,
                    })),
                "cart line create",
            )
            .await?;
        Ok(record.into())
    }

    #[instrument(skip(self))]
    async fn update_cart_line_quantity(
        &self,
        line: RemoteLineId,
        quantity: u32,
    ) -> Result<CartLine, XanoError> {
        let record: CartProductRecord = self
            .send_json(
                self.inner
                    .http
                    .patch(self.endpoint(&format!("cart_product/{line}")))
                    .json(&serde_json::json!({ "quantity": quantity })),
                "cart line update",
            )
            .await?;
        Ok(record.into())
    }

    #[instrument(skip(self))]
    async fn delete_cart_line(&self, line: RemoteLineId) -> Result<(), XanoError> {
        self.send_ok(
            self.inner
                .http
                .delete(self.endpoint(&format!("cart_product/{line}"))),
            "cart line delete",
        )
        .await
    }

    #[instrument(skip(self))]
    async fn get_product(&self, product: ProductId) -> Result<ProductSnapshot, XanoError> {
        if let Some(snapshot) = self.inner.products.get(&product).await {
            return Ok(snapshot);
        }

        let record: ProductRecord = self
            .send_json(
                self.inner
                    .http
                    .get(self.endpoint(&format!("product/{product}"))),
                "product fetch",
            )
            .await?;
        let snapshot = ProductSnapshot::from(record);
        self.inner.products.insert(product, snapshot.clone()).await;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use url::Url;

    fn config(base: &str) -> StorefrontConfig {
        StorefrontConfig {
            store_base: Url::parse(base).expect("base url"),
            auth_token: None,
            cache_dir: PathBuf::from(".store404"),
            sentry_dsn: None,
        }
    }

    #[test]
    fn test_endpoint_joins_without_double_slash() {
        let client = XanoClient::new(&config("https://x8k1.xano.io/api:AbC123/"));
        assert_eq!(
            client.endpoint("cart_product"),
            "https://x8k1.xano.io/api:AbC123/cart_product"
        );
    }

    #[test]
    fn test_set_token_replaces_session_token() {
        let client = XanoClient::new(&config("https://x8k1.xano.io/api:AbC123"));
        client.set_token(Some(SecretString::from("tok-1".to_string())));
        {
            let token = client.inner.token.read().expect("lock");
            assert_eq!(token.as_ref().expect("token").expose_secret(), "tok-1");
        }
        client.set_token(None);
        assert!(client.inner.token.read().expect("lock").is_none());
    }
}
