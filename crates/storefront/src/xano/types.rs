//! Wire types for the Xano commerce API.
//!
//! These mirror the backend's `cart`, `cart_product`, and `product` tables
//! and are kept separate from the domain types in [`crate::cart::types`].
//! Xano list endpoints sometimes return a bare array and sometimes an
//! `{"items": [...]}` envelope depending on pagination settings, so every
//! list response goes through [`ListResponse`].

use rust_decimal::Decimal;
use serde::Deserialize;

use store404_core::{CartId, CurrencyCode, Price, ProductId, UserId};

use crate::cart::types::{Cart, CartLine, LineId, LineOrigin, ProductSnapshot};

/// A list endpoint response: bare array or paginated envelope.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ListResponse<T> {
    Plain(Vec<T>),
    Envelope { items: Vec<T> },
}

impl<T> ListResponse<T> {
    /// Unwrap into the item list.
    pub fn into_items(self) -> Vec<T> {
        match self {
            Self::Plain(items) | Self::Envelope { items } => items,
        }
    }
}

/// A row in the backend `cart` table.
#[derive(Debug, Clone, Deserialize)]
pub struct CartRecord {
    pub id: i64,
    #[serde(default)]
    pub user_id: Option<i64>,
}

impl From<CartRecord> for Cart {
    fn from(record: CartRecord) -> Self {
        Self {
            id: CartId::new(record.id),
            owner: record.user_id.map(UserId::new),
        }
    }
}

/// A row in the backend `cart_product` join table.
#[derive(Debug, Clone, Deserialize)]
pub struct CartProductRecord {
    pub id: i64,
    #[serde(default)]
    pub cart_id: Option<i64>,
    pub product_id: i64,
    #[serde(default)]
    pub quantity: Option<i64>,
    /// Unit price snapshotted at add time, if the backend stores one.
    #[serde(default)]
    pub price: Option<f64>,
    /// Embedded product row, if the endpoint uses a Xano addon to join it.
    #[serde(default)]
    pub product: Option<ProductRecord>,
}

impl From<CartProductRecord> for CartLine {
    fn from(record: CartProductRecord) -> Self {
        let quantity = record
            .quantity
            .and_then(|q| u32::try_from(q).ok())
            .unwrap_or(1)
            .max(1);
        Self {
            id: LineId::Remote(record.id),
            product_id: ProductId::new(record.product_id),
            quantity,
            price: record.price.and_then(price_from_f64),
            product: record.product.map(ProductSnapshot::from),
            origin: LineOrigin::Authenticated,
        }
    }
}

/// A row in the backend `product` table.
#[derive(Debug, Clone, Deserialize)]
pub struct ProductRecord {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub images: Vec<ImageRecord>,
}

/// One entry of a product's `images` column.
///
/// Uploads attached through different admin flows left different shapes
/// behind; tolerate all of them.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageRecord {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub src: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

impl ImageRecord {
    /// Best available URL for this image.
    fn into_url(self) -> Option<String> {
        self.url.or(self.src).or(self.path)
    }
}

impl From<ProductRecord> for ProductSnapshot {
    fn from(record: ProductRecord) -> Self {
        Self {
            id: ProductId::new(record.id),
            name: record.name.unwrap_or_default(),
            price: record.price.and_then(price_from_f64),
            image_url: record.images.into_iter().find_map(ImageRecord::into_url),
        }
    }
}

/// Convert a JSON number price into exact decimal money.
fn price_from_f64(value: f64) -> Option<Price> {
    Decimal::try_from(value)
        .ok()
        .map(|amount| Price::new(amount.round_dp(2), CurrencyCode::USD))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_response_plain_and_envelope() {
        let plain: ListResponse<CartRecord> =
            serde_json::from_str(r#"[{"id": 1}]"#).expect("plain array");
        assert_eq!(plain.into_items().len(), 1);

        let envelope: ListResponse<CartRecord> =
            serde_json::from_str(r#"{"items": [{"id": 1}, {"id": 2}]}"#).expect("envelope");
        assert_eq!(envelope.into_items().len(), 2);
    }

    #[test]
    fn test_cart_product_conversion_clamps_quantity() {
        let record: CartProductRecord =
            serde_json::from_str(r#"{"id": 5, "product_id": 9, "quantity": 0}"#).expect("parse");
        let line = CartLine::from(record);
        assert_eq!(line.id, LineId::Remote(5));
        assert_eq!(line.quantity, 1);
        assert!(line.price.is_none());
    }

    #[test]
    fn test_product_conversion_picks_first_image_url() {
        let record: ProductRecord = serde_json::from_str(
            r#"{
                "id": 3,
                "name": "Mug",
                "price": 12.5,
                "images": [{"path": null}, {"src": "https://cdn.example/mug.jpg"}]
            }"#,
        )
        .expect("parse");
        let snapshot = ProductSnapshot::from(record);
        assert_eq!(snapshot.name, "Mug");
        assert_eq!(
            snapshot.image_url.as_deref(),
            Some("https://cdn.example/mug.jpg")
        );
        assert_eq!(snapshot.price.expect("price").display(), "$12.50");
    }
}
