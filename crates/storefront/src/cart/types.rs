//! Domain types for the cart engine.
//!
//! These are the types the engine reasons about; wire representations live
//! in [`crate::xano::types`].

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use store404_core::{CartId, CurrencyCode, Price, ProductId, UserId};

/// Prefix that tags a locally-generated placeholder line ID.
const LOCAL_ID_PREFIX: &str = "local-";

/// Identifier of a cart line.
///
/// A line starts out with a `Local` placeholder and keeps it until the
/// remote mutation that created it resolves, at which point the controller
/// swaps in the `Remote` ID in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineId {
    /// Durable ID assigned by the backend (`cart_product` row ID).
    Remote(i64),
    /// Locally-generated placeholder, pending remote confirmation.
    Local(Uuid),
}

impl LineId {
    /// Generate a fresh placeholder ID.
    #[must_use]
    pub fn new_local() -> Self {
        Self::Local(Uuid::new_v4())
    }

    /// Whether this ID is still a local placeholder.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    /// The remote row ID, if confirmed.
    #[must_use]
    pub const fn remote(&self) -> Option<i64> {
        match self {
            Self::Remote(id) => Some(*id),
            Self::Local(_) => None,
        }
    }
}

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(id) => write!(f, "{id}"),
            Self::Local(uuid) => write!(f, "{LOCAL_ID_PREFIX}{uuid}"),
        }
    }
}

/// Error parsing a [`LineId`] from its string form.
#[derive(Debug, thiserror::Error)]
#[error("invalid line id: {0}")]
pub struct ParseLineIdError(String);

impl FromStr for LineId {
    type Err = ParseLineIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(raw) = s.strip_prefix(LOCAL_ID_PREFIX) {
            let uuid = Uuid::parse_str(raw).map_err(|_| ParseLineIdError(s.to_string()))?;
            return Ok(Self::Local(uuid));
        }
        s.parse::<i64>()
            .map(Self::Remote)
            .map_err(|_| ParseLineIdError(s.to_string()))
    }
}

impl Serialize for LineId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LineId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Which local store a line is persisted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineOrigin {
    /// Unauthenticated session; on-device persistence only.
    Guest,
    /// Remote-backed cart of a logged-in identity.
    Authenticated,
}

/// Denormalized product display data attached to a line by enrichment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub id: ProductId,
    pub name: String,
    pub price: Option<Price>,
    pub image_url: Option<String>,
}

/// One product entry in a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub id: LineId,
    pub product_id: ProductId,
    /// Always >= 1; removal deletes the line instead of storing zero.
    pub quantity: u32,
    /// Unit price snapshotted at add time, if the backend stores one.
    pub price: Option<Price>,
    /// Display data; absent until enrichment resolves it.
    pub product: Option<ProductSnapshot>,
    pub origin: LineOrigin,
}

impl CartLine {
    /// Effective unit price: line price, else product price, else zero.
    #[must_use]
    pub fn unit_price(&self) -> Price {
        self.price
            .or_else(|| self.product.as_ref().and_then(|p| p.price))
            .unwrap_or_else(|| Price::zero(CurrencyCode::USD))
    }

    /// Line subtotal (`unit price x quantity`).
    #[must_use]
    pub fn subtotal(&self) -> Price {
        self.unit_price().times(self.quantity)
    }
}

/// A shopping cart owned by an authenticated identity.
///
/// Guest sessions have no `Cart` entity, only a bare line list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub id: CartId,
    pub owner: Option<UserId>,
}

/// Argument to `add`: a bare product ID, or an inline product object that
/// also seeds the line's display snapshot (so guest carts can render
/// without a fetch).
#[derive(Debug, Clone)]
pub enum ProductRef {
    Id(ProductId),
    Inline(ProductSnapshot),
}

impl ProductRef {
    /// The referenced product's ID.
    #[must_use]
    pub const fn product_id(&self) -> ProductId {
        match self {
            Self::Id(id) => *id,
            Self::Inline(snapshot) => snapshot.id,
        }
    }

    /// The inline snapshot, if one was supplied.
    #[must_use]
    pub fn into_snapshot(self) -> Option<ProductSnapshot> {
        match self {
            Self::Id(_) => None,
            Self::Inline(snapshot) => Some(snapshot),
        }
    }
}

/// Sum of `quantity x unit price` over a line list.
#[must_use]
pub fn total(lines: &[CartLine]) -> Price {
    lines
        .iter()
        .map(CartLine::subtotal)
        .fold(Price::zero(CurrencyCode::USD), |acc, p| acc + p)
}

/// Total item count across lines (for badge display).
#[must_use]
pub fn item_count(lines: &[CartLine]) -> u32 {
    lines.iter().map(|l| l.quantity).sum()
}
