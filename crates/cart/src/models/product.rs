//! Read-only product projection joined into cart items.

use zocalo_core::{Price, ProductId};

/// Product fields the cart needs for display and totals.
///
/// Owned by the catalog collaborator; the cart engine never writes these
/// rows. `price` is `None` when the catalog row carries no parseable
/// price — such items contribute zero to the cart total.
#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Option<Price>,
    pub image_url: Option<String>,
    pub stock: Option<i64>,
    pub available: bool,
}
