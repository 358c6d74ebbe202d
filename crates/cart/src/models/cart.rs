//! Cart and cart item rows.

use chrono::{DateTime, Utc};

use zocalo_core::{CartId, CartItemId, ProductId, UserId};

use crate::identity::GuestToken;
use crate::models::product::Product;

/// Who owns a cart: an anonymous visitor or an authenticated account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartOwnerKind {
    Guest,
    User,
}

impl CartOwnerKind {
    /// Column value in the `carts` table.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Guest => "guest",
            Self::User => "user",
        }
    }
}

impl std::fmt::Display for CartOwnerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cart ownership as a tagged value, so owner kind and key can never
/// disagree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CartOwner {
    Guest(GuestToken),
    User(UserId),
}

impl CartOwner {
    /// The `owner_kind` column value.
    #[must_use]
    pub const fn kind(&self) -> CartOwnerKind {
        match self {
            Self::Guest(_) => CartOwnerKind::Guest,
            Self::User(_) => CartOwnerKind::User,
        }
    }

    /// The `owner_key` column value: the guest token or the user id.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Guest(token) => token.as_str(),
            Self::User(user_id) => user_id.as_str(),
        }
    }
}

/// A cart row. At most one non-retired cart exists per owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cart {
    pub id: CartId,
    /// Fixed at creation; a cart never changes owner.
    pub owner: CartOwner,
    pub created_at: DateTime<Utc>,
}

impl Cart {
    /// Build a fresh cart row for an owner, with a generated id.
    #[must_use]
    pub fn new(owner: CartOwner) -> Self {
        Self {
            id: CartId::generate(),
            owner,
            created_at: Utc::now(),
        }
    }
}

/// A cart item row. Within one cart, `product_id` is unique; a repeated
/// add increments `quantity` on the existing row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartItem {
    pub id: CartItemId,
    pub cart_id: CartId,
    pub product_id: ProductId,
    /// Positive integer, minimum 1.
    pub quantity: u32,
    pub created_at: DateTime<Utc>,
}

impl CartItem {
    /// Build a fresh item row with a generated id.
    #[must_use]
    pub fn new(cart_id: CartId, product_id: ProductId, quantity: u32) -> Self {
        Self {
            id: CartItemId::generate(),
            cart_id,
            product_id,
            quantity,
            created_at: Utc::now(),
        }
    }
}

/// A cart item joined with its product at read time.
///
/// `product` is `None` when the product reference no longer resolves;
/// callers choose whether to render or exclude such items.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedCartItem {
    pub item: CartItem,
    pub product: Option<Product>,
}
