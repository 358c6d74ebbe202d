//! Row store backends.
//!
//! The hosted backend-as-a-service exposes row-level CRUD plus one atomic
//! counter increment; [`CartBackend`] is that surface, scoped to the
//! tables the cart engine touches. `RestBackend` talks to the hosted row
//! API; `MemoryBackend` provides the same semantics in-process for tests
//! and local development.

pub mod memory;
pub mod rest;

pub use memory::MemoryBackend;
pub use rest::RestBackend;

use async_trait::async_trait;
use thiserror::Error;

use zocalo_core::{CartId, CartItemId, ProductId};

use crate::models::{Cart, CartItem, CartOwner, Product};

/// Errors from the remote row store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// HTTP transport failure (connect, timeout, TLS).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The store answered with a non-success status.
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    /// An insert hit an existing row (unique constraint).
    #[error("row conflict: {0}")]
    Conflict(String),

    /// Response body could not be parsed.
    #[error("json parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// A row came back in a shape the engine cannot use.
    #[error("invalid row: {0}")]
    Decode(String),
}

/// Row-level operations the cart engine needs from the remote store.
///
/// Inserts carry client-generated ids; the store's unique constraints
/// surface as [`StoreError::Conflict`] so get-or-create callers can fall
/// back to a fresh read. Deletes are idempotent: deleting an absent row
/// is not an error.
#[async_trait]
pub trait CartBackend: Send + Sync {
    /// Read the cart owned by `(owner_kind, owner_key)`, if any.
    async fn find_cart_by_owner(&self, owner: &CartOwner) -> Result<Option<Cart>, StoreError>;

    /// Insert a cart row. Fails with `Conflict` if the owner already has
    /// one.
    async fn insert_cart(&self, cart: &Cart) -> Result<(), StoreError>;

    /// All item rows under a cart.
    async fn list_items(&self, cart_id: &CartId) -> Result<Vec<CartItem>, StoreError>;

    /// The item row for a product within a cart, if any.
    async fn find_item_by_product(
        &self,
        cart_id: &CartId,
        product_id: &ProductId,
    ) -> Result<Option<CartItem>, StoreError>;

    /// Insert an item row. Fails with `Conflict` if the cart already holds
    /// that product.
    async fn insert_item(&self, item: &CartItem) -> Result<(), StoreError>;

    /// Overwrite an item's quantity. Updating an absent row is a no-op,
    /// matching the row API's filtered-update semantics.
    async fn update_item_quantity(
        &self,
        item_id: &CartItemId,
        quantity: u32,
    ) -> Result<(), StoreError>;

    /// Delete an item row; absent rows are a no-op.
    async fn delete_item(&self, item_id: &CartItemId) -> Result<(), StoreError>;

    /// Delete every item row under a cart (guest cart retirement).
    async fn delete_items_by_cart(&self, cart_id: &CartId) -> Result<(), StoreError>;

    /// Batch-read product rows. Unknown ids are simply absent from the
    /// result, never an error.
    async fn fetch_products(&self, ids: &[ProductId]) -> Result<Vec<Product>, StoreError>;

    /// Atomically increment an analytics counter for a product.
    async fn increment_metric(
        &self,
        product_id: &ProductId,
        metric: &str,
    ) -> Result<(), StoreError>;
}
