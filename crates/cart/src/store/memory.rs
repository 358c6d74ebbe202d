//! In-memory backend with the same semantics as the hosted row store.
//!
//! Used by tests and local development. Unique constraints (one cart per
//! owner, one row per product within a cart) are enforced the same way
//! the hosted store enforces them: inserts that would violate them fail
//! with [`StoreError::Conflict`].

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use zocalo_core::{CartId, CartItemId, ProductId};

use crate::models::{Cart, CartItem, CartOwner, Product};
use crate::store::{CartBackend, StoreError};

#[derive(Debug, Default)]
struct Tables {
    carts: Vec<Cart>,
    items: Vec<CartItem>,
    products: HashMap<ProductId, Product>,
    metrics: HashMap<(ProductId, String), u64>,
}

/// In-process row store.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: Mutex<Tables>,
}

impl MemoryBackend {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a product row into the catalog table.
    pub async fn seed_product(&self, product: Product) {
        let mut tables = self.tables.lock().await;
        tables.products.insert(product.id.clone(), product);
    }

    /// Current value of an analytics counter (zero if never incremented).
    pub async fn metric(&self, product_id: &ProductId, metric: &str) -> u64 {
        let tables = self.tables.lock().await;
        tables
            .metrics
            .get(&(product_id.clone(), metric.to_owned()))
            .copied()
            .unwrap_or(0)
    }

    /// Number of cart rows in the store (test inspection).
    pub async fn cart_count(&self) -> usize {
        self.tables.lock().await.carts.len()
    }

    /// Raw item rows under a cart (test inspection).
    pub async fn item_rows(&self, cart_id: &CartId) -> Vec<CartItem> {
        let tables = self.tables.lock().await;
        tables
            .items
            .iter()
            .filter(|item| &item.cart_id == cart_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CartBackend for MemoryBackend {
    async fn find_cart_by_owner(&self, owner: &CartOwner) -> Result<Option<Cart>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.carts.iter().find(|c| &c.owner == owner).cloned())
    }

    async fn insert_cart(&self, cart: &Cart) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.carts.iter().any(|c| c.owner == cart.owner) {
            return Err(StoreError::Conflict(format!(
                "cart exists for owner {}:{}",
                cart.owner.kind(),
                cart.owner.key()
            )));
        }
        if tables.carts.iter().any(|c| c.id == cart.id) {
            return Err(StoreError::Conflict(format!("cart id exists: {}", cart.id)));
        }
        tables.carts.push(cart.clone());
        Ok(())
    }

    async fn list_items(&self, cart_id: &CartId) -> Result<Vec<CartItem>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .items
            .iter()
            .filter(|item| &item.cart_id == cart_id)
            .cloned()
            .collect())
    }

    async fn find_item_by_product(
        &self,
        cart_id: &CartId,
        product_id: &ProductId,
    ) -> Result<Option<CartItem>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .items
            .iter()
            .find(|item| &item.cart_id == cart_id && &item.product_id == product_id)
            .cloned())
    }

    async fn insert_item(&self, item: &CartItem) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if tables
            .items
            .iter()
            .any(|i| i.cart_id == item.cart_id && i.product_id == item.product_id)
        {
            return Err(StoreError::Conflict(format!(
                "cart {} already holds product {}",
                item.cart_id, item.product_id
            )));
        }
        tables.items.push(item.clone());
        Ok(())
    }

    async fn update_item_quantity(
        &self,
        item_id: &CartItemId,
        quantity: u32,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        // Filtered update: zero matched rows is a silent no-op, like the
        // hosted row API.
        if let Some(item) = tables.items.iter_mut().find(|i| &i.id == item_id) {
            item.quantity = quantity;
        }
        Ok(())
    }

    async fn delete_item(&self, item_id: &CartItemId) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.items.retain(|i| &i.id != item_id);
        Ok(())
    }

    async fn delete_items_by_cart(&self, cart_id: &CartId) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.items.retain(|i| &i.cart_id != cart_id);
        Ok(())
    }

    async fn fetch_products(&self, ids: &[ProductId]) -> Result<Vec<Product>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| tables.products.get(id).cloned())
            .collect())
    }

    async fn increment_metric(
        &self,
        product_id: &ProductId,
        metric: &str,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        *tables
            .metrics
            .entry((product_id.clone(), metric.to_owned()))
            .or_insert(0) += 1;
        Ok(())
    }
}
