//! Cart store adapter: maps an identity to its cart and performs
//! item-level CRUD scoped to that cart.
//!
//! The adapter is the only component that talks to the row store. Cart
//! and item rows are always read fresh; product rows joined in for
//! display are cached for five minutes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tracing::instrument;

use zocalo_core::{CartId, CartItemId, ProductId};

use crate::error::{CartError, Result};
use crate::identity::Identity;
use crate::models::{Cart, CartItem, EnrichedCartItem, Product};
use crate::store::{CartBackend, StoreError};

/// Product cache TTL. Cart state is never cached.
const PRODUCT_CACHE_TTL: Duration = Duration::from_secs(300);
const PRODUCT_CACHE_CAPACITY: u64 = 1000;

/// Adapter over the row store, scoped to the cart tables.
#[derive(Clone)]
pub struct CartStoreAdapter {
    backend: Arc<dyn CartBackend>,
    products: Cache<ProductId, Product>,
}

impl CartStoreAdapter {
    /// Create an adapter over a backend.
    #[must_use]
    pub fn new(backend: Arc<dyn CartBackend>) -> Self {
        let products = Cache::builder()
            .max_capacity(PRODUCT_CACHE_CAPACITY)
            .time_to_live(PRODUCT_CACHE_TTL)
            .build();

        Self { backend, products }
    }

    /// Read the cart owned by an identity, if one exists. Never creates.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the row store cannot be reached.
    pub async fn find_cart(&self, identity: &Identity) -> Result<Option<Cart>> {
        Ok(self.backend.find_cart_by_owner(&identity.owner()).await?)
    }

    /// Read the cart owned by an identity, inserting a fresh row if none
    /// exists. The read always precedes the insert; if the insert loses a
    /// race and conflicts, the winner's row is read back instead of
    /// erroring.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the row store cannot be reached.
    #[instrument(skip(self, identity))]
    pub async fn get_or_create_cart(&self, identity: &Identity) -> Result<Cart> {
        let owner = identity.owner();
        if let Some(cart) = self.backend.find_cart_by_owner(&owner).await? {
            return Ok(cart);
        }

        let cart = Cart::new(owner.clone());
        match self.backend.insert_cart(&cart).await {
            Ok(()) => Ok(cart),
            Err(StoreError::Conflict(_)) => {
                // Lost the read-then-insert race; the owner's row exists now.
                let existing = self.backend.find_cart_by_owner(&owner).await?;
                existing.ok_or_else(|| {
                    CartError::StoreUnavailable(StoreError::Decode(
                        "cart missing after insert conflict".to_owned(),
                    ))
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// All items under a cart, each joined with its product. Items whose
    /// product no longer resolves come back with `product: None` - they
    /// never fail the whole query.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the row store cannot be reached.
    #[instrument(skip(self), fields(cart_id = %cart_id))]
    pub async fn list_items(&self, cart_id: &CartId) -> Result<Vec<EnrichedCartItem>> {
        let items = self.backend.list_items(cart_id).await?;
        let product_ids: Vec<ProductId> = items.iter().map(|i| i.product_id.clone()).collect();
        let products = self.resolve_products(&product_ids).await?;

        Ok(items
            .into_iter()
            .map(|item| {
                let product = products.get(&item.product_id).cloned();
                EnrichedCartItem { item, product }
            })
            .collect())
    }

    /// Raw item rows under a cart, without the product join. Used by the
    /// merge engine, which only needs product ids and quantities.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the row store cannot be reached.
    pub async fn item_rows(&self, cart_id: &CartId) -> Result<Vec<CartItem>> {
        Ok(self.backend.list_items(cart_id).await?)
    }

    /// The item row for a product within a cart, if any.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the row store cannot be reached.
    pub async fn find_item_by_product(
        &self,
        cart_id: &CartId,
        product_id: &ProductId,
    ) -> Result<Option<CartItem>> {
        Ok(self
            .backend
            .find_item_by_product(cart_id, product_id)
            .await?)
    }

    /// Insert a new item row.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuantity` (before any write) if `quantity` is zero,
    /// `StoreUnavailable` if the row store cannot be reached.
    #[instrument(skip(self), fields(cart_id = %cart_id, product_id = %product_id))]
    pub async fn insert_item(
        &self,
        cart_id: &CartId,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<CartItem> {
        if quantity == 0 {
            return Err(CartError::InvalidQuantity(quantity));
        }
        let item = CartItem::new(cart_id.clone(), product_id.clone(), quantity);
        self.backend.insert_item(&item).await?;
        Ok(item)
    }

    /// Overwrite an item's quantity.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuantity` (before any write) if `quantity` is zero,
    /// `StoreUnavailable` if the row store cannot be reached.
    #[instrument(skip(self), fields(item_id = %item_id))]
    pub async fn update_item_quantity(&self, item_id: &CartItemId, quantity: u32) -> Result<()> {
        if quantity == 0 {
            return Err(CartError::InvalidQuantity(quantity));
        }
        Ok(self.backend.update_item_quantity(item_id, quantity).await?)
    }

    /// Delete an item row. Deleting an already-gone item is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the row store cannot be reached.
    #[instrument(skip(self), fields(item_id = %item_id))]
    pub async fn delete_item(&self, item_id: &CartItemId) -> Result<()> {
        Ok(self.backend.delete_item(item_id).await?)
    }

    /// Delete every item under a cart (guest cart retirement).
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the row store cannot be reached.
    #[instrument(skip(self), fields(cart_id = %cart_id))]
    pub async fn clear_items(&self, cart_id: &CartId) -> Result<()> {
        Ok(self.backend.delete_items_by_cart(cart_id).await?)
    }

    /// Resolve product rows through the cache, batch-fetching misses.
    /// Unknown products are simply absent from the result.
    async fn resolve_products(
        &self,
        ids: &[ProductId],
    ) -> Result<HashMap<ProductId, Product>> {
        let mut resolved = HashMap::new();
        let mut missing = Vec::new();

        for id in ids {
            if resolved.contains_key(id) || missing.contains(id) {
                continue;
            }
            if let Some(product) = self.products.get(id).await {
                resolved.insert(id.clone(), product);
            } else {
                missing.push(id.clone());
            }
        }

        if !missing.is_empty() {
            for product in self.backend.fetch_products(&missing).await? {
                self.products
                    .insert(product.id.clone(), product.clone())
                    .await;
                resolved.insert(product.id.clone(), product);
            }
        }

        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::identity::GuestToken;
    use crate::models::CartOwner;
    use crate::store::MemoryBackend;

    fn guest_identity(token: &str) -> Identity {
        Identity::Guest(GuestToken::new(token))
    }

    fn product(id: &str, amount: Option<i64>) -> Product {
        Product {
            id: ProductId::new(id),
            name: format!("Product {id}"),
            price: amount.map(|a| {
                zocalo_core::Price::new(rust_decimal::Decimal::from(a), zocalo_core::CurrencyCode::USD)
            }),
            image_url: None,
            stock: Some(10),
            available: true,
        }
    }

    #[tokio::test]
    async fn test_get_or_create_is_stable_per_owner() {
        let backend = Arc::new(MemoryBackend::new());
        let adapter = CartStoreAdapter::new(backend.clone());
        let identity = guest_identity("tok-1");

        let first = adapter.get_or_create_cart(&identity).await.expect("create");
        let second = adapter.get_or_create_cart(&identity).await.expect("read");
        assert_eq!(first.id, second.id);
        assert_eq!(backend.cart_count().await, 1);
    }

    #[tokio::test]
    async fn test_find_cart_never_creates() {
        let backend = Arc::new(MemoryBackend::new());
        let adapter = CartStoreAdapter::new(backend.clone());

        let found = adapter
            .find_cart(&guest_identity("tok-1"))
            .await
            .expect("find");
        assert!(found.is_none());
        assert_eq!(backend.cart_count().await, 0);
    }

    /// Backend that simulates losing the read-then-insert race: the first
    /// read misses, the insert conflicts, the re-read finds the winner.
    struct RacyBackend {
        inner: MemoryBackend,
        reads: AtomicUsize,
        winner: Cart,
    }

    #[async_trait]
    impl CartBackend for RacyBackend {
        async fn find_cart_by_owner(
            &self,
            owner: &CartOwner,
        ) -> std::result::Result<Option<Cart>, StoreError> {
            if self.reads.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(None);
            }
            let _ = owner;
            Ok(Some(self.winner.clone()))
        }

        async fn insert_cart(&self, _cart: &Cart) -> std::result::Result<(), StoreError> {
            Err(StoreError::Conflict("owner already has a cart".to_owned()))
        }

        async fn list_items(
            &self,
            cart_id: &CartId,
        ) -> std::result::Result<Vec<CartItem>, StoreError> {
            self.inner.list_items(cart_id).await
        }

        async fn find_item_by_product(
            &self,
            cart_id: &CartId,
            product_id: &ProductId,
        ) -> std::result::Result<Option<CartItem>, StoreError> {
            self.inner.find_item_by_product(cart_id, product_id).await
        }

        async fn insert_item(&self, item: &CartItem) -> std::result::Result<(), StoreError> {
            self.inner.insert_item(item).await
        }

        async fn update_item_quantity(
            &self,
            item_id: &CartItemId,
            quantity: u32,
        ) -> std::result::Result<(), StoreError> {
            self.inner.update_item_quantity(item_id, quantity).await
        }

        async fn delete_item(&self, item_id: &CartItemId) -> std::result::Result<(), StoreError> {
            self.inner.delete_item(item_id).await
        }

        async fn delete_items_by_cart(
            &self,
            cart_id: &CartId,
        ) -> std::result::Result<(), StoreError> {
            self.inner.delete_items_by_cart(cart_id).await
        }

        async fn fetch_products(
            &self,
            ids: &[ProductId],
        ) -> std::result::Result<Vec<Product>, StoreError> {
            self.inner.fetch_products(ids).await
        }

        async fn increment_metric(
            &self,
            product_id: &ProductId,
            metric: &str,
        ) -> std::result::Result<(), StoreError> {
            self.inner.increment_metric(product_id, metric).await
        }
    }

    #[tokio::test]
    async fn test_insert_conflict_falls_back_to_fresh_read() {
        let winner = Cart::new(CartOwner::Guest(GuestToken::new("tok-1")));
        let backend = Arc::new(RacyBackend {
            inner: MemoryBackend::new(),
            reads: AtomicUsize::new(0),
            winner: winner.clone(),
        });
        let adapter = CartStoreAdapter::new(backend);

        let cart = adapter
            .get_or_create_cart(&guest_identity("tok-1"))
            .await
            .expect("race resolves to winner");
        assert_eq!(cart.id, winner.id);
    }

    #[tokio::test]
    async fn test_list_items_keeps_unresolved_products() {
        let backend = Arc::new(MemoryBackend::new());
        backend.seed_product(product("p-known", Some(10))).await;
        let adapter = CartStoreAdapter::new(backend.clone());

        let cart = adapter
            .get_or_create_cart(&guest_identity("tok-1"))
            .await
            .expect("cart");
        adapter
            .insert_item(&cart.id, &ProductId::new("p-known"), 2)
            .await
            .expect("insert known");
        adapter
            .insert_item(&cart.id, &ProductId::new("p-deleted"), 1)
            .await
            .expect("insert orphan");

        let items = adapter.list_items(&cart.id).await.expect("list");
        assert_eq!(items.len(), 2);

        let known = items
            .iter()
            .find(|e| e.item.product_id.as_str() == "p-known")
            .expect("known entry");
        assert!(known.product.is_some());

        let orphan = items
            .iter()
            .find(|e| e.item.product_id.as_str() == "p-deleted")
            .expect("orphan entry");
        assert!(orphan.product.is_none());
    }

    #[tokio::test]
    async fn test_zero_quantity_rejected_before_write() {
        let backend = Arc::new(MemoryBackend::new());
        let adapter = CartStoreAdapter::new(backend.clone());

        let cart = adapter
            .get_or_create_cart(&guest_identity("tok-1"))
            .await
            .expect("cart");
        let err = adapter
            .insert_item(&cart.id, &ProductId::new("p-1"), 0)
            .await
            .expect_err("zero quantity");
        assert!(matches!(err, CartError::InvalidQuantity(0)));
        assert!(backend.item_rows(&cart.id).await.is_empty());
    }
}
