//! Cart mutation engine: add-item, remove-item, set-quantity.
//!
//! Every mutating operation runs to completion behind the cart's single
//! in-process queue - one mutation finishes, including its write, before
//! the next begins. That serialization is what makes the read-modify-
//! write on an item's quantity safe against rapid repeated clicks within
//! one client session. Races between two separate client sessions remain
//! last-write-wins at the row level.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::instrument;

use zocalo_core::{CartItemId, ProductId};

use crate::adapter::CartStoreAdapter;
use crate::error::{CartError, Result};
use crate::identity::Identity;
use crate::metrics::MetricsRecorder;
use crate::models::EnrichedCartItem;

/// The three user-facing cart operations, each atomic from the caller's
/// point of view.
#[derive(Clone)]
pub struct CartMutationEngine {
    adapter: CartStoreAdapter,
    metrics: MetricsRecorder,
    queue: Arc<Mutex<()>>,
}

impl CartMutationEngine {
    /// Create the engine. `queue` is shared with the merge engine so a
    /// merge is serialized behind any in-flight mutation.
    #[must_use]
    pub fn new(
        adapter: CartStoreAdapter,
        metrics: MetricsRecorder,
        queue: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            adapter,
            metrics,
            queue,
        }
    }

    /// Add `quantity` of a product to the identity's cart, creating the
    /// cart on first use. A repeated add for the same product increments
    /// the existing row instead of inserting a duplicate. Returns the
    /// refreshed item list.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuantity` if `quantity` is zero (before any write),
    /// `StoreUnavailable` if the row store cannot be reached.
    #[instrument(skip(self, identity), fields(product_id = %product_id))]
    pub async fn add_item(
        &self,
        identity: &Identity,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<Vec<EnrichedCartItem>> {
        if quantity == 0 {
            return Err(CartError::InvalidQuantity(quantity));
        }

        let _guard = self.queue.lock().await;

        let cart = self.adapter.get_or_create_cart(identity).await?;
        match self
            .adapter
            .find_item_by_product(&cart.id, product_id)
            .await?
        {
            Some(existing) => {
                self.adapter
                    .update_item_quantity(&existing.id, existing.quantity.saturating_add(quantity))
                    .await?;
            }
            None => {
                self.adapter
                    .insert_item(&cart.id, product_id, quantity)
                    .await?;
            }
        }

        // Best-effort; a metric failure never rolls back the write above.
        self.metrics.record_cart_add(product_id).await;

        self.adapter.list_items(&cart.id).await
    }

    /// Remove an item by id. Removing an already-gone item is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the row store cannot be reached.
    #[instrument(skip(self), fields(item_id = %item_id))]
    pub async fn remove_item(&self, item_id: &CartItemId) -> Result<()> {
        let _guard = self.queue.lock().await;
        self.adapter.delete_item(item_id).await
    }

    /// Overwrite an item's quantity.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuantity` if `quantity` is zero (before any write),
    /// `StoreUnavailable` if the row store cannot be reached.
    #[instrument(skip(self), fields(item_id = %item_id))]
    pub async fn set_quantity(&self, item_id: &CartItemId, quantity: u32) -> Result<()> {
        if quantity == 0 {
            return Err(CartError::InvalidQuantity(quantity));
        }
        let _guard = self.queue.lock().await;
        self.adapter.update_item_quantity(item_id, quantity).await
    }
}
