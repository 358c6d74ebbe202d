//! Guest-to-user cart merge, run once per sign-in.
//!
//! Reconcile and retire form a single conceptual unit: the engine only
//! reports success once the guest items are summed into the user cart
//! AND the guest cart is emptied. That is what makes a retry safe - a
//! second run over a retired guest cart finds nothing and is a no-op,
//! never a double-add.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, instrument};

use zocalo_core::UserId;

use crate::adapter::CartStoreAdapter;
use crate::error::{CartError, Result};
use crate::identity::{GuestToken, Identity};

/// What a completed merge did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// No guest cart, or an empty one. The user cart is untouched. This
    /// is the expected outcome for most sign-ins.
    Noop,
    /// Guest items were folded into the user cart and the guest cart was
    /// retired.
    Merged { reconciled: usize },
}

/// Folds a guest cart into the newly authenticated identity's cart.
#[derive(Clone)]
pub struct CartMergeEngine {
    adapter: CartStoreAdapter,
    queue: Arc<Mutex<()>>,
}

impl CartMergeEngine {
    /// Create the engine. `queue` is the same lock the mutation engine
    /// holds, so a merge never reconciles against a guest cart that an
    /// in-flight add is still mutating.
    #[must_use]
    pub fn new(adapter: CartStoreAdapter, queue: Arc<Mutex<()>>) -> Self {
        Self { adapter, queue }
    }

    /// Run one merge attempt for a sign-in event.
    ///
    /// Per-product reconciliation sums quantities; products only in the
    /// guest cart are inserted carrying the guest quantity. Order across
    /// distinct products is not significant.
    ///
    /// # Errors
    ///
    /// Returns `MergeIncomplete` if a write fails partway: items already
    /// reconciled stay in the user cart, the guest cart keeps all its
    /// rows, and the caller may retry the whole flow. Returns
    /// `StoreUnavailable` for failures before reconciliation starts.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn merge(&self, guest_token: &GuestToken, user_id: &UserId) -> Result<MergeOutcome> {
        let _guard = self.queue.lock().await;

        // Load guest cart; absent or empty means nothing to do.
        let guest_identity = Identity::Guest(guest_token.clone());
        let Some(guest_cart) = self.adapter.find_cart(&guest_identity).await? else {
            return Ok(MergeOutcome::Noop);
        };
        let guest_items = self.adapter.item_rows(&guest_cart.id).await?;
        if guest_items.is_empty() {
            return Ok(MergeOutcome::Noop);
        }

        let user_cart = self
            .adapter
            .get_or_create_cart(&Identity::Authenticated(user_id.clone()))
            .await?;

        let total = guest_items.len();
        let mut reconciled = 0;

        for guest_item in &guest_items {
            let step = match self
                .adapter
                .find_item_by_product(&user_cart.id, &guest_item.product_id)
                .await
            {
                Ok(Some(existing)) => {
                    self.adapter
                        .update_item_quantity(
                            &existing.id,
                            existing.quantity.saturating_add(guest_item.quantity),
                        )
                        .await
                }
                Ok(None) => self
                    .adapter
                    .insert_item(&user_cart.id, &guest_item.product_id, guest_item.quantity)
                    .await
                    .map(|_| ()),
                Err(e) => Err(e),
            };

            match step {
                Ok(()) => reconciled += 1,
                Err(e) => return Err(merge_incomplete(reconciled, total, e)),
            }
        }

        // Retirement is part of the merge: without it a retry would
        // double-add, so a retire failure is a merge failure.
        self.adapter
            .clear_items(&guest_cart.id)
            .await
            .map_err(|e| merge_incomplete(reconciled, total, e))?;

        info!(
            reconciled,
            user_id = %user_id,
            "guest cart merged into user cart"
        );
        Ok(MergeOutcome::Merged { reconciled })
    }
}

/// Wrap a mid-merge store failure, preserving how far we got.
fn merge_incomplete(reconciled: usize, total: usize, error: CartError) -> CartError {
    match error {
        CartError::StoreUnavailable(source) => CartError::MergeIncomplete {
            reconciled,
            total,
            source,
        },
        other => other,
    }
}
