//! Shared cart state.
//!
//! The "current cart" is a single owned value, not ambient global state:
//! every UI collaborator reads through the same adapter instance and
//! re-renders off the revision channel. The struct is cheaply cloneable
//! via `Arc`.

use std::io;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{error, warn};

use zocalo_core::{CartItemId, ProductId, UserId};

use crate::adapter::CartStoreAdapter;
use crate::config::CartConfig;
use crate::error::Result;
use crate::identity::{Identity, IdentityResolver};
use crate::merge::{CartMergeEngine, MergeOutcome};
use crate::metrics::MetricsRecorder;
use crate::models::EnrichedCartItem;
use crate::mutation::CartMutationEngine;
use crate::projection;
use crate::store::{CartBackend, RestBackend, StoreError};

/// Error building the cart state.
#[derive(Debug, thiserror::Error)]
pub enum CartStateError {
    #[error("guest token storage error: {0}")]
    GuestToken(#[from] io::Error),
    #[error("row store client error: {0}")]
    Store(#[from] StoreError),
}

/// Shared cart state exposed to UI collaborators.
#[derive(Clone)]
pub struct CartState {
    inner: Arc<CartStateInner>,
}

struct CartStateInner {
    config: CartConfig,
    identity: IdentityResolver,
    adapter: CartStoreAdapter,
    mutations: CartMutationEngine,
    merges: CartMergeEngine,
    revision: watch::Sender<u64>,
}

impl CartState {
    /// Build the cart state over the hosted row store.
    ///
    /// `session` is the auth collaborator's signal: `None` while signed
    /// out, `Some(user_id)` while a valid session exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the guest token cannot be loaded or the HTTP
    /// client cannot be constructed.
    pub fn new(
        config: CartConfig,
        session: watch::Receiver<Option<UserId>>,
    ) -> std::result::Result<Self, CartStateError> {
        let backend = Arc::new(RestBackend::new(&config.backend)?);
        Self::with_backend(config, backend, session)
    }

    /// Build the cart state over an explicit backend (tests, local
    /// development).
    ///
    /// # Errors
    ///
    /// Returns an error if the guest token cannot be loaded or persisted.
    pub fn with_backend(
        config: CartConfig,
        backend: Arc<dyn CartBackend>,
        session: watch::Receiver<Option<UserId>>,
    ) -> std::result::Result<Self, CartStateError> {
        let identity = IdentityResolver::new(&config.profile_dir, session)?;
        let adapter = CartStoreAdapter::new(backend.clone());
        let metrics = MetricsRecorder::new(backend, config.metrics_enabled);

        // One queue for mutations AND merges: a merge is serialized
        // behind whatever mutation was already in flight at sign-in.
        let queue = Arc::new(Mutex::new(()));
        let mutations = CartMutationEngine::new(adapter.clone(), metrics, queue.clone());
        let merges = CartMergeEngine::new(adapter.clone(), queue);

        let (revision, _) = watch::channel(0);

        Ok(Self {
            inner: Arc::new(CartStateInner {
                config,
                identity,
                adapter,
                mutations,
                merges,
                revision,
            }),
        })
    }

    /// Get a reference to the configuration.
    #[must_use]
    pub fn config(&self) -> &CartConfig {
        &self.inner.config
    }

    /// The single active identity right now.
    #[must_use]
    pub fn identity(&self) -> Identity {
        self.inner.identity.current_identity()
    }

    /// Subscribe to cart-changed notifications. The value is a revision
    /// counter; any change means re-read the projections.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    /// Add `quantity` of a product to the active identity's cart.
    /// Returns the refreshed item list.
    ///
    /// The write runs to completion even if the returned future is
    /// dropped; a torn-down view discards the result, not the store
    /// write.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuantity` or `StoreUnavailable`; on error the
    /// visible cart state is unchanged and no notification fires.
    pub async fn add_item(
        &self,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<Vec<EnrichedCartItem>> {
        // Identity is captured once; a sign-in mid-operation does not
        // redirect the write.
        let identity = self.identity();
        let inner = Arc::clone(&self.inner);
        let product_id = product_id.clone();
        let task = tokio::spawn(async move {
            let result = inner
                .mutations
                .add_item(&identity, &product_id, quantity)
                .await;
            if result.is_ok() {
                inner.revision.send_modify(|rev| *rev += 1);
            }
            result
        });
        task.await.expect("cart mutation task panicked")
    }

    /// Remove an item by id. Removing an already-gone item is a no-op.
    /// Runs to completion even if the returned future is dropped.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the row store cannot be reached.
    pub async fn remove_item(&self, item_id: &CartItemId) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        let item_id = item_id.clone();
        let task = tokio::spawn(async move {
            let result = inner.mutations.remove_item(&item_id).await;
            if result.is_ok() {
                inner.revision.send_modify(|rev| *rev += 1);
            }
            result
        });
        task.await.expect("cart mutation task panicked")
    }

    /// Overwrite an item's quantity. Runs to completion even if the
    /// returned future is dropped.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuantity` or `StoreUnavailable`; on error the
    /// stored quantity is unchanged.
    pub async fn set_quantity(&self, item_id: &CartItemId, quantity: u32) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        let item_id = item_id.clone();
        let task = tokio::spawn(async move {
            let result = inner.mutations.set_quantity(&item_id, quantity).await;
            if result.is_ok() {
                inner.revision.send_modify(|rev| *rev += 1);
            }
            result
        });
        task.await.expect("cart mutation task panicked")
    }

    /// The active identity's current items, joined with products. An
    /// identity with no cart yet reads as empty; reading never creates a
    /// cart.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the row store cannot be reached.
    pub async fn current_items(&self) -> Result<Vec<EnrichedCartItem>> {
        let identity = self.identity();
        match self.inner.adapter.find_cart(&identity).await? {
            Some(cart) => self.inner.adapter.list_items(&cart.id).await,
            None => Ok(Vec::new()),
        }
    }

    /// Total number of units in the active cart.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the row store cannot be reached.
    pub async fn item_count(&self) -> Result<u64> {
        Ok(projection::item_count(&self.current_items().await?))
    }

    /// Monetary total of the active cart.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the row store cannot be reached.
    pub async fn cart_total(&self) -> Result<Decimal> {
        Ok(projection::cart_total(&self.current_items().await?))
    }

    /// Run one merge attempt for a signed-in user, folding the current
    /// guest cart into theirs. On success the guest token is rotated so
    /// the retired token is never reused. Callers may invoke this again
    /// to retry after a `MergeIncomplete`. Runs to completion even if
    /// the returned future is dropped.
    ///
    /// # Errors
    ///
    /// Returns `MergeIncomplete` or `StoreUnavailable`; see
    /// [`CartMergeEngine::merge`].
    pub async fn merge_guest_cart(&self, user_id: &UserId) -> Result<MergeOutcome> {
        let inner = Arc::clone(&self.inner);
        let user_id = user_id.clone();
        let task = tokio::spawn(async move {
            let guest_token = inner.identity.guest_token();
            let outcome = inner.merges.merge(&guest_token, &user_id).await;

            if outcome.is_ok()
                && let Err(e) = inner.identity.retire_guest_token()
            {
                // The merge itself landed; a token rotation failure only
                // risks a later no-op merge, so don't fail the sign-in.
                warn!(error = %e, "failed to rotate guest token after merge");
            }

            // A failed merge may still have landed a subset of items, so
            // views re-read either way.
            inner.revision.send_modify(|rev| *rev += 1);
            outcome
        });
        task.await.expect("cart merge task panicked")
    }

    /// Spawn the background watcher that merges the guest cart once per
    /// de-duplicated sign-in event. The task ends when the auth
    /// collaborator drops its end of the session signal.
    pub fn spawn_session_watcher(&self) -> JoinHandle<()> {
        let state = self.clone();
        tokio::spawn(async move {
            let mut sign_ins = state.inner.identity.sign_ins();
            while let Some(user_id) = sign_ins.next().await {
                match state.merge_guest_cart(&user_id).await {
                    Ok(MergeOutcome::Noop) => {}
                    Ok(MergeOutcome::Merged { reconciled }) => {
                        tracing::info!(
                            reconciled,
                            user_id = %user_id,
                            "merged guest cart at sign-in"
                        );
                    }
                    Err(e) => {
                        // Sign-in itself is never blocked; whatever
                        // subset reconciled stays in the user cart.
                        error!(
                            user_id = %user_id,
                            error = %e,
                            "guest cart merge failed at sign-in"
                        );
                    }
                }
            }
        })
    }
}
