//! Best-effort analytics counters.
//!
//! Metric increments ride on the row store's single atomic increment
//! RPC. Failures are logged and swallowed - they must never fail or roll
//! back a cart mutation.

use std::sync::Arc;

use tracing::warn;

use zocalo_core::ProductId;

use crate::store::CartBackend;

/// Counter bumped on every successful add-to-cart.
pub const CART_ADDS: &str = "cart_adds";

/// Records product analytics counters, best-effort.
#[derive(Clone)]
pub struct MetricsRecorder {
    backend: Arc<dyn CartBackend>,
    enabled: bool,
}

impl MetricsRecorder {
    /// Create a recorder. When disabled, every call is a no-op.
    #[must_use]
    pub fn new(backend: Arc<dyn CartBackend>, enabled: bool) -> Self {
        Self { backend, enabled }
    }

    /// Increment `cart_adds` for a product. Never fails the caller.
    pub async fn record_cart_add(&self, product_id: &ProductId) {
        if !self.enabled {
            return;
        }
        if let Err(e) = self.backend.increment_metric(product_id, CART_ADDS).await {
            warn!(
                product_id = %product_id,
                error = %e,
                "failed to record cart_adds metric"
            );
        }
    }
}
