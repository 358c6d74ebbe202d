//! Test harness for cart engine integration tests.
//!
//! Every test runs against the in-memory row store with a throwaway
//! profile directory, so flows exercise the real engines end to end
//! without a hosted backend.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use rust_decimal::Decimal;
use secrecy::SecretString;
use tokio::sync::watch;

use zocalo_cart::config::{BackendConfig, CartConfig};
use zocalo_cart::models::{Cart, CartItem, CartOwner, Product};
use zocalo_cart::state::CartState;
use zocalo_cart::store::{CartBackend, MemoryBackend, StoreError};
use zocalo_core::{CartId, CartItemId, CurrencyCode, Price, ProductId, UserId};

/// Backend wrapper with switchable failure injection, for exercising
/// partial-failure paths. Passes through to an in-memory store.
pub struct FlakyBackend {
    pub inner: Arc<MemoryBackend>,
    pub fail_inserts: AtomicBool,
    pub fail_updates: AtomicBool,
    pub fail_metrics: AtomicBool,
}

impl FlakyBackend {
    #[must_use]
    pub fn new(inner: Arc<MemoryBackend>) -> Self {
        Self {
            inner,
            fail_inserts: AtomicBool::new(false),
            fail_updates: AtomicBool::new(false),
            fail_metrics: AtomicBool::new(false),
        }
    }

    fn injected() -> StoreError {
        StoreError::Status {
            status: 503,
            body: "injected failure".to_owned(),
        }
    }
}

#[async_trait]
impl CartBackend for FlakyBackend {
    async fn find_cart_by_owner(&self, owner: &CartOwner) -> Result<Option<Cart>, StoreError> {
        self.inner.find_cart_by_owner(owner).await
    }

    async fn insert_cart(&self, cart: &Cart) -> Result<(), StoreError> {
        self.inner.insert_cart(cart).await
    }

    async fn list_items(&self, cart_id: &CartId) -> Result<Vec<CartItem>, StoreError> {
        self.inner.list_items(cart_id).await
    }

    async fn find_item_by_product(
        &self,
        cart_id: &CartId,
        product_id: &ProductId,
    ) -> Result<Option<CartItem>, StoreError> {
        self.inner.find_item_by_product(cart_id, product_id).await
    }

    async fn insert_item(&self, item: &CartItem) -> Result<(), StoreError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(Self::injected());
        }
        self.inner.insert_item(item).await
    }

    async fn update_item_quantity(
        &self,
        item_id: &CartItemId,
        quantity: u32,
    ) -> Result<(), StoreError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(Self::injected());
        }
        self.inner.update_item_quantity(item_id, quantity).await
    }

    async fn delete_item(&self, item_id: &CartItemId) -> Result<(), StoreError> {
        self.inner.delete_item(item_id).await
    }

    async fn delete_items_by_cart(&self, cart_id: &CartId) -> Result<(), StoreError> {
        self.inner.delete_items_by_cart(cart_id).await
    }

    async fn fetch_products(&self, ids: &[ProductId]) -> Result<Vec<Product>, StoreError> {
        self.inner.fetch_products(ids).await
    }

    async fn increment_metric(
        &self,
        product_id: &ProductId,
        metric: &str,
    ) -> Result<(), StoreError> {
        if self.fail_metrics.load(Ordering::SeqCst) {
            return Err(Self::injected());
        }
        self.inner.increment_metric(product_id, metric).await
    }
}

/// A cart state wired to throwaway storage, plus handles for inspecting
/// the store and driving the session signal.
pub struct TestCart {
    pub state: CartState,
    pub memory: Arc<MemoryBackend>,
    pub session: watch::Sender<Option<UserId>>,
    _profile: tempfile::TempDir,
}

impl TestCart {
    /// Cart state over a plain in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        let memory = Arc::new(MemoryBackend::new());
        Self::build(memory.clone(), memory)
    }

    /// Cart state over a failure-injecting backend.
    #[must_use]
    pub fn flaky() -> (Self, Arc<FlakyBackend>) {
        let memory = Arc::new(MemoryBackend::new());
        let flaky = Arc::new(FlakyBackend::new(memory.clone()));
        (Self::build(flaky.clone(), memory), flaky)
    }

    fn build(backend: Arc<dyn CartBackend>, memory: Arc<MemoryBackend>) -> Self {
        init_tracing();

        let profile = tempfile::tempdir().expect("tempdir");
        let (session, session_rx) = watch::channel(None);

        let config = CartConfig {
            backend: BackendConfig {
                base_url: "http://localhost:54321".to_owned(),
                api_version: "v1".to_owned(),
                api_key: SecretString::from("kJ8#mP2$vN5!qR9@wT4^xZ7&cF1*bG6"),
            },
            profile_dir: profile.path().to_path_buf(),
            metrics_enabled: true,
        };

        let state = CartState::with_backend(config, backend, session_rx).expect("cart state");

        Self {
            state,
            memory,
            session,
            _profile: profile,
        }
    }

    /// Seed a catalog product priced in whole USD.
    pub async fn seed_product(&self, id: &str, price: i64) {
        self.memory
            .seed_product(Product {
                id: ProductId::new(id),
                name: format!("Product {id}"),
                price: Some(Price::new(Decimal::from(price), CurrencyCode::USD)),
                image_url: None,
                stock: Some(100),
                available: true,
            })
            .await;
    }

    /// Publish a signed-in session.
    pub fn sign_in(&self, user: &str) {
        self.session
            .send(Some(UserId::new(user)))
            .expect("session receiver alive");
    }

    /// Publish a signed-out session.
    pub fn sign_out(&self) {
        self.session.send(None).expect("session receiver alive");
    }
}

impl Default for TestCart {
    fn default() -> Self {
        Self::new()
    }
}

/// Install a test-writer subscriber once per process so failing tests
/// print the engine's tracing output. `RUST_LOG` overrides the filter.
fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "zocalo_cart=debug".into());
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
