//! Zocalo Cart - cart identity, mutation, and merge engine.
//!
//! The one marketplace subsystem with real invariants: a visitor's cart
//! follows them from anonymous browsing through sign-in. Guest carts are
//! keyed by a locally persisted token; at sign-in the guest cart is
//! folded into the account cart exactly once, per-product quantities
//! summed, and the guest cart retired.
//!
//! # Architecture
//!
//! - The hosted row store is the source of truth; no local cart database
//! - [`store::CartBackend`] is the persistence seam (REST or in-memory)
//! - All mutations and merges for one client serialize through a single
//!   in-process queue; cross-client races stay last-write-wins
//! - [`state::CartState`] is the one shared handle UI code holds,
//!   with a watch channel for "cart changed" re-renders
//!
//! # Example
//!
//! ```rust,ignore
//! use zocalo_cart::{CartConfig, CartState};
//!
//! let config = CartConfig::from_env()?;
//! let state = CartState::new(config, session_signal)?;
//! state.spawn_session_watcher();
//!
//! let items = state.add_item(&product_id, 1).await?;
//! let total = state.cart_total().await?;
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod adapter;
pub mod config;
pub mod error;
pub mod identity;
pub mod merge;
pub mod metrics;
pub mod models;
pub mod mutation;
pub mod projection;
pub mod state;
pub mod store;

pub use config::CartConfig;
pub use error::{CartError, Result};
pub use identity::Identity;
pub use merge::MergeOutcome;
pub use state::CartState;
