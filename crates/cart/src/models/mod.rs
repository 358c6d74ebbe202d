//! Domain models for the cart engine.
//!
//! Rows mirror the hosted store's `carts` and `cart_items` tables; the
//! product projection is read-only and owned by the catalog collaborator.

pub mod cart;
pub mod product;

pub use cart::{Cart, CartItem, CartOwner, CartOwnerKind, EnrichedCartItem};
pub use product::Product;
