//! Zocalo Core - Shared types library.
//!
//! This crate provides common types used across all Zocalo components:
//! - `cart` - Cart identity, mutation, and merge engine
//! - shop, vendor, ticketing, and booking surfaces (separate crates)
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no database access,
//! no HTTP clients. This keeps it lightweight and allows it to be used
//! anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for type-safe IDs and prices

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
