//! Pure projections over the current item list.
//!
//! No persistence, no caching: both values are recomputed from whatever
//! the adapter last returned.

use rust_decimal::Decimal;

use crate::models::EnrichedCartItem;

/// Total number of units in the cart (sum of quantities).
#[must_use]
pub fn item_count(items: &[EnrichedCartItem]) -> u64 {
    items.iter().map(|e| u64::from(e.item.quantity)).sum()
}

/// Monetary total of the cart: sum of quantity x unit price, using the
/// product price joined in at read time. Items whose product or price
/// did not resolve contribute zero instead of failing the computation.
#[must_use]
pub fn cart_total(items: &[EnrichedCartItem]) -> Decimal {
    items
        .iter()
        .filter_map(|entry| {
            let price = entry.product.as_ref()?.price.as_ref()?;
            Some(price.amount * Decimal::from(entry.item.quantity))
        })
        .sum()
}
