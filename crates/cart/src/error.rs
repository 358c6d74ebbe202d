//! Cart engine error taxonomy.
//!
//! Three failure classes cross the engine boundary: the remote row store
//! being unreachable, a caller passing a non-positive quantity, and a merge
//! that stopped partway. Store errors propagate unchanged through the
//! mutation and merge engines; the only translation the engines add is
//! wrapping a partial merge as `MergeIncomplete`.

use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced by cart operations.
#[derive(Debug, Error)]
pub enum CartError {
    /// The remote row store could not be reached or rejected the request.
    /// Transient; callers should surface a "try again" notification.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// Quantity must be a positive integer. Rejected before any write.
    #[error("invalid quantity: {0}")]
    InvalidQuantity(u32),

    /// A merge stopped partway. Items already reconciled stay in the user
    /// cart; the guest cart still holds every original item, so re-running
    /// the whole merge is safe but not automatic.
    #[error("merge incomplete: {reconciled} of {total} guest items reconciled")]
    MergeIncomplete {
        reconciled: usize,
        total: usize,
        #[source]
        source: StoreError,
    },
}

/// Result type alias for `CartError`.
pub type Result<T> = std::result::Result<T, CartError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_quantity_display() {
        let err = CartError::InvalidQuantity(0);
        assert_eq!(err.to_string(), "invalid quantity: 0");
    }

    #[test]
    fn test_merge_incomplete_display() {
        let err = CartError::MergeIncomplete {
            reconciled: 2,
            total: 5,
            source: StoreError::Decode("bad row".to_owned()),
        };
        assert_eq!(
            err.to_string(),
            "merge incomplete: 2 of 5 guest items reconciled"
        );
    }

    #[test]
    fn test_store_error_converts() {
        let err: CartError = StoreError::Decode("oops".to_owned()).into();
        assert!(matches!(err, CartError::StoreUnavailable(_)));
    }
}
