//! Newtype IDs for type-safe entity references.
//!
//! Use the `define_id!` macro to create type-safe ID wrappers that prevent
//! accidentally mixing IDs from different entity types. The hosted row
//! store keys every row by an opaque string, so IDs wrap `String` rather
//! than an integer.

/// Macro to define a type-safe ID wrapper.
///
/// Creates a newtype wrapper around `String` with:
/// - `Serialize`/`Deserialize` with `#[serde(transparent)]`
/// - `Debug`, `Clone`, `PartialEq`, `Eq`, `Hash`, `Ord`
/// - Conversion methods: `new()`, `as_str()`, `into_inner()`
/// - `generate()` producing a fresh UUID v4 value for client-created rows
/// - `From<String>` and `From<&str>` implementations
///
/// # Example
///
/// ```rust
/// # use zocalo_core::define_id;
/// define_id!(UserId);
/// define_id!(CartId);
///
/// let user_id = UserId::new("u-1");
/// let cart_id = CartId::generate();
///
/// // These are different types, so this won't compile:
/// // let _: UserId = cart_id;
/// # let _ = (user_id, cart_id);
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            ::serde::Serialize,
            ::serde::Deserialize
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create an ID from an existing value.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generate a fresh random ID (UUID v4).
            #[must_use]
            pub fn generate() -> Self {
                Self(::uuid::Uuid::new_v4().to_string())
            }

            /// Get the underlying string value.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume the ID, returning the underlying string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }
    };
}

// Define standard entity IDs
define_id!(UserId);
define_id!(VendorId);
define_id!(ProductId);
define_id!(EventId);
define_id!(BookingId);
define_id!(CartId);
define_id!(CartItemId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_distinct_types() {
        let product = ProductId::new("p-1");
        let cart = CartId::new("p-1");
        // Same underlying value, different types; only string views compare.
        assert_eq!(product.as_str(), cart.as_str());
    }

    #[test]
    fn test_generate_is_unique() {
        let a = CartId::generate();
        let b = CartId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_display_round_trip() {
        let id = UserId::new("user-42");
        assert_eq!(id.to_string(), "user-42");
        assert_eq!(UserId::from(id.to_string()), id);
    }

    #[test]
    fn test_serde_transparent() {
        let id = ProductId::new("prod-7");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"prod-7\"");
    }
}
