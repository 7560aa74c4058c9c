use serde::{Deserialize, Serialize};

/// Declares a row identifier backed by a store-assigned `i64` key.
///
/// Keys are allocated in insertion order, so comparing two ids of the same
/// kind tells which row was created first.
macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw key.
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            /// Returns the raw key.
            pub const fn get(&self) -> i64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

row_id!(
    /// Identifier of a customer account.
    CustomerId
);
row_id!(
    /// Identifier of a credit tier (reference data).
    CreditTierId
);
row_id!(
    /// Identifier of a sales order.
    OrderId
);
row_id!(
    /// Identifier of a single line of a sales order.
    OrderLineId
);
row_id!(
    /// Identifier of a shipment. Ordering follows creation order.
    ShipmentId
);
row_id!(
    /// Identifier of one line of a shipment.
    ShipmentLineId
);
row_id!(
    /// Identifier of a backlog shortage entry.
    ShortageEntryId
);
row_id!(
    /// Identifier of a customer shortage request.
    ShortageRequestId
);
row_id!(
    /// Identifier of a purchase order.
    PurchaseOrderId
);
row_id!(
    /// Identifier of a purchase order line.
    PurchaseLineId
);
row_id!(
    /// Identifier of a supplier.
    SupplierId
);

/// Book identifier (ISBN or catalog code).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookId(String);

impl BookId {
    /// Creates a new book ID from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the book ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BookId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for BookId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for BookId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for BookId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_ids_order_by_raw_key() {
        assert!(ShipmentId::new(3) < ShipmentId::new(7));
        assert_eq!(OrderId::from(42).get(), 42);
        assert_eq!(i64::from(CustomerId::new(9)), 9);
    }

    #[test]
    fn row_id_serializes_as_bare_number() {
        let json = serde_json::to_string(&OrderLineId::new(15)).unwrap();
        assert_eq!(json, "15");
        let back: OrderLineId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, OrderLineId::new(15));
    }

    #[test]
    fn book_id_string_conversion() {
        let id = BookId::new("978-7-111");
        assert_eq!(id.as_str(), "978-7-111");

        let id2: BookId = "978-7-222".into();
        assert_eq!(id2.to_string(), "978-7-222");
    }
}
