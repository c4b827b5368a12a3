// 🧾 Document Item Entity - line record owned by a Document

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Natural key of a line: (document id, ordinal)
pub type ItemKey = (i64, i32);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentItem {
    /// Store surrogate key, 0 until the item has been persisted
    #[serde(default)]
    pub id: i64,
    pub document_id: i64,
    pub ordinal: i32,
    pub product: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub tax_rate: Decimal,
}

impl DocumentItem {
    pub fn key(&self) -> ItemKey {
        (self.document_id, self.ordinal)
    }

    pub fn is_persisted(&self) -> bool {
        self.id > 0
    }

    /// Overwrite product and amounts. The natural key and surrogate id stay.
    /// Returns `true` when at least one value actually changed.
    pub fn merge_from(&mut self, other: &DocumentItem) -> bool {
        let changed = !self.same_values(other);

        self.product = other.product.clone();
        self.quantity = other.quantity;
        self.price = other.price;
        self.tax_rate = other.tax_rate;

        changed
    }

    /// Decimal equality ignores scale, so "10,0" and "10,00" are the same value
    pub fn same_values(&self, other: &DocumentItem) -> bool {
        self.product == other.product
            && self.quantity == other.quantity
            && self.price == other.price
            && self.tax_rate == other.tax_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn item(price: &str) -> DocumentItem {
        DocumentItem {
            id: 3,
            document_id: 1,
            ordinal: 1,
            product: "Widget".to_string(),
            quantity: Decimal::from(2),
            price: Decimal::from_str(price).unwrap(),
            tax_rate: Decimal::from_str("23.00").unwrap(),
        }
    }

    #[test]
    fn test_merge_keeps_identity() {
        let mut stored = item("10.00");
        let mut incoming = item("12.00");
        incoming.id = 0;

        assert!(stored.merge_from(&incoming));
        assert_eq!(stored.id, 3);
        assert_eq!(stored.key(), (1, 1));
        assert_eq!(stored.price, Decimal::from_str("12.00").unwrap());
    }

    #[test]
    fn test_scale_does_not_count_as_change() {
        let mut stored = item("10.00");
        let incoming = item("10.0");

        assert!(!stored.merge_from(&incoming));
    }
}
