// 📄 Document Entity - header record of an import batch

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Header record.
///
/// Before a commit `id` is the identity declared by the source file; after a
/// full-replace import it is the identity assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub doc_type: String,
    pub date: NaiveDate,
    pub first_name: String,
    pub last_name: String,
    pub city: String,
}

impl Document {
    /// Overwrite every mutable field with the values of `other`.
    /// Returns `true` when at least one value actually changed.
    pub fn merge_from(&mut self, other: &Document) -> bool {
        let changed = !self.same_values(other);

        self.doc_type = other.doc_type.clone();
        self.date = other.date;
        self.first_name = other.first_name.clone();
        self.last_name = other.last_name.clone();
        self.city = other.city.clone();

        changed
    }

    /// Compare everything except identity
    pub fn same_values(&self, other: &Document) -> bool {
        self.doc_type == other.doc_type
            && self.date == other.date
            && self.first_name == other.first_name
            && self.last_name == other.last_name
            && self.city == other.city
    }

    /// Case-insensitive substring match used by document search.
    /// `query` must already be lowercase.
    pub fn matches(&self, query: &str) -> bool {
        self.id.to_string().contains(query)
            || self.doc_type.to_lowercase().contains(query)
            || self.date.format("%Y-%m-%d").to_string().contains(query)
            || self.first_name.to_lowercase().contains(query)
            || self.last_name.to_lowercase().contains(query)
            || self.city.to_lowercase().contains(query)
    }
}
