// 📐 Row Validation - strict gate before commit, advisory flags for preview
//
// Strict: the first violation aborts the whole operation before any write.
// Advisory: every row gets a list of issues; nothing is raised and the
// operator decides whether to go ahead.

use crate::entities::{Document, DocumentItem};
use crate::error::{ImportError, ImportResult, RowRef};
use crate::parser::{DocumentRow, ItemRow};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

/// Placeholder date produced by systems that write a "default" date
/// instead of leaving the cell empty (0001-01-01).
pub fn default_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1, 1, 1).unwrap_or(NaiveDate::MIN)
}

// ============================================================================
// STRICT POLICY
// ============================================================================

/// Rows that passed strict validation, converted into transient entities
/// that still carry the identities declared by the source files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidatedBatch {
    pub documents: Vec<Document>,
    pub items: Vec<DocumentItem>,
}

pub fn validate_strict(documents: &[DocumentRow], items: &[ItemRow]) -> ImportResult<ValidatedBatch> {
    let mut batch = ValidatedBatch::default();

    for row in documents {
        let row_ref = RowRef::Document { line: row.line, id: row.id };
        let date = match row.date {
            Some(date) if date != default_date() => date,
            Some(_) => return Err(invalid(row_ref, "Date", "date is the default placeholder")),
            None => return Err(invalid(row_ref, "Date", "date is missing")),
        };

        batch.documents.push(Document {
            id: row.id,
            doc_type: row.doc_type.clone(),
            date,
            first_name: row.first_name.clone(),
            last_name: row.last_name.clone(),
            city: row.city.clone(),
        });
    }

    for row in items {
        check_document_reference(row.document_id, || RowRef::Item {
            line: row.line,
            document_id: row.document_id,
            ordinal: row.ordinal,
            product: row.product.clone(),
        })?;

        batch.items.push(DocumentItem {
            id: 0,
            document_id: row.document_id,
            ordinal: row.ordinal,
            product: row.product.clone(),
            quantity: row.quantity,
            price: row.price,
            tax_rate: row.tax_rate,
        });
    }

    Ok(batch)
}

/// Same gate for records edited by the operator
pub fn validate_edits(documents: &[Document], items: &[DocumentItem]) -> ImportResult<()> {
    for doc in documents {
        if doc.date == default_date() {
            return Err(invalid(
                RowRef::Document { line: 0, id: doc.id },
                "Date",
                "date is the default placeholder",
            ));
        }
    }

    for item in items {
        check_document_reference(item.document_id, || RowRef::Item {
            line: 0,
            document_id: item.document_id,
            ordinal: item.ordinal,
            product: item.product.clone(),
        })?;
    }

    Ok(())
}

fn check_document_reference(document_id: i64, row: impl FnOnce() -> RowRef) -> ImportResult<()> {
    if document_id <= 0 {
        return Err(invalid(
            row(),
            "DocumentId",
            &format!("document reference must be positive, got {}", document_id),
        ));
    }
    Ok(())
}

fn invalid(row: RowRef, field: &'static str, message: &str) -> ImportError {
    ImportError::Validation {
        row,
        field,
        message: message.to_string(),
    }
}

// ============================================================================
// ADVISORY POLICY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub field: &'static str,
    pub message: &'static str,
}

/// A parsed row plus the reasons it looks invalid (empty when it looks fine)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Flagged<T> {
    pub row: T,
    pub issues: Vec<Issue>,
}

impl<T> Flagged<T> {
    pub fn looks_invalid(&self) -> bool {
        !self.issues.is_empty()
    }
}

/// Result of reading a batch for operator review
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Preview {
    pub documents: Vec<Flagged<DocumentRow>>,
    pub items: Vec<Flagged<ItemRow>>,
}

impl Preview {
    pub fn new(documents: Vec<DocumentRow>, items: Vec<ItemRow>) -> Self {
        Preview {
            documents: assess_documents(documents),
            items: assess_items(items),
        }
    }

    pub fn invalid_documents(&self) -> impl Iterator<Item = &Flagged<DocumentRow>> {
        self.documents.iter().filter(|f| f.looks_invalid())
    }

    pub fn invalid_items(&self) -> impl Iterator<Item = &Flagged<ItemRow>> {
        self.items.iter().filter(|f| f.looks_invalid())
    }

    pub fn has_warnings(&self) -> bool {
        self.invalid_documents().next().is_some() || self.invalid_items().next().is_some()
    }
}

pub fn assess_documents(rows: Vec<DocumentRow>) -> Vec<Flagged<DocumentRow>> {
    rows.into_iter()
        .map(|row| {
            let mut issues = Vec::new();
            require_text(&mut issues, "Type", &row.doc_type);
            require_text(&mut issues, "FirstName", &row.first_name);
            require_text(&mut issues, "LastName", &row.last_name);
            require_text(&mut issues, "City", &row.city);
            Flagged { row, issues }
        })
        .collect()
}

pub fn assess_items(rows: Vec<ItemRow>) -> Vec<Flagged<ItemRow>> {
    rows.into_iter()
        .map(|row| {
            let mut issues = Vec::new();

            if row.document_id <= 0 {
                issues.push(Issue { field: "DocumentId", message: "must be positive" });
            }
            if row.ordinal <= 0 {
                issues.push(Issue { field: "Ordinal", message: "must be positive" });
            }
            require_text(&mut issues, "Product", &row.product);
            if row.quantity <= Decimal::ZERO {
                issues.push(Issue { field: "Quantity", message: "must be positive" });
            }
            if row.price < Decimal::ZERO {
                issues.push(Issue { field: "Price", message: "must not be negative" });
            }
            if row.tax_rate < Decimal::ZERO {
                issues.push(Issue { field: "TaxRate", message: "must not be negative" });
            }

            Flagged { row, issues }
        })
        .collect()
}

fn require_text(issues: &mut Vec<Issue>, field: &'static str, value: &str) {
    if value.trim().is_empty() {
        issues.push(Issue { field, message: "is blank" });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn doc_row(id: i64, date: Option<NaiveDate>) -> DocumentRow {
        DocumentRow {
            line: id as u64 + 1,
            id,
            doc_type: "Invoice".to_string(),
            date,
            first_name: "Jan".to_string(),
            last_name: "Kowalski".to_string(),
            city: "Łódź".to_string(),
        }
    }

    fn item_row(document_id: i64, ordinal: i32, quantity: &str) -> ItemRow {
        ItemRow {
            line: 2,
            document_id,
            ordinal,
            product: "Widget".to_string(),
            quantity: Decimal::from_str(quantity).unwrap(),
            price: Decimal::from_str("10.00").unwrap(),
            tax_rate: Decimal::from_str("23.00").unwrap(),
        }
    }

    #[test]
    fn test_strict_accepts_valid_batch() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1);
        let batch = validate_strict(&[doc_row(1, date)], &[item_row(1, 1, "2")]).unwrap();

        assert_eq!(batch.documents.len(), 1);
        assert_eq!(batch.documents[0].date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(batch.items[0].id, 0);
        assert_eq!(batch.items[0].key(), (1, 1));
    }

    #[test]
    fn test_strict_rejects_missing_date() {
        let err = validate_strict(&[doc_row(4, None)], &[]).unwrap_err();

        match err {
            ImportError::Validation { row, field, .. } => {
                assert_eq!(field, "Date");
                assert_eq!(row, RowRef::Document { line: 5, id: 4 });
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_strict_rejects_placeholder_date() {
        let err = validate_strict(&[doc_row(1, Some(default_date()))], &[]).unwrap_err();
        assert!(matches!(err, ImportError::Validation { field: "Date", .. }));
    }

    #[test]
    fn test_strict_rejects_non_positive_reference() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1);
        let err = validate_strict(&[doc_row(1, date)], &[item_row(0, 1, "2")]).unwrap_err();

        assert!(matches!(err, ImportError::Validation { field: "DocumentId", .. }));
        assert!(!err.is_partially_applied());
    }

    #[test]
    fn test_strict_ignores_soft_problems() {
        // Zero quantity is only an advisory flag
        let date = NaiveDate::from_ymd_opt(2024, 1, 1);
        assert!(validate_strict(&[doc_row(1, date)], &[item_row(1, 1, "0")]).is_ok());
    }

    #[test]
    fn test_advisory_flags_documents() {
        let mut blank = doc_row(2, NaiveDate::from_ymd_opt(2024, 1, 1));
        blank.city = "  ".to_string();
        blank.doc_type = String::new();

        let flagged = assess_documents(vec![doc_row(1, None), blank]);

        assert!(!flagged[0].looks_invalid(), "missing date is not an advisory issue");
        assert!(flagged[1].looks_invalid());
        let fields: Vec<_> = flagged[1].issues.iter().map(|i| i.field).collect();
        assert_eq!(fields, vec!["Type", "City"]);
    }

    #[test]
    fn test_advisory_flags_items() {
        let mut negative = item_row(1, 2, "1");
        negative.price = Decimal::from_str("-1").unwrap();
        negative.tax_rate = Decimal::from_str("-0.01").unwrap();

        let flagged = assess_items(vec![
            item_row(1, 1, "2"),
            item_row(0, 0, "0"),
            negative,
        ]);

        assert!(!flagged[0].looks_invalid());
        assert_eq!(flagged[1].issues.len(), 3);
        assert_eq!(flagged[2].issues.len(), 2);
    }

    #[test]
    fn test_preview_warnings() {
        let preview = Preview::new(
            vec![doc_row(1, NaiveDate::from_ymd_opt(2024, 1, 1))],
            vec![item_row(1, 1, "2"), item_row(1, 2, "-3")],
        );

        assert!(preview.has_warnings());
        assert_eq!(preview.invalid_documents().count(), 0);
        assert_eq!(preview.invalid_items().count(), 1);
    }
}
