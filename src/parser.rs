// 📥 CSV Reader - documents file + items file → typed rows
//
// Every row either parses completely or the whole read fails. Column names
// are matched case-sensitively after trimming surrounding whitespace; extra
// columns are ignored, missing ones are a parse error.

use crate::codec::CsvCodec;
use crate::error::{ImportError, ImportResult};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

// ============================================================================
// FILE LAYOUT
// ============================================================================

pub const DOCUMENT_COLUMNS: [&str; 6] = ["Id", "Type", "Date", "FirstName", "LastName", "City"];

pub const ITEM_COLUMNS: [&str; 6] = ["DocumentId", "Ordinal", "Product", "Quantity", "Price", "TaxRate"];

// ============================================================================
// ROW TYPES
// ============================================================================

/// One parsed line of the documents file.
/// `date` is `None` when the cell was empty; strict validation rejects that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRow {
    pub line: u64,
    pub id: i64,
    pub doc_type: String,
    pub date: Option<NaiveDate>,
    pub first_name: String,
    pub last_name: String,
    pub city: String,
}

/// One parsed line of the items file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRow {
    pub line: u64,
    pub document_id: i64,
    pub ordinal: i32,
    pub product: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub tax_rate: Decimal,
}

// ============================================================================
// COLUMN LOOKUP
// ============================================================================

/// Maps the expected column names to their position in the header row
struct ColumnMap {
    positions: HashMap<&'static str, usize>,
    width: usize,
}

impl ColumnMap {
    fn from_headers(
        headers: &csv::StringRecord,
        expected: &[&'static str],
        file: &Path,
    ) -> ImportResult<Self> {
        let mut positions = HashMap::new();

        for name in expected {
            let position = headers
                .iter()
                .position(|h| h.trim_start_matches('\u{feff}').trim() == *name)
                .ok_or_else(|| ImportError::Parse {
                    file: file.to_path_buf(),
                    line: 1,
                    field: Some(name.to_string()),
                    message: format!("missing column '{}'", name),
                })?;
            positions.insert(*name, position);
        }

        Ok(ColumnMap {
            positions,
            width: headers.len(),
        })
    }

    fn get<'r>(&self, record: &'r csv::StringRecord, name: &str) -> &'r str {
        self.positions
            .get(name)
            .and_then(|&i| record.get(i))
            .unwrap_or("")
    }
}

/// Cursor over the records of one file, carrying what error messages need
struct RowContext<'a> {
    codec: &'a CsvCodec,
    file: &'a Path,
    line: u64,
}

impl RowContext<'_> {
    fn fail(&self, field: &str, message: String) -> ImportError {
        ImportError::Parse {
            file: self.file.to_path_buf(),
            line: self.line,
            field: Some(field.to_string()),
            message: format!("{}: {}", field, message),
        }
    }

    fn int<T>(&self, columns: &ColumnMap, record: &csv::StringRecord, field: &str) -> ImportResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        self.codec
            .parse_int(columns.get(record, field))
            .map_err(|e| self.fail(field, e))
    }

    fn decimal(&self, columns: &ColumnMap, record: &csv::StringRecord, field: &str) -> ImportResult<Decimal> {
        self.codec
            .parse_decimal(columns.get(record, field))
            .map_err(|e| self.fail(field, e))
    }
}

// ============================================================================
// PUBLIC API
// ============================================================================

/// Reject blank paths and paths that do not point at an existing file
pub fn check_input_path(path: &Path) -> ImportResult<()> {
    if path.as_os_str().is_empty() || path.to_string_lossy().trim().is_empty() {
        return Err(ImportError::Path {
            path: path.to_path_buf(),
            message: "path is empty".to_string(),
        });
    }

    if !path.is_file() {
        return Err(ImportError::Path {
            path: path.to_path_buf(),
            message: "file not found".to_string(),
        });
    }

    Ok(())
}

pub fn read_documents(path: &Path, codec: &CsvCodec) -> ImportResult<Vec<DocumentRow>> {
    read_rows(path, codec, &DOCUMENT_COLUMNS, |ctx, columns, record| {
        Ok(DocumentRow {
            line: ctx.line,
            id: ctx.int(columns, record, "Id")?,
            doc_type: columns.get(record, "Type").to_string(),
            date: ctx
                .codec
                .parse_date(columns.get(record, "Date"))
                .map_err(|e| ctx.fail("Date", e))?,
            first_name: columns.get(record, "FirstName").to_string(),
            last_name: columns.get(record, "LastName").to_string(),
            city: columns.get(record, "City").to_string(),
        })
    })
}

pub fn read_items(path: &Path, codec: &CsvCodec) -> ImportResult<Vec<ItemRow>> {
    read_rows(path, codec, &ITEM_COLUMNS, |ctx, columns, record| {
        Ok(ItemRow {
            line: ctx.line,
            document_id: ctx.int(columns, record, "DocumentId")?,
            ordinal: ctx.int(columns, record, "Ordinal")?,
            product: columns.get(record, "Product").to_string(),
            quantity: ctx.decimal(columns, record, "Quantity")?,
            price: ctx.decimal(columns, record, "Price")?,
            tax_rate: ctx.decimal(columns, record, "TaxRate")?,
        })
    })
}

/// Read both files of a batch. Both must exist and hold at least one row.
pub fn read_batch(
    documents_path: &Path,
    items_path: &Path,
    codec: &CsvCodec,
) -> ImportResult<(Vec<DocumentRow>, Vec<ItemRow>)> {
    check_input_path(documents_path)?;
    check_input_path(items_path)?;

    let documents = read_documents(documents_path, codec)?;
    let items = read_items(items_path, codec)?;

    Ok((documents, items))
}

fn read_rows<T, F>(
    path: &Path,
    codec: &CsvCodec,
    expected: &[&'static str],
    mut build: F,
) -> ImportResult<Vec<T>>
where
    F: FnMut(&RowContext<'_>, &ColumnMap, &csv::StringRecord) -> ImportResult<T>,
{
    check_input_path(path)?;

    // The handle is dropped on every return path below
    let file = File::open(path).map_err(|source| ImportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = codec.reader_builder().from_reader(file);

    let headers = reader
        .headers()
        .map_err(|e| csv_failure(path, 1, e))?
        .clone();

    // A file with no content has no header and no rows
    if headers.iter().all(|h| h.trim_start_matches('\u{feff}').trim().is_empty()) {
        return Err(ImportError::EmptyInput {
            file: path.to_path_buf(),
        });
    }
    let columns = ColumnMap::from_headers(&headers, expected, path)?;

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| {
            let line = e.position().map(|p| p.line()).unwrap_or(0);
            csv_failure(path, line, e)
        })?;

        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let ctx = RowContext { codec, file: path, line };

        if record.len() != columns.width {
            return Err(ImportError::Parse {
                file: path.to_path_buf(),
                line,
                field: None,
                message: format!("expected {} columns, found {}", columns.width, record.len()),
            });
        }

        rows.push(build(&ctx, &columns, &record)?);
    }

    if rows.is_empty() {
        return Err(ImportError::EmptyInput {
            file: path.to_path_buf(),
        });
    }

    tracing::debug!(file = %path.display(), rows = rows.len(), "parsed csv file");
    Ok(rows)
}

fn csv_failure(path: &Path, line: u64, error: csv::Error) -> ImportError {
    ImportError::Parse {
        file: path.to_path_buf(),
        line,
        field: None,
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::str::FromStr;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_read_documents() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "documents.csv",
            " Id ;Type;Date;FirstName;LastName; City\n1;Invoice;2024-01-01;Jan;Kowalski;Łódź\n2;Receipt;;Anna;Nowak;Gdańsk\n",
        );

        let rows = read_documents(&path, &CsvCodec::polish()).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, 1);
        assert_eq!(rows[0].line, 2);
        assert_eq!(rows[0].city, "Łódź");
        assert_eq!(rows[0].date, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(rows[1].date, None, "empty date is missing, not malformed");
    }

    #[test]
    fn test_read_items_decimal_comma() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "items.csv",
            "DocumentId;Ordinal;Product;Quantity;Price;TaxRate\n1;1;Widget;2;10,00;23,00\n1;2;\"Bolt; M8\";100;0,15;8\n",
        );

        let rows = read_items(&path, &CsvCodec::polish()).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].price, Decimal::from_str("10.00").unwrap());
        assert_eq!(rows[1].product, "Bolt; M8");
        assert_eq!(rows[1].tax_rate, Decimal::from(8));
    }

    #[test]
    fn test_header_names_are_case_sensitive() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "documents.csv",
            "id;Type;Date;FirstName;LastName;City\n1;Invoice;2024-01-01;Jan;Kowalski;Łódź\n",
        );

        let err = read_documents(&path, &CsvCodec::polish()).unwrap_err();
        assert!(matches!(err, ImportError::Parse { line: 1, .. }));
    }

    #[test]
    fn test_malformed_row_fails_whole_read() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "items.csv",
            "DocumentId;Ordinal;Product;Quantity;Price;TaxRate\n1;1;Widget;2;10,00;23\n1;2;Nut;abc;1;23\n",
        );

        let err = read_items(&path, &CsvCodec::polish()).unwrap_err();
        match err {
            ImportError::Parse { line, field, .. } => {
                assert_eq!(line, 3);
                assert_eq!(field.as_deref(), Some("Quantity"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_wrong_column_count() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "items.csv",
            "DocumentId;Ordinal;Product;Quantity;Price;TaxRate\n1;1;Widget;2;10,00\n",
        );

        let err = read_items(&path, &CsvCodec::polish()).unwrap_err();
        assert!(matches!(err, ImportError::Parse { line: 2, field: None, .. }));
    }

    #[test]
    fn test_bad_date_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "documents.csv",
            "Id;Type;Date;FirstName;LastName;City\n1;Invoice;31.12.2024;Jan;Kowalski;Łódź\n",
        );

        let err = read_documents(&path, &CsvCodec::polish()).unwrap_err();
        assert!(matches!(err, ImportError::Parse { .. }));
    }

    #[test]
    fn test_header_only_file_is_empty_input() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "documents.csv", "Id;Type;Date;FirstName;LastName;City\n");

        let err = read_documents(&path, &CsvCodec::polish()).unwrap_err();
        assert!(matches!(err, ImportError::EmptyInput { .. }));
    }

    #[test]
    fn test_zero_byte_file_is_empty_input() {
        let dir = TempDir::new().unwrap();
        let documents = write(&dir, "documents.csv", "");
        let items = write(&dir, "items.csv", "\u{feff}");

        let err = read_documents(&documents, &CsvCodec::polish()).unwrap_err();
        assert!(matches!(err, ImportError::EmptyInput { .. }), "got {:?}", err);

        let err = read_items(&items, &CsvCodec::polish()).unwrap_err();
        assert!(matches!(err, ImportError::EmptyInput { .. }), "got {:?}", err);
    }

    #[test]
    fn test_path_errors() {
        let codec = CsvCodec::polish();

        let err = read_documents(Path::new(""), &codec).unwrap_err();
        assert!(matches!(err, ImportError::Path { .. }));

        let err = read_documents(Path::new("/definitely/not/here.csv"), &codec).unwrap_err();
        assert!(matches!(err, ImportError::Path { .. }));
    }
}
