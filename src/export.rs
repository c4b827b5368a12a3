// 📤 CSV Writer - persisted documents/items back to the import layout
//
// Uses the same codec and column names as the reader, so an exported pair
// can be imported again unchanged.

use crate::codec::CsvCodec;
use crate::entities::{Document, DocumentItem};
use crate::error::{ImportError, ImportResult};
use crate::parser::{DOCUMENT_COLUMNS, ITEM_COLUMNS};
use std::fs::File;
use std::io::Write;
use std::path::Path;

pub fn write_documents(path: &Path, documents: &[Document], codec: &CsvCodec) -> ImportResult<usize> {
    write_rows(path, codec, &DOCUMENT_COLUMNS, documents, |doc| {
        vec![
            doc.id.to_string(),
            doc.doc_type.clone(),
            codec.format_date(&doc.date),
            doc.first_name.clone(),
            doc.last_name.clone(),
            doc.city.clone(),
        ]
    })
}

/// The store's surrogate item id is not exported
pub fn write_items(path: &Path, items: &[DocumentItem], codec: &CsvCodec) -> ImportResult<usize> {
    write_rows(path, codec, &ITEM_COLUMNS, items, |item| {
        vec![
            item.document_id.to_string(),
            item.ordinal.to_string(),
            item.product.clone(),
            codec.format_decimal(&item.quantity),
            codec.format_decimal(&item.price),
            codec.format_decimal(&item.tax_rate),
        ]
    })
}

fn write_rows<T, F>(
    path: &Path,
    codec: &CsvCodec,
    columns: &[&str],
    rows: &[T],
    to_record: F,
) -> ImportResult<usize>
where
    F: Fn(&T) -> Vec<String>,
{
    if path.as_os_str().is_empty() {
        return Err(ImportError::Path {
            path: path.to_path_buf(),
            message: "path is empty".to_string(),
        });
    }

    let io_error = |source: std::io::Error| ImportError::Io {
        path: path.to_path_buf(),
        source,
    };

    let file = File::create(path).map_err(io_error)?;
    let mut writer = codec.writer_builder().from_writer(file);

    writer.write_record(columns).map_err(|e| io_error(e.into()))?;
    for row in rows {
        writer
            .write_record(to_record(row))
            .map_err(|e| io_error(e.into()))?;
    }

    let mut file = writer.into_inner().map_err(|e| io_error(e.into_error()))?;
    file.flush().map_err(io_error)?;

    tracing::debug!(file = %path.display(), rows = rows.len(), "wrote csv file");
    Ok(rows.len())
}
