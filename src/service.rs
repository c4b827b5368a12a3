// 🧭 Document Service - the operation boundary used by the CLI and server
//
// Every operation runs on the blocking pool so the caller's runtime is never
// stalled. The gateway sits behind one mutex: a whole reconciliation run
// holds it from first read to last commit, so imports never interleave.

use crate::codec::CsvCodec;
use crate::db::{Event, PersistenceGateway};
use crate::entities::{Document, DocumentItem};
use crate::error::{GatewayError, ImportError, ImportResult, Phase};
use crate::export::{write_documents, write_items};
use crate::parser::read_batch;
use crate::reconciliation::{CancelFlag, ImportSummary, ReconcileStrategy, Reconciler};
use crate::validation::{validate_edits, validate_strict, Preview};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

const ACTOR: &str = "document_service";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub documents: usize,
    pub items: usize,
}

/// A document together with its items
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentDetail {
    pub document: Document,
    pub items: Vec<DocumentItem>,
}

pub struct DocumentService<G> {
    store: Arc<Mutex<G>>,
    codec: CsvCodec,
    strategy: ReconcileStrategy,
}

impl<G> Clone for DocumentService<G> {
    fn clone(&self) -> Self {
        DocumentService {
            store: Arc::clone(&self.store),
            codec: self.codec.clone(),
            strategy: self.strategy,
        }
    }
}

fn lock<G>(store: &Mutex<G>) -> ImportResult<MutexGuard<'_, G>> {
    store
        .lock()
        .map_err(|_| ImportError::load(GatewayError::LockPoisoned))
}

impl<G> DocumentService<G>
where
    G: PersistenceGateway + 'static,
{
    pub fn new(gateway: G, codec: CsvCodec, strategy: ReconcileStrategy) -> Self {
        DocumentService {
            store: Arc::new(Mutex::new(gateway)),
            codec,
            strategy,
        }
    }

    pub fn strategy(&self) -> ReconcileStrategy {
        self.strategy
    }

    pub fn codec(&self) -> &CsvCodec {
        &self.codec
    }

    /// Run `work` on the blocking pool with exclusive access to the store
    async fn with_store<T, F>(&self, work: F) -> ImportResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut G, &CsvCodec) -> ImportResult<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let codec = self.codec.clone();

        tokio::task::spawn_blocking(move || {
            let mut gateway = lock(&store)?;
            work(&mut *gateway, &codec)
        })
        .await
        .map_err(|e| ImportError::Task(e.to_string()))?
    }

    // ========================================================================
    // IMPORT
    // ========================================================================

    /// Read both files and flag rows that look invalid. Never writes.
    pub async fn read_for_preview(&self, documents_path: &Path, items_path: &Path) -> ImportResult<Preview> {
        let documents_path = documents_path.to_path_buf();
        let items_path = items_path.to_path_buf();
        let codec = self.codec.clone();

        let preview = tokio::task::spawn_blocking(move || {
            let (documents, items) = read_batch(&documents_path, &items_path, &codec)?;
            Ok::<_, ImportError>(Preview::new(documents, items))
        })
        .await
        .map_err(|e| ImportError::Task(e.to_string()))??;

        for flagged in preview.invalid_documents() {
            tracing::warn!(line = flagged.row.line, id = flagged.row.id, issues = ?flagged.issues, "document looks invalid");
        }
        for flagged in preview.invalid_items() {
            tracing::warn!(
                line = flagged.row.line,
                document_id = flagged.row.document_id,
                ordinal = flagged.row.ordinal,
                issues = ?flagged.issues,
                "item looks invalid"
            );
        }

        Ok(preview)
    }

    pub async fn import_batch(&self, documents_path: &Path, items_path: &Path) -> ImportResult<ImportSummary> {
        self.import_batch_with(documents_path, items_path, CancelFlag::new())
            .await
    }

    /// Import with a cancel flag checked before every phase.
    ///
    /// Dropping the returned future does not stop a run that already
    /// started; only the flag does, and only at a phase boundary.
    pub async fn import_batch_with(
        &self,
        documents_path: &Path,
        items_path: &Path,
        cancel: CancelFlag,
    ) -> ImportResult<ImportSummary> {
        let documents_path = documents_path.to_path_buf();
        let items_path = items_path.to_path_buf();
        let strategy = self.strategy;

        self.with_store(move |gateway, codec| {
            // Everything up to validation happens before the first write
            let (documents, items) = read_batch(&documents_path, &items_path, codec)?;
            let batch = validate_strict(&documents, &items)?;
            let fingerprints = [fingerprint(&documents_path)?, fingerprint(&items_path)?];

            let summary = Reconciler::with_cancel(strategy, cancel).run(gateway, &batch)?;

            let event = Event::new(
                "import_completed",
                "batch",
                &fingerprints[0],
                serde_json::json!({
                    "documents_file": documents_path.display().to_string(),
                    "items_file": items_path.display().to_string(),
                    "documents_sha256": fingerprints[0],
                    "items_sha256": fingerprints[1],
                    "summary": summary,
                }),
                ACTOR,
            );
            journal(gateway, &event, &summary.committed)?;

            Ok(summary)
        })
        .await
    }

    // ========================================================================
    // EXPORT
    // ========================================================================

    pub async fn export_all(&self, documents_path: &Path, items_path: &Path) -> ImportResult<ExportSummary> {
        let documents_path = documents_path.to_path_buf();
        let items_path = items_path.to_path_buf();

        self.with_store(move |gateway, codec| {
            let documents = gateway.list_documents().map_err(ImportError::load)?;
            let items = gateway.list_items(None).map_err(ImportError::load)?;

            let summary = ExportSummary {
                documents: write_documents(&documents_path, &documents, codec)?,
                items: write_items(&items_path, &items, codec)?,
            };
            tracing::info!(documents = summary.documents, items = summary.items, "export finished");

            let event = Event::new(
                "export_completed",
                "batch",
                &documents_path.display().to_string(),
                serde_json::json!({
                    "documents_file": documents_path.display().to_string(),
                    "items_file": items_path.display().to_string(),
                    "documents": summary.documents,
                    "items": summary.items,
                }),
                ACTOR,
            );
            journal(gateway, &event, &[])?;

            Ok(summary)
        })
        .await
    }

    // ========================================================================
    // READ-ONLY PASSTHROUGHS
    // ========================================================================

    pub async fn list_documents(&self) -> ImportResult<Vec<Document>> {
        self.with_store(|gateway, _| gateway.list_documents().map_err(ImportError::load))
            .await
    }

    pub async fn list_items(&self, document_id: i64) -> ImportResult<Vec<DocumentItem>> {
        self.with_store(move |gateway, _| {
            gateway
                .list_items(Some(document_id))
                .map_err(ImportError::load)
        })
        .await
    }

    pub async fn document_detail(&self, id: i64) -> ImportResult<Option<DocumentDetail>> {
        self.with_store(move |gateway, _| {
            let document = gateway
                .list_documents()
                .map_err(ImportError::load)?
                .into_iter()
                .find(|d| d.id == id);

            match document {
                Some(document) => Ok(Some(DocumentDetail {
                    document,
                    items: gateway.list_items(Some(id)).map_err(ImportError::load)?,
                })),
                None => Ok(None),
            }
        })
        .await
    }

    /// Case-insensitive search over id, type, date, names and city.
    /// A blank query returns every document.
    pub async fn search_documents(&self, query: &str) -> ImportResult<Vec<Document>> {
        let query = query.trim().to_lowercase();
        let documents = self.list_documents().await?;

        if query.is_empty() {
            return Ok(documents);
        }
        Ok(documents.into_iter().filter(|d| d.matches(&query)).collect())
    }

    pub async fn history(&self) -> ImportResult<Vec<Event>> {
        self.with_store(|gateway, _| gateway.list_events().map_err(ImportError::load))
            .await
    }

    /// Audit trail of one entity, e.g. `("document", "5")`
    pub async fn entity_history(&self, entity_type: &str, entity_id: &str) -> ImportResult<Vec<Event>> {
        let entity_type = entity_type.to_string();
        let entity_id = entity_id.to_string();

        self.with_store(move |gateway, _| {
            gateway
                .list_events_for(&entity_type, &entity_id)
                .map_err(ImportError::load)
        })
        .await
    }

    // ========================================================================
    // EDITS
    // ========================================================================

    /// Bulk update of operator-edited records, one unit of work
    pub async fn save_edited(&self, documents: Vec<Document>, items: Vec<DocumentItem>) -> ImportResult<()> {
        validate_edits(&documents, &items)?;

        self.with_store(move |gateway, _| {
            let staged = documents
                .iter()
                .try_for_each(|d| gateway.upsert_document(d))
                .and_then(|_| items.iter().try_for_each(|i| gateway.upsert_item(i)))
                .and_then(|_| {
                    gateway.record_event(&Event::new(
                        "edits_saved",
                        "batch",
                        "edits",
                        serde_json::json!({ "documents": documents.len(), "items": items.len() }),
                        ACTOR,
                    ))
                });

            if let Err(source) = staged.and_then(|_| gateway.commit().map(|_| ())) {
                gateway.rollback();
                return Err(ImportError::Persistence {
                    phase: Phase::Edits,
                    committed: Vec::new(),
                    source,
                });
            }

            tracing::info!(documents = documents.len(), items = items.len(), "edits saved");
            Ok(())
        })
        .await
    }

    /// Delete a document and, by cascade, its items
    pub async fn delete_document(&self, id: i64) -> ImportResult<()> {
        self.with_store(move |gateway, _| {
            let staged = gateway.delete_document(id).and_then(|_| {
                gateway.record_event(&Event::new(
                    "document_deleted",
                    "document",
                    &id.to_string(),
                    serde_json::json!({ "id": id }),
                    ACTOR,
                ))
            });

            if let Err(source) = staged.and_then(|_| gateway.commit().map(|_| ())) {
                gateway.rollback();
                return Err(ImportError::Persistence {
                    phase: Phase::Edits,
                    committed: Vec::new(),
                    source,
                });
            }

            tracing::info!(id, "document deleted");
            Ok(())
        })
        .await
    }
}

/// Record `event` as its own unit of work after the phases in `committed`
fn journal<G>(gateway: &mut G, event: &Event, committed: &[Phase]) -> ImportResult<()>
where
    G: PersistenceGateway + ?Sized,
{
    let result = gateway.record_event(event).and_then(|_| gateway.commit());
    if let Err(source) = result {
        gateway.rollback();
        return Err(ImportError::Persistence {
            phase: Phase::Journal,
            committed: committed.to_vec(),
            source,
        });
    }
    Ok(())
}

/// SHA-256 of a file's bytes, hex encoded
fn fingerprint(path: &Path) -> ImportResult<String> {
    let bytes = std::fs::read(path).map_err(|source| ImportError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteGateway;
    use crate::memory::MemoryGateway;
    use crate::parser::{read_documents, read_items};
    use rust_decimal::Decimal;
    use std::fs;
    use std::path::PathBuf;
    use std::str::FromStr;
    use tempfile::TempDir;

    const DOCUMENTS: &str = "Id;Type;Date;FirstName;LastName;City\n\
        1;Invoice;2024-01-01;Jan;Kowalski;Łódź\n";
    const ITEMS: &str = "DocumentId;Ordinal;Product;Quantity;Price;TaxRate\n\
        1;1;Widget;2;10,00;23,00\n";

    fn files(dir: &TempDir, documents: &str, items: &str) -> (PathBuf, PathBuf) {
        let doc_path = dir.path().join("documents.csv");
        let item_path = dir.path().join("items.csv");
        fs::write(&doc_path, documents).unwrap();
        fs::write(&item_path, items).unwrap();
        (doc_path, item_path)
    }

    fn sqlite_service(strategy: ReconcileStrategy) -> DocumentService<SqliteGateway> {
        DocumentService::new(SqliteGateway::in_memory().unwrap(), CsvCodec::polish(), strategy)
    }

    #[tokio::test]
    async fn test_import_single_document() {
        let dir = TempDir::new().unwrap();
        let (docs, items) = files(&dir, DOCUMENTS, ITEMS);
        let service = sqlite_service(ReconcileStrategy::Upsert);

        let summary = service.import_batch(&docs, &items).await.unwrap();

        assert_eq!(summary.documents_added, 1);
        assert_eq!(summary.items_added, 1);

        let documents = service.list_documents().await.unwrap();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].city, "Łódź");

        let lines = service.list_items(1).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].document_id, 1);
        assert_eq!(lines[0].price, Decimal::from_str("10.00").unwrap());
    }

    #[tokio::test]
    async fn test_reimport_changed_price() {
        let dir = TempDir::new().unwrap();
        let (docs, items) = files(&dir, DOCUMENTS, ITEMS);
        let service = sqlite_service(ReconcileStrategy::Upsert);
        service.import_batch(&docs, &items).await.unwrap();

        let (docs, items) = files(
            &dir,
            DOCUMENTS,
            "DocumentId;Ordinal;Product;Quantity;Price;TaxRate\n1;1;Widget;2;12,00;23,00\n",
        );
        let summary = service.import_batch(&docs, &items).await.unwrap();

        assert_eq!(summary.documents_added, 0);
        assert_eq!(summary.documents_updated, 1);
        assert_eq!(summary.items_added, 0);
        assert_eq!(summary.items_updated, 1);
        assert_eq!(
            service.list_items(1).await.unwrap()[0].price,
            Decimal::from_str("12.00").unwrap()
        );
    }

    #[tokio::test]
    async fn test_invalid_rows_abort_before_any_write() {
        let dir = TempDir::new().unwrap();
        let (docs, items) = files(
            &dir,
            "Id;Type;Date;FirstName;LastName;City\n1;Invoice;;Jan;Kowalski;Łódź\n",
            ITEMS,
        );
        let service = sqlite_service(ReconcileStrategy::Replace);

        let err = service.import_batch(&docs, &items).await.unwrap_err();

        assert!(matches!(err, ImportError::Validation { field: "Date", .. }));
        assert!(!err.is_partially_applied());
        assert!(service.history().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_replace_missing_reference_partial_state() {
        let dir = TempDir::new().unwrap();
        let (docs, items) = files(&dir, DOCUMENTS, ITEMS);
        let service = sqlite_service(ReconcileStrategy::Replace);
        service.import_batch(&docs, &items).await.unwrap();

        let (docs, items) = files(
            &dir,
            "Id;Type;Date;FirstName;LastName;City\n2;Receipt;2024-03-01;Anna;Nowak;Gdańsk\n",
            "DocumentId;Ordinal;Product;Quantity;Price;TaxRate\n99;1;Widget;1;1,00;23\n",
        );
        let err = service.import_batch(&docs, &items).await.unwrap_err();

        assert!(matches!(err, ImportError::MissingHeaderReference { document_id: 99, .. }));
        assert_eq!(err.committed_phases(), &[Phase::Purge, Phase::Documents]);

        let documents = service.list_documents().await.unwrap();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].city, "Gdańsk", "previous documents are gone");
        assert!(service.list_items(documents[0].id).await.unwrap().is_empty());
    }

    async fn round_trip(strategy: ReconcileStrategy) {
        let dir = TempDir::new().unwrap();
        let (docs, items) = files(
            &dir,
            "Id;Type;Date;FirstName;LastName;City\n\
             5;Invoice;2024-01-01;Jan;Kowalski;Łódź\n\
             9;Receipt;2023-12-31;Anna;\"Nowak; Jr\";Gdańsk\n",
            "DocumentId;Ordinal;Product;Quantity;Price;TaxRate\n\
             5;1;Widget;2;10,00;23,00\n\
             9;1;Nut;0,5;1,25;8\n\
             9;2;Bolt;100;0,015;0\n",
        );
        let service = DocumentService::new(MemoryGateway::new(), CsvCodec::polish(), strategy);
        let summary = service.import_batch(&docs, &items).await.unwrap();

        let out_docs = dir.path().join("out_documents.csv");
        let out_items = dir.path().join("out_items.csv");
        let exported = service.export_all(&out_docs, &out_items).await.unwrap();
        assert_eq!(exported, ExportSummary { documents: 2, items: 3 });

        let codec = CsvCodec::polish();
        let remap = |id: i64| summary.identity_map.get(&id).copied().unwrap_or(id);

        let mut expected_docs = read_documents(&docs, &codec).unwrap();
        for row in &mut expected_docs {
            row.id = remap(row.id);
        }
        let mut expected_items = read_items(&items, &codec).unwrap();
        for row in &mut expected_items {
            row.document_id = remap(row.document_id);
        }

        let strip_docs = |rows: Vec<crate::parser::DocumentRow>| {
            rows.into_iter().map(|r| (r.id, r.doc_type, r.date, r.first_name, r.last_name, r.city)).collect::<Vec<_>>()
        };
        let strip_items = |rows: Vec<crate::parser::ItemRow>| {
            rows.into_iter()
                .map(|r| (r.document_id, r.ordinal, r.product, r.quantity, r.price, r.tax_rate))
                .collect::<Vec<_>>()
        };

        assert_eq!(
            strip_docs(read_documents(&out_docs, &codec).unwrap()),
            strip_docs(expected_docs)
        );
        assert_eq!(
            strip_items(read_items(&out_items, &codec).unwrap()),
            strip_items(expected_items)
        );
    }

    #[tokio::test]
    async fn test_round_trip_upsert() {
        round_trip(ReconcileStrategy::Upsert).await;
    }

    #[tokio::test]
    async fn test_round_trip_replace() {
        round_trip(ReconcileStrategy::Replace).await;
    }

    #[tokio::test]
    async fn test_preview_flags_without_writing() {
        let dir = TempDir::new().unwrap();
        let (docs, items) = files(
            &dir,
            "Id;Type;Date;FirstName;LastName;City\n1;;2024-01-01;Jan;Kowalski;\n",
            "DocumentId;Ordinal;Product;Quantity;Price;TaxRate\n1;1;Widget;0;10,00;23\n",
        );
        let service = sqlite_service(ReconcileStrategy::Upsert);

        let preview = service.read_for_preview(&docs, &items).await.unwrap();

        assert!(preview.has_warnings());
        assert_eq!(preview.invalid_documents().count(), 1);
        assert_eq!(preview.invalid_items().count(), 1);
        assert!(service.list_documents().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_preview_path_and_empty_errors() {
        let dir = TempDir::new().unwrap();
        let service = sqlite_service(ReconcileStrategy::Upsert);

        let err = service
            .read_for_preview(Path::new(""), Path::new("items.csv"))
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::Path { .. }));

        let (docs, items) = files(&dir, DOCUMENTS, "DocumentId;Ordinal;Product;Quantity;Price;TaxRate\n");
        let err = service.read_for_preview(&docs, &items).await.unwrap_err();
        assert!(matches!(err, ImportError::EmptyInput { .. }));
    }

    #[tokio::test]
    async fn test_import_is_journaled() {
        let dir = TempDir::new().unwrap();
        let (docs, items) = files(&dir, DOCUMENTS, ITEMS);
        let service = sqlite_service(ReconcileStrategy::Upsert);
        service.import_batch(&docs, &items).await.unwrap();

        let events = service.history().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "import_completed");
        assert_eq!(events[0].data["summary"]["documents_added"], 1);
        assert_eq!(events[0].data["documents_sha256"].as_str().unwrap().len(), 64);
    }

    #[tokio::test]
    async fn test_concurrent_imports_do_not_interleave() {
        let dir = TempDir::new().unwrap();
        let (docs, items) = files(&dir, DOCUMENTS, ITEMS);
        let service = sqlite_service(ReconcileStrategy::Upsert);

        let first = service.clone();
        let second = service.clone();
        let (a, b) = tokio::join!(
            first.import_batch(&docs, &items),
            second.import_batch(&docs, &items)
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        // Exactly one run saw an empty store
        assert_eq!(a.documents_added + b.documents_added, 1);
        assert_eq!(a.items_added + b.items_added, 1);
        assert_eq!(service.list_items(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_import_reports_nothing_applied() {
        let dir = TempDir::new().unwrap();
        let (docs, items) = files(&dir, DOCUMENTS, ITEMS);
        let service = sqlite_service(ReconcileStrategy::Upsert);

        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = service
            .import_batch_with(&docs, &items, cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, ImportError::Cancelled { .. }));
        assert!(!err.is_partially_applied());
        assert!(service.list_documents().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_edited_and_delete() {
        let dir = TempDir::new().unwrap();
        let (docs, items) = files(&dir, DOCUMENTS, ITEMS);
        let service = sqlite_service(ReconcileStrategy::Upsert);
        service.import_batch(&docs, &items).await.unwrap();

        let mut documents = service.list_documents().await.unwrap();
        let mut lines = service.list_items(1).await.unwrap();
        documents[0].last_name = "Nowak".to_string();
        lines[0].quantity = Decimal::from(5);
        service.save_edited(documents, lines).await.unwrap();

        let detail = service.document_detail(1).await.unwrap().unwrap();
        assert_eq!(detail.document.last_name, "Nowak");
        assert_eq!(detail.items[0].quantity, Decimal::from(5));

        service.delete_document(1).await.unwrap();
        assert!(service.document_detail(1).await.unwrap().is_none());

        let trail = service.entity_history("document", "1").await.unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].event_type, "document_deleted");
        assert!(service.entity_history("document", "2").await.unwrap().is_empty());
        assert!(service.list_items(1).await.unwrap().is_empty());

        let err = service.delete_document(1).await.unwrap_err();
        assert!(matches!(err, ImportError::Persistence { phase: Phase::Edits, .. }));
    }

    #[tokio::test]
    async fn test_save_edited_rejects_invalid_reference() {
        let service = sqlite_service(ReconcileStrategy::Upsert);
        let item = DocumentItem {
            id: 0,
            document_id: 0,
            ordinal: 1,
            product: "Widget".to_string(),
            quantity: Decimal::ONE,
            price: Decimal::ONE,
            tax_rate: Decimal::ZERO,
        };

        let err = service.save_edited(vec![], vec![item]).await.unwrap_err();
        assert!(matches!(err, ImportError::Validation { field: "DocumentId", .. }));
    }

    #[tokio::test]
    async fn test_search_documents() {
        let dir = TempDir::new().unwrap();
        let (docs, items) = files(
            &dir,
            "Id;Type;Date;FirstName;LastName;City\n\
             1;Invoice;2024-01-01;Jan;Kowalski;Łódź\n\
             2;Receipt;2024-03-01;Anna;Nowak;Gdańsk\n",
            ITEMS,
        );
        let service = sqlite_service(ReconcileStrategy::Upsert);
        service.import_batch(&docs, &items).await.unwrap();

        assert_eq!(service.search_documents("").await.unwrap().len(), 2);
        assert_eq!(service.search_documents("  NOWAK ").await.unwrap()[0].id, 2);
        assert_eq!(service.search_documents("2024-01").await.unwrap()[0].id, 1);
        assert!(service.search_documents("warszawa").await.unwrap().is_empty());
    }
}
