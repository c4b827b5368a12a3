// ⚖️ Reconciliation Engine - merge an import batch into the store
//
// Two mutually exclusive strategies, picked by configuration:
//
//   Upsert  - match documents by declared id and items by (document_id, ordinal);
//             update in place or insert. Nothing absent from the batch is deleted.
//             Phases: documents → items.
//
//   Replace - delete everything, insert the batch with store-assigned document
//             ids and remap item references through declared → assigned ids.
//             Phases: purge → documents → items.
//
// Each phase ends with exactly one commit. There is no rollback across
// phases: a failure after the first commit leaves that commit applied, and
// the error says so.

use crate::db::PersistenceGateway;
use crate::entities::{Document, DocumentItem, ItemKey};
use crate::error::{GatewayError, ImportError, ImportResult, Phase};
use crate::validation::ValidatedBatch;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ============================================================================
// STRATEGY
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileStrategy {
    /// Merge by natural key, never delete
    #[default]
    Upsert,
    /// Mirror the batch exactly, with fresh document identities
    Replace,
}

impl ReconcileStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            ReconcileStrategy::Upsert => "upsert",
            ReconcileStrategy::Replace => "replace",
        }
    }
}

impl fmt::Display for ReconcileStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ReconcileStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "upsert" | "merge" => Ok(ReconcileStrategy::Upsert),
            "replace" | "mirror" => Ok(ReconcileStrategy::Replace),
            other => Err(format!("unknown strategy '{}' (expected upsert or replace)", other)),
        }
    }
}

// ============================================================================
// RESULT
// ============================================================================

/// Counts reported to the caller.
///
/// `*_updated` counts every row that matched a stored one (and was
/// overwritten); `*_changed` is the subset whose stored values differed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub strategy: ReconcileStrategy,
    pub documents_added: usize,
    pub documents_updated: usize,
    pub documents_changed: usize,
    pub items_added: usize,
    pub items_updated: usize,
    pub items_changed: usize,
    pub documents_removed: usize,
    pub items_removed: usize,
    /// Declared id → store-assigned id (replace strategy only)
    pub identity_map: BTreeMap<i64, i64>,
    pub committed: Vec<Phase>,
}

impl ImportSummary {
    pub fn summary(&self) -> String {
        format!(
            "[{}] documents: {} added, {} updated ({} changed), {} removed; items: {} added, {} updated ({} changed), {} removed",
            self.strategy,
            self.documents_added,
            self.documents_updated,
            self.documents_changed,
            self.documents_removed,
            self.items_added,
            self.items_updated,
            self.items_changed,
            self.items_removed,
        )
    }
}

// ============================================================================
// CANCELLATION
// ============================================================================

/// Checked before every phase. A cancel seen after a commit is reported as
/// `ImportError::Cancelled` with the phases already applied.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// RECONCILER
// ============================================================================

pub struct Reconciler {
    strategy: ReconcileStrategy,
    cancel: CancelFlag,
}

/// Tracks committed phases while a run is in progress
struct PhaseLog {
    committed: Vec<Phase>,
}

impl PhaseLog {
    fn failed(&self, phase: Phase, source: GatewayError) -> ImportError {
        ImportError::Persistence {
            phase,
            committed: self.committed.clone(),
            source,
        }
    }
}

impl Reconciler {
    pub fn new(strategy: ReconcileStrategy) -> Self {
        Reconciler {
            strategy,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel(strategy: ReconcileStrategy, cancel: CancelFlag) -> Self {
        Reconciler { strategy, cancel }
    }

    pub fn strategy(&self) -> ReconcileStrategy {
        self.strategy
    }

    /// Reconcile one validated batch against the store behind `gateway`
    pub fn run<G>(&self, gateway: &mut G, batch: &ValidatedBatch) -> ImportResult<ImportSummary>
    where
        G: PersistenceGateway + ?Sized,
    {
        let documents = last_wins(&batch.documents, |d| d.id);
        let items = last_wins(&batch.items, |i| i.key());

        tracing::info!(
            strategy = %self.strategy,
            documents = documents.len(),
            items = items.len(),
            "reconciling batch"
        );

        let mut log = PhaseLog { committed: Vec::new() };
        let result = match self.strategy {
            ReconcileStrategy::Upsert => self.upsert(gateway, &documents, &items, &mut log),
            ReconcileStrategy::Replace => self.replace(gateway, &documents, &items, &mut log),
        };

        match result {
            Ok(mut summary) => {
                summary.committed = log.committed;
                tracing::info!("{}", summary.summary());
                Ok(summary)
            }
            Err(err) => {
                gateway.rollback();
                if err.is_partially_applied() {
                    tracing::warn!(error = %err, "import partially applied");
                }
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Upsert by natural key
    // ------------------------------------------------------------------------

    fn upsert<G>(
        &self,
        gateway: &mut G,
        documents: &[Document],
        items: &[DocumentItem],
        log: &mut PhaseLog,
    ) -> ImportResult<ImportSummary>
    where
        G: PersistenceGateway + ?Sized,
    {
        let mut summary = ImportSummary {
            strategy: ReconcileStrategy::Upsert,
            ..Default::default()
        };

        self.checkpoint(log)?;
        let mut stored_documents: HashMap<i64, Document> = gateway
            .list_documents()
            .map_err(ImportError::load)?
            .into_iter()
            .map(|d| (d.id, d))
            .collect();
        let mut stored_items: HashMap<ItemKey, DocumentItem> = gateway
            .list_items(None)
            .map_err(ImportError::load)?
            .into_iter()
            .map(|i| (i.key(), i))
            .collect();

        // Phase 1: documents
        for doc in documents {
            let staged = match stored_documents.get_mut(&doc.id) {
                Some(stored) => {
                    summary.documents_updated += 1;
                    if stored.merge_from(doc) {
                        summary.documents_changed += 1;
                        gateway.upsert_document(stored)
                    } else {
                        Ok(())
                    }
                }
                None => {
                    summary.documents_added += 1;
                    tracing::debug!(id = doc.id, "new document");
                    gateway.upsert_document(doc)
                }
            };
            staged.map_err(|e| log.failed(Phase::Documents, e))?;
        }
        self.commit(gateway, Phase::Documents, log)?;

        // Phase 2: items
        self.checkpoint(log)?;
        for item in items {
            let staged = match stored_items.get_mut(&item.key()) {
                Some(stored) => {
                    summary.items_updated += 1;
                    if stored.merge_from(item) {
                        summary.items_changed += 1;
                        gateway.upsert_item(stored)
                    } else {
                        Ok(())
                    }
                }
                None => {
                    summary.items_added += 1;
                    tracing::debug!(document_id = item.document_id, ordinal = item.ordinal, "new item");
                    gateway.upsert_item(item)
                }
            };
            staged.map_err(|e| log.failed(Phase::Items, e))?;
        }
        self.commit(gateway, Phase::Items, log)?;

        Ok(summary)
    }

    // ------------------------------------------------------------------------
    // Full replace with identity remap
    // ------------------------------------------------------------------------

    fn replace<G>(
        &self,
        gateway: &mut G,
        documents: &[Document],
        items: &[DocumentItem],
        log: &mut PhaseLog,
    ) -> ImportResult<ImportSummary>
    where
        G: PersistenceGateway + ?Sized,
    {
        let mut summary = ImportSummary {
            strategy: ReconcileStrategy::Replace,
            ..Default::default()
        };

        self.checkpoint(log)?;
        summary.documents_removed = gateway.list_documents().map_err(ImportError::load)?.len();
        summary.items_removed = gateway.list_items(None).map_err(ImportError::load)?.len();

        // Phase 1: purge
        gateway
            .delete_all_items()
            .and_then(|_| gateway.delete_all_documents())
            .map_err(|e| log.failed(Phase::Purge, e))?;
        self.commit(gateway, Phase::Purge, log)?;

        // Phase 2: documents with fresh identities
        self.checkpoint(log)?;
        for doc in documents {
            let assigned = gateway
                .assign_identity(doc)
                .map_err(|e| log.failed(Phase::Documents, e))?;

            let fresh = Document {
                id: assigned,
                ..doc.clone()
            };
            gateway
                .upsert_document(&fresh)
                .map_err(|e| log.failed(Phase::Documents, e))?;

            summary.identity_map.insert(doc.id, assigned);
            summary.documents_added += 1;
            tracing::debug!(declared = doc.id, assigned, "document identity assigned");
        }
        self.commit(gateway, Phase::Documents, log)?;

        // Phase 3: items, every reference resolved before anything is staged
        self.checkpoint(log)?;
        let mut remapped = Vec::with_capacity(items.len());
        for item in items {
            let assigned = summary.identity_map.get(&item.document_id).ok_or_else(|| {
                ImportError::MissingHeaderReference {
                    document_id: item.document_id,
                    ordinal: item.ordinal,
                    committed: log.committed.clone(),
                }
            })?;

            remapped.push(DocumentItem {
                id: 0,
                document_id: *assigned,
                ..item.clone()
            });
        }

        for item in &remapped {
            gateway
                .upsert_item(item)
                .map_err(|e| log.failed(Phase::Items, e))?;
            summary.items_added += 1;
        }
        self.commit(gateway, Phase::Items, log)?;

        Ok(summary)
    }

    // ------------------------------------------------------------------------
    // Phase plumbing
    // ------------------------------------------------------------------------

    fn checkpoint(&self, log: &PhaseLog) -> ImportResult<()> {
        if self.cancel.is_cancelled() {
            return Err(ImportError::Cancelled {
                committed: log.committed.clone(),
            });
        }
        Ok(())
    }

    fn commit<G>(&self, gateway: &mut G, phase: Phase, log: &mut PhaseLog) -> ImportResult<()>
    where
        G: PersistenceGateway + ?Sized,
    {
        let applied = gateway.commit().map_err(|e| log.failed(phase, e))?;
        log.committed.push(phase);
        tracing::info!(phase = %phase, operations = applied, "phase committed");
        Ok(())
    }
}

/// Collapse rows sharing a key; the last occurrence wins but keeps the
/// position of the first.
fn last_wins<T, K, F>(rows: &[T], key: F) -> Vec<T>
where
    T: Clone,
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut positions: HashMap<K, usize> = HashMap::new();
    let mut unique: Vec<T> = Vec::with_capacity(rows.len());

    for row in rows {
        match positions.get(&key(row)) {
            Some(&pos) => unique[pos] = row.clone(),
            None => {
                positions.insert(key(row), unique.len());
                unique.push(row.clone());
            }
        }
    }

    unique
}

// ============================================================================
// TESTS
// ============================================================================
