// 🧠 In-memory Persistence Gateway
//
// Same contract as the SQLite gateway: staged writes, atomic commit,
// foreign keys and cascade enforced, identities never reused.

use crate::db::{Event, PersistenceGateway, StagedOp};
use crate::entities::{Document, DocumentItem, ItemKey};
use crate::error::GatewayError;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
struct State {
    documents: BTreeMap<i64, Document>,
    /// Keyed by surrogate id
    items: BTreeMap<i64, DocumentItem>,
    events: Vec<Event>,
    document_sequence: i64,
    item_sequence: i64,
}

impl State {
    fn item_id_by_key(&self, key: ItemKey) -> Option<i64> {
        self.items
            .values()
            .find(|item| item.key() == key)
            .map(|item| item.id)
    }

    fn apply(&mut self, op: &StagedOp) -> Result<(), GatewayError> {
        match op {
            StagedOp::UpsertDocument(doc) => {
                self.document_sequence = self.document_sequence.max(doc.id);
                self.documents.insert(doc.id, doc.clone());
            }
            StagedOp::UpsertItem(item) => {
                if !self.documents.contains_key(&item.document_id) {
                    return Err(GatewayError::ForeignKey {
                        document_id: item.document_id,
                        ordinal: item.ordinal,
                    });
                }

                let id = if item.is_persisted() {
                    if !self.items.contains_key(&item.id) {
                        return Err(GatewayError::NotFound {
                            entity: "item",
                            id: item.id,
                        });
                    }
                    if let Some(other) = self.item_id_by_key(item.key()) {
                        if other != item.id {
                            return Err(GatewayError::Duplicate {
                                document_id: item.document_id,
                                ordinal: item.ordinal,
                            });
                        }
                    }
                    item.id
                } else {
                    match self.item_id_by_key(item.key()) {
                        Some(existing) => existing,
                        None => {
                            self.item_sequence += 1;
                            self.item_sequence
                        }
                    }
                };

                let mut stored = item.clone();
                stored.id = id;
                self.items.insert(id, stored);
            }
            StagedOp::DeleteDocument(id) => {
                if self.documents.remove(id).is_none() {
                    return Err(GatewayError::NotFound {
                        entity: "document",
                        id: *id,
                    });
                }
                self.items.retain(|_, item| item.document_id != *id);
            }
            StagedOp::DeleteAllItems => self.items.clear(),
            StagedOp::DeleteAllDocuments => {
                self.documents.clear();
                self.items.clear();
            }
            StagedOp::InsertEvent(event) => self.events.push(event.clone()),
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryGateway {
    state: State,
    staged: Vec<StagedOp>,
    reserved: i64,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistenceGateway for MemoryGateway {
    fn list_documents(&self) -> Result<Vec<Document>, GatewayError> {
        Ok(self.state.documents.values().cloned().collect())
    }

    fn list_items(&self, document_id: Option<i64>) -> Result<Vec<DocumentItem>, GatewayError> {
        let mut items: Vec<DocumentItem> = self
            .state
            .items
            .values()
            .filter(|item| document_id.map_or(true, |id| item.document_id == id))
            .cloned()
            .collect();
        items.sort_by_key(|item| item.key());
        Ok(items)
    }

    fn upsert_document(&mut self, document: &Document) -> Result<(), GatewayError> {
        self.staged.push(StagedOp::UpsertDocument(document.clone()));
        Ok(())
    }

    fn upsert_item(&mut self, item: &DocumentItem) -> Result<(), GatewayError> {
        self.staged.push(StagedOp::UpsertItem(item.clone()));
        Ok(())
    }

    fn delete_document(&mut self, id: i64) -> Result<(), GatewayError> {
        self.staged.push(StagedOp::DeleteDocument(id));
        Ok(())
    }

    fn delete_all_documents(&mut self) -> Result<(), GatewayError> {
        self.staged.push(StagedOp::DeleteAllDocuments);
        Ok(())
    }

    fn delete_all_items(&mut self) -> Result<(), GatewayError> {
        self.staged.push(StagedOp::DeleteAllItems);
        Ok(())
    }

    fn assign_identity(&mut self, _document: &Document) -> Result<i64, GatewayError> {
        let next = self.state.document_sequence.max(self.reserved) + 1;
        self.reserved = next;
        Ok(next)
    }

    fn record_event(&mut self, event: &Event) -> Result<(), GatewayError> {
        self.staged.push(StagedOp::InsertEvent(event.clone()));
        Ok(())
    }

    fn list_events(&self) -> Result<Vec<Event>, GatewayError> {
        Ok(self.state.events.iter().rev().cloned().collect())
    }

    fn list_events_for(&self, entity_type: &str, entity_id: &str) -> Result<Vec<Event>, GatewayError> {
        Ok(self
            .state
            .events
            .iter()
            .rev()
            .filter(|e| e.entity_type == entity_type && e.entity_id == entity_id)
            .cloned()
            .collect())
    }

    fn commit(&mut self) -> Result<usize, GatewayError> {
        let staged = std::mem::take(&mut self.staged);

        // Work on a copy so a failing op leaves committed state untouched
        let mut next = self.state.clone();
        for op in &staged {
            next.apply(op)?;
        }
        self.state = next;

        Ok(staged.len())
    }

    fn rollback(&mut self) {
        self.staged.clear();
    }

    fn pending(&self) -> usize {
        self.staged.len()
    }
}
