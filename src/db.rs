// 🗄️ Persistence Gateway - documents + items + audit events
//
// The gateway stages writes in a unit of work and applies them on commit().
// Reads only ever see committed state. One commit = one SQLite transaction;
// nothing spans two commits.

use crate::entities::{Document, DocumentItem};
use crate::error::GatewayError;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

const DATE_FORMAT: &str = "%Y-%m-%d";

// ============================================================================
// GATEWAY CONTRACT
// ============================================================================

pub trait PersistenceGateway: Send {
    fn list_documents(&self) -> Result<Vec<Document>, GatewayError>;

    /// All items, or only those of one document
    fn list_items(&self, document_id: Option<i64>) -> Result<Vec<DocumentItem>, GatewayError>;

    /// Insert or update by document id
    fn upsert_document(&mut self, document: &Document) -> Result<(), GatewayError>;

    /// Persisted items (id > 0) are updated by surrogate id, new items are
    /// inserted or merged by their natural key (document_id, ordinal)
    fn upsert_item(&mut self, item: &DocumentItem) -> Result<(), GatewayError>;

    /// Delete one document; its items go with it
    fn delete_document(&mut self, id: i64) -> Result<(), GatewayError>;

    fn delete_all_documents(&mut self) -> Result<(), GatewayError>;

    fn delete_all_items(&mut self) -> Result<(), GatewayError>;

    /// Reserve a fresh document identity, never handed out before
    fn assign_identity(&mut self, document: &Document) -> Result<i64, GatewayError>;

    fn record_event(&mut self, event: &Event) -> Result<(), GatewayError>;

    /// Newest first
    fn list_events(&self) -> Result<Vec<Event>, GatewayError>;

    /// Events about one entity, newest first
    fn list_events_for(&self, entity_type: &str, entity_id: &str) -> Result<Vec<Event>, GatewayError>;

    /// Apply every staged operation atomically. Returns how many were applied.
    /// On failure nothing from this unit of work is kept.
    fn commit(&mut self) -> Result<usize, GatewayError>;

    /// Drop staged operations without applying them
    fn rollback(&mut self);

    fn pending(&self) -> usize;
}

/// One staged write
#[derive(Debug, Clone, PartialEq)]
pub enum StagedOp {
    UpsertDocument(Document),
    UpsertItem(DocumentItem),
    DeleteDocument(i64),
    DeleteAllDocuments,
    DeleteAllItems,
    InsertEvent(Event),
}

// ============================================================================
// AUDIT EVENTS
// ============================================================================

/// Event for audit trail ("every change is an event")
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<(), GatewayError> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            doc_type TEXT NOT NULL,
            date TEXT NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            city TEXT NOT NULL
        )",
        [],
    )?;

    // Amounts are decimal TEXT, never REAL
    conn.execute(
        "CREATE TABLE IF NOT EXISTS document_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            document_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
            ordinal INTEGER NOT NULL,
            product TEXT NOT NULL,
            quantity TEXT NOT NULL,
            price TEXT NOT NULL,
            tax_rate TEXT NOT NULL,
            UNIQUE (document_id, ordinal)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_items_document ON document_items(document_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp)",
        [],
    )?;

    Ok(())
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<(), GatewayError> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>, GatewayError> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC, id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], event_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

fn event_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
    let timestamp_str: String = row.get(1)?;
    let data_json: String = row.get(5)?;

    Ok(Event {
        event_id: row.get(0)?,
        timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
            .map_err(|e| conversion_failure(1, e))?
            .with_timezone(&Utc),
        event_type: row.get(2)?,
        entity_type: row.get(3)?,
        entity_id: row.get(4)?,
        data: serde_json::from_str(&data_json).map_err(|e| conversion_failure(5, e))?,
        actor: row.get(6)?,
    })
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn conversion_failure<E>(column: usize, error: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(error))
}

fn decimal_at(row: &rusqlite::Row<'_>, column: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(column)?;
    Decimal::from_str(&text).map_err(|e| conversion_failure(column, e))
}

fn document_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
    let date_str: String = row.get(2)?;

    Ok(Document {
        id: row.get(0)?,
        doc_type: row.get(1)?,
        date: NaiveDate::parse_from_str(&date_str, DATE_FORMAT).map_err(|e| conversion_failure(2, e))?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        city: row.get(5)?,
    })
}

fn item_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DocumentItem> {
    Ok(DocumentItem {
        id: row.get(0)?,
        document_id: row.get(1)?,
        ordinal: row.get(2)?,
        product: row.get(3)?,
        quantity: decimal_at(row, 4)?,
        price: decimal_at(row, 5)?,
        tax_rate: decimal_at(row, 6)?,
    })
}

/// Translate constraint failures on document_items into domain errors
fn item_write_error(error: rusqlite::Error, item: &DocumentItem) -> GatewayError {
    if let rusqlite::Error::SqliteFailure(err, _) = &error {
        if err.code == ErrorCode::ConstraintViolation {
            match err.extended_code {
                rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                    return GatewayError::ForeignKey {
                        document_id: item.document_id,
                        ordinal: item.ordinal,
                    }
                }
                rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE => {
                    return GatewayError::Duplicate {
                        document_id: item.document_id,
                        ordinal: item.ordinal,
                    }
                }
                _ => {}
            }
        }
    }
    GatewayError::Sqlite(error)
}

// ============================================================================
// SQLITE GATEWAY
// ============================================================================

pub struct SqliteGateway {
    conn: Connection,
    staged: Vec<StagedOp>,
    /// Highest document id handed out by assign_identity
    reserved: i64,
}

impl SqliteGateway {
    pub fn open(path: &Path) -> Result<Self, GatewayError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self, GatewayError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self, GatewayError> {
        setup_database(&conn)?;
        Ok(SqliteGateway {
            conn,
            staged: Vec::new(),
            reserved: 0,
        })
    }

    fn apply(tx: &rusqlite::Transaction<'_>, op: &StagedOp) -> Result<(), GatewayError> {
        match op {
            StagedOp::UpsertDocument(doc) => {
                // ON CONFLICT ... DO UPDATE keeps the row; REPLACE would cascade-delete its items
                tx.execute(
                    "INSERT INTO documents (id, doc_type, date, first_name, last_name, city)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(id) DO UPDATE SET
                        doc_type = excluded.doc_type,
                        date = excluded.date,
                        first_name = excluded.first_name,
                        last_name = excluded.last_name,
                        city = excluded.city",
                    params![
                        doc.id,
                        doc.doc_type,
                        doc.date.format(DATE_FORMAT).to_string(),
                        doc.first_name,
                        doc.last_name,
                        doc.city,
                    ],
                )?;
            }
            StagedOp::UpsertItem(item) if item.is_persisted() => {
                let updated = tx
                    .execute(
                        "UPDATE document_items
                         SET document_id = ?1, ordinal = ?2, product = ?3,
                             quantity = ?4, price = ?5, tax_rate = ?6
                         WHERE id = ?7",
                        params![
                            item.document_id,
                            item.ordinal,
                            item.product,
                            item.quantity.to_string(),
                            item.price.to_string(),
                            item.tax_rate.to_string(),
                            item.id,
                        ],
                    )
                    .map_err(|e| item_write_error(e, item))?;

                if updated == 0 {
                    return Err(GatewayError::NotFound {
                        entity: "item",
                        id: item.id,
                    });
                }
            }
            StagedOp::UpsertItem(item) => {
                tx.execute(
                    "INSERT INTO document_items (document_id, ordinal, product, quantity, price, tax_rate)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(document_id, ordinal) DO UPDATE SET
                        product = excluded.product,
                        quantity = excluded.quantity,
                        price = excluded.price,
                        tax_rate = excluded.tax_rate",
                    params![
                        item.document_id,
                        item.ordinal,
                        item.product,
                        item.quantity.to_string(),
                        item.price.to_string(),
                        item.tax_rate.to_string(),
                    ],
                )
                .map_err(|e| item_write_error(e, item))?;
            }
            StagedOp::DeleteDocument(id) => {
                let deleted = tx.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
                if deleted == 0 {
                    return Err(GatewayError::NotFound {
                        entity: "document",
                        id: *id,
                    });
                }
            }
            StagedOp::DeleteAllItems => {
                tx.execute("DELETE FROM document_items", [])?;
            }
            StagedOp::DeleteAllDocuments => {
                tx.execute("DELETE FROM documents", [])?;
            }
            StagedOp::InsertEvent(event) => {
                insert_event(tx, event)?;
            }
        }
        Ok(())
    }
}

impl PersistenceGateway for SqliteGateway {
    fn list_documents(&self) -> Result<Vec<Document>, GatewayError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, doc_type, date, first_name, last_name, city
             FROM documents
             ORDER BY id",
        )?;

        let documents = stmt
            .query_map([], document_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(documents)
    }

    fn list_items(&self, document_id: Option<i64>) -> Result<Vec<DocumentItem>, GatewayError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, document_id, ordinal, product, quantity, price, tax_rate
             FROM document_items
             WHERE ?1 IS NULL OR document_id = ?1
             ORDER BY document_id, ordinal",
        )?;

        let items = stmt
            .query_map(params![document_id], item_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

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
        // AUTOINCREMENT keeps the high-water mark in sqlite_sequence even after deletes
        let sequence: Option<i64> = self
            .conn
            .query_row(
                "SELECT seq FROM sqlite_sequence WHERE name = 'documents'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let max_id: i64 = self
            .conn
            .query_row("SELECT COALESCE(MAX(id), 0) FROM documents", [], |row| row.get(0))?;

        let next = sequence.unwrap_or(0).max(max_id).max(self.reserved) + 1;
        self.reserved = next;
        Ok(next)
    }

    fn record_event(&mut self, event: &Event) -> Result<(), GatewayError> {
        self.staged.push(StagedOp::InsertEvent(event.clone()));
        Ok(())
    }

    fn list_events(&self) -> Result<Vec<Event>, GatewayError> {
        let mut stmt = self.conn.prepare(
            "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
             FROM events
             ORDER BY timestamp DESC, id DESC",
        )?;

        let events = stmt
            .query_map([], event_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(events)
    }

    fn list_events_for(&self, entity_type: &str, entity_id: &str) -> Result<Vec<Event>, GatewayError> {
        get_events_for_entity(&self.conn, entity_type, entity_id)
    }

    fn commit(&mut self) -> Result<usize, GatewayError> {
        let staged = std::mem::take(&mut self.staged);
        let count = staged.len();

        // Dropping the transaction on an error path rolls it back
        let tx = self.conn.transaction()?;
        for op in &staged {
            Self::apply(&tx, op)?;
        }
        tx.commit()?;

        Ok(count)
    }

    fn rollback(&mut self) {
        self.staged.clear();
    }

    fn pending(&self) -> usize {
        self.staged.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(id: i64) -> Document {
        Document {
            id,
            doc_type: "Invoice".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            first_name: "Jan".to_string(),
            last_name: "Kowalski".to_string(),
            city: "Łódź".to_string(),
        }
    }

    fn item(document_id: i64, ordinal: i32, price: &str) -> DocumentItem {
        DocumentItem {
            id: 0,
            document_id,
            ordinal,
            product: "Widget".to_string(),
            quantity: Decimal::from(2),
            price: Decimal::from_str(price).unwrap(),
            tax_rate: Decimal::from_str("23.00").unwrap(),
        }
    }

    #[test]
    fn test_nothing_visible_before_commit() {
        let mut gateway = SqliteGateway::in_memory().unwrap();

        gateway.upsert_document(&document(1)).unwrap();
        assert_eq!(gateway.pending(), 1);
        assert!(gateway.list_documents().unwrap().is_empty());

        assert_eq!(gateway.commit().unwrap(), 1);
        assert_eq!(gateway.list_documents().unwrap(), vec![document(1)]);
        assert_eq!(gateway.pending(), 0);
    }

    #[test]
    fn test_decimals_keep_scale() {
        let mut gateway = SqliteGateway::in_memory().unwrap();
        gateway.upsert_document(&document(1)).unwrap();
        gateway.upsert_item(&item(1, 1, "10.00")).unwrap();
        gateway.commit().unwrap();

        let items = gateway.list_items(Some(1)).unwrap();
        assert_eq!(items.len(), 1);
        assert!(items[0].is_persisted());
        assert_eq!(items[0].price.to_string(), "10.00");
    }

    #[test]
    fn test_item_upsert_by_natural_key() {
        let mut gateway = SqliteGateway::in_memory().unwrap();
        gateway.upsert_document(&document(1)).unwrap();
        gateway.upsert_item(&item(1, 1, "10.00")).unwrap();
        gateway.commit().unwrap();

        gateway.upsert_item(&item(1, 1, "12.00")).unwrap();
        gateway.commit().unwrap();

        let items = gateway.list_items(None).unwrap();
        assert_eq!(items.len(), 1, "(document_id, ordinal) must stay unique");
        assert_eq!(items[0].price, Decimal::from_str("12.00").unwrap());
    }

    #[test]
    fn test_failed_commit_applies_nothing() {
        let mut gateway = SqliteGateway::in_memory().unwrap();
        gateway.upsert_document(&document(1)).unwrap();
        gateway.upsert_item(&item(99, 1, "1.00")).unwrap();

        let err = gateway.commit().unwrap_err();
        assert!(matches!(err, GatewayError::ForeignKey { document_id: 99, ordinal: 1 }));
        assert!(gateway.list_documents().unwrap().is_empty());
        assert_eq!(gateway.pending(), 0);
    }

    #[test]
    fn test_delete_document_cascades() {
        let mut gateway = SqliteGateway::in_memory().unwrap();
        gateway.upsert_document(&document(1)).unwrap();
        gateway.upsert_document(&document(2)).unwrap();
        gateway.upsert_item(&item(1, 1, "1.00")).unwrap();
        gateway.upsert_item(&item(2, 1, "1.00")).unwrap();
        gateway.commit().unwrap();

        gateway.delete_document(1).unwrap();
        gateway.commit().unwrap();

        let items = gateway.list_items(None).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].document_id, 2);

        gateway.delete_document(1).unwrap();
        assert!(matches!(gateway.commit(), Err(GatewayError::NotFound { .. })));
    }

    #[test]
    fn test_document_upsert_keeps_items() {
        let mut gateway = SqliteGateway::in_memory().unwrap();
        gateway.upsert_document(&document(1)).unwrap();
        gateway.upsert_item(&item(1, 1, "1.00")).unwrap();
        gateway.commit().unwrap();

        let mut changed = document(1);
        changed.city = "Kraków".to_string();
        gateway.upsert_document(&changed).unwrap();
        gateway.commit().unwrap();

        assert_eq!(gateway.list_documents().unwrap()[0].city, "Kraków");
        assert_eq!(gateway.list_items(Some(1)).unwrap().len(), 1);
    }

    #[test]
    fn test_assigned_identities_are_never_reused() {
        let mut gateway = SqliteGateway::in_memory().unwrap();
        gateway.upsert_document(&document(5)).unwrap();
        gateway.commit().unwrap();

        let first = gateway.assign_identity(&document(0)).unwrap();
        let second = gateway.assign_identity(&document(0)).unwrap();
        assert_eq!(first, 6);
        assert_eq!(second, 7);

        gateway.delete_all_documents().unwrap();
        gateway.commit().unwrap();

        let after_purge = gateway.assign_identity(&document(0)).unwrap();
        assert!(after_purge > 7);
    }

    #[test]
    fn test_event_log() {
        let mut gateway = SqliteGateway::in_memory().unwrap();

        let event = Event::new(
            "import_completed",
            "batch",
            "batch_123",
            serde_json::json!({"documents_added": 1}),
            "test_actor",
        );

        let other = Event::new(
            "document_deleted",
            "document",
            "4",
            serde_json::json!({"id": 4}),
            "test_actor",
        );

        gateway.record_event(&event).unwrap();
        gateway.record_event(&other).unwrap();
        gateway.commit().unwrap();

        let events = gateway.list_events_for("batch", "batch_123").unwrap();
        assert_eq!(events, vec![event]);
        assert_eq!(gateway.list_events().unwrap().len(), 2);
        assert!(gateway.list_events_for("document", "5").unwrap().is_empty());

        println!("✅ Event log test PASSED");
    }
}
