// Document Manager - Core Library
// Document/item CSV import, reconciliation and export over a persisted store.
// Exposes all modules for use in CLI, API server, and tests

pub mod codec;          // Locale codec: delimiter, decimal separator, date format
pub mod config;         // Settings file + environment overrides
pub mod db;             // Persistence gateway trait + SQLite store + audit events
pub mod entities;       // Document and DocumentItem
pub mod error;          // ImportError / GatewayError taxonomy
pub mod export;         // CSV writer
pub mod logging;        // tracing subscriber setup
pub mod memory;         // In-memory gateway
pub mod parser;         // CSV reader
pub mod reconciliation; // Upsert / Replace engine
pub mod service;        // Async operation boundary
pub mod validation;     // Strict + advisory row checks

// Re-export commonly used types
pub use codec::CsvCodec;
pub use config::{AppConfig, ConfigError, LogFormat};
pub use db::{
    Event, PersistenceGateway, SqliteGateway,
    setup_database, insert_event,
};
pub use entities::{Document, DocumentItem, ItemKey};
pub use error::{GatewayError, ImportError, ImportResult, Phase, RowRef};
pub use export::{write_documents, write_items};
pub use memory::MemoryGateway;
pub use parser::{
    DocumentRow, ItemRow, DOCUMENT_COLUMNS, ITEM_COLUMNS,
    read_batch, read_documents, read_items,
};
pub use reconciliation::{CancelFlag, ImportSummary, ReconcileStrategy, Reconciler};
pub use service::{DocumentDetail, DocumentService, ExportSummary};
pub use validation::{Flagged, Issue, Preview, ValidatedBatch, validate_edits, validate_strict};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
