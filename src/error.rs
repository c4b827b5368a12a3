// ⚠️ Error taxonomy for import / export / store access
//
// Read, parse and validation errors are raised before any write, so the
// store is untouched. Store errors and unresolved references carry the list
// of phases that were already committed: each commit is its own durability
// boundary and nothing is rolled back across phases.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub type ImportResult<T> = Result<T, ImportError>;

// ============================================================================
// PHASES
// ============================================================================

/// Unit of work boundaries. Every write phase ends with exactly one commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Reading current store state (no writes)
    Load,
    /// Full replace: delete every item and document
    Purge,
    Documents,
    Items,
    /// Bulk save of operator edits
    Edits,
    /// Audit event for a finished operation
    Journal,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Load => "load",
            Phase::Purge => "purge",
            Phase::Documents => "documents",
            Phase::Items => "items",
            Phase::Edits => "edits",
            Phase::Journal => "journal",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// ROW REFERENCE
// ============================================================================

/// Identifies the offending row in an error message.
/// `line` is the 1-based physical line in the source file, 0 for in-memory records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowRef {
    Document { line: u64, id: i64 },
    Item { line: u64, document_id: i64, ordinal: i32, product: String },
}

impl fmt::Display for RowRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowRef::Document { line, id } if *line > 0 => {
                write!(f, "document {} (line {})", id, line)
            }
            RowRef::Document { id, .. } => write!(f, "document {}", id),
            RowRef::Item { line, document_id, ordinal, product } if *line > 0 => write!(
                f,
                "item {}/{} '{}' (line {})",
                document_id, ordinal, product, line
            ),
            RowRef::Item { document_id, ordinal, product, .. } => {
                write!(f, "item {}/{} '{}'", document_id, ordinal, product)
            }
        }
    }
}

// ============================================================================
// STORE ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("item {document_id}/{ordinal} references missing document {document_id}")]
    ForeignKey { document_id: i64, ordinal: i32 },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("item {document_id}/{ordinal} already exists")]
    Duplicate { document_id: i64, ordinal: i32 },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store lock poisoned by a panicked writer")]
    LockPoisoned,
}

// ============================================================================
// IMPORT ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("invalid path '{}': {message}", path.display())]
    Path { path: PathBuf, message: String },

    #[error("{}: line {line}: {message}", file.display())]
    Parse {
        file: PathBuf,
        line: u64,
        field: Option<String>,
        message: String,
    },

    #[error("{}: file contains no data rows", file.display())]
    EmptyInput { file: PathBuf },

    #[error("{row}: invalid {field}: {message}")]
    Validation {
        row: RowRef,
        field: &'static str,
        message: String,
    },

    #[error("item {document_id}/{ordinal} references document {document_id}, which is not in the batch (committed: {})", phase_list(committed))]
    MissingHeaderReference {
        document_id: i64,
        ordinal: i32,
        committed: Vec<Phase>,
    },

    #[error("store failure during {phase} phase (committed: {}): {source}", phase_list(committed))]
    Persistence {
        phase: Phase,
        committed: Vec<Phase>,
        #[source]
        source: GatewayError,
    },

    #[error("import cancelled (committed: {})", phase_list(committed))]
    Cancelled { committed: Vec<Phase> },

    #[error("i/o error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("background task failed: {0}")]
    Task(String),
}

impl ImportError {
    /// Store failure while reading, before anything was written
    pub fn load(source: GatewayError) -> Self {
        ImportError::Persistence {
            phase: Phase::Load,
            committed: Vec::new(),
            source,
        }
    }

    /// Phases whose commit already succeeded when the error was raised
    pub fn committed_phases(&self) -> &[Phase] {
        match self {
            ImportError::MissingHeaderReference { committed, .. }
            | ImportError::Persistence { committed, .. }
            | ImportError::Cancelled { committed } => committed,
            _ => &[],
        }
    }

    /// True when the store holds the effects of some but not all phases.
    /// Callers must not blindly retry a full-replace import in this state.
    pub fn is_partially_applied(&self) -> bool {
        !self.committed_phases().is_empty()
    }

    /// What the operator can safely do next
    pub fn recovery_hint(&self) -> &'static str {
        let committed = self.committed_phases();
        if committed.contains(&Phase::Purge) {
            "The previous data was deleted. Fix the input files before importing again; \
             the store now reflects only the committed phases."
        } else if committed.is_empty() {
            "Nothing was written."
        } else {
            "The store holds a partial import; re-run the import to complete it."
        }
    }
}

fn phase_list(phases: &[Phase]) -> String {
    if phases.is_empty() {
        return "none".to_string();
    }
    phases.iter().map(|p| p.name()).collect::<Vec<_>>().join(", ")
}
