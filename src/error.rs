//! Error types for Tabula
//!
//! Provides a unified error type for all table operations.

use thiserror::Error;

/// Result type alias using TableError
pub type Result<T> = std::result::Result<T, TableError>;

/// Unified error type for Tabula operations
#[derive(Debug, Error)]
pub enum TableError {
    // -------------------------------------------------------------------------
    // Data Integrity Errors
    // -------------------------------------------------------------------------
    #[error("Row {id} not found in table {table}")]
    NotFound { table: String, id: i64 },

    #[error("Duplicate identifier {id} in table {table}")]
    Duplicate { table: String, id: i64 },

    #[error("No identifiers left to assign in table {table}")]
    IdExhausted { table: String },

    #[error("Invalid identifier: {0}")]
    InvalidId(i64),

    #[error("Unique constraint violated on {table}.{field}: {value}")]
    UniqueViolation {
        table: String,
        field: String,
        value: String,
    },

    #[error("Invalid row: {0}")]
    InvalidRow(String),

    #[error("Unknown field {field} in table {table}")]
    UnknownField { table: String, field: String },

    #[error("Row index {index} out of range (count {count})")]
    IndexOutOfRange { index: usize, count: usize },

    // -------------------------------------------------------------------------
    // Concurrency Errors
    // -------------------------------------------------------------------------
    #[error("Table lock fault: {0}")]
    LockFault(String),

    // -------------------------------------------------------------------------
    // Operation Errors
    // -------------------------------------------------------------------------
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Transaction log is empty")]
    EmptyLog,

    #[error("Commit stopped after {applied} transactions: {source}")]
    Commit {
        applied: usize,
        #[source]
        source: Box<TableError>,
    },

    #[error("Table writer stopped")]
    WriterStopped,

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Journal corruption detected: {0}")]
    JournalCorruption(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for TableError {
    fn from(err: bincode::Error) -> Self {
        TableError::Serialization(err.to_string())
    }
}

impl TableError {
    /// Whether retrying the same operation later may succeed.
    ///
    /// Only storage failures qualify; integrity errors fail the same way every time.
    pub fn is_transient(&self) -> bool {
        match self {
            TableError::Io(_) => true,
            TableError::Commit { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}
