//! Transaction Module
//!
//! Row mutations recorded for later replay against another table.
//!
//! ## Responsibilities
//! - Immutable `Transaction` records (insert/update/replace/delete)
//! - Commit flags controlling failure handling
//! - A deduplicating, blocking `TransactionLog` per table
//!
//! ## Lifecycle
//! ```text
//!  producer ──add──▶ TransactionLog ──dequeue──▶ consumer ──commit──▶ Table
//!                         ▲                          │
//!                         └──────── requeue ─────────┘ (partial failure)
//! ```

mod log;

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TableError};
use crate::row::Row;

pub use log::{RequeueReport, TransactionLog};

/// Identifier carried by inserts that have not been assigned one yet
pub const UNASSIGNED_ID: i64 = -1;

/// Kind of row mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    Inserted,
    Updated,
    Replaced,
    Deleted,
}

/// One row mutation.
///
/// Built through the factory functions, which reject identifiers that
/// cannot be valid for the kind of mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    kind: TransactionType,
    id: i64,
    row: Option<Row>,
    /// Unix millis when the transaction was created
    created: u64,
}

impl Transaction {
    /// An insert. Identifiers `<= 0` are stored as `UNASSIGNED_ID`.
    pub fn inserted(id: i64, row: Row) -> Self {
        let id = if id > 0 { id } else { UNASSIGNED_ID };
        Self::build(TransactionType::Inserted, id, Some(row))
    }

    pub fn updated(id: i64, row: Row) -> Result<Self> {
        Self::require_id(id)?;
        Ok(Self::build(TransactionType::Updated, id, Some(row)))
    }

    pub fn replaced(id: i64, row: Row) -> Result<Self> {
        Self::require_id(id)?;
        Ok(Self::build(TransactionType::Replaced, id, Some(row)))
    }

    pub fn deleted(id: i64) -> Result<Self> {
        Self::require_id(id)?;
        Ok(Self::build(TransactionType::Deleted, id, None))
    }

    fn build(kind: TransactionType, id: i64, row: Option<Row>) -> Self {
        Self {
            kind,
            id,
            row,
            created: unix_millis(),
        }
    }

    fn require_id(id: i64) -> Result<()> {
        if id <= 0 {
            return Err(TableError::InvalidId(id));
        }
        Ok(())
    }

    pub fn kind(&self) -> TransactionType {
        self.kind
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn row(&self) -> Option<&Row> {
        self.row.as_ref()
    }

    pub fn created(&self) -> u64 {
        self.created
    }

    /// False only for inserts still waiting for an identifier
    pub fn has_assigned_id(&self) -> bool {
        self.id > 0
    }

    /// Same mutation expressed as a replace, keeping the creation time
    pub(crate) fn into_replaced(self) -> Self {
        Self {
            kind: TransactionType::Replaced,
            ..self
        }
    }
}

bitflags::bitflags! {
    /// Flags controlling how `Table::commit` handles failing transactions
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TransactionFlags: u8 {
        const NONE = 0;
        /// The caller will requeue whatever the commit did not apply
        const ALLOW_REQUEUE = 1;
        /// Stop at the first failure and report it as `TableError::Commit`
        const THROW_ERRORS = 1 << 1;
    }
}

impl Default for TransactionFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Current time as unix milliseconds
pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
