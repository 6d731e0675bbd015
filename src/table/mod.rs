//! Table Module
//!
//! The uniform table contract and its in-process implementations.
//!
//! ## Responsibilities
//! - `Table`: the row-storage contract every engine and wrapper implements
//! - `MemoryTable`: synchronized in-memory row store
//! - `ReadCachedTable`: read snapshot over a slower backing table
//! - `BackgroundWriterTable`: memory-first table with deferred durability
//!
//! ## Composition
//! ```text
//!   ReadCachedTable ──reads──▶ MemoryTable (snapshot)
//!         │ writes
//!         ▼
//!   any Table ◀──commit── TableWriter ◀──drain── TransactionLog
//!                                                   ▲
//!   BackgroundWriterTable ──▶ MemoryTable ──logs────┘
//! ```

mod background;
mod index;
mod lock;
mod memory;
mod read_cached;

use std::sync::Arc;

use crate::error::{Result, TableError};
use crate::row::{Row, RowLayout};
use crate::search::{ResultOption, Search};
use crate::transaction::{Transaction, TransactionFlags, TransactionLog};

pub use background::BackgroundWriterTable;
pub use lock::{ReadGuard, TableLock, WriteGuard};
pub use memory::MemoryTable;
pub use read_cached::ReadCachedTable;

/// Row storage contract shared by every table implementation.
///
/// Identifiers `<= 0` passed to `insert` ask the table to assign one.
pub trait Table: Send + Sync {
    /// Layout every row of this table is validated against
    fn layout(&self) -> Arc<RowLayout>;

    /// Table name (from the layout)
    fn name(&self) -> String {
        self.layout().name().to_string()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    fn count(&self) -> Result<usize>;

    fn count_where(&self, search: &Search) -> Result<usize>;

    fn exist(&self, id: i64) -> Result<bool>;

    fn exist_where(&self, search: &Search) -> Result<bool> {
        Ok(self.count_where(search)? > 0)
    }

    /// Row with the given identifier; `NotFound` if absent
    fn get_row(&self, id: i64) -> Result<Row>;

    fn try_get_row(&self, id: i64) -> Result<Option<Row>> {
        if self.exist(id)? {
            self.get_row(id).map(Some)
        } else {
            Ok(None)
        }
    }

    fn get_rows(&self, ids: &[i64]) -> Result<Vec<Row>> {
        ids.iter().map(|id| self.get_row(*id)).collect()
    }

    fn get_rows_where(&self, search: &Search, option: &ResultOption) -> Result<Vec<Row>>;

    /// Identifiers of matching rows, in result order
    fn find_rows(&self, search: &Search, option: &ResultOption) -> Result<Vec<i64>> {
        let layout = self.layout();
        self.get_rows_where(search, option)?
            .iter()
            .map(|row| layout.row_id(row))
            .collect()
    }

    /// Row at a storage position. Positions shift as rows are added and removed.
    fn get_row_at(&self, _index: usize) -> Result<Row> {
        Err(TableError::Unsupported(format!(
            "{} does not support positional access",
            self.name()
        )))
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert a row, returning it with its (possibly assigned) identifier
    fn insert(&self, row: Row) -> Result<Row>;

    fn update(&self, row: Row) -> Result<()>;

    /// Insert or update, depending on whether the identifier exists
    fn replace(&self, row: Row) -> Result<()>;

    fn delete(&self, id: i64) -> Result<()>;

    /// Delete every matching row, returning how many were removed
    fn try_delete(&self, search: &Search) -> Result<usize>;

    /// Insert unless the identifier is already taken (`Ok(None)` then)
    fn try_insert(&self, row: Row) -> Result<Option<Row>> {
        let id = self.layout().row_id(&row)?;
        if id > 0 && self.exist(id)? {
            return Ok(None);
        }
        self.insert(row).map(Some)
    }

    /// Update if the identifier exists (`Ok(false)` otherwise)
    fn try_update(&self, row: Row) -> Result<bool> {
        let id = self.layout().row_id(&row)?;
        if id <= 0 {
            return Err(TableError::InvalidId(id));
        }
        if !self.exist(id)? {
            return Ok(false);
        }
        self.update(row)?;
        Ok(true)
    }

    /// Remove all rows; `reset_ids` restarts identifier assignment at 1
    fn clear(&self, reset_ids: bool) -> Result<()>;

    /// Apply a batch of transactions, returning how many were applied
    fn commit(&self, transactions: &[Transaction], flags: TransactionFlags) -> Result<usize>;

    // =========================================================================
    // Transaction Log Wiring
    // =========================================================================

    /// Log receiving a transaction for every applied mutation, if any
    fn transaction_log(&self) -> Option<Arc<TransactionLog>> {
        None
    }

    fn set_transaction_log(&self, _log: Option<Arc<TransactionLog>>) -> Result<()> {
        Err(TableError::Unsupported(format!(
            "{} does not record transactions",
            self.name()
        )))
    }
}

/// Run `apply` over a batch, honouring `TransactionFlags::THROW_ERRORS`
pub(crate) fn commit_each<F>(
    table: &str,
    transactions: &[Transaction],
    flags: TransactionFlags,
    mut apply: F,
) -> Result<usize>
where
    F: FnMut(&Transaction) -> Result<()>,
{
    let mut applied = 0;
    for transaction in transactions {
        match apply(transaction) {
            Ok(()) => applied += 1,
            Err(e) if flags.contains(TransactionFlags::THROW_ERRORS) => {
                return Err(TableError::Commit {
                    applied,
                    source: Box::new(e),
                });
            }
            Err(e) => {
                tracing::warn!(
                    "Skipping {:?} of row {} in {}: {}",
                    transaction.kind(),
                    transaction.id(),
                    table,
                    e
                );
            }
        }
    }
    Ok(applied)
}
