//! Memory table
//!
//! Synchronized in-memory row store.
//!
//! ## Concurrency
//! - All row state lives behind one `TableLock` (many readers, one writer)
//! - `sequence`: bumped after every successful mutation (lock-free reads)
//! - `log`: optional transaction log fed while the write gate is held, so log
//!   order equals application order
//!
//! Each call takes the lock on its own. A caller making several calls may see
//! different states between them.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::{Config, WriteWaitPolicy};
use crate::error::{Result, TableError};
use crate::row::{Row, RowLayout};
use crate::search::{ResultOption, Search};
use crate::transaction::{Transaction, TransactionFlags, TransactionLog, TransactionType};

use super::index::FieldIndex;
use super::lock::TableLock;
use super::{commit_each, Table};

/// In-memory table keyed by identifier
pub struct MemoryTable {
    layout: Arc<RowLayout>,
    state: TableLock<TableState>,
    sequence: AtomicU64,
    log: RwLock<Option<Arc<TransactionLog>>>,
}

/// Row storage guarded by the table lock
struct TableState {
    rows: HashMap<i64, Row>,
    /// Storage order; deletes swap the last row into the freed slot
    order: Vec<i64>,
    positions: HashMap<i64, usize>,
    /// Highest identifier ever stored since the last id reset
    high_water: i64,
    indices: Vec<FieldIndex>,
}

impl TableState {
    fn new(layout: &RowLayout) -> Self {
        Self {
            rows: HashMap::new(),
            order: Vec::new(),
            positions: HashMap::new(),
            high_water: 0,
            indices: layout
                .indexed_fields()
                .map(|(index, field)| FieldIndex::new(index, field.is_unique()))
                .collect(),
        }
    }

    fn not_found(layout: &RowLayout, id: i64) -> TableError {
        TableError::NotFound {
            table: layout.name().to_string(),
            id,
        }
    }

    fn check_unique(&self, layout: &RowLayout, row: &Row, id: i64) -> Result<()> {
        for index in &self.indices {
            if index.conflicts(row, id) {
                let field = layout.field(index.field()).map(|f| f.name.clone());
                let value = row.value(index.field()).map(|v| v.to_string());
                return Err(TableError::UniqueViolation {
                    table: layout.name().to_string(),
                    field: field.unwrap_or_default(),
                    value: value.unwrap_or_default(),
                });
            }
        }
        Ok(())
    }

    fn store(&mut self, id: i64, row: Row) {
        for index in &mut self.indices {
            index.insert(&row, id);
        }
        self.positions.insert(id, self.order.len());
        self.order.push(id);
        self.rows.insert(id, row);
        self.high_water = self.high_water.max(id);
    }

    fn overwrite(&mut self, id: i64, row: Row) {
        if let Some(old) = self.rows.insert(id, row) {
            for index in &mut self.indices {
                index.remove(&old, id);
            }
        }
        if let Some(row) = self.rows.get(&id) {
            for index in &mut self.indices {
                index.insert(row, id);
            }
        }
    }

    fn remove(&mut self, id: i64) -> Option<Row> {
        let row = self.rows.remove(&id)?;
        for index in &mut self.indices {
            index.remove(&row, id);
        }
        if let Some(position) = self.positions.remove(&id) {
            self.order.swap_remove(position);
            if let Some(moved) = self.order.get(position) {
                self.positions.insert(*moved, position);
            }
        }
        Some(row)
    }

    fn next_id(&self, layout: &RowLayout) -> Result<i64> {
        self.high_water
            .checked_add(1)
            .map(|id| id.max(1))
            .ok_or_else(|| TableError::IdExhausted {
                table: layout.name().to_string(),
            })
    }

    fn insert(&mut self, layout: &RowLayout, row: Row) -> Result<Row> {
        layout.validate(&row)?;
        let mut id = layout.row_id(&row)?;
        let row = if id <= 0 {
            id = self.next_id(layout)?;
            layout.with_id(&row, id)
        } else if self.rows.contains_key(&id) {
            return Err(TableError::Duplicate {
                table: layout.name().to_string(),
                id,
            });
        } else {
            row
        };

        self.check_unique(layout, &row, id)?;
        self.store(id, row.clone());
        Ok(row)
    }

    fn update(&mut self, layout: &RowLayout, row: Row) -> Result<i64> {
        layout.validate(&row)?;
        let id = layout.row_id(&row)?;
        if id <= 0 {
            return Err(TableError::InvalidId(id));
        }
        if !self.rows.contains_key(&id) {
            return Err(Self::not_found(layout, id));
        }
        self.check_unique(layout, &row, id)?;
        self.overwrite(id, row);
        Ok(id)
    }

    fn replace(&mut self, layout: &RowLayout, row: Row) -> Result<i64> {
        layout.validate(&row)?;
        let id = layout.row_id(&row)?;
        if id <= 0 {
            return Err(TableError::InvalidId(id));
        }
        self.check_unique(layout, &row, id)?;
        if self.rows.contains_key(&id) {
            self.overwrite(id, row);
        } else {
            self.store(id, row);
        }
        Ok(id)
    }

    fn delete(&mut self, layout: &RowLayout, id: i64) -> Result<Row> {
        if id <= 0 {
            return Err(TableError::InvalidId(id));
        }
        self.remove(id).ok_or_else(|| Self::not_found(layout, id))
    }

    fn clear(&mut self, reset_ids: bool) {
        self.rows.clear();
        self.order.clear();
        self.positions.clear();
        for index in &mut self.indices {
            index.clear();
        }
        if reset_ids {
            self.high_water = 0;
        }
    }

    /// Identifiers matching `search`, in storage order
    fn select(&self, layout: &RowLayout, search: &Search) -> Result<Vec<i64>> {
        match search {
            Search::All => return Ok(self.order.clone()),
            Search::Id(id) => {
                return Ok(self.rows.contains_key(id).then_some(*id).into_iter().collect());
            }
            Search::Ids(ids) => {
                let wanted: HashSet<i64> = ids.iter().copied().collect();
                return Ok(self.in_storage_order(wanted.into_iter()));
            }
            Search::Equals { field, value } => {
                let field = layout.require_field(field)?;
                if let Some(index) = self.indices.iter().find(|i| i.field() == field) {
                    return Ok(self.in_storage_order(index.lookup(value).into_iter()));
                }
            }
            _ => {}
        }

        let mut ids = Vec::new();
        for id in &self.order {
            if let Some(row) = self.rows.get(id) {
                if search.matches(layout, row)? {
                    ids.push(*id);
                }
            }
        }
        Ok(ids)
    }

    fn in_storage_order(&self, ids: impl Iterator<Item = i64>) -> Vec<i64> {
        let mut present: Vec<(usize, i64)> = ids
            .filter_map(|id| self.positions.get(&id).map(|position| (*position, id)))
            .collect();
        present.sort_unstable();
        present.into_iter().map(|(_, id)| id).collect()
    }

    fn rows_for(&self, ids: &[i64]) -> Vec<Row> {
        ids.iter().filter_map(|id| self.rows.get(id).cloned()).collect()
    }
}

impl MemoryTable {
    /// Create an empty table with the default writer wait policy
    pub fn new(layout: Arc<RowLayout>) -> Self {
        Self::with_policy(layout, WriteWaitPolicy::default())
    }

    pub fn with_config(layout: Arc<RowLayout>, config: &Config) -> Self {
        Self::with_policy(layout, config.write_wait)
    }

    pub fn with_policy(layout: Arc<RowLayout>, policy: WriteWaitPolicy) -> Self {
        let state = TableState::new(&layout);
        Self {
            layout,
            state: TableLock::new(state, policy),
            sequence: AtomicU64::new(0),
            log: RwLock::new(None),
        }
    }

    /// Bumped on every successful mutation; equal values mean "no changes"
    pub fn sequence_number(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.sequence.fetch_add(1, Ordering::SeqCst);
    }

    /// Forward a transaction to the attached log (called with the write gate held)
    fn record(&self, transaction: Transaction) {
        if let Some(log) = self.log.read().as_ref() {
            log.add(transaction);
        }
    }

    /// Highest identifier currently stored
    pub fn highest_id(&self) -> Option<i64> {
        self.state.read().rows.keys().max().copied()
    }

    /// Identifier the next auto-assigned insert will receive
    pub fn next_free_id(&self) -> Result<i64> {
        self.state.read().next_id(&self.layout)
    }

    /// Highest identifier ever stored or reserved (0 when none)
    pub fn high_water(&self) -> i64 {
        self.state.read().high_water
    }

    /// All identifiers in storage order
    pub fn ids(&self) -> Vec<i64> {
        self.state.read().order.clone()
    }

    /// Never assign identifiers up to `high_water` again
    pub fn reserve_ids(&self, high_water: i64) {
        let mut state = self.state.write();
        state.high_water = state.high_water.max(high_water);
    }

    // =========================================================================
    // Bulk Loading
    // =========================================================================

    /// Replace the whole content with `rows` (not recorded in the log).
    ///
    /// The identifier high-water mark never moves backwards.
    pub fn set_rows(&self, rows: Vec<Row>) -> Result<()> {
        let mut fresh = TableState::new(&self.layout);
        for row in rows {
            self.layout.validate(&row)?;
            let id = self.layout.row_id(&row)?;
            if id <= 0 {
                return Err(TableError::InvalidId(id));
            }
            if fresh.rows.contains_key(&id) {
                return Err(TableError::Duplicate {
                    table: self.layout.name().to_string(),
                    id,
                });
            }
            fresh.check_unique(&self.layout, &row, id)?;
            fresh.store(id, row);
        }

        let mut state = self.state.write();
        fresh.high_water = fresh.high_water.max(state.high_water);
        *state = fresh;
        self.bump();
        Ok(())
    }

    /// Load matching rows of another table
    pub fn load_table(&self, source: &dyn Table, search: &Search, option: &ResultOption) -> Result<()> {
        let rows = source.get_rows_where(search, option)?;
        tracing::debug!("Loading {} rows from {} into memory", rows.len(), source.name());
        self.set_rows(rows)
    }

    // =========================================================================
    // Transaction Replay
    // =========================================================================

    fn apply(&self, state: &mut TableState, transaction: &Transaction) -> Result<()> {
        let layout = &self.layout;
        let row = || {
            transaction.row().cloned().ok_or_else(|| {
                TableError::InvalidRow(format!(
                    "{:?} transaction for {} carries no row",
                    transaction.kind(),
                    transaction.id()
                ))
            })
        };

        match transaction.kind() {
            TransactionType::Inserted => {
                let id = transaction.id().max(0);
                let inserted = state.insert(layout, layout.with_id(&row()?, id))?;
                let id = layout.row_id(&inserted)?;
                self.record(Transaction::inserted(id, inserted));
            }
            TransactionType::Updated => {
                let updated = layout.with_id(&row()?, transaction.id());
                state.update(layout, updated.clone())?;
                self.record(Transaction::updated(transaction.id(), updated)?);
            }
            TransactionType::Replaced => {
                let replaced = layout.with_id(&row()?, transaction.id());
                state.replace(layout, replaced.clone())?;
                self.record(Transaction::replaced(transaction.id(), replaced)?);
            }
            TransactionType::Deleted => {
                state.delete(layout, transaction.id())?;
                self.record(Transaction::deleted(transaction.id())?);
            }
        }
        self.bump();
        Ok(())
    }
}

impl Table for MemoryTable {
    fn layout(&self) -> Arc<RowLayout> {
        Arc::clone(&self.layout)
    }

    fn count(&self) -> Result<usize> {
        Ok(self.state.read().rows.len())
    }

    fn count_where(&self, search: &Search) -> Result<usize> {
        Ok(self.state.read().select(&self.layout, search)?.len())
    }

    fn exist(&self, id: i64) -> Result<bool> {
        Ok(self.state.read().rows.contains_key(&id))
    }

    fn get_row(&self, id: i64) -> Result<Row> {
        self.state
            .read()
            .rows
            .get(&id)
            .cloned()
            .ok_or_else(|| TableState::not_found(&self.layout, id))
    }

    fn try_get_row(&self, id: i64) -> Result<Option<Row>> {
        Ok(self.state.read().rows.get(&id).cloned())
    }

    fn get_rows(&self, ids: &[i64]) -> Result<Vec<Row>> {
        let state = self.state.read();
        ids.iter()
            .map(|id| {
                state
                    .rows
                    .get(id)
                    .cloned()
                    .ok_or_else(|| TableState::not_found(&self.layout, *id))
            })
            .collect()
    }

    fn get_rows_where(&self, search: &Search, option: &ResultOption) -> Result<Vec<Row>> {
        let rows = {
            let state = self.state.read();
            let ids = state.select(&self.layout, search)?;
            state.rows_for(&ids)
        };
        option.apply(&self.layout, rows)
    }

    fn find_rows(&self, search: &Search, option: &ResultOption) -> Result<Vec<i64>> {
        if option.is_none() {
            return self.state.read().select(&self.layout, search);
        }
        self.get_rows_where(search, option)?
            .iter()
            .map(|row| self.layout.row_id(row))
            .collect()
    }

    fn get_row_at(&self, index: usize) -> Result<Row> {
        let state = self.state.read();
        state
            .order
            .get(index)
            .and_then(|id| state.rows.get(id))
            .cloned()
            .ok_or(TableError::IndexOutOfRange {
                index,
                count: state.order.len(),
            })
    }

    fn insert(&self, row: Row) -> Result<Row> {
        let mut state = self.state.write();
        let row = state.insert(&self.layout, row)?;
        let id = self.layout.row_id(&row)?;
        self.bump();
        self.record(Transaction::inserted(id, row.clone()));
        Ok(row)
    }

    fn update(&self, row: Row) -> Result<()> {
        let mut state = self.state.write();
        let id = state.update(&self.layout, row.clone())?;
        self.bump();
        self.record(Transaction::updated(id, row)?);
        Ok(())
    }

    fn replace(&self, row: Row) -> Result<()> {
        let mut state = self.state.write();
        let id = state.replace(&self.layout, row.clone())?;
        self.bump();
        self.record(Transaction::replaced(id, row)?);
        Ok(())
    }

    fn delete(&self, id: i64) -> Result<()> {
        let mut state = self.state.write();
        state.delete(&self.layout, id)?;
        self.bump();
        self.record(Transaction::deleted(id)?);
        Ok(())
    }

    fn try_delete(&self, search: &Search) -> Result<usize> {
        let mut state = self.state.write();
        let ids = state.select(&self.layout, search)?;
        for id in &ids {
            state.remove(*id);
            self.record(Transaction::deleted(*id)?);
        }
        if !ids.is_empty() {
            self.bump();
        }
        Ok(ids.len())
    }

    fn try_insert(&self, row: Row) -> Result<Option<Row>> {
        let mut state = self.state.write();
        let id = self.layout.row_id(&row)?;
        if id > 0 && state.rows.contains_key(&id) {
            return Ok(None);
        }
        let row = state.insert(&self.layout, row)?;
        let id = self.layout.row_id(&row)?;
        self.bump();
        self.record(Transaction::inserted(id, row.clone()));
        Ok(Some(row))
    }

    fn try_update(&self, row: Row) -> Result<bool> {
        let mut state = self.state.write();
        let id = self.layout.row_id(&row)?;
        if id <= 0 {
            return Err(TableError::InvalidId(id));
        }
        if !state.rows.contains_key(&id) {
            return Ok(false);
        }
        state.update(&self.layout, row.clone())?;
        self.bump();
        self.record(Transaction::updated(id, row)?);
        Ok(true)
    }

    fn clear(&self, reset_ids: bool) -> Result<()> {
        self.state.write().clear(reset_ids);
        self.bump();
        Ok(())
    }

    fn commit(&self, transactions: &[Transaction], flags: TransactionFlags) -> Result<usize> {
        let mut state = self.state.write();
        commit_each(self.layout.name(), transactions, flags, |transaction| {
            self.apply(&mut state, transaction)
        })
    }

    fn transaction_log(&self) -> Option<Arc<TransactionLog>> {
        self.log.read().clone()
    }

    fn set_transaction_log(&self, log: Option<Arc<TransactionLog>>) -> Result<()> {
        *self.log.write() = log;
        Ok(())
    }
}
