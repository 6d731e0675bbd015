//! Background writer table
//!
//! Memory-first table whose changes reach the backing table asynchronously.
//!
//! ## Write Path
//! ```text
//!   caller ──insert/update/...──▶ MemoryTable ──logs──▶ TransactionLog
//!                                                           │ drain
//!                                    backing Table ◀──commit── TableWriter
//! ```
//!
//! A successful write means "accepted into memory". It is durable only after
//! a later `flush()`. `clear` is the one operation that touches the backing
//! table directly.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{Result, TableError};
use crate::row::{Row, RowLayout};
use crate::search::{ResultOption, Search};
use crate::transaction::{Transaction, TransactionFlags, TransactionLog};
use crate::writer::{TableWriter, WriterStats};

use super::memory::MemoryTable;
use super::Table;

/// In-memory table with deferred durability through a `TableWriter`
pub struct BackgroundWriterTable {
    memory: MemoryTable,
    log: Arc<TransactionLog>,
    writer: TableWriter,
    backing: Arc<dyn Table>,
    /// Serializes mutations with `reload` and `clear`
    lock: Mutex<()>,
}

impl BackgroundWriterTable {
    pub fn new(backing: Arc<dyn Table>) -> Result<Self> {
        Self::with_config(backing, &Config::default())
    }

    /// Load every backing row into memory and start the writer
    pub fn with_config(backing: Arc<dyn Table>, config: &Config) -> Result<Self> {
        config.validate()?;

        let layout = backing.layout();
        let memory = MemoryTable::with_config(Arc::clone(&layout), config);
        memory.load_table(backing.as_ref(), &Search::All, &ResultOption::none())?;

        let log = Arc::new(TransactionLog::new(layout));
        memory.set_transaction_log(Some(Arc::clone(&log)))?;
        let writer = TableWriter::start(Arc::clone(&log), Arc::clone(&backing), config.writer)?;

        tracing::info!(
            "Background writer table {} ready with {} rows",
            backing.name(),
            memory.count()?
        );

        Ok(Self {
            memory,
            log,
            writer,
            backing,
            lock: Mutex::new(()),
        })
    }

    // =========================================================================
    // Durability Control
    // =========================================================================

    /// Block until every accepted change reached the backing table
    pub fn flush(&self) -> Result<()> {
        self.writer.flush()
    }

    /// Flush, then replace the memory content with a fresh backing read
    pub fn reload(&self) -> Result<()> {
        let _guard = self.lock.lock();
        self.writer.flush()?;
        self.memory
            .load_table(self.backing.as_ref(), &Search::All, &ResultOption::none())
    }

    /// Flush and stop the writer. The table must not be mutated afterwards.
    pub fn close(&self) -> Result<()> {
        let _guard = self.lock.lock();
        self.writer.close()
    }

    /// Transactions not yet written to the backing table
    pub fn pending(&self) -> usize {
        self.writer.pending()
    }

    pub fn writer_stats(&self) -> WriterStats {
        self.writer.stats()
    }

    pub fn backing(&self) -> Arc<dyn Table> {
        Arc::clone(&self.backing)
    }

    pub fn sequence_number(&self) -> u64 {
        self.memory.sequence_number()
    }

    pub fn ids(&self) -> Vec<i64> {
        self.memory.ids()
    }

    pub fn highest_id(&self) -> Option<i64> {
        self.memory.highest_id()
    }

    // =========================================================================
    // Async Variants
    // =========================================================================

    /// Run `insert` on a separate thread
    pub fn insert_async(self: &Arc<Self>, row: Row) -> JoinHandle<Result<Row>> {
        let table = Arc::clone(self);
        thread::spawn(move || table.insert(row))
    }

    pub fn update_async(self: &Arc<Self>, row: Row) -> JoinHandle<Result<()>> {
        let table = Arc::clone(self);
        thread::spawn(move || table.update(row))
    }

    pub fn replace_async(self: &Arc<Self>, row: Row) -> JoinHandle<Result<()>> {
        let table = Arc::clone(self);
        thread::spawn(move || table.replace(row))
    }
}

impl Table for BackgroundWriterTable {
    fn layout(&self) -> Arc<RowLayout> {
        self.memory.layout()
    }

    fn count(&self) -> Result<usize> {
        self.memory.count()
    }

    fn count_where(&self, search: &Search) -> Result<usize> {
        self.memory.count_where(search)
    }

    fn exist(&self, id: i64) -> Result<bool> {
        self.memory.exist(id)
    }

    fn get_row(&self, id: i64) -> Result<Row> {
        self.memory.get_row(id)
    }

    fn try_get_row(&self, id: i64) -> Result<Option<Row>> {
        self.memory.try_get_row(id)
    }

    fn get_rows(&self, ids: &[i64]) -> Result<Vec<Row>> {
        self.memory.get_rows(ids)
    }

    fn get_rows_where(&self, search: &Search, option: &ResultOption) -> Result<Vec<Row>> {
        self.memory.get_rows_where(search, option)
    }

    fn find_rows(&self, search: &Search, option: &ResultOption) -> Result<Vec<i64>> {
        self.memory.find_rows(search, option)
    }

    fn get_row_at(&self, index: usize) -> Result<Row> {
        self.memory.get_row_at(index)
    }

    fn insert(&self, row: Row) -> Result<Row> {
        let _guard = self.lock.lock();
        self.memory.insert(row)
    }

    fn update(&self, row: Row) -> Result<()> {
        let _guard = self.lock.lock();
        self.memory.update(row)
    }

    fn replace(&self, row: Row) -> Result<()> {
        let _guard = self.lock.lock();
        self.memory.replace(row)
    }

    fn delete(&self, id: i64) -> Result<()> {
        let _guard = self.lock.lock();
        self.memory.delete(id)
    }

    fn try_delete(&self, search: &Search) -> Result<usize> {
        let _guard = self.lock.lock();
        self.memory.try_delete(search)
    }

    fn try_insert(&self, row: Row) -> Result<Option<Row>> {
        let _guard = self.lock.lock();
        self.memory.try_insert(row)
    }

    fn try_update(&self, row: Row) -> Result<bool> {
        let _guard = self.lock.lock();
        self.memory.try_update(row)
    }

    fn clear(&self, reset_ids: bool) -> Result<()> {
        let _guard = self.lock.lock();
        self.writer.flush()?;
        self.backing.clear(reset_ids)?;
        self.memory.clear(reset_ids)
    }

    fn commit(&self, transactions: &[Transaction], flags: TransactionFlags) -> Result<usize> {
        let _guard = self.lock.lock();
        self.memory.commit(transactions, flags)
    }

    fn transaction_log(&self) -> Option<Arc<TransactionLog>> {
        Some(Arc::clone(&self.log))
    }

    fn set_transaction_log(&self, _log: Option<Arc<TransactionLog>>) -> Result<()> {
        Err(TableError::Unsupported(format!(
            "the transaction log of background writer table {} cannot be replaced",
            self.name()
        )))
    }
}
