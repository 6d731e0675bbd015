//! Read-cached table
//!
//! Serves reads from an in-memory snapshot of a slower backing table.
//!
//! ## Consistency
//! - Writes go to the backing table first; only after it succeeds is the same
//!   change applied to the snapshot, all under one mutex. A failed backing
//!   write leaves the snapshot untouched.
//! - `generation` starts at 1 and grows on every rebuild or snapshot change.
//! - `commit` forwards the batch and then always rebuilds the snapshot, since
//!   the affected rows are not tracked individually.
//! - With a paged option (offset or limit) a single-row change can move rows
//!   across the page boundary, so every write rebuilds the snapshot instead
//!   of patching it.

use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;

use crate::error::Result;
use crate::row::{Row, RowLayout};
use crate::search::{ResultOption, Search};
use crate::transaction::{Transaction, TransactionFlags};

use super::memory::MemoryTable;
use super::Table;

/// Read snapshot over a backing table
pub struct ReadCachedTable {
    backing: Arc<dyn Table>,
    search: Search,
    option: ResultOption,
    inner: Mutex<CacheState>,
}

struct CacheState {
    cache: MemoryTable,
    generation: u64,
    last_update: SystemTime,
}

impl ReadCachedTable {
    /// Snapshot every row of `backing`
    pub fn new(backing: Arc<dyn Table>) -> Result<Self> {
        Self::with_filter(backing, Search::All, ResultOption::none())
    }

    /// Snapshot the rows of `backing` selected by a fixed search and option
    pub fn with_filter(backing: Arc<dyn Table>, search: Search, option: ResultOption) -> Result<Self> {
        let cache = Self::snapshot(backing.as_ref(), &search, &option)?;
        Ok(Self {
            backing,
            search,
            option,
            inner: Mutex::new(CacheState {
                cache,
                generation: 1,
                last_update: SystemTime::now(),
            }),
        })
    }

    fn snapshot(backing: &dyn Table, search: &Search, option: &ResultOption) -> Result<MemoryTable> {
        let cache = MemoryTable::new(backing.layout());
        cache.load_table(backing, search, option)?;
        Ok(cache)
    }

    /// Rebuild the snapshot from one read of the backing table
    pub fn update_cache(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.rebuild(&mut inner)
    }

    fn rebuild(&self, inner: &mut CacheState) -> Result<()> {
        inner.cache = Self::snapshot(self.backing.as_ref(), &self.search, &self.option)?;
        inner.generation += 1;
        inner.last_update = SystemTime::now();
        tracing::debug!(
            "Rebuilt cache of {} (generation {}, {} rows)",
            self.backing.name(),
            inner.generation,
            inner.cache.count()?
        );
        Ok(())
    }

    /// Increases whenever the snapshot changes
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Completion time of the last full rebuild
    pub fn last_update(&self) -> SystemTime {
        self.inner.lock().last_update
    }

    pub fn backing(&self) -> Arc<dyn Table> {
        Arc::clone(&self.backing)
    }

    /// Mirror a row the backing table now holds into the snapshot
    fn mirror(&self, inner: &mut CacheState, row: Row) -> Result<()> {
        if self.option.is_paged() {
            return self.rebuild(inner);
        }
        let layout = self.backing.layout();
        if self.search.matches(&layout, &row)? {
            inner.cache.replace(row)?;
        } else {
            let id = layout.row_id(&row)?;
            if inner.cache.exist(id)? {
                inner.cache.delete(id)?;
            }
        }
        inner.generation += 1;
        Ok(())
    }
}

impl Table for ReadCachedTable {
    fn layout(&self) -> Arc<RowLayout> {
        self.backing.layout()
    }

    fn count(&self) -> Result<usize> {
        self.inner.lock().cache.count()
    }

    fn count_where(&self, search: &Search) -> Result<usize> {
        self.inner.lock().cache.count_where(search)
    }

    fn exist(&self, id: i64) -> Result<bool> {
        self.inner.lock().cache.exist(id)
    }

    fn exist_where(&self, search: &Search) -> Result<bool> {
        self.inner.lock().cache.exist_where(search)
    }

    fn get_row(&self, id: i64) -> Result<Row> {
        self.inner.lock().cache.get_row(id)
    }

    fn try_get_row(&self, id: i64) -> Result<Option<Row>> {
        self.inner.lock().cache.try_get_row(id)
    }

    fn get_rows(&self, ids: &[i64]) -> Result<Vec<Row>> {
        self.inner.lock().cache.get_rows(ids)
    }

    fn get_rows_where(&self, search: &Search, option: &ResultOption) -> Result<Vec<Row>> {
        self.inner.lock().cache.get_rows_where(search, option)
    }

    fn find_rows(&self, search: &Search, option: &ResultOption) -> Result<Vec<i64>> {
        self.inner.lock().cache.find_rows(search, option)
    }

    fn get_row_at(&self, index: usize) -> Result<Row> {
        self.inner.lock().cache.get_row_at(index)
    }

    fn insert(&self, row: Row) -> Result<Row> {
        let mut inner = self.inner.lock();
        let row = self.backing.insert(row)?;
        self.mirror(&mut inner, row.clone())?;
        Ok(row)
    }

    fn update(&self, row: Row) -> Result<()> {
        let mut inner = self.inner.lock();
        self.backing.update(row.clone())?;
        self.mirror(&mut inner, row)
    }

    fn replace(&self, row: Row) -> Result<()> {
        let mut inner = self.inner.lock();
        self.backing.replace(row.clone())?;
        self.mirror(&mut inner, row)
    }

    fn delete(&self, id: i64) -> Result<()> {
        let mut inner = self.inner.lock();
        self.backing.delete(id)?;
        if self.option.is_paged() {
            return self.rebuild(&mut inner);
        }
        if inner.cache.exist(id)? {
            inner.cache.delete(id)?;
        }
        inner.generation += 1;
        Ok(())
    }

    fn try_delete(&self, search: &Search) -> Result<usize> {
        let mut inner = self.inner.lock();
        let removed = self.backing.try_delete(search)?;
        if removed > 0 && self.option.is_paged() {
            self.rebuild(&mut inner)?;
        } else if removed > 0 {
            inner.cache.try_delete(search)?;
            inner.generation += 1;
        }
        Ok(removed)
    }

    fn clear(&self, reset_ids: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        self.backing.clear(reset_ids)?;
        inner.cache.clear(reset_ids)?;
        inner.generation += 1;
        Ok(())
    }

    fn commit(&self, transactions: &[Transaction], flags: TransactionFlags) -> Result<usize> {
        let mut inner = self.inner.lock();
        let committed = self.backing.commit(transactions, flags);
        self.rebuild(&mut inner)?;
        committed
    }
}
