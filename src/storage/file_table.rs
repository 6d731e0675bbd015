//! File table
//!
//! Durable `Table` made of an in-memory mirror and a journal file.
//!
//! ## Write Path
//! 1. Take the journal lock (serializes all mutations)
//! 2. Apply the change to the mirror
//! 3. Append the applied transaction to the journal
//! 4. If the append fails, undo step 2 and return the I/O error
//!
//! `clear` is journaled first instead, since clearing the mirror cannot fail.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{Result, TableError};
use crate::row::{Row, RowLayout};
use crate::search::{ResultOption, Search};
use crate::table::{commit_each, MemoryTable, Table};
use crate::transaction::{Transaction, TransactionFlags, TransactionType};

use super::journal::{Journal, JournalRecord, RecoveryReport};

/// Journal-backed table, usable as the backing store of the cached tables
pub struct FileTable {
    mirror: MemoryTable,
    journal: Mutex<Journal>,
    recovery: RecoveryReport,
}

impl FileTable {
    /// Open or create the table stored at `path`, replaying its journal
    pub fn open(path: impl AsRef<Path>, layout: Arc<RowLayout>, config: &Config) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref();
        let (journal, records, recovery) = Journal::open(path, config.journal_sync)?;

        let mirror = MemoryTable::with_config(layout, config);
        for (position, record) in records.into_iter().enumerate() {
            Self::replay(&mirror, record).map_err(|e| {
                TableError::JournalCorruption(format!(
                    "record {} of {} cannot be replayed: {}",
                    position + 1,
                    path.display(),
                    e
                ))
            })?;
        }

        tracing::info!(
            "Opened file table {} at {} ({} rows, {} records replayed)",
            mirror.name(),
            path.display(),
            mirror.count()?,
            recovery.records_recovered
        );

        Ok(Self {
            mirror,
            journal: Mutex::new(journal),
            recovery,
        })
    }

    fn replay(mirror: &MemoryTable, record: JournalRecord) -> Result<()> {
        match record {
            JournalRecord::Apply(transaction) => {
                mirror.commit(std::slice::from_ref(&transaction), TransactionFlags::THROW_ERRORS)?;
            }
            JournalRecord::Clear { reset_ids } => mirror.clear(reset_ids)?,
            JournalRecord::Reserve { high_water } => mirror.reserve_ids(high_water),
        }
        Ok(())
    }

    /// What was found when the journal was opened
    pub fn recovery(&self) -> &RecoveryReport {
        &self.recovery
    }

    pub fn path(&self) -> PathBuf {
        self.journal.lock().path().to_path_buf()
    }

    /// Force journaled records to disk
    pub fn sync(&self) -> Result<()> {
        self.journal.lock().sync()
    }

    /// Rewrite the journal as one replace per live row
    pub fn compact(&self) -> Result<()> {
        let mut journal = self.journal.lock();
        let rows = self.mirror.get_rows_where(&Search::All, &ResultOption::none())?;

        let mut records = Vec::with_capacity(rows.len() + 1);
        records.push(JournalRecord::Reserve {
            high_water: self.mirror.high_water(),
        });
        for row in rows {
            let id = self.mirror.layout().row_id(&row)?;
            records.push(JournalRecord::Apply(Transaction::replaced(id, row)?));
        }

        journal.rewrite(&records)?;
        tracing::info!(
            "Compacted journal of {} to {} records",
            self.mirror.name(),
            records.len()
        );
        Ok(())
    }

    // =========================================================================
    // Mirror + Journal
    // =========================================================================

    /// Apply `change` to the mirror and journal the transaction it returns
    fn write<F>(&self, journal: &mut Journal, id: i64, change: F) -> Result<Transaction>
    where
        F: FnOnce(&MemoryTable) -> Result<Transaction>,
    {
        let before = if id > 0 { self.mirror.try_get_row(id)? } else { None };
        let transaction = change(&self.mirror)?;

        if let Err(e) = journal.append(&JournalRecord::Apply(transaction.clone())) {
            self.undo(transaction.id(), before);
            return Err(e);
        }
        Ok(transaction)
    }

    fn undo(&self, id: i64, before: Option<Row>) {
        let restored = match before {
            Some(row) => self.mirror.replace(row),
            None => self.mirror.delete(id),
        };
        if let Err(e) = restored {
            tracing::error!("Failed to roll back row {} of {}: {}", id, self.mirror.name(), e);
        }
    }

    fn apply(&self, journal: &mut Journal, transaction: &Transaction) -> Result<()> {
        let layout = self.mirror.layout();
        let row = || {
            transaction.row().map(|row| layout.with_id(row, transaction.id().max(0))).ok_or_else(|| {
                TableError::InvalidRow(format!(
                    "{:?} transaction for {} carries no row",
                    transaction.kind(),
                    transaction.id()
                ))
            })
        };

        match transaction.kind() {
            TransactionType::Inserted => {
                let row = row()?;
                self.write(journal, 0, |mirror| {
                    let row = mirror.insert(row)?;
                    Ok(Transaction::inserted(layout.row_id(&row)?, row))
                })?;
            }
            TransactionType::Updated => {
                let row = row()?;
                self.write(journal, transaction.id(), |mirror| {
                    mirror.update(row.clone())?;
                    Transaction::updated(transaction.id(), row)
                })?;
            }
            TransactionType::Replaced => {
                let row = row()?;
                self.write(journal, transaction.id(), |mirror| {
                    mirror.replace(row.clone())?;
                    Transaction::replaced(transaction.id(), row)
                })?;
            }
            TransactionType::Deleted => {
                self.write(journal, transaction.id(), |mirror| {
                    mirror.delete(transaction.id())?;
                    Transaction::deleted(transaction.id())
                })?;
            }
        }
        Ok(())
    }
}

impl Table for FileTable {
    fn layout(&self) -> Arc<RowLayout> {
        self.mirror.layout()
    }

    fn count(&self) -> Result<usize> {
        self.mirror.count()
    }

    fn count_where(&self, search: &Search) -> Result<usize> {
        self.mirror.count_where(search)
    }

    fn exist(&self, id: i64) -> Result<bool> {
        self.mirror.exist(id)
    }

    fn get_row(&self, id: i64) -> Result<Row> {
        self.mirror.get_row(id)
    }

    fn try_get_row(&self, id: i64) -> Result<Option<Row>> {
        self.mirror.try_get_row(id)
    }

    fn get_rows(&self, ids: &[i64]) -> Result<Vec<Row>> {
        self.mirror.get_rows(ids)
    }

    fn get_rows_where(&self, search: &Search, option: &ResultOption) -> Result<Vec<Row>> {
        self.mirror.get_rows_where(search, option)
    }

    fn find_rows(&self, search: &Search, option: &ResultOption) -> Result<Vec<i64>> {
        self.mirror.find_rows(search, option)
    }

    fn get_row_at(&self, index: usize) -> Result<Row> {
        self.mirror.get_row_at(index)
    }

    fn insert(&self, row: Row) -> Result<Row> {
        let mut journal = self.journal.lock();
        let id = self.mirror.layout().row_id(&row)?;
        let transaction = self.write(&mut journal, id, |mirror| {
            let row = mirror.insert(row)?;
            Ok(Transaction::inserted(mirror.layout().row_id(&row)?, row))
        })?;
        transaction
            .row()
            .cloned()
            .ok_or_else(|| TableError::InvalidRow("insert produced no row".to_string()))
    }

    fn update(&self, row: Row) -> Result<()> {
        let mut journal = self.journal.lock();
        let id = self.mirror.layout().row_id(&row)?;
        self.write(&mut journal, id, |mirror| {
            mirror.update(row.clone())?;
            Transaction::updated(id, row)
        })?;
        Ok(())
    }

    fn replace(&self, row: Row) -> Result<()> {
        let mut journal = self.journal.lock();
        let id = self.mirror.layout().row_id(&row)?;
        self.write(&mut journal, id, |mirror| {
            mirror.replace(row.clone())?;
            Transaction::replaced(id, row)
        })?;
        Ok(())
    }

    fn delete(&self, id: i64) -> Result<()> {
        let mut journal = self.journal.lock();
        self.write(&mut journal, id, |mirror| {
            mirror.delete(id)?;
            Transaction::deleted(id)
        })?;
        Ok(())
    }

    fn try_delete(&self, search: &Search) -> Result<usize> {
        let mut journal = self.journal.lock();
        let ids = self.mirror.find_rows(search, &ResultOption::none())?;
        for id in &ids {
            self.write(&mut journal, *id, |mirror| {
                mirror.delete(*id)?;
                Transaction::deleted(*id)
            })?;
        }
        Ok(ids.len())
    }

    fn clear(&self, reset_ids: bool) -> Result<()> {
        let mut journal = self.journal.lock();
        journal.append(&JournalRecord::Clear { reset_ids })?;
        self.mirror.clear(reset_ids)
    }

    fn commit(&self, transactions: &[Transaction], flags: TransactionFlags) -> Result<usize> {
        let mut journal = self.journal.lock();
        commit_each(self.mirror.layout().name(), transactions, flags, |transaction| {
            self.apply(&mut journal, transaction)
        })
    }
}
