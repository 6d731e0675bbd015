//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tabula::{
    DataType, FieldFlags, MemoryTable, ResultOption, Row, RowLayout, Search, Table, TableError,
    Transaction, TransactionFlags, Value,
};

// =============================================================================
// Rows
// =============================================================================

pub fn items_layout() -> Arc<RowLayout> {
    Arc::new(
        RowLayout::builder("items")
            .id("id")
            .field_with("name", DataType::Text, FieldFlags::UNIQUE)
            .field_with("qty", DataType::Int, FieldFlags::INDEX)
            .build()
            .unwrap(),
    )
}

pub fn item(id: i64, name: &str, qty: i64) -> Row {
    Row::new(vec![Value::Int(id), Value::from(name), Value::Int(qty)])
}

pub fn id_of(row: &Row) -> i64 {
    row.value(0).and_then(Value::as_int).unwrap()
}

pub fn qty_of(row: &Row) -> i64 {
    row.value(2).and_then(Value::as_int).unwrap()
}

pub fn all_rows(table: &dyn Table) -> Vec<Row> {
    let mut rows = table
        .get_rows_where(&Search::All, &ResultOption::none())
        .unwrap();
    rows.sort_by_key(id_of);
    rows
}

// =============================================================================
// Failure Injection
// =============================================================================

/// Memory-backed table whose next N writes fail with an I/O error
pub struct FlakyTable {
    inner: MemoryTable,
    failures: AtomicUsize,
    commits: AtomicUsize,
}

impl FlakyTable {
    pub fn new(layout: Arc<RowLayout>) -> Self {
        Self {
            inner: MemoryTable::new(layout),
            failures: AtomicUsize::new(0),
            commits: AtomicUsize::new(0),
        }
    }

    /// Make the next `count` write operations (or commit entries) fail
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn commit_calls(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemoryTable {
        &self.inner
    }

    fn check(&self) -> tabula::Result<()> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(TableError::Io(io::Error::new(
                io::ErrorKind::Other,
                "injected failure",
            )));
        }
        Ok(())
    }
}

impl Table for FlakyTable {
    fn layout(&self) -> Arc<RowLayout> {
        self.inner.layout()
    }

    fn count(&self) -> tabula::Result<usize> {
        self.inner.count()
    }

    fn count_where(&self, search: &Search) -> tabula::Result<usize> {
        self.inner.count_where(search)
    }

    fn exist(&self, id: i64) -> tabula::Result<bool> {
        self.inner.exist(id)
    }

    fn get_row(&self, id: i64) -> tabula::Result<Row> {
        self.inner.get_row(id)
    }

    fn get_rows_where(&self, search: &Search, option: &ResultOption) -> tabula::Result<Vec<Row>> {
        self.inner.get_rows_where(search, option)
    }

    fn insert(&self, row: Row) -> tabula::Result<Row> {
        self.check()?;
        self.inner.insert(row)
    }

    fn update(&self, row: Row) -> tabula::Result<()> {
        self.check()?;
        self.inner.update(row)
    }

    fn replace(&self, row: Row) -> tabula::Result<()> {
        self.check()?;
        self.inner.replace(row)
    }

    fn delete(&self, id: i64) -> tabula::Result<()> {
        self.check()?;
        self.inner.delete(id)
    }

    fn try_delete(&self, search: &Search) -> tabula::Result<usize> {
        self.check()?;
        self.inner.try_delete(search)
    }

    fn clear(&self, reset_ids: bool) -> tabula::Result<()> {
        self.check()?;
        self.inner.clear(reset_ids)
    }

    fn commit(&self, transactions: &[Transaction], flags: TransactionFlags) -> tabula::Result<usize> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        let mut applied = 0;
        for transaction in transactions {
            let outcome = self.check().and_then(|_| {
                self.inner
                    .commit(std::slice::from_ref(transaction), TransactionFlags::THROW_ERRORS)
                    .map(|_| ())
            });
            match outcome {
                Ok(()) => applied += 1,
                Err(e) if flags.contains(TransactionFlags::THROW_ERRORS) => {
                    let source = match e {
                        TableError::Commit { source, .. } => source,
                        other => Box::new(other),
                    };
                    return Err(TableError::Commit { applied, source });
                }
                Err(_) => {}
            }
        }
        Ok(applied)
    }
}
