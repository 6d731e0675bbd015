//! Integration tests for Tabula
//!
//! Tests verify:
//! - Layouts from the registry are shared between tables
//! - A recorded transaction log reproduces a table elsewhere
//! - Difference logs synchronize two tables
//! - Cache over write-behind over journal keeps every layer consistent

mod common;

use std::sync::Arc;

use common::{all_rows, id_of, item, items_layout, qty_of};
use tabula::{
    BackgroundWriterTable, Config, DataType, FieldFlags, FileTable, JournalSyncStrategy,
    LayoutRegistry, MemoryTable, ReadCachedTable, RowLayout, Search, Table, TransactionFlags,
    TransactionLog,
};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

struct Item;

fn config() -> Config {
    Config::builder()
        .journal_sync(JournalSyncStrategy::EveryWrite)
        .writer_batch_size(16)
        .writer_idle_wait_ms(5)
        .writer_retry_delay_ms(10)
        .build()
}

// =============================================================================
// Layout Registry
// =============================================================================

#[test]
fn test_registry_layout_shared_by_tables() {
    let registry = LayoutRegistry::new();
    let build = || {
        RowLayout::builder("items")
            .id("id")
            .field_with("name", DataType::Text, FieldFlags::UNIQUE)
            .field_with("qty", DataType::Int, FieldFlags::INDEX)
            .build()
    };

    let first = registry.get_or_register::<Item, _>("items", build).unwrap();
    let second = registry.get_or_register::<Item, _>("items", build).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(registry.len(), 1);

    let left = MemoryTable::new(Arc::clone(&first));
    let right = MemoryTable::new(second);
    left.insert(item(0, "apple", 5)).unwrap();
    right.insert(item(0, "apple", 5)).unwrap();
    assert_eq!(all_rows(&left), all_rows(&right));

    registry.clear();
    assert!(registry.get::<Item>("items").is_none());
}

// =============================================================================
// Log Replay
// =============================================================================

#[test]
fn test_recorded_log_reproduces_table() {
    let source = MemoryTable::new(items_layout());
    let log = Arc::new(TransactionLog::new(items_layout()));
    source.set_transaction_log(Some(Arc::clone(&log))).unwrap();

    let apple = source.insert(item(0, "apple", 5)).unwrap();
    let pear = source.insert(item(0, "pear", 12)).unwrap();
    source.insert(item(0, "plum", 30)).unwrap();
    source.update(item(id_of(&apple), "apple", 6)).unwrap();
    source.update(item(id_of(&apple), "apple", 7)).unwrap();
    source.delete(id_of(&pear)).unwrap();
    source.replace(item(20, "fig", 1)).unwrap();
    source.try_delete(&Search::equals("name", "plum")).unwrap();

    let replica = MemoryTable::new(items_layout());
    let batch = log.dequeue_many(0);
    replica.commit(&batch, TransactionFlags::THROW_ERRORS).unwrap();

    assert!(log.is_empty());
    assert_eq!(all_rows(&replica), all_rows(&source));
    assert_eq!(qty_of(&replica.get_row(id_of(&apple)).unwrap()), 7);
}

#[test]
fn test_difference_log_synchronizes_tables() {
    let source = MemoryTable::new(items_layout());
    let target = MemoryTable::new(items_layout());
    for (name, qty) in [("apple", 5), ("pear", 12), ("plum", 30)] {
        source.insert(item(0, name, qty)).unwrap();
        target.insert(item(0, name, qty)).unwrap();
    }
    source.update(item(1, "apple", 50)).unwrap();
    source.delete(2).unwrap();
    source.insert(item(0, "fig", 2)).unwrap();
    target.replace(item(9, "stale", 0)).unwrap();

    let log = TransactionLog::from_tables(&source, &target).unwrap();
    target
        .commit(&log.dequeue_many(0), TransactionFlags::THROW_ERRORS)
        .unwrap();

    assert_eq!(all_rows(&target), all_rows(&source));
}

// =============================================================================
// Layered Tables
// =============================================================================

#[test]
fn test_cache_over_writer_over_journal() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("items.journal");

    let expected = {
        let file = Arc::new(FileTable::open(&path, items_layout(), &config()).unwrap());
        let writer = Arc::new(
            BackgroundWriterTable::with_config(Arc::clone(&file) as Arc<dyn Table>, &config())
                .unwrap(),
        );
        let cache = ReadCachedTable::new(Arc::clone(&writer) as Arc<dyn Table>).unwrap();

        for n in 0..30 {
            cache.insert(item(0, &format!("item-{}", n), n)).unwrap();
        }
        cache.update(item(5, "item-4", 400)).unwrap();
        cache.try_delete(&Search::less("qty", 3i64)).unwrap();

        assert_eq!(all_rows(&cache), all_rows(writer.as_ref()));
        writer.flush().unwrap();
        assert_eq!(all_rows(writer.as_ref()), all_rows(file.as_ref()));

        writer.close().unwrap();
        all_rows(&cache)
    };

    let reopened = FileTable::open(&path, items_layout(), &config()).unwrap();
    assert_eq!(all_rows(&reopened), expected);
    assert_eq!(reopened.count().unwrap(), 27);
    assert_eq!(qty_of(&reopened.get_row(5).unwrap()), 400);
}

#[test]
fn test_readers_and_writers_over_write_behind() {
    let backing = Arc::new(MemoryTable::new(items_layout()));
    let table = BackgroundWriterTable::with_config(
        Arc::clone(&backing) as Arc<dyn Table>,
        &config(),
    )
    .unwrap();

    crossbeam::thread::scope(|scope| {
        for worker in 0..3i64 {
            let table = &table;
            scope.spawn(move |_| {
                for n in 0..40 {
                    table
                        .insert(item(0, &format!("w{}-{}", worker, n), worker))
                        .unwrap();
                }
            });
        }
        for _ in 0..2 {
            let table = &table;
            scope.spawn(move |_| {
                let mut last = 0;
                for _ in 0..200 {
                    let seen = table.count_where(&Search::equals("qty", 0i64)).unwrap();
                    assert!(seen >= last && seen <= 40);
                    last = seen;
                }
            });
        }
    })
    .unwrap();

    table.flush().unwrap();
    assert_eq!(backing.count().unwrap(), 120);
    assert_eq!(backing.count_where(&Search::equals("qty", 2i64)).unwrap(), 40);
    assert_eq!(all_rows(&table), all_rows(backing.as_ref()));
    table.close().unwrap();
}
