//! MemoryTable Tests
//!
//! Tests verify:
//! - Identifier assignment, reuse rules and clearing
//! - CRUD error cases (duplicate, not found, invalid id)
//! - Unique and indexed fields
//! - Searches, paging and positional access
//! - Batch commit flags
//! - Transaction log wiring
//! - Concurrent readers against a writer

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tabula::{
    DataType, FieldFlags, MemoryTable, ResultOption, Row, RowLayout, Search, Table, TableError,
    Transaction, TransactionFlags, TransactionLog, TransactionType, Value, WriteWaitPolicy,
};

// =============================================================================
// Helper Functions
// =============================================================================

fn people_layout() -> Arc<RowLayout> {
    Arc::new(
        RowLayout::builder("people")
            .id("id")
            .field_with("email", DataType::Text, FieldFlags::UNIQUE | FieldFlags::NULLABLE)
            .field_with("age", DataType::Int, FieldFlags::INDEX)
            .field("name", DataType::Text)
            .build()
            .unwrap(),
    )
}

fn person(id: i64, name: &str, age: i64) -> Row {
    Row::new(vec![
        Value::Int(id),
        Value::Null,
        Value::Int(age),
        Value::from(name),
    ])
}

fn person_with_email(id: i64, name: &str, email: &str) -> Row {
    Row::new(vec![
        Value::Int(id),
        Value::from(email),
        Value::Int(30),
        Value::from(name),
    ])
}

fn id_of(row: &Row) -> i64 {
    row.value(0).and_then(Value::as_int).unwrap()
}

fn new_table() -> MemoryTable {
    MemoryTable::new(people_layout())
}

// =============================================================================
// Identifier Assignment Tests
// =============================================================================

#[test]
fn test_insert_assigns_sequential_ids() {
    let table = new_table();

    let first = table.insert(person(0, "ada", 36)).unwrap();
    let second = table.insert(person(0, "bob", 41)).unwrap();

    assert_eq!(id_of(&first), 1);
    assert_eq!(id_of(&second), 2);
    assert_eq!(table.count().unwrap(), 2);
}

#[test]
fn test_negative_id_is_assigned_too() {
    let table = new_table();
    let row = table.insert(person(-1, "ada", 36)).unwrap();
    assert_eq!(id_of(&row), 1);
}

#[test]
fn test_explicit_id_moves_assignment_forward() {
    let table = new_table();
    table.insert(person(10, "ada", 36)).unwrap();

    let row = table.insert(person(0, "bob", 41)).unwrap();
    assert_eq!(id_of(&row), 11);
    assert_eq!(table.next_free_id().unwrap(), 12);
}

#[test]
fn test_assignment_after_max_id_reports_exhaustion() {
    let table = new_table();
    table.insert(person(i64::MAX, "ada", 36)).unwrap();

    let result = table.insert(person(0, "bob", 41));

    assert!(matches!(result, Err(TableError::IdExhausted { .. })));
    assert!(matches!(table.next_free_id(), Err(TableError::IdExhausted { .. })));
    assert_eq!(table.count().unwrap(), 1);
    assert_eq!(table.sequence_number(), 1);

    table.insert(person(7, "bob", 41)).unwrap();
    assert_eq!(table.count().unwrap(), 2);
}

#[test]
fn test_clear_keeps_high_water_mark() {
    let table = new_table();
    table.insert(person(5, "ada", 36)).unwrap();

    table.clear(false).unwrap();
    let row = table.insert(person(0, "bob", 41)).unwrap();

    assert_eq!(id_of(&row), 6);
}

#[test]
fn test_clear_with_reset_restarts_at_one() {
    let table = new_table();
    table.insert(person(5, "ada", 36)).unwrap();

    table.clear(true).unwrap();
    let row = table.insert(person(0, "bob", 41)).unwrap();

    assert_eq!(id_of(&row), 1);
}

#[test]
fn test_assigned_ids_never_repeat() {
    let table = new_table();
    table.clear(true).unwrap();

    let mut assigned = Vec::new();
    for n in 0..50 {
        let row = table.insert(person(0, "p", n)).unwrap();
        let id = id_of(&row);
        assigned.push(id);

        if n % 3 == 0 {
            table.delete(id).unwrap();
        } else if n % 3 == 1 {
            table.update(row.with_value(2, Value::Int(n + 100))).unwrap();
        }
    }

    assert!(assigned.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn test_deleting_highest_row_does_not_reuse_id() {
    let table = new_table();
    table.insert(person(0, "ada", 36)).unwrap();
    let second = table.insert(person(0, "bob", 41)).unwrap();
    table.delete(id_of(&second)).unwrap();

    let third = table.insert(person(0, "cy", 22)).unwrap();
    assert_eq!(id_of(&third), 3);
    assert_eq!(table.highest_id(), Some(3));
}

// =============================================================================
// CRUD Error Tests
// =============================================================================

#[test]
fn test_insert_duplicate_id_fails() {
    let table = new_table();
    table.insert(person(3, "ada", 36)).unwrap();

    let result = table.insert(person(3, "bob", 41));
    assert!(matches!(result, Err(TableError::Duplicate { id: 3, .. })));
    assert_eq!(table.get_row(3).unwrap(), person(3, "ada", 36));
}

#[test]
fn test_update_missing_row_leaves_table_unchanged() {
    let table = new_table();
    let before = table.sequence_number();

    let result = table.update(person(99, "ghost", 1));

    assert!(matches!(result, Err(TableError::NotFound { id: 99, .. })));
    assert_eq!(table.count().unwrap(), 0);
    assert_eq!(table.sequence_number(), before);
}

#[test]
fn test_update_with_unassigned_id_is_invalid() {
    let table = new_table();
    let result = table.update(person(0, "ada", 36));
    assert!(matches!(result, Err(TableError::InvalidId(0))));
}

#[test]
fn test_replace_inserts_then_updates() {
    let table = new_table();

    table.replace(person(7, "ada", 36)).unwrap();
    assert_eq!(table.count().unwrap(), 1);

    table.replace(person(7, "ada", 37)).unwrap();
    assert_eq!(table.count().unwrap(), 1);
    assert_eq!(table.get_row(7).unwrap().value(2), Some(&Value::Int(37)));
}

#[test]
fn test_replace_requires_positive_id() {
    let table = new_table();
    assert!(matches!(
        table.replace(person(0, "ada", 36)),
        Err(TableError::InvalidId(0))
    ));
}

#[test]
fn test_delete_missing_row_fails() {
    let table = new_table();
    assert!(matches!(
        table.delete(4),
        Err(TableError::NotFound { id: 4, .. })
    ));
}

#[test]
fn test_invalid_row_is_rejected() {
    let table = new_table();
    let wrong_type = Row::new(vec![
        Value::Int(0),
        Value::Null,
        Value::from("old"),
        Value::from("ada"),
    ]);
    assert!(matches!(table.insert(wrong_type), Err(TableError::InvalidRow(_))));

    let missing_field = Row::new(vec![Value::Int(0), Value::Null]);
    assert!(matches!(table.insert(missing_field), Err(TableError::InvalidRow(_))));
}

#[test]
fn test_try_insert_and_try_update_report_outcome() {
    let table = new_table();

    let inserted = table.try_insert(person(1, "ada", 36)).unwrap();
    assert!(inserted.is_some());
    assert!(table.try_insert(person(1, "bob", 41)).unwrap().is_none());

    assert!(table.try_update(person(1, "ada", 37)).unwrap());
    assert!(!table.try_update(person(2, "bob", 41)).unwrap());
    assert_eq!(table.count().unwrap(), 1);
}

// =============================================================================
// Unique / Index Tests
// =============================================================================

#[test]
fn test_unique_field_rejects_second_value() {
    let table = new_table();
    table.insert(person_with_email(0, "ada", "ada@example.com")).unwrap();

    let result = table.insert(person_with_email(0, "imposter", "ada@example.com"));
    assert!(matches!(result, Err(TableError::UniqueViolation { .. })));
    assert_eq!(table.count().unwrap(), 1);
}

#[test]
fn test_unique_field_allows_many_nulls() {
    let table = new_table();
    table.insert(person(0, "ada", 36)).unwrap();
    table.insert(person(0, "bob", 41)).unwrap();
    assert_eq!(table.count().unwrap(), 2);
}

#[test]
fn test_unique_value_can_move_after_update() {
    let table = new_table();
    let ada = table.insert(person_with_email(0, "ada", "a@example.com")).unwrap();
    table.update(ada.with_value(1, Value::from("new@example.com"))).unwrap();

    table.insert(person_with_email(0, "bob", "a@example.com")).unwrap();
    assert_eq!(table.count().unwrap(), 2);
}

#[test]
fn test_indexed_search_follows_updates() {
    let table = new_table();
    let ada = table.insert(person(0, "ada", 36)).unwrap();
    table.insert(person(0, "bob", 36)).unwrap();

    assert_eq!(table.count_where(&Search::equals("age", 36i64)).unwrap(), 2);

    table.update(ada.with_value(2, Value::Int(37))).unwrap();
    assert_eq!(table.count_where(&Search::equals("age", 36i64)).unwrap(), 1);
    assert_eq!(
        table.find_rows(&Search::equals("age", 37i64), &ResultOption::none()).unwrap(),
        vec![1]
    );
}

// =============================================================================
// Query Tests
// =============================================================================

#[test]
fn test_get_rows_where_sorts_and_pages() {
    let table = new_table();
    for (name, age) in [("ada", 36), ("bob", 41), ("cy", 22), ("dee", 58)] {
        table.insert(person(0, name, age)).unwrap();
    }

    let option = ResultOption::none().sort_descending("age").offset(1).limit(2);
    let rows = table.get_rows_where(&Search::All, &option).unwrap();
    let ages: Vec<_> = rows.iter().map(|row| row.value(2).cloned().unwrap()).collect();

    assert_eq!(ages, vec![Value::Int(41), Value::Int(36)]);
}

#[test]
fn test_search_combinators() {
    let table = new_table();
    for (name, age) in [("ada", 36), ("bob", 41), ("cy", 22)] {
        table.insert(person(0, name, age)).unwrap();
    }

    let search = Search::greater("age", 30i64).and(Search::not_equals("name", "bob"));
    assert_eq!(table.find_rows(&search, &ResultOption::none()).unwrap(), vec![1]);
    assert!(table.exist_where(&Search::less("age", 25i64)).unwrap());
    assert!(!table.exist_where(&Search::equals("name", "zed")).unwrap());
}

#[test]
fn test_unknown_field_in_search_fails() {
    let table = new_table();
    table.insert(person(0, "ada", 36)).unwrap();
    let result = table.count_where(&Search::equals("height", 1i64));
    assert!(matches!(result, Err(TableError::UnknownField { .. })));
}

#[test]
fn test_get_rows_fails_on_missing_id() {
    let table = new_table();
    table.insert(person(0, "ada", 36)).unwrap();

    assert_eq!(table.get_rows(&[1]).unwrap().len(), 1);
    assert!(matches!(
        table.get_rows(&[1, 2]),
        Err(TableError::NotFound { id: 2, .. })
    ));
    assert!(table.try_get_row(2).unwrap().is_none());
}

#[test]
fn test_get_row_at_follows_storage_order() {
    let table = new_table();
    for name in ["ada", "bob", "cy"] {
        table.insert(person(0, name, 30)).unwrap();
    }

    assert_eq!(id_of(&table.get_row_at(0).unwrap()), 1);
    assert_eq!(id_of(&table.get_row_at(2).unwrap()), 3);
    assert!(matches!(
        table.get_row_at(3),
        Err(TableError::IndexOutOfRange { index: 3, count: 3 })
    ));

    table.delete(1).unwrap();
    assert_eq!(table.ids().len(), 2);
    assert!(table.get_row_at(2).is_err());
}

#[test]
fn test_try_delete_removes_matches() {
    let table = new_table();
    for (name, age) in [("ada", 36), ("bob", 41), ("cy", 22)] {
        table.insert(person(0, name, age)).unwrap();
    }

    let removed = table.try_delete(&Search::greater("age", 30i64)).unwrap();
    assert_eq!(removed, 2);
    assert_eq!(table.ids(), vec![3]);
    assert_eq!(table.try_delete(&Search::greater("age", 30i64)).unwrap(), 0);
}

#[test]
fn test_sequence_number_tracks_mutations() {
    let table = new_table();
    let start = table.sequence_number();

    table.insert(person(0, "ada", 36)).unwrap();
    table.update(person(1, "ada", 37)).unwrap();
    let _ = table.get_row(1).unwrap();

    assert_eq!(table.sequence_number(), start + 2);
}

#[test]
fn test_set_rows_replaces_content_and_keeps_high_water() {
    let table = new_table();
    table.insert(person(9, "ada", 36)).unwrap();

    table
        .set_rows(vec![person(2, "bob", 41), person(3, "cy", 22)])
        .unwrap();

    assert_eq!(table.count().unwrap(), 2);
    assert!(!table.exist(9).unwrap());
    assert_eq!(id_of(&table.insert(person(0, "dee", 58)).unwrap()), 10);
}

#[test]
fn test_load_table_copies_matching_rows() {
    let source = new_table();
    for (name, age) in [("ada", 36), ("bob", 41), ("cy", 22)] {
        source.insert(person(0, name, age)).unwrap();
    }

    let copy = new_table();
    copy.load_table(&source, &Search::greater("age", 30i64), &ResultOption::none())
        .unwrap();

    assert_eq!(copy.ids(), vec![1, 2]);
}

// =============================================================================
// Commit Tests
// =============================================================================

#[test]
fn test_commit_applies_batch() {
    let table = new_table();
    let batch = vec![
        Transaction::inserted(0, person(0, "ada", 36)),
        Transaction::inserted(5, person(5, "bob", 41)),
        Transaction::updated(5, person(5, "bob", 42)).unwrap(),
        Transaction::deleted(1).unwrap(),
    ];

    let applied = table.commit(&batch, TransactionFlags::NONE).unwrap();

    assert_eq!(applied, 4);
    assert_eq!(table.ids(), vec![5]);
    assert_eq!(table.get_row(5).unwrap().value(2), Some(&Value::Int(42)));
}

#[test]
fn test_commit_skips_failures_without_throw_flag() {
    let table = new_table();
    let batch = vec![
        Transaction::updated(8, person(8, "ghost", 1)).unwrap(),
        Transaction::inserted(0, person(0, "ada", 36)),
    ];

    let applied = table.commit(&batch, TransactionFlags::NONE).unwrap();

    assert_eq!(applied, 1);
    assert_eq!(table.count().unwrap(), 1);
}

#[test]
fn test_commit_stops_at_first_failure_with_throw_flag() {
    let table = new_table();
    let batch = vec![
        Transaction::inserted(0, person(0, "ada", 36)),
        Transaction::deleted(8).unwrap(),
        Transaction::inserted(0, person(0, "bob", 41)),
    ];

    let result = table.commit(&batch, TransactionFlags::THROW_ERRORS);

    match result {
        Err(TableError::Commit { applied, source }) => {
            assert_eq!(applied, 1);
            assert!(matches!(*source, TableError::NotFound { id: 8, .. }));
        }
        other => panic!("expected commit error, got {:?}", other),
    }
    assert_eq!(table.count().unwrap(), 1);
}

// =============================================================================
// Transaction Log Wiring Tests
// =============================================================================

#[test]
fn test_mutations_are_logged_with_assigned_ids() {
    let table = new_table();
    let log = Arc::new(TransactionLog::new(table.layout()));
    table.set_transaction_log(Some(Arc::clone(&log))).unwrap();

    table.insert(person(0, "ada", 36)).unwrap();
    table.insert(person(0, "bob", 41)).unwrap();
    table.delete(2).unwrap();

    let logged = log.dequeue_many(0);
    let summary: Vec<_> = logged.iter().map(|t| (t.kind(), t.id())).collect();
    assert_eq!(
        summary,
        vec![
            (TransactionType::Inserted, 1),
            (TransactionType::Inserted, 2),
            (TransactionType::Deleted, 2),
        ]
    );
}

#[test]
fn test_failed_mutation_is_not_logged() {
    let table = new_table();
    let log = Arc::new(TransactionLog::new(table.layout()));
    table.set_transaction_log(Some(Arc::clone(&log))).unwrap();

    assert!(table.update(person(3, "ghost", 1)).is_err());
    assert!(log.is_empty());
}

#[test]
fn test_bulk_load_and_clear_are_not_logged() {
    let table = new_table();
    let log = Arc::new(TransactionLog::new(table.layout()));
    table.set_transaction_log(Some(Arc::clone(&log))).unwrap();

    table.set_rows(vec![person(1, "ada", 36)]).unwrap();
    table.clear(false).unwrap();

    assert!(log.is_empty());
}

#[test]
fn test_detaching_log_stops_recording() {
    let table = new_table();
    let log = Arc::new(TransactionLog::new(table.layout()));
    table.set_transaction_log(Some(Arc::clone(&log))).unwrap();
    table.insert(person(0, "ada", 36)).unwrap();

    table.set_transaction_log(None).unwrap();
    table.insert(person(0, "bob", 41)).unwrap();

    assert_eq!(log.count(), 1);
    assert!(table.transaction_log().is_none());
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_readers_never_see_half_applied_rows() {
    let table = Arc::new(MemoryTable::with_policy(
        people_layout(),
        WriteWaitPolicy::spin(Duration::from_millis(5)),
    ));

    let mut readers = Vec::new();
    for _ in 0..4 {
        let table = Arc::clone(&table);
        readers.push(thread::spawn(move || {
            let mut seen = 0;
            while seen < 1000 {
                let count = table.count().unwrap();
                for index in 0..count {
                    if let Ok(row) = table.get_row_at(index) {
                        let id = id_of(&row);
                        // writer rows repeat their id in age and name
                        assert_eq!(row.value(2), Some(&Value::Int(id)));
                        assert_eq!(row.value(3), Some(&Value::from(format!("p{}", id))));
                    }
                }
                seen = count;
            }
        }));
    }

    for id in 1..=1000i64 {
        table
            .insert(Row::new(vec![
                Value::Int(id),
                Value::Null,
                Value::Int(id),
                Value::from(format!("p{}", id)),
            ]))
            .unwrap();
    }

    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(table.count().unwrap(), 1000);
}

#[test]
fn test_concurrent_inserts_get_distinct_ids() {
    let table = MemoryTable::with_policy(people_layout(), WriteWaitPolicy::blocking());

    let ids: Vec<i64> = crossbeam::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = &table;
                scope.spawn(move |_| {
                    (0..100)
                        .map(|_| id_of(&table.insert(person(0, "p", 1)).unwrap()))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect()
    })
    .unwrap();

    let mut sorted = ids.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), 800);
    assert_eq!(sorted.first(), Some(&1));
    assert_eq!(sorted.last(), Some(&800));
}
