//! Secondary field indices
//!
//! Value → identifier sets for fields flagged `INDEX` or `UNIQUE`.

use std::collections::{HashMap, HashSet};

use crate::row::{Row, Value};

/// Index over one non-identifier field
#[derive(Debug, Clone)]
pub(crate) struct FieldIndex {
    field: usize,
    unique: bool,
    entries: HashMap<Value, HashSet<i64>>,
}

impl FieldIndex {
    pub fn new(field: usize, unique: bool) -> Self {
        Self {
            field,
            unique,
            entries: HashMap::new(),
        }
    }

    pub fn field(&self) -> usize {
        self.field
    }

    fn key<'r>(&self, row: &'r Row) -> Option<&'r Value> {
        row.value(self.field)
    }

    /// True when storing `row` under `id` would break uniqueness.
    ///
    /// Nulls never conflict.
    pub fn conflicts(&self, row: &Row, id: i64) -> bool {
        if !self.unique {
            return false;
        }
        match self.key(row) {
            Some(value) if !value.is_null() => self
                .entries
                .get(value)
                .map(|ids| ids.iter().any(|other| *other != id))
                .unwrap_or(false),
            _ => false,
        }
    }

    pub fn insert(&mut self, row: &Row, id: i64) {
        if let Some(value) = self.key(row) {
            self.entries.entry(value.clone()).or_default().insert(id);
        }
    }

    pub fn remove(&mut self, row: &Row, id: i64) {
        if let Some(value) = self.key(row) {
            if let Some(ids) = self.entries.get_mut(value) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.entries.remove(value);
                }
            }
        }
    }

    /// Identifiers stored under `value`
    pub fn lookup(&self, value: &Value) -> Vec<i64> {
        self.entries
            .get(value)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
