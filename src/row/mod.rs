//! Row Module
//!
//! The uniform row model shared by every table.
//!
//! ## Responsibilities
//! - Typed cell values (`Value`, `DataType`)
//! - Immutable fixed-arity rows
//! - Layouts describing field order, types, flags and the identifier field
//! - An explicit registry caching layouts per (type, table name)

mod layout;
mod registry;
mod value;

use serde::{Deserialize, Serialize};

pub use layout::{FieldFlags, FieldProperties, RowLayout, RowLayoutBuilder};
pub use registry::LayoutRegistry;
pub use value::{DataType, Value};

/// A single table row.
///
/// Rows never change after construction; `with_value` builds a modified copy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// A copy of this row with one field rewritten
    pub fn with_value(&self, index: usize, value: Value) -> Row {
        let mut values = self.values.clone();
        if let Some(slot) = values.get_mut(index) {
            *slot = value;
        }
        Row { values }
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Row::new(values)
    }
}
