//! Search and result options
//!
//! Predicates and ordering/paging descriptors passed through table
//! operations. Only `MemoryTable` evaluates them; wrappers forward them
//! untouched.

use std::cmp::Ordering;

use crate::error::Result;
use crate::row::{Row, RowLayout, Value};

/// Row predicate
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Search {
    /// Matches every row
    #[default]
    All,
    /// Identifier equals
    Id(i64),
    /// Identifier is one of
    Ids(Vec<i64>),
    Equals { field: String, value: Value },
    NotEquals { field: String, value: Value },
    Greater { field: String, value: Value },
    Less { field: String, value: Value },
    In { field: String, values: Vec<Value> },
    And(Box<Search>, Box<Search>),
    Or(Box<Search>, Box<Search>),
    Not(Box<Search>),
}

impl Search {
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Search::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn not_equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Search::NotEquals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn greater(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Search::Greater {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn less(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Search::Less {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn any_of(field: impl Into<String>, values: Vec<Value>) -> Self {
        Search::In {
            field: field.into(),
            values,
        }
    }

    pub fn and(self, other: Search) -> Self {
        Search::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Search) -> Self {
        Search::Or(Box::new(self), Box::new(other))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Search::Not(Box::new(self))
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Search::All)
    }

    /// Evaluate against a row. Unknown field names are an error.
    pub fn matches(&self, layout: &RowLayout, row: &Row) -> Result<bool> {
        let field_value = |field: &str| field_value(layout, row, field);

        Ok(match self {
            Search::All => true,
            Search::Id(id) => layout.row_id(row)? == *id,
            Search::Ids(ids) => ids.contains(&layout.row_id(row)?),
            Search::Equals { field, value } => field_value(field)? == value,
            Search::NotEquals { field, value } => field_value(field)? != value,
            Search::Greater { field, value } => {
                let current = field_value(field)?;
                !current.is_null() && current > value
            }
            Search::Less { field, value } => {
                let current = field_value(field)?;
                !current.is_null() && current < value
            }
            Search::In { field, values } => values.contains(field_value(field)?),
            Search::And(left, right) => left.matches(layout, row)? && right.matches(layout, row)?,
            Search::Or(left, right) => left.matches(layout, row)? || right.matches(layout, row)?,
            Search::Not(inner) => !inner.matches(layout, row)?,
        })
    }
}

static NULL: Value = Value::Null;

fn field_value<'r>(layout: &RowLayout, row: &'r Row, field: &str) -> Result<&'r Value> {
    let index = layout.require_field(field)?;
    Ok(row.value(index).unwrap_or(&NULL))
}

/// Sort direction of one field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    pub field: String,
    pub descending: bool,
}

/// Ordering and paging applied to a result set
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResultOption {
    pub sort: Vec<SortField>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl ResultOption {
    /// No ordering, no paging
    pub fn none() -> Self {
        Self::default()
    }

    pub fn sort_ascending(mut self, field: impl Into<String>) -> Self {
        self.sort.push(SortField {
            field: field.into(),
            descending: false,
        });
        self
    }

    pub fn sort_descending(mut self, field: impl Into<String>) -> Self {
        self.sort.push(SortField {
            field: field.into(),
            descending: true,
        });
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn is_none(&self) -> bool {
        self.sort.is_empty() && self.offset == 0 && self.limit.is_none()
    }

    /// Whether the option can leave matching rows out of a result
    pub fn is_paged(&self) -> bool {
        self.offset > 0 || self.limit.is_some()
    }

    /// Sort then page a result set
    pub fn apply(&self, layout: &RowLayout, mut rows: Vec<Row>) -> Result<Vec<Row>> {
        if !self.sort.is_empty() {
            let keys = self
                .sort
                .iter()
                .map(|sort| Ok((layout.require_field(&sort.field)?, sort.descending)))
                .collect::<Result<Vec<_>>>()?;

            rows.sort_by(|a, b| {
                for (index, descending) in &keys {
                    let ordering = a.value(*index).cmp(&b.value(*index));
                    let ordering = if *descending { ordering.reverse() } else { ordering };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }

        let paged = rows
            .into_iter()
            .skip(self.offset)
            .take(self.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(paged)
    }
}
