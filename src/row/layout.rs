//! Row layouts
//!
//! Read-only schema descriptors shared by every table operating on a row type.

use std::collections::HashMap;

use crate::error::{Result, TableError};

use super::{DataType, Row, Value};

bitflags::bitflags! {
    /// Per-field flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FieldFlags: u8 {
        const NONE = 0;
        /// Primary identifier field
        const ID = 1;
        /// Maintain a secondary index for lookups
        const INDEX = 1 << 1;
        /// Indexed, and no two rows may share a value
        const UNIQUE = 1 << 2;
        /// Field accepts Null
        const NULLABLE = 1 << 3;
    }
}

impl Default for FieldFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Metadata of a single field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldProperties {
    pub name: String,
    pub data_type: DataType,
    pub flags: FieldFlags,
}

impl FieldProperties {
    pub fn is_nullable(&self) -> bool {
        self.flags.contains(FieldFlags::NULLABLE)
    }

    pub fn is_indexed(&self) -> bool {
        self.flags.contains(FieldFlags::INDEX) || self.flags.contains(FieldFlags::UNIQUE)
    }

    pub fn is_unique(&self) -> bool {
        self.flags.contains(FieldFlags::UNIQUE)
    }
}

/// Schema of a table: field order, types, flags and the identifier field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowLayout {
    name: String,
    fields: Vec<FieldProperties>,
    by_name: HashMap<String, usize>,
    id_index: usize,
}

impl RowLayout {
    /// Start building a layout for the named table
    pub fn builder(name: impl Into<String>) -> RowLayoutBuilder {
        RowLayoutBuilder {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Table name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn fields(&self) -> &[FieldProperties] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> Option<&FieldProperties> {
        self.fields.get(index)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Like `field_index`, but an unknown name is an error
    pub fn require_field(&self, name: &str) -> Result<usize> {
        self.field_index(name).ok_or_else(|| TableError::UnknownField {
            table: self.name.clone(),
            field: name.to_string(),
        })
    }

    /// Position of the identifier field
    pub fn id_index(&self) -> usize {
        self.id_index
    }

    pub fn id_field(&self) -> &FieldProperties {
        &self.fields[self.id_index]
    }

    /// Positions of fields that carry a secondary index
    pub fn indexed_fields(&self) -> impl Iterator<Item = (usize, &FieldProperties)> {
        self.fields
            .iter()
            .enumerate()
            .filter(|(index, field)| *index != self.id_index && field.is_indexed())
    }

    /// Check arity, types and nullability of a row
    pub fn validate(&self, row: &Row) -> Result<()> {
        if row.len() != self.fields.len() {
            return Err(TableError::InvalidRow(format!(
                "{} expects {} fields, got {}",
                self.name,
                self.fields.len(),
                row.len()
            )));
        }

        for (field, value) in self.fields.iter().zip(row.values()) {
            match value.data_type() {
                None if field.is_nullable() => {}
                None => {
                    return Err(TableError::InvalidRow(format!(
                        "{}.{} may not be null",
                        self.name, field.name
                    )));
                }
                Some(data_type) if data_type != field.data_type => {
                    return Err(TableError::InvalidRow(format!(
                        "{}.{} expects {:?}, got {:?}",
                        self.name, field.name, field.data_type, data_type
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Identifier of a row (values <= 0 mean "unassigned")
    pub fn row_id(&self, row: &Row) -> Result<i64> {
        match row.value(self.id_index) {
            Some(Value::Int(id)) => Ok(*id),
            other => Err(TableError::InvalidRow(format!(
                "{} identifier field holds {:?}",
                self.name, other
            ))),
        }
    }

    /// A copy of `row` carrying the given identifier
    pub fn with_id(&self, row: &Row, id: i64) -> Row {
        row.with_value(self.id_index, Value::Int(id))
    }
}

/// Builder for RowLayout
pub struct RowLayoutBuilder {
    name: String,
    fields: Vec<FieldProperties>,
}

impl RowLayoutBuilder {
    /// Add the integer identifier field
    pub fn id(self, name: impl Into<String>) -> Self {
        self.field_with(name, DataType::Int, FieldFlags::ID)
    }

    /// Add a plain non-nullable field
    pub fn field(self, name: impl Into<String>, data_type: DataType) -> Self {
        self.field_with(name, data_type, FieldFlags::NONE)
    }

    /// Add a field with explicit flags
    pub fn field_with(
        mut self,
        name: impl Into<String>,
        data_type: DataType,
        flags: FieldFlags,
    ) -> Self {
        self.fields.push(FieldProperties {
            name: name.into(),
            data_type,
            flags,
        });
        self
    }

    /// Finish the layout
    ///
    /// Fails unless field names are unique and exactly one non-nullable
    /// `Int` field is flagged `ID`.
    pub fn build(self) -> Result<RowLayout> {
        let mut by_name = HashMap::with_capacity(self.fields.len());
        for (index, field) in self.fields.iter().enumerate() {
            if by_name.insert(field.name.clone(), index).is_some() {
                return Err(TableError::Config(format!(
                    "{}: duplicate field name {}",
                    self.name, field.name
                )));
            }
        }

        let ids: Vec<usize> = self
            .fields
            .iter()
            .enumerate()
            .filter(|(_, field)| field.flags.contains(FieldFlags::ID))
            .map(|(index, _)| index)
            .collect();

        let id_index = match ids.as_slice() {
            [index] => *index,
            [] => {
                return Err(TableError::Config(format!(
                    "{}: layout has no identifier field",
                    self.name
                )))
            }
            _ => {
                return Err(TableError::Config(format!(
                    "{}: layout has {} identifier fields",
                    self.name,
                    ids.len()
                )))
            }
        };

        let id_field = &self.fields[id_index];
        if id_field.data_type != DataType::Int || id_field.is_nullable() {
            return Err(TableError::Config(format!(
                "{}: identifier field {} must be a non-nullable Int",
                self.name, id_field.name
            )));
        }

        Ok(RowLayout {
            name: self.name,
            fields: self.fields,
            by_name,
            id_index,
        })
    }
}
