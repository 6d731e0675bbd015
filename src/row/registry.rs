//! Layout registry
//!
//! Caches one shared `RowLayout` per (row type, table name) pair. The
//! registry is an ordinary value: create it at startup, pass it by
//! reference, and clear it explicitly.

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;

use super::RowLayout;

type LayoutKey = (TypeId, String);

/// Registry of row layouts keyed by (type, table name)
#[derive(Default)]
pub struct LayoutRegistry {
    layouts: RwLock<HashMap<LayoutKey, Arc<RowLayout>>>,
}

impl LayoutRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached layout, building and caching it on first use.
    ///
    /// Concurrent callers for the same key all receive the same instance.
    pub fn get_or_register<T, F>(&self, table: &str, build: F) -> Result<Arc<RowLayout>>
    where
        T: 'static,
        F: FnOnce() -> Result<RowLayout>,
    {
        let key = (TypeId::of::<T>(), table.to_string());

        if let Some(layout) = self.layouts.read().get(&key) {
            return Ok(Arc::clone(layout));
        }

        let mut layouts = self.layouts.write();
        if let Some(layout) = layouts.get(&key) {
            return Ok(Arc::clone(layout));
        }

        let layout = Arc::new(build()?);
        tracing::debug!(
            "Registered layout {} for {} ({} fields)",
            table,
            type_name::<T>(),
            layout.field_count()
        );
        layouts.insert(key, Arc::clone(&layout));
        Ok(layout)
    }

    /// Cached layout for a type and table, if any
    pub fn get<T: 'static>(&self, table: &str) -> Option<Arc<RowLayout>> {
        self.layouts
            .read()
            .get(&(TypeId::of::<T>(), table.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.layouts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.read().is_empty()
    }

    /// Drop every cached layout
    pub fn clear(&self) {
        self.layouts.write().clear();
    }
}
