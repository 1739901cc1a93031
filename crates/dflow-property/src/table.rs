//! A property table: a mapping from [`PropertyKey`] to [`PropertyValue`],
//! where absence from the map *is* the unknown state.

use std::collections::HashMap;

use crate::value::{PropertyKey, PropertyValue};

/// Property → (known, typed value). Insertion order is irrelevant, so this
/// is a plain map rather than an ordered structure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyTable(HashMap<PropertyKey, PropertyValue>);

impl PropertyTable {
    /// An all-unknown table, the starting point for a source filter's
    /// propagation and for a filter with no inputs.
    #[must_use]
    pub fn all_unknown() -> Self {
        Self::default()
    }

    /// `true` if `key` has a known value in this table.
    #[must_use]
    pub fn is_known(&self, key: PropertyKey) -> bool {
        self.0.contains_key(&key)
    }

    /// The value of `key`, or `None` if unknown.
    #[must_use]
    pub fn get(&self, key: PropertyKey) -> Option<PropertyValue> {
        self.0.get(&key).copied()
    }

    /// Sets `key` to a known value, overwriting any previous value.
    pub fn set(&mut self, key: PropertyKey, value: PropertyValue) {
        let _ = self.0.insert(key, value);
    }

    /// Marks `key` as unknown, removing any previous value.
    pub fn set_unknown(&mut self, key: PropertyKey) {
        let _ = self.0.remove(&key);
    }

    /// Merges `other` into `self`: entries known in `other` overwrite
    /// entries in `self`. Used to fold several producers' output tables
    /// into one merged input table for a multi-input filter.
    pub fn merge_from(&mut self, other: &PropertyTable) {
        for (key, value) in &other.0 {
            let _ = self.0.insert(*key, *value);
        }
    }
}
