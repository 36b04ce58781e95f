use std::collections::{BTreeMap, BTreeSet};

use super::value::AttributeValue;

/// Per-entity attribute map with change tracking
#[derive(Debug, Clone, Default)]
pub struct Attributes {
    values: BTreeMap<String, AttributeValue>,
    /// Names written since the last successful flush
    dirty: BTreeSet<String>,
}

impl Attributes {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store or overwrite a value and mark the name as changed
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<AttributeValue>) {
        let name = name.into();
        self.dirty.insert(name.clone());
        self.values.insert(name, value.into());
    }

    /// Insert a value read back from storage without marking it changed
    pub(crate) fn load(&mut self, name: impl Into<String>, value: AttributeValue) {
        let name = name.into();
        self.dirty.remove(&name);
        self.values.insert(name, value);
    }

    /// Look up a value
    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.values.get(name)
    }

    /// Whether a value is stored under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// All attribute names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// All entries in sorted order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Entries written since the last successful flush
    pub fn dirty_entries(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.dirty
            .iter()
            .filter_map(|name| self.values.get_key_value(name))
            .map(|(k, v)| (k.as_str(), v))
    }

    /// Whether any attribute changed since the last successful flush
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Forget change tracking after the backend confirmed the writes
    pub(crate) fn clear_dirty(&mut self) {
        self.dirty.clear();
    }

    /// Number of stored attributes
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no attributes are stored
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
