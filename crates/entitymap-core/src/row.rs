//! Raw backend records.

use std::collections::BTreeMap;
use std::collections::btree_map;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A raw record as exchanged with a backend: column name → value.
///
/// Columns are kept in sorted order so two rows with the same content
/// compare equal regardless of how they were built.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row {
    columns: BTreeMap<String, Value>,
}

impl Row {
    /// Create an empty row.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a row from `(column, value)` pairs.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            columns: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.columns.insert(column.into(), value.into());
        self
    }

    /// Get a value for a column.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    /// Get a value for a column, treating a missing column as NULL.
    pub fn get_or_null(&self, column: &str) -> Value {
        self.columns.get(column).cloned().unwrap_or(Value::Null)
    }

    /// Set a value, returning the previous one.
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.columns.insert(column.into(), value.into())
    }

    /// Remove a value, returning it.
    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.columns.remove(column)
    }

    /// Check if a column is present.
    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// True if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Column names in sorted order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Iterate `(column, value)` pairs.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.columns.iter()
    }

    /// Copy of this row restricted to the given columns (missing ones become NULL).
    pub fn project<'a>(&self, columns: impl IntoIterator<Item = &'a str>) -> Row {
        Row {
            columns: columns
                .into_iter()
                .map(|c| (c.to_string(), self.get_or_null(c)))
                .collect(),
        }
    }

    /// Overlay `other` on top of this row.
    pub fn merge(&mut self, other: &Row) {
        for (k, v) in other.iter() {
            self.columns.insert(k.clone(), v.clone());
        }
    }

    /// Columns whose values differ between `self` and `other`
    /// (a column missing on one side counts as NULL).
    pub fn changed_columns(&self, other: &Row) -> Vec<String> {
        let mut changed: Vec<String> = self
            .columns
            .iter()
            .filter(|(k, v)| other.get(k).unwrap_or(&Value::Null) != *v)
            .map(|(k, _)| k.clone())
            .collect();
        for (k, v) in &other.columns {
            if !self.columns.contains_key(k) && !v.is_null() {
                changed.push(k.clone());
            }
        }
        changed
    }
}

impl<'a> IntoIterator for &'a Row {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.iter()
    }
}

impl IntoIterator for Row {
    type Item = (String, Value);
    type IntoIter = btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.into_iter()
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}
