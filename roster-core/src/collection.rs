//! Snapshot of the whole collection: group name → ordered records.
//!
//! Serialized form (pretty JSON, overwritten wholesale on every commit):
//! ```text
//! {
//!   "men":   [ { "id": 1, "name": "A", "group": "men", "rank": 1 }, ... ],
//!   "women": [ ... ]
//! }
//! ```
//!
//! Older deployments stored a bare array of records instead of the group
//! map. [`Collection::from_json`] accepts both.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::Record;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Collection {
    pub(crate) groups: IndexMap<String, Vec<Record>>,
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty collection with the given groups, in declaration order.
    pub fn with_groups<I, S>(groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            groups: groups.into_iter().map(|g| (g.into(), Vec::new())).collect(),
        }
    }

    /// Records of one group, in insertion order.
    pub fn group(&self, name: &str) -> Option<&[Record]> {
        self.groups.get(name).map(Vec::as_slice)
    }

    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn groups(&self) -> impl Iterator<Item = (&str, &[Record])> {
        self.groups.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Every record, group by group.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.groups.values().flatten()
    }

    /// Total number of records across all groups.
    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.values().all(Vec::is_empty)
    }

    /// Append a record to its group, creating the group if needed.
    ///
    /// No invariant is checked here; [`CollectionStore`](crate::CollectionStore)
    /// re-validates everything when it adopts a collection.
    pub fn push(&mut self, record: Record) {
        self.groups
            .entry(record.group.clone())
            .or_default()
            .push(record);
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a persisted snapshot in either the group-map or bare-array form.
    ///
    /// Array entries that do not look like a record are skipped with a
    /// warning rather than failing the whole load.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        match serde_json::from_str::<Value>(text)? {
            Value::Array(items) => {
                let mut collection = Collection::new();
                for item in items {
                    match serde_json::from_value::<Record>(item) {
                        Ok(record) => collection.push(record),
                        Err(e) => log::warn!("Skipping malformed legacy record: {e}"),
                    }
                }
                Ok(collection)
            }
            other => serde_json::from_value(other),
        }
    }
}
