//! In-memory collection store and its mutation invariants.
//!
//! Layout:
//! ```text
//! groups (IndexMap, declaration order)        index (BTreeMap)
//! ┌───────┬──────────────────────────┐        ┌────┬────────────┐
//! │ men   │ [ r1 | r3 | r4 ]         │ ◄───── │ id │ (group,pos)│
//! │ women │ [ r2 ]                   │        └────┴────────────┘
//! └───────┴──────────────────────────┘
//! ```
//!
//! - Ids are unique across all groups; the next id is `max(id) + 1`.
//! - The index always mirrors `groups` exactly; any operation that moves
//!   records re-indexes the affected tail of the group.
//! - With `auto_compact`, deleting rank `r` shifts every higher rank in the
//!   same group down by one.
//!
//! All operations are synchronous and validate before mutating, so an
//! error never leaves a half-applied change behind.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;

use crate::collection::Collection;
use crate::error::StoreError;
use crate::record::{Record, RecordFields, RecordId};

/// Declared group set and rank policy for one deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaConfig {
    /// Closed set of groups, in the order they are serialized
    pub groups: Vec<String>,
    /// Keep ranks contiguous from 1 when a record is deleted
    pub auto_compact: bool,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            groups: vec!["men".to_string(), "women".to_string()],
            auto_compact: true,
        }
    }
}

impl SchemaConfig {
    pub fn new<I, S>(groups: I, auto_compact: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            groups: groups.into_iter().map(Into::into).collect(),
            auto_compact,
        }
    }
}

/// Position of a record inside the group arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    group: usize,
    pos: usize,
}

/// Outcome of a single-record update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upsert {
    Updated(Record),
    Inserted(Record),
}

impl Upsert {
    pub fn record(&self) -> &Record {
        match self {
            Upsert::Updated(r) | Upsert::Inserted(r) => r,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CollectionStore {
    schema: SchemaConfig,
    collection: Collection,
    index: BTreeMap<RecordId, Slot>,
}

impl CollectionStore {
    /// Empty store with every declared group present.
    pub fn new(schema: SchemaConfig) -> Self {
        let collection = Collection::with_groups(schema.groups.iter().cloned());
        Self {
            schema,
            collection,
            index: BTreeMap::new(),
        }
    }

    /// Adopt a loaded snapshot.
    ///
    /// Undeclared groups and records whose id is already taken are dropped
    /// with a warning; everything else keeps its order and rank.
    pub fn from_snapshot(schema: SchemaConfig, snapshot: Collection) -> Self {
        let mut store = Self::new(schema);
        let mut loaded = snapshot.groups;

        for gi in 0..store.schema.groups.len() {
            let name = store.schema.groups[gi].clone();
            let Some(records) = loaded.shift_remove(&name) else {
                continue;
            };
            for mut record in records {
                if store.index.contains_key(&record.id) {
                    log::warn!("Dropping record with duplicate id {} in group {name}", record.id);
                    continue;
                }
                record.group = name.clone();
                store.push(gi, record);
            }
        }

        for (name, records) in loaded {
            log::warn!(
                "Dropping {} record(s) in undeclared group {name:?}",
                records.len()
            );
        }

        store
    }

    pub fn schema(&self) -> &SchemaConfig {
        &self.schema
    }

    /// Add a record to `group`, assigning the next global id.
    ///
    /// A caller-supplied rank is kept as given; otherwise the record goes
    /// after the highest rank in the group.
    pub fn add(&mut self, group: &str, fields: &RecordFields) -> Result<Record, StoreError> {
        let gi = self.group_index(group)?;
        let name = fields.name()?;
        let rank = fields.rank()?;

        let rank = match rank {
            Some(rank) => rank,
            None => self.next_rank(gi)?,
        };
        let record = Record {
            id: self.next_id()?,
            name,
            group: group.to_string(),
            rank,
        };
        self.push(gi, record.clone());
        Ok(record)
    }

    /// Replace the record with `fields.id` in place, or insert it if absent.
    ///
    /// A record whose group changes is moved to the end of the new group.
    /// Ranks are never compacted on this path.
    pub fn update(&mut self, fields: &RecordFields) -> Result<Upsert, StoreError> {
        let group = fields.group_name()?;
        let gi = self.group_index(group)?;
        let id = fields.id()?;
        let name = fields.name()?;
        let rank = fields.rank()?;

        match self.index.get(&id).copied() {
            Some(slot) if slot.group == gi => {
                let current = self.slot_mut(slot);
                current.name = name;
                if let Some(rank) = rank {
                    current.rank = rank;
                }
                Ok(Upsert::Updated(current.clone()))
            }
            Some(slot) => {
                let mut moved = self.remove_at(slot);
                moved.name = name;
                moved.group = group.to_string();
                if let Some(rank) = rank {
                    moved.rank = rank;
                }
                self.push(gi, moved.clone());
                Ok(Upsert::Updated(moved))
            }
            None => {
                let rank = match rank {
                    Some(rank) => rank,
                    None => self.next_rank(gi)?,
                };
                let record = Record {
                    id,
                    name,
                    group: group.to_string(),
                    rank,
                };
                self.push(gi, record.clone());
                Ok(Upsert::Inserted(record))
            }
        }
    }

    /// Replace the entire sequence of `group` with `items`.
    ///
    /// Every item must carry an integer id, a non-empty name and a numeric
    /// rank; its `group` may be omitted but must otherwise match. Ids must
    /// be unique among the items and must not belong to another group.
    pub fn replace_group(&mut self, group: &str, items: &[Value]) -> Result<Vec<Record>, StoreError> {
        let gi = self.group_index(group)?;

        let mut seen = HashSet::with_capacity(items.len());
        let mut records = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let record = self
                .shape_check(gi, item)
                .map_err(|e| StoreError::InvalidShape(format!("item {i}: {e}")))?;
            if !seen.insert(record.id) {
                return Err(StoreError::InvalidShape(format!(
                    "item {i}: id {} appears more than once",
                    record.id
                )));
            }
            records.push(record);
        }

        let old_ids: Vec<RecordId> = self.group_slice(gi).iter().map(|r| r.id).collect();
        for id in old_ids {
            self.index.remove(&id);
        }
        self.collection.groups[gi] = records.clone();
        self.reindex(gi, 0);
        Ok(records)
    }

    /// Remove a record by id, compacting ranks when configured.
    pub fn delete(&mut self, id: RecordId) -> Result<Record, StoreError> {
        let slot = self.index.get(&id).copied().ok_or(StoreError::NotFound(id))?;
        let removed = self.remove_at(slot);

        if self.schema.auto_compact {
            for record in self.collection.groups[slot.group]
                .iter_mut()
                .filter(|r| r.rank > removed.rank)
            {
                record.rank -= 1;
            }
        }
        Ok(removed)
    }

    /// Immutable copy of the full collection.
    pub fn snapshot(&self) -> Collection {
        self.collection.clone()
    }

    /// Records of one group, in insertion order.
    pub fn filter(&self, group: &str) -> Result<&[Record], StoreError> {
        let gi = self.group_index(group)?;
        Ok(self.group_slice(gi))
    }

    pub fn get(&self, id: RecordId) -> Option<&Record> {
        self.index.get(&id).map(|slot| &self.group_slice(slot.group)[slot.pos])
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Next id to hand out: one past the highest id in any group.
    pub fn next_id(&self) -> Result<RecordId, StoreError> {
        match self.index.keys().next_back() {
            Some(max) => max.checked_add(1).ok_or(StoreError::Exhausted("id")),
            None => Ok(1),
        }
    }

    fn next_rank(&self, gi: usize) -> Result<i64, StoreError> {
        match self.group_slice(gi).iter().map(|r| r.rank).max() {
            Some(max) => max.checked_add(1).ok_or(StoreError::Exhausted("rank")),
            None => Ok(1),
        }
    }

    fn group_index(&self, group: &str) -> Result<usize, StoreError> {
        self.collection
            .groups
            .get_index_of(group)
            .ok_or_else(|| StoreError::InvalidGroup(group.to_string()))
    }

    // Group indices come from `group_index` or the id index, both of
    // which only ever point at declared groups.
    fn group_slice(&self, gi: usize) -> &[Record] {
        &self.collection.groups[gi]
    }

    fn slot_mut(&mut self, slot: Slot) -> &mut Record {
        &mut self.collection.groups[slot.group][slot.pos]
    }

    fn push(&mut self, gi: usize, record: Record) {
        let records = &mut self.collection.groups[gi];
        self.index.insert(
            record.id,
            Slot {
                group: gi,
                pos: records.len(),
            },
        );
        records.push(record);
    }

    fn remove_at(&mut self, slot: Slot) -> Record {
        let removed = self.collection.groups[slot.group].remove(slot.pos);
        self.index.remove(&removed.id);
        self.reindex(slot.group, slot.pos);
        removed
    }

    /// Refresh index entries for `group[from..]` after a shift.
    fn reindex(&mut self, gi: usize, from: usize) {
        for (pos, record) in self.collection.groups[gi].iter().enumerate().skip(from) {
            self.index.insert(record.id, Slot { group: gi, pos });
        }
    }

    /// Validate one bulk item against the record shape.
    fn shape_check(&self, gi: usize, item: &Value) -> Result<Record, StoreError> {
        if !item.is_object() {
            return Err(StoreError::InvalidShape("expected an object".to_string()));
        }
        let fields: RecordFields = serde_json::from_value(item.clone())
            .map_err(|e| StoreError::InvalidShape(e.to_string()))?;

        let group = &self.schema.groups[gi];
        if fields.group.is_some() && fields.group_name()? != group {
            return Err(StoreError::InvalidShape(format!(
                "group does not match {group:?}"
            )));
        }
        let id = fields.id()?;
        if let Some(slot) = self.index.get(&id) {
            if slot.group != gi {
                return Err(StoreError::InvalidShape(format!(
                    "id {id} already belongs to group {:?}",
                    self.schema.groups[slot.group]
                )));
            }
        }
        let rank = fields
            .rank()?
            .ok_or_else(|| StoreError::field("rank", "is required"))?;

        Ok(Record {
            id,
            name: fields.name()?,
            group: group.clone(),
            rank,
        })
    }
}
