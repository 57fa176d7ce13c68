// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

use std::collections::{
    BTreeMap,
    BTreeSet,
};
use std::ops::Bound;

use serde_derive::{
    Deserialize,
    Serialize,
};

use crate::error::StoreError;
use crate::key_range::{
    self,
    KeyRange,
};
use crate::schema::{
    IndexDefinition,
    StoreDefinition,
};
use crate::value::{
    Key,
    Value,
};

/// The index key → primary keys mapping of one index. Entry sets are never
/// left empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct IndexSnapshot {
    pub(crate) definition: IndexDefinition,
    pub(crate) entries: BTreeMap<Key, BTreeSet<Key>>,
}

impl IndexSnapshot {
    fn new(definition: IndexDefinition) -> IndexSnapshot {
        IndexSnapshot {
            definition,
            entries: BTreeMap::new(),
        }
    }

    fn keys_for(&self, value: &Value) -> Vec<Key> {
        self.definition.key_path.extract_index_keys(value, self.definition.is_multi_entry())
    }

    /// Fail if indexing `value` under `primary_key` would break uniqueness.
    fn check_unique(&self, keys: &[Key], primary_key: &Key) -> Result<(), StoreError> {
        if !self.definition.is_unique() {
            return Ok(());
        }
        for key in keys {
            if let Some(owners) = self.entries.get(key) {
                if owners.iter().any(|owner| owner != primary_key) {
                    return Err(StoreError::constraint(format!(
                        "index `{}` already contains key {}",
                        self.definition.name, key
                    )));
                }
            }
        }
        Ok(())
    }

    fn insert(&mut self, keys: Vec<Key>, primary_key: &Key) {
        for key in keys {
            self.entries.entry(key).or_insert_with(BTreeSet::new).insert(primary_key.clone());
        }
    }

    fn remove(&mut self, keys: Vec<Key>, primary_key: &Key) {
        for key in keys {
            if let Some(owners) = self.entries.get_mut(&key) {
                owners.remove(primary_key);
                if owners.is_empty() {
                    self.entries.remove(&key);
                }
            }
        }
    }

    /// The first primary key filed under an index key in `range`.
    pub(crate) fn first_in(&self, range: &KeyRange) -> Option<&Key> {
        if range.is_empty() {
            return None;
        }
        self.entries.range::<Key, _>((range.lower(), range.upper())).next().and_then(|(_, owners)| owners.iter().next())
    }

    /// The `(index key, primary key)` entry that follows `position` within
    /// `range`, in ascending or descending order.
    pub(crate) fn step(
        &self,
        range: &KeyRange,
        position: Option<(&Key, &Key)>,
        ascending: bool,
    ) -> Option<(&Key, &Key)> {
        if let Some((key, primary_key)) = position {
            if let Some((stored, owners)) = self.entries.get_key_value(key) {
                let next = if ascending {
                    owners.range::<Key, _>((Bound::Excluded(primary_key), Bound::Unbounded)).next()
                } else {
                    owners.range::<Key, _>((Bound::Unbounded, Bound::Excluded(primary_key))).next_back()
                };
                if let Some(next) = next {
                    return Some((stored, next));
                }
            }
        }

        let (lower, upper) = match (position, ascending) {
            (Some((key, _)), true) => (Bound::Excluded(key), range.upper()),
            (Some((key, _)), false) => (range.lower(), Bound::Excluded(key)),
            (None, _) => (range.lower(), range.upper()),
        };
        if key_range::is_empty(lower, upper) {
            return None;
        }
        let mut candidates = self.entries.range::<Key, _>((lower, upper));
        if ascending {
            candidates.next().and_then(|(key, owners)| owners.iter().next().map(|pk| (key, pk)))
        } else {
            candidates.next_back().and_then(|(key, owners)| owners.iter().next_back().map(|pk| (key, pk)))
        }
    }

    pub(crate) fn count(&self, range: &KeyRange) -> usize {
        if range.is_empty() {
            return 0;
        }
        self.entries.range::<Key, _>((range.lower(), range.upper())).map(|(_, owners)| owners.len()).sum()
    }
}

/// The full contents of one object store at a point in time. Transactions
/// work on copies of these; committing swaps the copy in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoreSnapshot {
    pub(crate) definition: StoreDefinition,
    pub(crate) records: BTreeMap<Key, Value>,
    pub(crate) indexes: BTreeMap<String, IndexSnapshot>,
    /// The next key the generator hands out. Starts at 1.
    pub(crate) next_key: u64,
}

impl StoreSnapshot {
    /// An empty store. Any indexes in the definition are created empty.
    pub(crate) fn new(definition: StoreDefinition) -> StoreSnapshot {
        let indexes =
            definition.indexes.iter().map(|index| (index.name.clone(), IndexSnapshot::new(index.clone()))).collect();
        StoreSnapshot {
            definition,
            records: BTreeMap::new(),
            indexes,
            next_key: 1,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.definition.name
    }

    pub(crate) fn index(&self, name: &str) -> Result<&IndexSnapshot, StoreError> {
        self.indexes
            .get(name)
            .ok_or_else(|| StoreError::not_found(format!("index `{}` on store `{}`", name, self.definition.name)))
    }

    pub(crate) fn get(&self, key: &Key) -> Option<&Value> {
        self.records.get(key)
    }

    pub(crate) fn generate_key(&mut self) -> Key {
        let key = Key::number(self.next_key as f64);
        self.next_key = self.next_key.saturating_add(1);
        key
    }

    /// Explicit numeric keys push the generator past themselves.
    pub(crate) fn observe_key(&mut self, key: &Key) {
        if let Key::Number(n) = key {
            let n = n.into_inner();
            if n >= self.next_key as f64 {
                self.next_key = if n >= u64::MAX as f64 {
                    u64::MAX
                } else {
                    n.floor() as u64 + 1
                };
            }
        }
    }

    /// Store `value` under `key`, maintaining every index. With `no_overwrite`
    /// an existing record is a constraint violation.
    pub(crate) fn insert(&mut self, key: Key, value: Value, no_overwrite: bool) -> Result<(), StoreError> {
        if no_overwrite && self.records.contains_key(&key) {
            return Err(StoreError::constraint(format!("key {} already exists in store `{}`", key, self.name())));
        }

        let mut planned = Vec::with_capacity(self.indexes.len());
        for index in self.indexes.values() {
            let keys = index.keys_for(&value);
            index.check_unique(&keys, &key)?;
            planned.push(keys);
        }

        if let Some(previous) = self.records.remove(&key) {
            self.unindex(&key, &previous);
        }
        for (index, keys) in self.indexes.values_mut().zip(planned) {
            index.insert(keys, &key);
        }
        self.records.insert(key, value);
        Ok(())
    }

    pub(crate) fn remove(&mut self, key: &Key) -> Option<Value> {
        let previous = self.records.remove(key)?;
        self.unindex(key, &previous);
        Some(previous)
    }

    /// Remove every record in `range`, returning how many were removed.
    pub(crate) fn remove_range(&mut self, range: &KeyRange) -> usize {
        if range.is_empty() {
            return 0;
        }
        let doomed: Vec<Key> =
            self.records.range::<Key, _>((range.lower(), range.upper())).map(|(k, _)| k.clone()).collect();
        for key in &doomed {
            self.remove(key);
        }
        doomed.len()
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
        for index in self.indexes.values_mut() {
            index.entries.clear();
        }
    }

    /// The record that follows `position` within `range`.
    pub(crate) fn step(&self, range: &KeyRange, position: Option<&Key>, ascending: bool) -> Option<(&Key, &Value)> {
        let (lower, upper) = match (position, ascending) {
            (Some(key), true) => (Bound::Excluded(key), range.upper()),
            (Some(key), false) => (range.lower(), Bound::Excluded(key)),
            (None, _) => (range.lower(), range.upper()),
        };
        if key_range::is_empty(lower, upper) {
            return None;
        }
        let mut candidates = self.records.range::<Key, _>((lower, upper));
        if ascending {
            candidates.next()
        } else {
            candidates.next_back()
        }
    }

    pub(crate) fn count(&self, range: &KeyRange) -> usize {
        if range.is_empty() {
            return 0;
        }
        self.records.range::<Key, _>((range.lower(), range.upper())).count()
    }

    /// Add an index and file every existing record under it.
    pub(crate) fn create_index(&mut self, definition: IndexDefinition) -> Result<(), StoreError> {
        if self.indexes.contains_key(&definition.name) {
            return Err(StoreError::constraint(format!(
                "index `{}` already exists on store `{}`",
                definition.name,
                self.name()
            )));
        }
        if definition.is_multi_entry() && definition.key_path.is_compound() {
            return Err(StoreError::InvalidSchema(format!(
                "multi-entry index `{}` cannot use a compound key path",
                definition.name
            )));
        }

        let mut index = IndexSnapshot::new(definition.clone());
        for (key, value) in &self.records {
            let keys = index.keys_for(value);
            index.check_unique(&keys, key)?;
            index.insert(keys, key);
        }
        self.indexes.insert(definition.name.clone(), index);
        self.definition.indexes.push(definition);
        Ok(())
    }

    pub(crate) fn delete_index(&mut self, name: &str) -> Result<(), StoreError> {
        self.indexes
            .remove(name)
            .ok_or_else(|| StoreError::not_found(format!("index `{}` on store `{}`", name, self.definition.name)))?;
        self.definition.indexes.retain(|index| index.name != name);
        Ok(())
    }

    fn unindex(&mut self, key: &Key, previous: &Value) {
        for index in self.indexes.values_mut() {
            let keys = index.keys_for(previous);
            index.remove(keys, key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn songs() -> StoreSnapshot {
        let definition = StoreDefinition::new("songs")
            .key_path("path")
            .index(IndexDefinition::new("artists", "artists").multi_entry())
            .index(IndexDefinition::new("title", "title").unique());
        let mut snapshot = StoreSnapshot::new(definition);
        for (path, title, artists) in &[("a", "One", vec!["X", "Y"]), ("b", "Two", vec!["Y"]), ("c", "Three", vec![])] {
            let artists: Vec<Value> = artists.iter().map(|a| Value::from(*a)).collect();
            let value = Value::map(vec![
                ("path", Value::from(*path)),
                ("title", Value::from(*title)),
                ("artists", Value::Array(artists)),
            ]);
            snapshot.insert(Key::from(*path), value, true).expect("inserted");
        }
        snapshot
    }

    #[test]
    fn test_index_maintenance() {
        let mut snapshot = songs();
        let artists = snapshot.index("artists").expect("index");
        assert_eq!(artists.count(&KeyRange::only("Y")), 2);
        assert_eq!(artists.count(&KeyRange::all()), 3);

        snapshot.remove(&Key::from("a")).expect("removed");
        let artists = snapshot.index("artists").expect("index");
        assert_eq!(artists.count(&KeyRange::only("X")), 0);
        assert!(!artists.entries.contains_key(&Key::from("X")));
    }

    #[test]
    fn test_unique_violation_leaves_store_untouched() {
        let mut snapshot = songs();
        let dup = Value::map(vec![("path", "d"), ("title", "One")]);
        match snapshot.insert(Key::from("d"), dup, false) {
            Err(StoreError::ConstraintError(_)) => {},
            other => panic!("expected constraint error, got {:?}", other),
        }
        assert!(snapshot.get(&Key::from("d")).is_none());

        // Overwriting a record with its own unique key is fine.
        let same = Value::map(vec![("path", "a"), ("title", "One")]);
        snapshot.insert(Key::from("a"), same, false).expect("overwrote");
    }

    #[test]
    fn test_step_through_index() {
        let snapshot = songs();
        let artists = snapshot.index("artists").expect("index");
        let range = KeyRange::all();
        let mut position = None;
        let mut seen = vec![];
        while let Some((key, pk)) = artists.step(&range, position, true) {
            seen.push((key.clone(), pk.clone()));
            position = Some((key, pk));
        }
        assert_eq!(
            seen,
            vec![
                (Key::from("X"), Key::from("a")),
                (Key::from("Y"), Key::from("a")),
                (Key::from("Y"), Key::from("b")),
            ]
        );
    }

    #[test]
    fn test_key_generator() {
        let mut snapshot = StoreSnapshot::new(StoreDefinition::new("s").auto_increment());
        assert_eq!(snapshot.generate_key(), Key::from(1));
        snapshot.observe_key(&Key::number(9.5));
        assert_eq!(snapshot.generate_key(), Key::from(10));
        snapshot.observe_key(&Key::from("str"));
        snapshot.observe_key(&Key::from(3));
        assert_eq!(snapshot.generate_key(), Key::from(11));
    }

    #[test]
    fn test_create_index_backfills() {
        let mut snapshot = songs();
        snapshot.create_index(IndexDefinition::new("path", "path")).expect("created");
        assert_eq!(snapshot.index("path").expect("index").count(&KeyRange::all()), 3);
        assert!(snapshot.create_index(IndexDefinition::new("path", "path")).is_err());

        let clash = IndexDefinition::new("artist_once", "artists").multi_entry().unique();
        match snapshot.create_index(clash) {
            Err(StoreError::ConstraintError(_)) => {},
            other => panic!("expected constraint error, got {:?}", other),
        }
        assert!(snapshot.index("artist_once").is_err());
    }
}
