// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

use super::{
    resolve_key,
    Index,
};
use crate::backend::StoreId;
use crate::cursor::{
    Cursor,
    CursorRecord,
    Keys,
    WalkOptions,
};
use crate::error::StoreError;
use crate::key_range::{
    Direction,
    KeyRange,
};
use crate::readwrite::{
    Readable,
    Writer,
};
use crate::value::{
    Key,
    Value,
};

type EmptyResult = Result<(), StoreError>;

/// A handle to one object store. Handles are cheap to clone and are only
/// meaningful for the environment that opened them; every operation takes the
/// transaction it runs in.
#[derive(Debug, Eq, PartialEq, Clone)]
pub struct ObjectStore {
    id: StoreId,
    name: String,
}

impl ObjectStore {
    pub(crate) fn new(id: StoreId, name: &str) -> ObjectStore {
        ObjectStore {
            id,
            name: name.to_string(),
        }
    }

    pub(crate) fn id(&self) -> StoreId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A handle to one of this store's indexes. Whether the index exists is
    /// checked when the handle is used.
    pub fn index(&self, name: &str) -> Index {
        Index::new(self.clone(), name)
    }

    pub fn get<R, K>(&self, txn: &R, key: K) -> Result<Option<Value>, StoreError>
    where
        R: Readable,
        K: Into<Key>,
    {
        let snapshot = txn.core().snapshot(self)?;
        Ok(snapshot.get(&key.into()).cloned())
    }

    /// Look up several keys at once. The result has one entry per key, in order.
    pub fn get_many<R>(&self, txn: &R, keys: &[Key]) -> Result<Vec<Option<Value>>, StoreError>
    where
        R: Readable,
    {
        let snapshot = txn.core().snapshot(self)?;
        Ok(keys.iter().map(|key| snapshot.get(key).cloned()).collect())
    }

    /// Insert a new record. Fails with `ConstraintError` if the key is taken.
    pub fn add(&self, writer: &Writer, value: Value, key: Option<Key>) -> Result<Key, StoreError> {
        self.write(writer, value, key, true)
    }

    /// Insert or replace a record.
    pub fn put(&self, writer: &Writer, value: Value, key: Option<Key>) -> Result<Key, StoreError> {
        self.write(writer, value, key, false)
    }

    fn write(
        &self,
        writer: &Writer,
        mut value: Value,
        key: Option<Key>,
        no_overwrite: bool,
    ) -> Result<Key, StoreError> {
        writer.core().modify(self, |store| {
            let key = resolve_key(store, &mut value, key)?;
            store.insert(key.clone(), value, no_overwrite)?;
            Ok(key)
        })
    }

    /// Merge the fields of `partial` over the record at `key` and store the
    /// result. In a store with a key path, the merged record's own key decides
    /// where it is stored; if `partial` changes that key, the record at `key`
    /// is left as it was and the merged one is stored beside it.
    pub fn update<K>(&self, writer: &Writer, key: K, partial: Value) -> Result<Key, StoreError>
    where
        K: Into<Key>,
    {
        let key = key.into();
        writer.core().modify(self, |store| {
            let mut record = match store.get(&key) {
                Some(record) => record.clone(),
                None => return Err(StoreError::not_found(format!("key {} in store `{}`", key, self.name))),
            };
            record.merge(partial)?;
            let explicit = match store.definition.key_path {
                Some(_) => None,
                None => Some(key),
            };
            let key = resolve_key(store, &mut record, explicit)?;
            store.insert(key.clone(), record, false)?;
            Ok(key)
        })
    }

    /// Delete the record at a key, or every record in a range.
    pub fn delete<R>(&self, writer: &Writer, range: R) -> EmptyResult
    where
        R: Into<KeyRange>,
    {
        let range = range.into();
        writer.core().modify(self, |store| {
            store.remove_range(&range);
            Ok(())
        })
    }

    pub fn clear(&self, writer: &Writer) -> EmptyResult {
        writer.core().modify(self, |store| {
            store.clear();
            Ok(())
        })
    }

    /// Every record in `range` (or the whole store), by primary key.
    pub fn get_all<R>(&self, txn: &R, range: Option<KeyRange>, direction: Direction) -> Result<Vec<Value>, StoreError>
    where
        R: Readable,
    {
        self.walk(txn, options(range, direction)).map(|record| record.map(|r| r.value)).collect()
    }

    pub fn get_all_keys<R>(
        &self,
        txn: &R,
        range: Option<KeyRange>,
        direction: Direction,
    ) -> Result<Vec<Key>, StoreError>
    where
        R: Readable,
    {
        self.walk_keys(txn, options(range, direction)).collect()
    }

    pub fn count<R>(&self, txn: &R, range: Option<KeyRange>) -> Result<usize, StoreError>
    where
        R: Readable,
    {
        let snapshot = txn.core().snapshot(self)?;
        Ok(snapshot.count(&range.unwrap_or_else(KeyRange::all)))
    }

    /// Start a walk over this store, or over one of its indexes if `options`
    /// names one.
    pub fn walk<'t, R>(&self, txn: &'t R, options: WalkOptions) -> Cursor<'t>
    where
        R: Readable,
    {
        Cursor::new(txn.core(), self, options)
    }

    pub fn walk_keys<'t, R>(&self, txn: &'t R, options: WalkOptions) -> Keys<'t>
    where
        R: Readable,
    {
        Keys::new(txn.core(), self, options)
    }

    /// The first record, in primary key order, that satisfies `predicate`.
    pub fn find<R, F>(&self, txn: &R, predicate: F) -> Result<Option<CursorRecord>, StoreError>
    where
        R: Readable,
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.walk(txn, WalkOptions::new().filter(predicate)).next().transpose()
    }
}

pub(super) fn options(range: Option<KeyRange>, direction: Direction) -> WalkOptions {
    let options = WalkOptions::new().direction(direction);
    match range {
        Some(range) => options.range(range),
        None => options,
    }
}
