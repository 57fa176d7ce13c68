// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

use super::object::options;
use super::ObjectStore;
use crate::cursor::{
    Cursor,
    Keys,
    WalkOptions,
};
use crate::error::StoreError;
use crate::key_range::{
    Direction,
    KeyRange,
};
use crate::readwrite::Readable;
use crate::value::{
    Key,
    Value,
};

/// A read-only view of a store ordered by one of its indexes. Entries with
/// equal index keys are ordered by primary key.
#[derive(Debug, Eq, PartialEq, Clone)]
pub struct Index {
    store: ObjectStore,
    name: String,
}

impl Index {
    pub(crate) fn new(store: ObjectStore, name: &str) -> Index {
        Index {
            store,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    fn options(&self, options: WalkOptions) -> WalkOptions {
        options.index(&self.name)
    }

    /// The record with the lowest primary key among those whose index key is
    /// in `range`.
    pub fn get<R, Q>(&self, txn: &R, range: Q) -> Result<Option<Value>, StoreError>
    where
        R: Readable,
        Q: Into<KeyRange>,
    {
        Ok(match self.get_key(txn, range)? {
            Some(primary_key) => self.store.get(txn, primary_key)?,
            None => None,
        })
    }

    /// Like `get`, but returns the record's primary key.
    pub fn get_key<R, Q>(&self, txn: &R, range: Q) -> Result<Option<Key>, StoreError>
    where
        R: Readable,
        Q: Into<KeyRange>,
    {
        let core = txn.core();
        let snapshot = core.snapshot(&self.store)?;
        let index = core.check(snapshot.index(&self.name))?;
        Ok(index.first_in(&range.into()).cloned())
    }

    /// Every record with an index key in `range`, in index key order. A record
    /// filed under several keys of a multi-entry index appears once per key.
    pub fn get_all<R>(&self, txn: &R, range: Option<KeyRange>, direction: Direction) -> Result<Vec<Value>, StoreError>
    where
        R: Readable,
    {
        self.walk(txn, options(range, direction)).map(|record| record.map(|r| r.value)).collect()
    }

    /// The primary keys of the records `get_all` would return.
    pub fn get_all_keys<R>(
        &self,
        txn: &R,
        range: Option<KeyRange>,
        direction: Direction,
    ) -> Result<Vec<Key>, StoreError>
    where
        R: Readable,
    {
        self.walk_keys(txn, options(range, direction)).with_primary_keys().map(|pair| pair.map(|(_, pk)| pk)).collect()
    }

    pub fn count<R>(&self, txn: &R, range: Option<KeyRange>) -> Result<usize, StoreError>
    where
        R: Readable,
    {
        let core = txn.core();
        let snapshot = core.snapshot(&self.store)?;
        let index = core.check(snapshot.index(&self.name))?;
        Ok(index.count(&range.unwrap_or_else(KeyRange::all)))
    }

    /// Walk the store in index order. Any index named in `options` is replaced
    /// by this one.
    pub fn walk<'t, R>(&self, txn: &'t R, options: WalkOptions) -> Cursor<'t>
    where
        R: Readable,
    {
        self.store.walk(txn, self.options(options))
    }

    /// Walk the index keys in order.
    pub fn walk_keys<'t, R>(&self, txn: &'t R, options: WalkOptions) -> Keys<'t>
    where
        R: Readable,
    {
        self.store.walk_keys(txn, self.options(options))
    }
}
