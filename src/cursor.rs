// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! Ordered walks over a store or one of its indexes.
//!
//! A cursor holds only a position. Each call to `next` looks up the entry after
//! that position in the transaction's current view of the store, so nothing is
//! read ahead of the consumer, and records written earlier in the same
//! transaction are seen. Records rejected by the predicate are skipped without
//! ending the walk.
//!
//! A failure (a missing index, a store outside the transaction's scope, a
//! transaction that has already settled) is yielded once, aborts the
//! transaction if it was still active, and ends the walk.

use std::fmt;
use std::sync::Arc;

use crate::backend::StoreSnapshot;
use crate::error::StoreError;
use crate::key_range::{
    Direction,
    KeyRange,
};
use crate::readwrite::TxnCore;
use crate::store::ObjectStore;
use crate::value::{
    Key,
    Value,
};

type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// What to walk and how.
#[derive(Clone, Default)]
pub struct WalkOptions {
    pub(crate) index: Option<String>,
    pub(crate) range: Option<KeyRange>,
    pub(crate) direction: Direction,
    predicate: Option<Predicate>,
}

impl WalkOptions {
    pub fn new() -> WalkOptions {
        WalkOptions::default()
    }

    /// Walk in index key order through `index` instead of by primary key.
    pub fn index(mut self, index: &str) -> WalkOptions {
        self.index = Some(index.to_string());
        self
    }

    pub fn range<R: Into<KeyRange>>(mut self, range: R) -> WalkOptions {
        self.range = Some(range.into());
        self
    }

    pub fn direction(mut self, direction: Direction) -> WalkOptions {
        self.direction = direction;
        self
    }

    pub fn descending(self) -> WalkOptions {
        self.direction(Direction::Descending)
    }

    /// Only yield records for which `predicate` returns true.
    pub fn filter<F>(mut self, predicate: F) -> WalkOptions
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }
}

impl fmt::Debug for WalkOptions {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("WalkOptions")
            .field("index", &self.index)
            .field("range", &self.range)
            .field("direction", &self.direction)
            .field("predicate", &self.predicate.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// One step of a walk. `key` is the index key when walking an index, and the
/// primary key otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorRecord {
    pub value: Value,
    pub key: Key,
    pub primary_key: Key,
}

struct Walker<'t> {
    core: &'t TxnCore<'t>,
    store: ObjectStore,
    index: Option<String>,
    range: KeyRange,
    ascending: bool,
    predicate: Option<Predicate>,
    position: Option<(Key, Key)>,
    done: bool,
}

impl<'t> Walker<'t> {
    fn new(core: &'t TxnCore<'t>, store: &ObjectStore, options: WalkOptions) -> Walker<'t> {
        Walker {
            core,
            store: store.clone(),
            index: options.index,
            range: options.range.unwrap_or_else(KeyRange::all),
            ascending: options.direction == Direction::Ascending,
            predicate: options.predicate,
            position: None,
            done: false,
        }
    }

    fn locate(&self, snapshot: &StoreSnapshot) -> Result<Option<(Key, Key)>, StoreError> {
        let position = self.position.as_ref();
        Ok(match &self.index {
            None => snapshot
                .step(&self.range, position.map(|(key, _)| key), self.ascending)
                .map(|(key, _)| (key.clone(), key.clone())),
            Some(name) => snapshot
                .index(name)?
                .step(&self.range, position.map(|(key, primary_key)| (key, primary_key)), self.ascending)
                .map(|(key, primary_key)| (key.clone(), primary_key.clone())),
        })
    }

    fn advance<T, F>(&mut self, emit: F) -> Option<Result<T, StoreError>>
    where
        F: Fn(Key, Key, &Value) -> T,
    {
        if self.done {
            return None;
        }
        match self.try_advance(emit) {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.done = true;
                None
            },
            Err(err) => {
                self.done = true;
                Some(Err(self.core.fail(err)))
            },
        }
    }

    fn try_advance<T, F>(&mut self, emit: F) -> Result<Option<T>, StoreError>
    where
        F: Fn(Key, Key, &Value) -> T,
    {
        let snapshot = self.core.snapshot(&self.store)?;
        loop {
            let (key, primary_key) = match self.locate(&snapshot)? {
                Some(found) => found,
                None => return Ok(None),
            };
            self.position = Some((key.clone(), primary_key.clone()));
            if let Some(value) = snapshot.get(&primary_key) {
                if self.predicate.as_ref().map_or(true, |predicate| predicate(value)) {
                    return Ok(Some(emit(key, primary_key, value)));
                }
            }
        }
    }
}

/// A walk yielding whole records. Borrows its transaction.
pub struct Cursor<'t> {
    walker: Walker<'t>,
}

impl<'t> Cursor<'t> {
    pub(crate) fn new(core: &'t TxnCore<'t>, store: &ObjectStore, options: WalkOptions) -> Cursor<'t> {
        Cursor {
            walker: Walker::new(core, store, options),
        }
    }
}

impl<'t> Iterator for Cursor<'t> {
    type Item = Result<CursorRecord, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.walker.advance(|key, primary_key, value| CursorRecord {
            value: value.clone(),
            key,
            primary_key,
        })
    }
}

/// A walk yielding keys only: primary keys over a store, index keys over an
/// index.
pub struct Keys<'t> {
    walker: Walker<'t>,
}

impl<'t> Keys<'t> {
    pub(crate) fn new(core: &'t TxnCore<'t>, store: &ObjectStore, options: WalkOptions) -> Keys<'t> {
        Keys {
            walker: Walker::new(core, store, options),
        }
    }

    /// Yield `(key, primary key)` pairs instead of keys.
    pub fn with_primary_keys(self) -> impl Iterator<Item = Result<(Key, Key), StoreError>> + 't {
        let mut walker = self.walker;
        std::iter::from_fn(move || walker.advance(|key, primary_key, _| (key, primary_key)))
    }
}

impl<'t> Iterator for Keys<'t> {
    type Item = Result<Key, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.walker.advance(|key, _, _| key)
    }
}
