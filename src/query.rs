// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! Producers.
//!
//! A single-shot operation is a `Once`: nothing happens until it is pulled,
//! then it yields exactly one `Result` and ends. Cursors and subscriptions are
//! the multi-value producers; `scan_array` turns any of them into a sequence of
//! growing snapshots of everything produced so far.
//!
//! `Query` builds `Once`s that each run in a transaction of their own over a
//! single store.

use std::fmt;

use crate::env::Rxkv;
use crate::error::StoreError;
use crate::key_range::{
    Direction,
    KeyRange,
};
use crate::value::{
    Key,
    Value,
};

/// A lazy operation that produces one result.
pub struct Once<'a, T> {
    op: Option<Box<dyn FnOnce() -> Result<T, StoreError> + 'a>>,
}

impl<'a, T> Once<'a, T> {
    pub fn new<F>(op: F) -> Once<'a, T>
    where
        F: FnOnce() -> Result<T, StoreError> + 'a,
    {
        Once {
            op: Some(Box::new(op)),
        }
    }

    /// Run the operation now. A `Once` that was already pulled as an iterator
    /// has nothing left to run and reports `TransactionInactive`.
    pub fn resolve(mut self) -> Result<T, StoreError> {
        self.next().unwrap_or(Err(StoreError::TransactionInactive))
    }

    /// Chain a follow-up on success, still lazily.
    pub fn and_then<U, F>(self, f: F) -> Once<'a, U>
    where
        T: 'a,
        F: FnOnce(T) -> Result<U, StoreError> + 'a,
    {
        Once::new(move || self.resolve().and_then(f))
    }
}

impl<'a, T> Iterator for Once<'a, T> {
    type Item = Result<T, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.op.take().map(|op| op())
    }
}

impl<'a, T> fmt::Debug for Once<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Once").field("pending", &self.op.is_some()).finish()
    }
}

/// See `ScanArrayExt::scan_array`.
#[derive(Debug)]
pub struct ScanArray<I, T> {
    inner: I,
    seen: Vec<T>,
    done: bool,
}

impl<I, T, E> Iterator for ScanArray<I, T>
where
    I: Iterator<Item = Result<T, E>>,
    T: Clone,
{
    type Item = Result<Vec<T>, E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.inner.next() {
            Some(Ok(item)) => {
                self.seen.push(item);
                Some(Ok(self.seen.clone()))
            },
            Some(Err(err)) => {
                self.done = true;
                Some(Err(err))
            },
            None => {
                self.done = true;
                None
            },
        }
    }
}

pub trait ScanArrayExt<T, E>: Iterator<Item = Result<T, E>> + Sized {
    /// After each item, yield every item so far, in order. An error is passed
    /// through and ends the sequence.
    fn scan_array(self) -> ScanArray<Self, T> {
        ScanArray {
            inner: self,
            seen: Vec::new(),
            done: false,
        }
    }
}

impl<I, T, E> ScanArrayExt<T, E> for I where I: Iterator<Item = Result<T, E>> {}

/// One-shot operations against one store, optionally read through an index.
#[derive(Debug, Clone)]
pub struct Query<'a> {
    rkv: &'a Rxkv,
    store: String,
    index: Option<String>,
}

impl<'a> Query<'a> {
    pub fn new(rkv: &'a Rxkv, store: &str) -> Query<'a> {
        Query {
            rkv,
            store: store.to_string(),
            index: None,
        }
    }

    /// Read through `index`. Writes always go to the store.
    pub fn index(mut self, index: &str) -> Query<'a> {
        self.index = Some(index.to_string());
        self
    }

    pub fn get<K: Into<Key>>(&self, key: K) -> Once<'a, Option<Value>> {
        let key = key.into();
        let Query {
            rkv,
            store,
            index,
        } = self.clone();
        Once::new(move || {
            let handle = rkv.open_store(&store)?;
            rkv.read_with(&[&store], |reader| match &index {
                Some(index) => handle.index(index).get(reader, key),
                None => handle.get(reader, key),
            })
        })
    }

    pub fn get_all(&self, range: Option<KeyRange>, direction: Direction) -> Once<'a, Vec<Value>> {
        let Query {
            rkv,
            store,
            index,
        } = self.clone();
        Once::new(move || {
            let handle = rkv.open_store(&store)?;
            rkv.read_with(&[&store], |reader| match &index {
                Some(index) => handle.index(index).get_all(reader, range, direction),
                None => handle.get_all(reader, range, direction),
            })
        })
    }

    /// Look up each of `keys`, through the index if one is set.
    pub fn get_many(&self, keys: Vec<Key>) -> Once<'a, Vec<Option<Value>>> {
        let Query {
            rkv,
            store,
            index,
        } = self.clone();
        Once::new(move || {
            let handle = rkv.open_store(&store)?;
            rkv.read_with(&[&store], |reader| match &index {
                Some(index) => {
                    let index = handle.index(index);
                    keys.into_iter().map(|key| index.get(reader, key)).collect()
                },
                None => handle.get_many(reader, &keys),
            })
        })
    }

    pub fn count(&self, range: Option<KeyRange>) -> Once<'a, usize> {
        let Query {
            rkv,
            store,
            index,
        } = self.clone();
        Once::new(move || {
            let handle = rkv.open_store(&store)?;
            rkv.read_with(&[&store], |reader| match &index {
                Some(index) => handle.index(index).count(reader, range),
                None => handle.count(reader, range),
            })
        })
    }

    pub fn add(&self, value: Value, key: Option<Key>) -> Once<'a, Key> {
        let (rkv, store) = (self.rkv, self.store.clone());
        Once::new(move || {
            let handle = rkv.open_store(&store)?;
            rkv.write_with(&[&store], |writer| handle.add(writer, value, key))
        })
    }

    pub fn put(&self, value: Value, key: Option<Key>) -> Once<'a, Key> {
        let (rkv, store) = (self.rkv, self.store.clone());
        Once::new(move || {
            let handle = rkv.open_store(&store)?;
            rkv.write_with(&[&store], |writer| handle.put(writer, value, key))
        })
    }

    pub fn update<K: Into<Key>>(&self, key: K, partial: Value) -> Once<'a, Key> {
        let key = key.into();
        let (rkv, store) = (self.rkv, self.store.clone());
        Once::new(move || {
            let handle = rkv.open_store(&store)?;
            rkv.write_with(&[&store], |writer| handle.update(writer, key, partial))
        })
    }

    pub fn delete<R: Into<KeyRange>>(&self, range: R) -> Once<'a, ()> {
        let range = range.into();
        let (rkv, store) = (self.rkv, self.store.clone());
        Once::new(move || {
            let handle = rkv.open_store(&store)?;
            rkv.write_with(&[&store], |writer| handle.delete(writer, range))
        })
    }
}
