// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

use std::ops::Bound;

use crate::value::Key;

/// The order in which a cursor or `get_all` visits keys.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum Direction {
    Ascending,
    Descending,
}

impl Default for Direction {
    fn default() -> Direction {
        Direction::Ascending
    }
}

/// A set of keys: a single key, or everything between an optional lower and an
/// optional upper bound, each of which may be open or closed.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRange {
    lower: Bound<Key>,
    upper: Bound<Key>,
}

impl KeyRange {
    /// Every key.
    pub fn all() -> KeyRange {
        KeyRange {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }

    pub fn only<K: Into<Key>>(key: K) -> KeyRange {
        let key = key.into();
        KeyRange {
            lower: Bound::Included(key.clone()),
            upper: Bound::Included(key),
        }
    }

    /// The closed range `[lower, upper]`.
    pub fn bound<L: Into<Key>, U: Into<Key>>(lower: L, upper: U) -> KeyRange {
        KeyRange::bound_with(lower, upper, false, false)
    }

    pub fn bound_with<L: Into<Key>, U: Into<Key>>(lower: L, upper: U, lower_open: bool, upper_open: bool) -> KeyRange {
        KeyRange {
            lower: bound(lower.into(), lower_open),
            upper: bound(upper.into(), upper_open),
        }
    }

    pub fn lower_bound<K: Into<Key>>(lower: K, open: bool) -> KeyRange {
        KeyRange {
            lower: bound(lower.into(), open),
            upper: Bound::Unbounded,
        }
    }

    pub fn upper_bound<K: Into<Key>>(upper: K, open: bool) -> KeyRange {
        KeyRange {
            lower: Bound::Unbounded,
            upper: bound(upper.into(), open),
        }
    }

    pub fn lower(&self) -> Bound<&Key> {
        as_ref(&self.lower)
    }

    pub fn upper(&self) -> Bound<&Key> {
        as_ref(&self.upper)
    }

    pub fn contains(&self, key: &Key) -> bool {
        let above = match &self.lower {
            Bound::Included(lower) => key >= lower,
            Bound::Excluded(lower) => key > lower,
            Bound::Unbounded => true,
        };
        let below = match &self.upper {
            Bound::Included(upper) => key <= upper,
            Bound::Excluded(upper) => key < upper,
            Bound::Unbounded => true,
        };
        above && below
    }

    /// Whether no key can possibly fall in this range.
    pub fn is_empty(&self) -> bool {
        is_empty(self.lower(), self.upper())
    }
}

impl From<Key> for KeyRange {
    fn from(key: Key) -> KeyRange {
        KeyRange::only(key)
    }
}

impl From<&str> for KeyRange {
    fn from(key: &str) -> KeyRange {
        KeyRange::only(key)
    }
}

fn bound(key: Key, open: bool) -> Bound<Key> {
    if open {
        Bound::Excluded(key)
    } else {
        Bound::Included(key)
    }
}

fn as_ref(bound: &Bound<Key>) -> Bound<&Key> {
    match bound {
        Bound::Included(key) => Bound::Included(key),
        Bound::Excluded(key) => Bound::Excluded(key),
        Bound::Unbounded => Bound::Unbounded,
    }
}

/// `BTreeMap::range` panics on inverted bounds, so every range lookup is
/// checked here first.
pub(crate) fn is_empty(lower: Bound<&Key>, upper: Bound<&Key>) -> bool {
    match (lower, upper) {
        (Bound::Included(l), Bound::Included(u)) => l > u,
        (Bound::Included(l), Bound::Excluded(u)) | (Bound::Excluded(l), Bound::Included(u)) => l >= u,
        (Bound::Excluded(l), Bound::Excluded(u)) => l >= u,
        _ => false,
    }
}
