// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::fmt;

use ordered_float::OrderedFloat;
use serde_derive::{
    Deserialize,
    Serialize,
};

use crate::error::DataError;

/// The kinds of value a record can hold. Used to describe values in errors
/// without dragging the value itself along.
#[repr(u8)]
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Type {
    Null = 1,
    Bool = 2,
    Number = 3,
    Instant = 4, // Millisecond-precision timestamp.
    Str = 5,
    Blob = 6,
    Array = 7,
    Map = 8,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            Type::Null => "null",
            Type::Bool => "bool",
            Type::Number => "number",
            Type::Instant => "instant",
            Type::Str => "str",
            Type::Blob => "blob",
            Type::Array => "array",
            Type::Map => "map",
        })
    }
}

/// A record, or a part of one. Records are usually maps whose fields are
/// addressed by key paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Instant(i64), // Millisecond-precision timestamp.
    Str(String),
    Blob(Vec<u8>),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Build a map value from `(field, value)` pairs.
    pub fn map<I, K, V>(fields: I) -> Value
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Value::Map(fields.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    pub fn value_type(&self) -> Type {
        match self {
            Value::Null => Type::Null,
            Value::Bool(_) => Type::Bool,
            Value::Number(_) => Type::Number,
            Value::Instant(_) => Type::Instant,
            Value::Str(_) => Type::Str,
            Value::Blob(_) => Type::Blob,
            Value::Array(_) => Type::Array,
            Value::Map(_) => Type::Map,
        }
    }

    /// Look up a field of a map value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        match self {
            Value::Map(fields) => fields.get(field),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Follow a dotted path of field names. The empty path is the value itself.
    fn resolve(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return Some(self);
        }
        path.split('.').try_fold(self, |value, field| value.get(field))
    }

    /// Set the value at a dotted path, creating intermediate maps as needed.
    fn assign(&mut self, path: &str, new: Value) -> Result<(), DataError> {
        let mut fields: Vec<&str> = path.split('.').collect();
        let last = match fields.pop() {
            Some(last) if !last.is_empty() => last,
            _ => return Err(DataError::KeyInjection(path.to_string())),
        };
        let mut cursor = self;
        for field in fields {
            cursor = match cursor {
                Value::Map(map) => map.entry(field.to_string()).or_insert_with(|| Value::Map(BTreeMap::new())),
                _ => return Err(DataError::KeyInjection(path.to_string())),
            };
        }
        match cursor {
            Value::Map(map) => {
                map.insert(last.to_string(), new);
                Ok(())
            },
            _ => Err(DataError::KeyInjection(path.to_string())),
        }
    }

    /// Shallow merge: every field of `partial` replaces the same field of `self`.
    pub(crate) fn merge(&mut self, partial: Value) -> Result<(), DataError> {
        match (self, partial) {
            (Value::Map(existing), Value::Map(fields)) => {
                existing.extend(fields);
                Ok(())
            },
            (Value::Map(_), other) => Err(DataError::NotAMap(other.value_type())),
            (existing, _) => Err(DataError::NotAMap(existing.value_type())),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::Instant(ms) => write!(f, "@{}", ms),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Blob(bytes) => write!(f, "<{} bytes>", bytes.len()),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            },
            Value::Map(fields) => {
                f.write_str("{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", name, value)?;
                }
                f.write_str("}")
            },
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Value {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Value {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Value {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Value {
        Value::Number(f64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Value {
        Value::Number(f64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Value {
        Value::Array(items)
    }
}

impl From<Key> for Value {
    fn from(key: Key) -> Value {
        match key {
            Key::Number(n) => Value::Number(n.into_inner()),
            Key::Date(ms) => Value::Instant(ms),
            Key::Str(s) => Value::Str(s),
            Key::Binary(bytes) => Value::Blob(bytes),
            Key::Array(keys) => Value::Array(keys.into_iter().map(Value::from).collect()),
        }
    }
}

/// A primary or index key.
///
/// The variant order is significant: keys of different types compare as
/// number < date < string < binary < array, and the derived `Ord` relies on it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Key {
    Number(OrderedFloat<f64>),
    Date(i64),
    Str(String),
    Binary(Vec<u8>),
    Array(Vec<Key>),
}

impl Key {
    pub fn number(n: f64) -> Key {
        Key::Number(OrderedFloat(n))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Key::Number(n) => write!(f, "{}", n),
            Key::Date(ms) => write!(f, "@{}", ms),
            Key::Str(s) => write!(f, "{:?}", s),
            Key::Binary(bytes) => write!(f, "<{} bytes>", bytes.len()),
            Key::Array(keys) => {
                f.write_str("[")?;
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", key)?;
                }
                f.write_str("]")
            },
        }
    }
}

impl TryFrom<&Value> for Key {
    type Error = DataError;

    fn try_from(value: &Value) -> Result<Key, DataError> {
        match value {
            Value::Number(n) if n.is_nan() => Err(DataError::NanKey),
            Value::Number(n) => Ok(Key::number(*n)),
            Value::Instant(ms) => Ok(Key::Date(*ms)),
            Value::Str(s) => Ok(Key::Str(s.clone())),
            Value::Blob(bytes) => Ok(Key::Binary(bytes.clone())),
            Value::Array(items) => items.iter().map(Key::try_from).collect::<Result<_, _>>().map(Key::Array),
            other => Err(DataError::InvalidKey(other.value_type())),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Key {
        Key::Str(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Key {
        Key::Str(s)
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Key {
        Key::number(n as f64)
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Key {
        Key::number(f64::from(n))
    }
}

impl From<u32> for Key {
    fn from(n: u32) -> Key {
        Key::number(f64::from(n))
    }
}

/// Where a key lives inside a record: one dotted path, or several whose keys
/// are combined into an array key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyPath {
    Single(String),
    Compound(Vec<String>),
}

impl KeyPath {
    pub fn is_compound(&self) -> bool {
        matches!(self, KeyPath::Compound(_))
    }

    /// Extract the key at this path, or `None` if the path is missing or does
    /// not hold a valid key.
    pub fn extract(&self, value: &Value) -> Option<Key> {
        match self {
            KeyPath::Single(path) => value.resolve(path).and_then(|v| Key::try_from(v).ok()),
            KeyPath::Compound(paths) => paths
                .iter()
                .map(|path| value.resolve(path).and_then(|v| Key::try_from(v).ok()))
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
        }
    }

    /// Like `extract`, but a key that is present and invalid is an error
    /// rather than `None`.
    pub(crate) fn try_extract(&self, value: &Value) -> Result<Option<Key>, DataError> {
        match self {
            KeyPath::Single(path) => value.resolve(path).map(Key::try_from).transpose(),
            KeyPath::Compound(paths) => {
                let mut keys = Vec::with_capacity(paths.len());
                for path in paths {
                    match value.resolve(path) {
                        Some(part) => keys.push(Key::try_from(part)?),
                        None => return Ok(None),
                    }
                }
                Ok(Some(Key::Array(keys)))
            },
        }
    }

    /// Extract the index keys for a record. A multi-entry index over an array
    /// contributes one key per distinct valid element; invalid elements are
    /// skipped rather than excluding the whole record.
    pub(crate) fn extract_index_keys(&self, value: &Value, multi_entry: bool) -> Vec<Key> {
        match (self, multi_entry) {
            (KeyPath::Single(path), true) => match value.resolve(path) {
                Some(Value::Array(items)) => {
                    let mut keys: Vec<Key> = items.iter().filter_map(|item| Key::try_from(item).ok()).collect();
                    keys.sort();
                    keys.dedup();
                    keys
                },
                Some(other) => Key::try_from(other).ok().into_iter().collect(),
                None => vec![],
            },
            _ => self.extract(value).into_iter().collect(),
        }
    }

    /// Write a generated key into a record that lacks one.
    pub(crate) fn inject(&self, value: &mut Value, key: Key) -> Result<(), DataError> {
        match self {
            KeyPath::Single(path) => value.assign(path, Value::from(key)),
            KeyPath::Compound(_) => Err(DataError::KeyInjection(self.to_string())),
        }
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KeyPath::Single(path) => f.write_str(path),
            KeyPath::Compound(paths) => write!(f, "[{}]", paths.join(", ")),
        }
    }
}

impl From<&str> for KeyPath {
    fn from(path: &str) -> KeyPath {
        KeyPath::Single(path.to_string())
    }
}

impl From<String> for KeyPath {
    fn from(path: String) -> KeyPath {
        KeyPath::Single(path)
    }
}

impl From<&[&str]> for KeyPath {
    fn from(paths: &[&str]) -> KeyPath {
        KeyPath::Compound(paths.iter().map(|p| p.to_string()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song() -> Value {
        Value::map(vec![
            ("entryPath", Value::from("/music/a.mp3")),
            ("title", Value::from("Intro")),
            ("artists", Value::Array(vec!["A".into(), "B".into(), "A".into(), Value::Null])),
            ("tags", Value::map(vec![("year", 1999)])),
        ])
    }

    #[test]
    fn test_key_type_ordering() {
        let mut keys = vec![
            Key::Array(vec![Key::number(0.0)]),
            Key::Binary(vec![0]),
            Key::from("a"),
            Key::Date(0),
            Key::number(10.0),
            Key::number(-1.0),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                Key::number(-1.0),
                Key::number(10.0),
                Key::Date(0),
                Key::from("a"),
                Key::Binary(vec![0]),
                Key::Array(vec![Key::number(0.0)]),
            ]
        );
    }

    #[test]
    fn test_invalid_keys() {
        assert!(matches!(Key::try_from(&Value::Null), Err(DataError::InvalidKey(Type::Null))));
        assert!(matches!(Key::try_from(&Value::Number(f64::NAN)), Err(DataError::NanKey)));
        assert!(Key::try_from(&Value::Array(vec![Value::Bool(true)])).is_err());
    }

    #[test]
    fn test_extract() {
        let value = song();
        assert_eq!(KeyPath::from("title").extract(&value), Some(Key::from("Intro")));
        assert_eq!(KeyPath::from("tags.year").extract(&value), Some(Key::from(1999)));
        assert_eq!(KeyPath::from("missing").extract(&value), None);
        // An array containing null is not a key.
        assert_eq!(KeyPath::from("artists").extract(&value), None);

        let compound = KeyPath::from(&["title", "tags.year"][..]);
        assert_eq!(compound.extract(&value), Some(Key::Array(vec![Key::from("Intro"), Key::from(1999)])));

        assert_eq!(KeyPath::from("missing").try_extract(&value).expect("missing is fine"), None);
        assert!(matches!(KeyPath::from("artists").try_extract(&value), Err(DataError::InvalidKey(Type::Null))));
    }

    #[test]
    fn test_multi_entry_keys() {
        let value = song();
        let path = KeyPath::from("artists");
        assert_eq!(path.extract_index_keys(&value, true), vec![Key::from("A"), Key::from("B")]);
        assert!(path.extract_index_keys(&value, false).is_empty());
        assert_eq!(KeyPath::from("title").extract_index_keys(&value, true), vec![Key::from("Intro")]);
    }

    #[test]
    fn test_inject_and_merge() {
        let mut value = Value::map(vec![("name", "x")]);
        KeyPath::from("meta.id").inject(&mut value, Key::from(7)).expect("injected");
        assert_eq!(KeyPath::from("meta.id").extract(&value), Some(Key::from(7)));

        let mut record = Value::map(vec![("f", Value::from("old")), ("g", Value::from("g0"))]);
        record.merge(Value::map(vec![("f", "new")])).expect("merged");
        assert_eq!(record, Value::map(vec![("f", "new"), ("g", "g0")]));
        assert!(record.merge(Value::from(1)).is_err());
    }
}
