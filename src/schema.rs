// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! Schema declaration: which stores exist, how their records are keyed and
//! which secondary indexes they carry, expressed as an ordered list of
//! versioned migrations.
//!
//! ```
//! use rxkv::{IndexDefinition, Schema, StoreDefinition};
//!
//! let schema = Schema::new("tunewave", 2)
//!     .migration(1, |m| {
//!         m.create_store(
//!             StoreDefinition::new("songs")
//!                 .key_path("entryPath")
//!                 .index(IndexDefinition::new("artists", "artists").multi_entry()),
//!         );
//!     })
//!     .migration(2, |m| {
//!         m.create_index("songs", IndexDefinition::new("title", "title"));
//!     });
//! assert_eq!(schema.version(), 2);
//! ```

use std::collections::BTreeMap;

use bitflags::bitflags;
use serde_derive::{
    Deserialize,
    Serialize,
};

use crate::value::KeyPath;

bitflags! {
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct IndexFlags: u32 {
        /// No two records may share an index key.
        const UNIQUE = 0b01;
        /// An array at the key path indexes the record once per element.
        const MULTI_ENTRY = 0b10;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub key_path: KeyPath,
    pub flags: IndexFlags,
}

impl IndexDefinition {
    pub fn new<P: Into<KeyPath>>(name: &str, key_path: P) -> IndexDefinition {
        IndexDefinition {
            name: name.to_string(),
            key_path: key_path.into(),
            flags: IndexFlags::empty(),
        }
    }

    pub fn multi_entry(mut self) -> IndexDefinition {
        self.flags.insert(IndexFlags::MULTI_ENTRY);
        self
    }

    pub fn unique(mut self) -> IndexDefinition {
        self.flags.insert(IndexFlags::UNIQUE);
        self
    }

    pub fn is_multi_entry(&self) -> bool {
        self.flags.contains(IndexFlags::MULTI_ENTRY)
    }

    pub fn is_unique(&self) -> bool {
        self.flags.contains(IndexFlags::UNIQUE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreDefinition {
    pub name: String,
    /// In-line key location. `None` means keys are supplied alongside values.
    pub key_path: Option<KeyPath>,
    pub auto_increment: bool,
    pub indexes: Vec<IndexDefinition>,
}

impl StoreDefinition {
    pub fn new(name: &str) -> StoreDefinition {
        StoreDefinition {
            name: name.to_string(),
            key_path: None,
            auto_increment: false,
            indexes: vec![],
        }
    }

    pub fn key_path<P: Into<KeyPath>>(mut self, key_path: P) -> StoreDefinition {
        self.key_path = Some(key_path.into());
        self
    }

    pub fn auto_increment(mut self) -> StoreDefinition {
        self.auto_increment = true;
        self
    }

    pub fn index(mut self, index: IndexDefinition) -> StoreDefinition {
        self.indexes.push(index);
        self
    }
}

/// A single schema change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaStep {
    CreateStore(StoreDefinition),
    DeleteStore(String),
    CreateIndex {
        store: String,
        index: IndexDefinition,
    },
    DeleteIndex {
        store: String,
        name: String,
    },
}

/// The schema changes that bring a database up to one version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Migration {
    steps: Vec<SchemaStep>,
}

impl Migration {
    pub fn create_store(&mut self, store: StoreDefinition) -> &mut Migration {
        self.steps.push(SchemaStep::CreateStore(store));
        self
    }

    pub fn delete_store(&mut self, name: &str) -> &mut Migration {
        self.steps.push(SchemaStep::DeleteStore(name.to_string()));
        self
    }

    pub fn create_index(&mut self, store: &str, index: IndexDefinition) -> &mut Migration {
        self.steps.push(SchemaStep::CreateIndex {
            store: store.to_string(),
            index,
        });
        self
    }

    pub fn delete_index(&mut self, store: &str, name: &str) -> &mut Migration {
        self.steps.push(SchemaStep::DeleteIndex {
            store: store.to_string(),
            name: name.to_string(),
        });
        self
    }

    pub fn steps(&self) -> &[SchemaStep] {
        &self.steps
    }
}

/// A database name, its target version, and the migrations that lead there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    name: String,
    version: u32,
    migrations: BTreeMap<u32, Migration>,
}

impl Schema {
    pub fn new(name: &str, version: u32) -> Schema {
        Schema {
            name: name.to_string(),
            version,
            migrations: BTreeMap::new(),
        }
    }

    /// Register the migration for `version`. Registering the same version twice
    /// appends to its steps.
    pub fn migration<F>(mut self, version: u32, f: F) -> Schema
    where
        F: FnOnce(&mut Migration),
    {
        f(self.migrations.entry(version).or_insert_with(Migration::default));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Migrations strictly after `from` and up to the target version, in
    /// ascending version order.
    pub fn pending(&self, from: u32) -> impl Iterator<Item = (u32, &Migration)> {
        let to = self.version;
        self.migrations.iter().filter(move |(v, _)| **v > from && **v <= to).map(|(v, m)| (*v, m))
    }
}
