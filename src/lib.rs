// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! A typed, indexed, transactional object store.
//!
//! An environment is a directory holding a database: a name, a schema version,
//! and a set of object stores. Each store keeps structured [`Value`]s under
//! ordered primary [`Key`]s, and may have secondary indexes over fields of its
//! records. Stores and indexes are declared by a versioned [`Schema`]; opening
//! an environment created at an older version runs every newer migration.
//!
//! All reads and writes happen in transactions scoped to a fixed set of
//! stores. Readers see a consistent snapshot and never wait. Writers over a
//! common store take turns, and commit all of their writes or none: the first
//! failing operation aborts the transaction and discards everything it wrote.
//!
//! ## Basic Usage
//! ```
//! use rxkv::{
//!     Direction,
//!     IndexDefinition,
//!     Key,
//!     KeyRange,
//!     Manager,
//!     Schema,
//!     StoreDefinition,
//!     StoreError,
//!     Value,
//! };
//! use tempfile::Builder;
//!
//! # fn main() -> Result<(), StoreError> {
//! let root = Builder::new().prefix("simple-db").tempdir()?;
//!
//! // Version 1 declares a store of songs keyed by their path, with an index
//! // over each song's artists.
//! let schema = Schema::new("library", 1).migration(1, |m| {
//!     m.create_store(
//!         StoreDefinition::new("songs")
//!             .key_path("path")
//!             .index(IndexDefinition::new("artists", "artists").multi_entry()),
//!     );
//! });
//!
//! // The manager makes sure a process opens each environment once.
//! let mut manager = Manager::singleton().write().map_err(|_| StoreError::ManagerPoisonError)?;
//! let k = manager.get_or_open(root.path(), &schema)?;
//! let songs = k.open_store("songs")?;
//!
//! k.write_with(&["songs"], |writer| {
//!     let artists = Value::from(vec![Value::from("Miles Davis"), Value::from("John Coltrane")]);
//!     songs.add(writer, Value::map(vec![("path", Value::from("/so-what.mp3")), ("artists", artists)]), None)?;
//!     let artists = Value::from(vec![Value::from("Joni Mitchell")]);
//!     songs.add(writer, Value::map(vec![("path", Value::from("/blue.mp3")), ("artists", artists)]), None)?;
//!     Ok(())
//! })?;
//!
//! let reader = k.read(&["songs"])?;
//! let artists = songs.index("artists");
//! let by_miles = artists.get_all_keys(&reader, Some(KeyRange::only("Miles Davis")), Direction::Ascending)?;
//! assert_eq!(by_miles, vec![Key::from("/so-what.mp3")]);
//! # Ok(())
//! # }
//! ```

mod backend;
mod cursor;
mod env;
mod error;
mod key_range;
mod manager;
mod migrator;
mod query;
mod readwrite;
mod schema;
mod store;
mod subscription;
mod value;

pub use cursor::{
    Cursor,
    CursorRecord,
    Keys,
    WalkOptions,
};
pub use env::{
    EnvironmentBuilder,
    EnvironmentFlags,
    Rxkv,
};
pub use error::{
    DataError,
    StoreError,
};
pub use key_range::{
    Direction,
    KeyRange,
};
pub use manager::Manager;
pub use query::{
    Once,
    Query,
    ScanArray,
    ScanArrayExt,
};
pub use readwrite::{
    Mode,
    Readable,
    Reader,
    TransactionState,
    Writer,
};
pub use schema::{
    IndexDefinition,
    IndexFlags,
    Migration,
    Schema,
    SchemaStep,
    StoreDefinition,
};
pub use store::{
    Index,
    ObjectStore,
};
pub use subscription::Subscription;
pub use value::{
    Key,
    KeyPath,
    Type,
    Value,
};
