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
use std::fs;
use std::io;
use std::path::{
    Path,
    PathBuf,
};
use std::sync::Mutex;

use bitflags::bitflags;
use lazy_static::lazy_static;
use log::{
    debug,
    warn,
};

use crate::backend::{
    EnvironmentImpl,
    Image,
};
use crate::error::StoreError;
use crate::migrator::Migrator;
use crate::readwrite::{
    Reader,
    Writer,
};
use crate::schema::{
    Schema,
    StoreDefinition,
};
use crate::store::{
    Index,
    ObjectStore,
};

lazy_static! {
    /// Every environment open in this process, by canonical path, with the
    /// version it was opened at.
    static ref OPEN_ENVIRONMENTS: Mutex<BTreeMap<PathBuf, u32>> = Mutex::new(BTreeMap::new());
}

bitflags! {
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct EnvironmentFlags: u32 {
        /// Keep commits in memory; only `Rxkv::sync` writes to disk.
        const NO_SYNC = 0b01;
        /// Create the environment directory if it does not exist.
        const CREATE_DIR = 0b10;
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EnvironmentBuilder {
    flags: EnvironmentFlags,
}

impl EnvironmentBuilder {
    pub fn new() -> EnvironmentBuilder {
        EnvironmentBuilder::default()
    }

    pub fn set_flags<T>(&mut self, flags: T) -> &mut Self
    where
        T: Into<EnvironmentFlags>,
    {
        self.flags = flags.into();
        self
    }

    pub fn flags(&self) -> EnvironmentFlags {
        self.flags
    }

    /// Open the environment at `path`, upgrading it to `schema` if it was
    /// created at an older version.
    ///
    /// A process opens each environment once. While a handle to `path` is
    /// alive, asking for a newer version fails with `ConnectionBlocked`, an
    /// older one with `VersionError`, and the same one with `ConnectionError`.
    pub fn open(&self, path: &Path, schema: &Schema) -> Result<Rxkv, StoreError> {
        self.check_dir(path)?;
        let canonical = canonical(path)?;
        let mut open = OPEN_ENVIRONMENTS.lock()?;
        if let Some(&current) = open.get(&canonical) {
            return Err(already_open(canonical, current, Some(schema.version())));
        }

        let stored = Image::read_from_disk(path)?;
        let mut image = match stored {
            Some(image) => {
                if image.name != schema.name() {
                    warn!("opening `{}` at {:?}, which was created as `{}`", schema.name(), path, image.name);
                }
                image
            },
            None => Image::empty(schema.name()),
        };

        let applied = Migrator::upgrade(&mut image, schema)?;
        if !applied.is_empty() {
            image.write_to_disk(path)?;
        }
        debug!("opened `{}` at version {} in {:?}", image.name, image.version, path);
        open.insert(canonical.clone(), image.version);
        Ok(Rxkv::from_image(path, canonical, image, self.flags))
    }

    /// Open an environment as it is stored, without a schema. Fails if `path`
    /// holds no environment.
    pub fn open_existing(&self, path: &Path) -> Result<Rxkv, StoreError> {
        self.check_dir(path)?;
        let canonical = canonical(path)?;
        let mut open = OPEN_ENVIRONMENTS.lock()?;
        if let Some(&current) = open.get(&canonical) {
            return Err(already_open(canonical, current, None));
        }
        let image =
            Image::read_from_disk(path)?.ok_or_else(|| StoreError::EnvironmentDoesNotExistError(path.into()))?;
        open.insert(canonical.clone(), image.version);
        Ok(Rxkv::from_image(path, canonical, image, self.flags))
    }

    fn check_dir(&self, path: &Path) -> Result<(), StoreError> {
        if !path.is_dir() {
            if !self.flags.contains(EnvironmentFlags::CREATE_DIR) {
                return Err(StoreError::DirectoryDoesNotExistError(path.into()));
            }
            fs::create_dir_all(path)?;
        }
        Ok(())
    }
}

fn already_open(path: PathBuf, current: u32, requested: Option<u32>) -> StoreError {
    match requested {
        Some(requested) if requested > current => StoreError::ConnectionBlocked {
            path,
            current,
            requested,
        },
        Some(requested) if requested < current => StoreError::VersionError {
            stored: current,
            requested,
        },
        _ => StoreError::ConnectionError(format!("{:?} is already open in this process", path)),
    }
}

#[cfg(not(feature = "no-canonicalize-path"))]
pub(crate) fn canonical(path: &Path) -> io::Result<PathBuf> {
    path.canonicalize()
}

#[cfg(feature = "no-canonicalize-path")]
pub(crate) fn canonical(path: &Path) -> io::Result<PathBuf> {
    Ok(path.to_path_buf())
}

/// Removes an environment from `OPEN_ENVIRONMENTS` when its handle is dropped.
#[derive(Debug)]
struct Registration {
    path: PathBuf,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut open = match OPEN_ENVIRONMENTS.lock() {
            Ok(open) => open,
            Err(poisoned) => poisoned.into_inner(),
        };
        open.remove(&self.path);
    }
}

/// An open database: a fixed set of object stores in one directory.
#[derive(Debug)]
pub struct Rxkv {
    path: PathBuf,
    env: EnvironmentImpl,
    // Released last, once nothing can commit through `env`.
    _registration: Registration,
}

/// Static methods.
impl Rxkv {
    pub fn environment_builder() -> EnvironmentBuilder {
        EnvironmentBuilder::new()
    }

    /// Open the environment at `path` with default flags.
    pub fn open(path: &Path, schema: &Schema) -> Result<Rxkv, StoreError> {
        Rxkv::environment_builder().open(path, schema)
    }

    fn from_image(path: &Path, canonical: PathBuf, image: Image, flags: EnvironmentFlags) -> Rxkv {
        let sync_on_commit = !flags.contains(EnvironmentFlags::NO_SYNC);
        Rxkv {
            path: path.into(),
            env: EnvironmentImpl::new(path, image, sync_on_commit),
            _registration: Registration {
                path: canonical,
            },
        }
    }
}

/// Introspection.
impl Rxkv {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        self.env.name()
    }

    pub fn version(&self) -> u32 {
        self.env.version()
    }

    pub fn store_names(&self) -> Vec<String> {
        self.env.store_names().map(String::from).collect()
    }

    /// The definition of `name` as the environment currently has it.
    pub fn store_definition(&self, name: &str) -> Result<StoreDefinition, StoreError> {
        let id = self.env.lookup(name)?;
        Ok(self.env.snapshot(id)?.definition.clone())
    }

    pub(crate) fn backend(&self) -> &EnvironmentImpl {
        &self.env
    }
}

/// Store handles.
impl Rxkv {
    pub fn open_store(&self, name: &str) -> Result<ObjectStore, StoreError> {
        let id = self.env.lookup(name)?;
        Ok(ObjectStore::new(id, name))
    }

    /// Shorthand for `open_store(store)?.index(name)`.
    pub fn open_index(&self, store: &str, name: &str) -> Result<Index, StoreError> {
        Ok(self.open_store(store)?.index(name))
    }
}

/// Transactions.
impl Rxkv {
    /// Begin a read-only transaction over `stores`.
    pub fn read(&self, stores: &[&str]) -> Result<Reader, StoreError> {
        Reader::new(self, stores)
    }

    /// Begin a read-write transaction over `stores`, waiting for any other
    /// writer that holds one of them.
    pub fn write(&self, stores: &[&str]) -> Result<Writer, StoreError> {
        Writer::new(self, stores)
    }

    /// Run `f` in a read-only transaction.
    pub fn read_with<T, F>(&self, stores: &[&str], f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Reader) -> Result<T, StoreError>,
    {
        let reader = self.read(stores)?;
        let result = f(&reader)?;
        reader.commit()?;
        Ok(result)
    }

    /// Run `f` in a read-write transaction that commits when `f` returns `Ok`
    /// and is rolled back when it returns `Err`.
    pub fn write_with<T, F>(&self, stores: &[&str], f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Writer) -> Result<T, StoreError>,
    {
        let writer = self.write(stores)?;
        match f(&writer) {
            Ok(result) => {
                writer.commit()?;
                Ok(result)
            },
            Err(err) => {
                writer.abort();
                Err(err)
            },
        }
    }

    /// Write the committed state to disk. Only needed with `NO_SYNC`.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.env.sync()
    }
}
