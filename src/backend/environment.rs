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
    HashMap,
};
use std::fs;
use std::io::{
    self,
    BufReader,
    Cursor,
    Read,
    Write,
};
use std::path::{
    Path,
    PathBuf,
};
use std::sync::{
    Arc,
    Mutex,
    MutexGuard,
    RwLock,
};

use byteorder::{
    BigEndian,
    ReadBytesExt,
    WriteBytesExt,
};
use id_arena::{
    Arena,
    Id,
};
use log::debug;
use serde_derive::{
    Deserialize,
    Serialize,
};

use super::StoreSnapshot;
use crate::error::StoreError;

pub(crate) const DEFAULT_DB_FILENAME: &str = "data.rxkv.bin";

const MAGIC: &[u8; 4] = b"RXKV";
const FORMAT_VERSION: u32 = 1;

pub(crate) type StoreId = Id<StoreSlot>;

/// Everything that is persisted: the database's identity and its stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Image {
    pub(crate) name: String,
    pub(crate) version: u32,
    pub(crate) stores: Vec<Arc<StoreSnapshot>>,
}

impl Image {
    pub(crate) fn empty(name: &str) -> Image {
        Image {
            name: name.to_string(),
            version: 0,
            stores: vec![],
        }
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        let mut bytes = Vec::new();
        bytes.write_all(MAGIC)?;
        bytes.write_u32::<BigEndian>(FORMAT_VERSION)?;
        bincode::serialize_into(&mut bytes, self)?;
        Ok(bytes)
    }

    fn check_header<R: Read>(reader: &mut R) -> Result<(), StoreError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic).map_err(|_| StoreError::FileInvalid)?;
        if &magic != MAGIC {
            return Err(StoreError::FileInvalid);
        }
        if reader.read_u32::<BigEndian>().map_err(|_| StoreError::FileInvalid)? != FORMAT_VERSION {
            return Err(StoreError::FileInvalid);
        }
        Ok(())
    }

    fn decode(bytes: &[u8]) -> Result<Image, StoreError> {
        let mut reader = Cursor::new(bytes);
        Image::check_header(&mut reader)?;
        Ok(bincode::deserialize_from(reader)?)
    }

    /// The schema version of the image stored in `dir`, read without decoding
    /// its stores.
    pub(crate) fn stored_version(dir: &Path) -> Result<Option<u32>, StoreError> {
        let file = match fs::File::open(dir.join(DEFAULT_DB_FILENAME)) {
            Ok(file) => file,
            Err(ref err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let mut reader = BufReader::new(file);
        Image::check_header(&mut reader)?;
        // An image starts with its name, then its version.
        let (_name, version): (String, u32) = bincode::deserialize_from(reader)?;
        Ok(Some(version))
    }

    /// Read the image stored in `dir`, if there is one.
    pub(crate) fn read_from_disk(dir: &Path) -> Result<Option<Image>, StoreError> {
        let path = dir.join(DEFAULT_DB_FILENAME);
        if fs::metadata(&path).is_err() {
            return Ok(None);
        }
        Image::decode(&fs::read(&path)?).map(Some)
    }

    /// Replace the image stored in `dir`. The new image is written next to the
    /// old one and renamed over it.
    pub(crate) fn write_to_disk(&self, dir: &Path) -> Result<(), StoreError> {
        let path = dir.join(DEFAULT_DB_FILENAME);
        let temp = dir.join(format!("{}.tmp", DEFAULT_DB_FILENAME));
        fs::write(&temp, self.encode()?)?;
        fs::rename(&temp, &path)?;
        debug!("wrote {} store(s) to {:?}", self.stores.len(), path);
        Ok(())
    }
}

/// One store of an open environment. `write_lock` serializes writers; `data`
/// holds the latest committed snapshot.
#[derive(Debug)]
pub(crate) struct StoreSlot {
    write_lock: Mutex<()>,
    data: RwLock<Arc<StoreSnapshot>>,
}

/// An opened environment. The set of stores is fixed for its lifetime; schema
/// changes happen before it is built.
///
/// `commit_lock` orders commits and flushes. `publish` is held for writing
/// while a commit swaps in its snapshots, and for reading while a transaction
/// takes its snapshots, so no transaction sees part of a commit.
#[derive(Debug)]
pub(crate) struct EnvironmentImpl {
    dir: PathBuf,
    name: String,
    version: u32,
    sync_on_commit: bool,
    arena: Arena<StoreSlot>,
    names: BTreeMap<String, StoreId>,
    commit_lock: Mutex<()>,
    publish: RwLock<()>,
}

impl EnvironmentImpl {
    pub(crate) fn new(dir: &Path, image: Image, sync_on_commit: bool) -> EnvironmentImpl {
        let mut arena = Arena::new();
        let mut names = BTreeMap::new();
        for snapshot in image.stores {
            let name = snapshot.name().to_string();
            let id = arena.alloc(StoreSlot {
                write_lock: Mutex::new(()),
                data: RwLock::new(snapshot),
            });
            names.insert(name, id);
        }
        EnvironmentImpl {
            dir: dir.to_path_buf(),
            name: image.name,
            version: image.version,
            sync_on_commit,
            arena,
            names,
            commit_lock: Mutex::new(()),
            publish: RwLock::new(()),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn version(&self) -> u32 {
        self.version
    }

    pub(crate) fn store_names(&self) -> impl Iterator<Item = &str> {
        self.names.keys().map(String::as_str)
    }

    pub(crate) fn lookup(&self, name: &str) -> Result<StoreId, StoreError> {
        self.names.get(name).copied().ok_or_else(|| StoreError::not_found(format!("store `{}`", name)))
    }

    pub(crate) fn snapshot(&self, id: StoreId) -> Result<Arc<StoreSnapshot>, StoreError> {
        Ok(self.arena[id].data.read()?.clone())
    }

    /// The committed snapshots of `ids`, all as of the same commit.
    pub(crate) fn snapshots(&self, ids: &[StoreId]) -> Result<Vec<Arc<StoreSnapshot>>, StoreError> {
        let _published = self.publish.read()?;
        ids.iter().map(|id| self.snapshot(*id)).collect()
    }

    /// Block until no other writer holds `id`.
    pub(crate) fn lock_for_write(&self, id: StoreId) -> Result<MutexGuard<()>, StoreError> {
        Ok(self.arena[id].write_lock.lock()?)
    }

    fn image(&self, overrides: &HashMap<StoreId, Arc<StoreSnapshot>>) -> Result<Image, StoreError> {
        let mut stores = Vec::with_capacity(self.names.len());
        for id in self.names.values() {
            stores.push(match overrides.get(id) {
                Some(snapshot) => snapshot.clone(),
                None => self.snapshot(*id)?,
            });
        }
        Ok(Image {
            name: self.name.clone(),
            version: self.version,
            stores,
        })
    }

    /// Publish a writer's changes. The caller holds the write locks of every
    /// store in `changes`.
    pub(crate) fn commit(&self, changes: HashMap<StoreId, Arc<StoreSnapshot>>) -> Result<(), StoreError> {
        if changes.is_empty() {
            return Ok(());
        }
        let _guard = self.commit_lock.lock()?;
        if self.sync_on_commit {
            self.check_stored_version()?;
            self.image(&changes)?.write_to_disk(&self.dir)?;
        }
        let _published = self.publish.write()?;
        for (id, snapshot) in changes {
            *self.arena[id].data.write()? = snapshot;
        }
        Ok(())
    }

    /// Flush the committed state to disk.
    pub(crate) fn sync(&self) -> Result<(), StoreError> {
        let _guard = self.commit_lock.lock()?;
        self.check_stored_version()?;
        self.image(&HashMap::new())?.write_to_disk(&self.dir)
    }

    /// Refuse to overwrite an image that was upgraded past this environment.
    fn check_stored_version(&self) -> Result<(), StoreError> {
        match Image::stored_version(&self.dir)? {
            Some(stored) if stored > self.version => Err(StoreError::VersionError {
                stored,
                requested: self.version,
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::Builder;

    use super::*;
    use crate::schema::StoreDefinition;
    use crate::value::{
        Key,
        Value,
    };

    #[test]
    fn test_image_round_trips_through_disk() {
        let root = Builder::new().prefix("test_image_round_trips").tempdir().expect("tempdir");
        let mut store = StoreSnapshot::new(StoreDefinition::new("s"));
        store.insert(Key::from(1), Value::from("one"), true).expect("inserted");

        let image = Image {
            name: "db".to_string(),
            version: 3,
            stores: vec![Arc::new(store)],
        };
        image.write_to_disk(root.path()).expect("written");

        let read = Image::read_from_disk(root.path()).expect("read").expect("present");
        assert_eq!(read.name, "db");
        assert_eq!(read.version, 3);
        assert_eq!(read.stores[0].get(&Key::from(1)), Some(&Value::from("one")));
    }

    #[test]
    fn test_rejects_foreign_files() {
        let root = Builder::new().prefix("test_rejects_foreign_files").tempdir().expect("tempdir");
        fs::write(root.path().join(DEFAULT_DB_FILENAME), b"not an image").expect("written");
        match Image::read_from_disk(root.path()) {
            Err(StoreError::FileInvalid) => {},
            other => panic!("expected FileInvalid, got {:?}", other),
        }
        assert!(Image::read_from_disk(&root.path().join("missing")).expect("read").is_none());
        assert!(Image::stored_version(&root.path().join("missing")).expect("read").is_none());
    }

    #[test]
    fn test_stale_environment_cannot_overwrite_newer_image() {
        let root = Builder::new().prefix("test_stale_environment").tempdir().expect("tempdir");
        let image = Image {
            name: "db".to_string(),
            version: 1,
            stores: vec![Arc::new(StoreSnapshot::new(StoreDefinition::new("s")))],
        };
        image.write_to_disk(root.path()).expect("written");
        let env = EnvironmentImpl::new(root.path(), image.clone(), true);
        assert_eq!(Image::stored_version(root.path()).expect("read"), Some(1));

        // Someone else upgrades the stored image.
        Image {
            version: 2,
            ..image
        }
        .write_to_disk(root.path())
        .expect("upgraded");

        let id = env.lookup("s").expect("store");
        let mut changed = (*env.snapshot(id).expect("snapshot")).clone();
        changed.insert(Key::from(1), Value::from("one"), true).expect("inserted");
        let mut changes = HashMap::new();
        changes.insert(id, Arc::new(changed));
        match env.commit(changes) {
            Err(StoreError::VersionError {
                stored: 2,
                requested: 1,
            }) => {},
            other => panic!("expected version error, got {:?}", other),
        }
        assert!(matches!(env.sync(), Err(StoreError::VersionError { .. })));

        let stored = Image::read_from_disk(root.path()).expect("read").expect("present");
        assert_eq!(stored.version, 2);
        assert!(env.snapshot(id).expect("snapshot").get(&Key::from(1)).is_none());
    }
}
