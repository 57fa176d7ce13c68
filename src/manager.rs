// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fs;
use std::path::{
    Path,
    PathBuf,
};
use std::sync::{
    Arc,
    RwLock,
};

use lazy_static::lazy_static;
use log::{
    info,
    warn,
};

use crate::env::{
    canonical,
    EnvironmentBuilder,
    EnvironmentFlags,
    Rxkv,
};
use crate::error::StoreError;
use crate::schema::Schema;

lazy_static! {
    static ref MANAGER: RwLock<Manager> = RwLock::new(Manager::new());
}

/// A process should hold one open handle per database directory. This manager
/// hands out that handle, opening it on first use.
///
/// Hold the manager's write lock across `get_or_open`: concurrent callers then
/// wait for the first one's open attempt and receive the handle it made.
#[derive(Debug, Default)]
pub struct Manager {
    environments: BTreeMap<PathBuf, Arc<Rxkv>>,
    builder: EnvironmentBuilder,
}

impl Manager {
    pub fn new() -> Manager {
        Manager::default()
    }

    /// A manager that opens environments with `builder`'s flags.
    pub fn with_builder(builder: EnvironmentBuilder) -> Manager {
        Manager {
            environments: Default::default(),
            builder,
        }
    }

    /// The process-wide default instance.
    pub fn singleton() -> &'static RwLock<Manager> {
        &*MANAGER
    }

    /// Return the open environment at `path`, or `None` if it has not been
    /// opened through this manager.
    pub fn get<'p, P>(&self, path: P) -> Result<Option<Arc<Rxkv>>, StoreError>
    where
        P: Into<&'p Path>,
    {
        let canonical = canonical(path.into())?;
        Ok(self.environments.get(&canonical).cloned())
    }

    /// Return the open environment at `path`, opening it at `schema`'s version
    /// if needed.
    ///
    /// Asking for a newer version than the open handle has reopens it, which
    /// runs the upgrade. That is refused with `ConnectionBlocked` while anyone
    /// else still holds the old handle.
    pub fn get_or_open<'p, P>(&mut self, path: P, schema: &Schema) -> Result<Arc<Rxkv>, StoreError>
    where
        P: Into<&'p Path>,
    {
        let canonical = self.canonicalize(path.into()).map_err(connection_error)?;
        let builder = self.builder;
        match self.environments.entry(canonical) {
            Entry::Occupied(e) => {
                let current = e.get().version();
                let requested = schema.version();
                if requested < current {
                    return Err(StoreError::VersionError {
                        stored: current,
                        requested,
                    });
                }
                if requested == current {
                    return Ok(e.get().clone());
                }
                if Arc::strong_count(e.get()) > 1 {
                    warn!("upgrade of {:?} to version {} blocked by an open connection", e.key(), requested);
                    return Err(StoreError::ConnectionBlocked {
                        path: e.key().clone(),
                        current,
                        requested,
                    });
                }
                // The old handle must be gone before the upgrade can open the
                // directory. If the upgrade fails, nothing is cached for `path`.
                e.get().sync()?;
                let (path, old) = e.remove_entry();
                drop(old);
                let k = Arc::new(builder.open(&path, schema).map_err(connection_error)?);
                info!("reopened {:?} at version {}", path, requested);
                self.environments.insert(path, k.clone());
                Ok(k)
            },
            Entry::Vacant(e) => {
                let k = Arc::new(builder.open(e.key(), schema).map_err(connection_error)?);
                Ok(e.insert(k).clone())
            },
        }
    }

    /// Forget the environment at `path`. It stays open for anyone still holding
    /// it.
    pub fn close<'p, P>(&mut self, path: P) -> Result<Option<Arc<Rxkv>>, StoreError>
    where
        P: Into<&'p Path>,
    {
        let canonical = canonical(path.into())?;
        Ok(self.environments.remove(&canonical))
    }

    fn canonicalize(&self, path: &Path) -> Result<PathBuf, StoreError> {
        if !path.exists() && self.builder.flags().contains(EnvironmentFlags::CREATE_DIR) {
            fs::create_dir_all(path)?;
        }
        Ok(canonical(path)?)
    }
}

/// Failures to reach the database become `ConnectionError`s; schema and
/// version problems keep their own kind.
fn connection_error(err: StoreError) -> StoreError {
    match err {
        StoreError::VersionError {
            ..
        }
        | StoreError::ConnectionBlocked {
            ..
        }
        | StoreError::InvalidSchema(_)
        | StoreError::ConstraintError(_)
        | StoreError::NotFoundError(_)
        | StoreError::ConnectionError(_) => err,
        other => StoreError::ConnectionError(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::Builder;

    use super::*;
    use crate::schema::{
        IndexDefinition,
        StoreDefinition,
    };

    fn schema(version: u32) -> Schema {
        Schema::new("test", version)
            .migration(1, |m| {
                m.create_store(StoreDefinition::new("songs").key_path("path"));
            })
            .migration(2, |m| {
                m.create_index("songs", IndexDefinition::new("title", "title"));
            })
    }

    /// Test that the manager will return the same Rxkv instance each time for each path.
    #[test]
    fn test_same() {
        let root = Builder::new().prefix("test_same").tempdir().expect("tempdir");
        fs::create_dir_all(root.path()).expect("dir created");

        let mut manager = Manager::new();

        let p = root.path();
        assert!(manager.get(p).expect("success").is_none());

        let created_arc = manager.get_or_open(p, &schema(1)).expect("created");
        let fetched_arc = manager.get(p).expect("success").expect("existed");
        assert!(Arc::ptr_eq(&created_arc, &fetched_arc));

        let again = manager.get_or_open(p, &schema(1)).expect("cached");
        assert!(Arc::ptr_eq(&created_arc, &again));
    }

    #[test]
    fn test_blocked_then_upgraded() {
        let root = Builder::new().prefix("test_blocked_then_upgraded").tempdir().expect("tempdir");
        let mut manager = Manager::new();
        let p = root.path();

        let v1 = manager.get_or_open(p, &schema(1)).expect("opened");
        match manager.get_or_open(p, &schema(2)) {
            Err(StoreError::ConnectionBlocked {
                current: 1,
                requested: 2,
                ..
            }) => {},
            other => panic!("expected blocked, got {:?}", other),
        }

        drop(v1);
        let v2 = manager.get_or_open(p, &schema(2)).expect("upgraded");
        assert_eq!(v2.version(), 2);
        assert!(v2.open_index("songs", "title").is_ok());

        match manager.get_or_open(p, &schema(1)) {
            Err(StoreError::VersionError {
                stored: 2,
                requested: 1,
            }) => {},
            other => panic!("expected version error, got {:?}", other),
        }
    }

    #[test]
    fn test_connection_error() {
        let root = Builder::new().prefix("test_connection_error").tempdir().expect("tempdir");
        let mut manager = Manager::new();
        let missing = root.path().join("missing");
        assert!(matches!(manager.get_or_open(missing.as_path(), &schema(1)), Err(StoreError::ConnectionError(_))));

        let mut builder = Rxkv::environment_builder();
        builder.set_flags(EnvironmentFlags::CREATE_DIR);
        let mut manager = Manager::with_builder(builder);
        manager.get_or_open(missing.as_path(), &schema(1)).expect("created");
        assert!(manager.close(missing.as_path()).expect("closed").is_some());
        assert!(manager.get(missing.as_path()).expect("success").is_none());
    }
}
