// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

use std::cell::{
    Cell,
    RefCell,
};
use std::collections::{
    HashMap,
    HashSet,
};
use std::sync::{
    Arc,
    MutexGuard,
};

use log::debug;

use crate::backend::{
    EnvironmentImpl,
    StoreId,
    StoreSnapshot,
};
use crate::env::Rxkv;
use crate::error::StoreError;
use crate::store::ObjectStore;

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum Mode {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum TransactionState {
    /// Waiting for the stores in scope to become available.
    Open,
    Active,
    Committed,
    Aborted,
}

/// The state shared by readers and writers: the stores in scope, the working
/// snapshot of each, and the lifecycle.
///
/// Every operation goes through `snapshot` or `modify`. The first one to fail
/// aborts the transaction, which throws away all working snapshots, so none of
/// its writes can reach the environment.
#[doc(hidden)]
#[derive(Debug)]
pub struct TxnCore<'env> {
    env: &'env EnvironmentImpl,
    mode: Mode,
    stores: RefCell<HashMap<StoreId, Arc<StoreSnapshot>>>,
    dirty: RefCell<HashSet<StoreId>>,
    state: Cell<TransactionState>,
    cause: RefCell<Option<String>>,
    // Held until the transaction settles.
    locks: Vec<MutexGuard<'env, ()>>,
}

impl<'env> TxnCore<'env> {
    fn begin(rkv: &'env Rxkv, names: &[&str], mode: Mode) -> Result<TxnCore<'env>, StoreError> {
        let env = rkv.backend();
        let mut scope =
            names.iter().map(|name| env.lookup(name).map(|id| (*name, id))).collect::<Result<Vec<_>, _>>()?;
        scope.sort_by(|a, b| a.0.cmp(b.0));
        scope.dedup_by(|a, b| a.0 == b.0);

        let mut core = TxnCore {
            env,
            mode,
            stores: RefCell::new(HashMap::new()),
            dirty: RefCell::new(HashSet::new()),
            state: Cell::new(TransactionState::Open),
            cause: RefCell::new(None),
            locks: Vec::new(),
        };
        if mode == Mode::ReadWrite {
            // Name order, so writers with overlapping scopes can't deadlock.
            for (_, id) in &scope {
                core.locks.push(env.lock_for_write(*id)?);
            }
        }

        let ids: Vec<StoreId> = scope.iter().map(|(_, id)| *id).collect();
        let snapshots = env.snapshots(&ids)?;
        core.stores = RefCell::new(ids.into_iter().zip(snapshots).collect());
        core.state.set(TransactionState::Active);
        Ok(core)
    }

    pub(crate) fn mode(&self) -> Mode {
        self.mode
    }

    pub(crate) fn state(&self) -> TransactionState {
        self.state.get()
    }

    fn ensure_active(&self) -> Result<(), StoreError> {
        match self.state.get() {
            TransactionState::Active => Ok(()),
            _ => Err(StoreError::TransactionInactive),
        }
    }

    /// Abort because of `err`, then hand `err` back for the caller to return.
    pub(crate) fn fail(&self, err: StoreError) -> StoreError {
        if self.state.get() == TransactionState::Active {
            debug!("aborting {:?} transaction: {}", self.mode, err);
            self.state.set(TransactionState::Aborted);
            self.stores.borrow_mut().clear();
            self.dirty.borrow_mut().clear();
            *self.cause.borrow_mut() = Some(err.to_string());
        }
        err
    }

    /// The transaction's current view of `store`, including its own writes.
    pub(crate) fn snapshot(&self, store: &ObjectStore) -> Result<Arc<StoreSnapshot>, StoreError> {
        self.ensure_active()?;
        match self.stores.borrow().get(&store.id()) {
            Some(snapshot) => Ok(snapshot.clone()),
            None => Err(self.fail(StoreError::StoreNotInScope(store.name().to_string()))),
        }
    }

    /// Apply `f` to the working copy of `store`. An error from `f` aborts.
    pub(crate) fn modify<T, F>(&self, store: &ObjectStore, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut StoreSnapshot) -> Result<T, StoreError>,
    {
        self.ensure_active()?;
        if self.mode != Mode::ReadWrite {
            return Err(self.fail(StoreError::ReadOnly));
        }
        let result = {
            let mut stores = self.stores.borrow_mut();
            match stores.get_mut(&store.id()) {
                Some(snapshot) => f(Arc::make_mut(snapshot)),
                None => Err(StoreError::StoreNotInScope(store.name().to_string())),
            }
        };
        match result {
            Ok(value) => {
                self.dirty.borrow_mut().insert(store.id());
                Ok(value)
            },
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Run a fallible read step, aborting on failure.
    pub(crate) fn check<T>(&self, result: Result<T, StoreError>) -> Result<T, StoreError> {
        result.map_err(|err| self.fail(err))
    }

    fn settle(&self) -> Result<(), StoreError> {
        match self.state.get() {
            TransactionState::Active => Ok(()),
            _ => {
                let cause = self.cause.borrow().clone().unwrap_or_else(|| "transaction already settled".to_string());
                Err(StoreError::TransactionAbortError(cause))
            },
        }
    }

    fn commit(&self) -> Result<(), StoreError> {
        self.settle()?;
        if self.mode == Mode::ReadWrite {
            let dirty: Vec<StoreId> = self.dirty.borrow_mut().drain().collect();
            let mut stores = self.stores.borrow_mut();
            let changes = dirty.into_iter().filter_map(|id| stores.remove(&id).map(|s| (id, s))).collect();
            drop(stores);
            if let Err(err) = self.env.commit(changes) {
                let err = self.fail(err);
                return Err(StoreError::TransactionAbortError(err.to_string()));
            }
        }
        self.state.set(TransactionState::Committed);
        Ok(())
    }

    fn abort(&self) {
        if self.state.get() == TransactionState::Active {
            if !self.dirty.borrow().is_empty() {
                debug!("rolled back {} modified store(s)", self.dirty.borrow().len());
            }
            self.state.set(TransactionState::Aborted);
            self.stores.borrow_mut().clear();
            self.dirty.borrow_mut().clear();
            *self.cause.borrow_mut() = Some("aborted by caller".to_string());
        }
    }
}

/// Anything store operations can read through.
pub trait Readable {
    #[doc(hidden)]
    fn core(&self) -> &TxnCore;

    fn mode(&self) -> Mode {
        self.core().mode()
    }

    fn state(&self) -> TransactionState {
        self.core().state()
    }
}

/// A read-only transaction. Sees the stores in its scope as they were when it
/// began, and never blocks or is blocked by writers.
#[derive(Debug)]
pub struct Reader<'env> {
    core: TxnCore<'env>,
}

impl<'env> Reader<'env> {
    pub(crate) fn new(rkv: &'env Rxkv, stores: &[&str]) -> Result<Reader<'env>, StoreError> {
        Ok(Reader {
            core: TxnCore::begin(rkv, stores, Mode::ReadOnly)?,
        })
    }

    /// Finish the transaction. Fails if one of its operations failed.
    pub fn commit(self) -> Result<(), StoreError> {
        self.core.commit()
    }

    pub fn abort(self) {
        self.core.abort();
    }
}

impl<'env> Readable for Reader<'env> {
    fn core(&self) -> &TxnCore {
        &self.core
    }
}

impl<'env> Drop for Reader<'env> {
    fn drop(&mut self) {
        if self.core.state() == TransactionState::Active {
            self.core.state.set(TransactionState::Committed);
        }
    }
}

/// A read-write transaction. Holds the stores in its scope against other
/// writers until it commits or aborts; dropping it without committing rolls it
/// back.
#[derive(Debug)]
pub struct Writer<'env> {
    core: TxnCore<'env>,
}

impl<'env> Writer<'env> {
    pub(crate) fn new(rkv: &'env Rxkv, stores: &[&str]) -> Result<Writer<'env>, StoreError> {
        Ok(Writer {
            core: TxnCore::begin(rkv, stores, Mode::ReadWrite)?,
        })
    }

    /// Publish every write. Fails with `TransactionAbortError` if any operation
    /// in the transaction failed, in which case nothing is published.
    pub fn commit(self) -> Result<(), StoreError> {
        self.core.commit()
    }

    pub fn abort(self) {
        self.core.abort();
    }
}

impl<'env> Readable for Writer<'env> {
    fn core(&self) -> &TxnCore {
        &self.core
    }
}

impl<'env> Drop for Writer<'env> {
    fn drop(&mut self) {
        self.core.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc as StdArc;
    use std::thread;
    use std::time::Duration;

    use tempfile::Builder;

    use super::*;
    use crate::schema::{
        Schema,
        StoreDefinition,
    };
    use crate::value::{
        Key,
        Value,
    };

    fn open(prefix: &str) -> (tempfile::TempDir, Rxkv) {
        let root = Builder::new().prefix(prefix).tempdir().expect("tempdir");
        let schema = Schema::new("test", 1).migration(1, |m| {
            m.create_store(StoreDefinition::new("a")).create_store(StoreDefinition::new("b"));
        });
        let k = Rxkv::open(root.path(), &schema).expect("opened");
        (root, k)
    }

    #[test]
    fn test_isolation_and_rollback() {
        let (_root, k) = open("test_isolation_and_rollback");
        let a = k.open_store("a").expect("store");

        {
            let writer = k.write(&["a"]).expect("writer");
            a.put(&writer, Value::from(1), Some(Key::from("foo"))).expect("wrote");
            assert_eq!(a.get(&writer, "foo").expect("read"), Some(Value::from(1)));

            // Isolation. Reads won't see uncommitted values.
            let reader = k.read(&["a"]).expect("reader");
            assert_eq!(a.get(&reader, "foo").expect("read"), None);
        }

        // Dropped: rolled back.
        let reader = k.read(&["a"]).expect("reader");
        assert_eq!(a.get(&reader, "foo").expect("read"), None);
        reader.commit().expect("committed");

        let writer = k.write(&["a"]).expect("writer");
        a.put(&writer, Value::from(1), Some(Key::from("foo"))).expect("wrote");
        writer.commit().expect("committed");

        let reader = k.read(&["a"]).expect("reader");
        assert_eq!(a.get(&reader, "foo").expect("read"), Some(Value::from(1)));
    }

    #[test]
    fn test_scope_is_fixed() {
        let (_root, k) = open("test_scope_is_fixed");
        let b = k.open_store("b").expect("store");
        let writer = k.write(&["a"]).expect("writer");
        match b.put(&writer, Value::from(1), Some(Key::from(1))) {
            Err(StoreError::StoreNotInScope(name)) => assert_eq!(name, "b"),
            other => panic!("expected scope error, got {:?}", other),
        }
        assert_eq!(writer.state(), TransactionState::Aborted);
    }

    #[test]
    fn test_failure_aborts() {
        let (_root, k) = open("test_failure_aborts");
        let a = k.open_store("a").expect("store");

        let writer = k.write(&["a"]).expect("writer");
        assert_eq!(writer.mode(), Mode::ReadWrite);
        assert_eq!(writer.state(), TransactionState::Active);
        a.add(&writer, Value::from(1), Some(Key::from(1))).expect("added");
        assert!(matches!(a.add(&writer, Value::from(2), Some(Key::from(1))), Err(StoreError::ConstraintError(_))));
        assert_eq!(writer.state(), TransactionState::Aborted);

        // Everything after the failure is refused.
        assert!(matches!(a.get(&writer, 1), Err(StoreError::TransactionInactive)));
        match writer.commit() {
            Err(StoreError::TransactionAbortError(cause)) => assert!(cause.contains("constraint")),
            other => panic!("expected abort, got {:?}", other),
        }

        let reader = k.read(&["a"]).expect("reader");
        assert_eq!(a.get(&reader, 1).expect("read"), None);
    }

    #[test]
    fn test_readers_see_a_snapshot() {
        let (_root, k) = open("test_readers_see_a_snapshot");
        let a = k.open_store("a").expect("store");
        let reader = k.read(&["a"]).expect("reader");
        k.write_with(&["a"], |writer| a.put(writer, Value::from("x"), Some(Key::from(1)))).expect("wrote");
        assert_eq!(a.get(&reader, 1).expect("read"), None);
        assert_eq!(k.read(&["a"]).and_then(|r| a.get(&r, 1)).expect("read"), Some(Value::from("x")));
    }

    #[test]
    fn test_writers_on_a_store_are_serialized() {
        let (_root, k) = open("test_writers_on_a_store_are_serialized");
        let k = StdArc::new(k);
        let a = k.open_store("a").expect("store");

        let writer = k.write(&["a"]).expect("writer");
        a.put(&writer, Value::from(0), Some(Key::from("n"))).expect("wrote");

        let other = {
            let k = k.clone();
            let a = a.clone();
            thread::spawn(move || {
                k.write_with(&["a"], |writer| {
                    let n = a.get(writer, "n")?.and_then(|v| v.as_f64()).unwrap_or(-1.0);
                    a.put(writer, Value::from(n + 1.0), Some(Key::from("n")))
                })
                .expect("second writer")
            })
        };

        // A writer over a disjoint scope is not held up.
        let b = k.open_store("b").expect("store");
        k.write_with(&["b"], |w| b.put(w, Value::Null, Some(Key::from(1)))).expect("disjoint writer");

        thread::sleep(Duration::from_millis(20));
        writer.commit().expect("committed");
        other.join().expect("joined");

        let n = k.read_with(&["a"], |r| a.get(r, "n")).expect("read");
        assert_eq!(n, Some(Value::from(1.0)));
    }
}
