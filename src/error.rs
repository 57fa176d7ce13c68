// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

use std::{
    io,
    path::PathBuf,
    sync,
};

use thiserror::Error;

use crate::value::Type;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("value of type {0} is not a valid key")]
    InvalidKey(Type),

    #[error("NaN is not a valid key")]
    NanKey,

    #[error("key path `{0}` did not yield a valid key")]
    KeyPathMissing(String),

    #[error("store `{0}` uses in-line keys; an explicit key is not allowed")]
    ExplicitKeyForInlineStore(String),

    #[error("store `{0}` has no key path and no key generator; a key is required")]
    KeyRequired(String),

    #[error("cannot inject a generated key at `{0}`")]
    KeyInjection(String),

    #[error("cannot merge {0} into an existing record; both must be maps")]
    NotAMap(Type),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("directory does not exist: {0:?}")]
    DirectoryDoesNotExistError(PathBuf),

    #[error("environment does not exist: {0:?}")]
    EnvironmentDoesNotExistError(PathBuf),

    #[error("file is not a valid environment image")]
    FileInvalid,

    #[error("I/O error: {0:?}")]
    IoError(#[from] io::Error),

    #[error("encoding error: {0}")]
    EncodingError(#[from] bincode::Error),

    #[error("data error: {0}")]
    DataError(#[from] DataError),

    #[error("connection failed: {0}")]
    ConnectionError(String),

    #[error("opening {path:?} at version {requested} is blocked by an open connection at version {current}")]
    ConnectionBlocked {
        path: PathBuf,
        current: u32,
        requested: u32,
    },

    #[error("requested version {requested} is lower than the stored version {stored}")]
    VersionError {
        stored: u32,
        requested: u32,
    },

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("constraint violated: {0}")]
    ConstraintError(String),

    #[error("not found: {0}")]
    NotFoundError(String),

    #[error("store `{0}` is not in the transaction's scope")]
    StoreNotInScope(String),

    #[error("transaction is no longer active")]
    TransactionInactive,

    #[error("transaction aborted: {0}")]
    TransactionAbortError(String),

    #[error("attempted a write in a read-only transaction")]
    ReadOnly,

    #[error("a store lock was poisoned")]
    LockPoisonError,

    #[error("manager poisoned")]
    ManagerPoisonError,
}

impl StoreError {
    pub fn constraint(message: impl Into<String>) -> StoreError {
        StoreError::ConstraintError(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> StoreError {
        StoreError::NotFoundError(message.into())
    }
}

impl<T> From<sync::PoisonError<T>> for StoreError {
    fn from(_: sync::PoisonError<T>) -> StoreError {
        StoreError::LockPoisonError
    }
}
