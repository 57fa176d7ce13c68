// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

mod index;
mod object;

pub use index::Index;
pub use object::ObjectStore;

use crate::backend::StoreSnapshot;
use crate::error::{
    DataError,
    StoreError,
};
use crate::value::{
    Key,
    Value,
};

/// Work out the primary key a write goes under, injecting a generated key
/// into the record when the store has both a key path and a generator.
fn resolve_key(store: &mut StoreSnapshot, value: &mut Value, explicit: Option<Key>) -> Result<Key, StoreError> {
    let generates = store.definition.auto_increment;
    let key_path = store.definition.key_path.clone();
    let key = match (key_path, explicit) {
        (Some(_), Some(_)) => return Err(DataError::ExplicitKeyForInlineStore(store.name().to_string()).into()),
        (Some(path), None) => match path.try_extract(value)? {
            Some(key) => key,
            None if generates => {
                let key = store.generate_key();
                path.inject(value, key.clone())?;
                return Ok(key);
            },
            None => return Err(DataError::KeyPathMissing(path.to_string()).into()),
        },
        (None, Some(key)) => key,
        (None, None) if generates => return Ok(store.generate_key()),
        (None, None) => return Err(DataError::KeyRequired(store.name().to_string()).into()),
    };
    if generates {
        store.observe_key(&key);
    }
    Ok(key)
}
