// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! Brings a stored image up to a schema's target version.
//!
//! Every migration registered for a version after the stored one, up to and
//! including the target, runs in ascending order as part of one upgrade. The
//! upgrade works on a copy of the image: if any step fails, the stored image and
//! its version are left as they were.
//!
//! Migrations only change the shape of the database. Creating an index on a
//! store that already holds records files those records under it, which is
//! where a `UNIQUE` index can fail the upgrade.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::info;

use crate::backend::{
    Image,
    StoreSnapshot,
};
use crate::error::StoreError;
use crate::schema::{
    Schema,
    SchemaStep,
    StoreDefinition,
};

pub(crate) struct Migrator;

impl Migrator {
    /// Upgrade `image` to `schema`'s version. Returns the versions whose
    /// migrations were applied, which is empty when the image is current.
    pub(crate) fn upgrade(image: &mut Image, schema: &Schema) -> Result<Vec<u32>, StoreError> {
        let requested = schema.version();
        if requested == 0 {
            return Err(StoreError::InvalidSchema("version must be at least 1".to_string()));
        }
        if image.version > requested {
            return Err(StoreError::VersionError {
                stored: image.version,
                requested,
            });
        }
        if image.version == requested {
            return Ok(vec![]);
        }

        let mut stores: BTreeMap<String, StoreSnapshot> =
            image.stores.iter().map(|s| (s.name().to_string(), StoreSnapshot::clone(s))).collect();
        let mut applied = vec![];
        for (version, migration) in schema.pending(image.version) {
            for step in migration.steps() {
                Migrator::apply(&mut stores, step)?;
            }
            applied.push(version);
        }

        info!("upgraded `{}` from version {} to {} (applied {:?})", schema.name(), image.version, requested, applied);
        image.version = requested;
        image.stores = stores.into_iter().map(|(_, s)| Arc::new(s)).collect();
        Ok(applied)
    }

    fn apply(stores: &mut BTreeMap<String, StoreSnapshot>, step: &SchemaStep) -> Result<(), StoreError> {
        match step {
            SchemaStep::CreateStore(definition) => {
                if stores.contains_key(&definition.name) {
                    return Err(StoreError::constraint(format!("store `{}` already exists", definition.name)));
                }
                if definition.auto_increment && definition.key_path.as_ref().map_or(false, |p| p.is_compound()) {
                    return Err(StoreError::InvalidSchema(format!(
                        "store `{}` cannot generate keys for a compound key path",
                        definition.name
                    )));
                }
                // Indexes go through `create_index` so they are validated like
                // any other.
                let mut snapshot = StoreSnapshot::new(StoreDefinition {
                    indexes: vec![],
                    ..definition.clone()
                });
                for index in &definition.indexes {
                    snapshot.create_index(index.clone())?;
                }
                stores.insert(definition.name.clone(), snapshot);
            },
            SchemaStep::DeleteStore(name) => {
                stores.remove(name).ok_or_else(|| StoreError::not_found(format!("store `{}`", name)))?;
            },
            SchemaStep::CreateIndex {
                store,
                index,
            } => {
                let snapshot =
                    stores.get_mut(store).ok_or_else(|| StoreError::not_found(format!("store `{}`", store)))?;
                snapshot.create_index(index.clone())?;
            },
            SchemaStep::DeleteIndex {
                store,
                name,
            } => {
                let snapshot =
                    stores.get_mut(store).ok_or_else(|| StoreError::not_found(format!("store `{}`", store)))?;
                snapshot.delete_index(name)?;
            },
        }
        Ok(())
    }
}
