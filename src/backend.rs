// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! The embedded engine: ordered record maps and index maps held as
//! copy-on-write snapshots, persisted as a single image per environment.

mod environment;
mod snapshot;

pub(crate) use environment::{
    EnvironmentImpl,
    Image,
    StoreId,
    DEFAULT_DB_FILENAME,
};
pub(crate) use snapshot::StoreSnapshot;
