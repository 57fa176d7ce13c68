// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

//! Print the stores of an environment, with their definitions and records.
//!
//! ```sh
//! dump [-s STORE] PATH
//! ```

use std::env::args;
use std::io::{
    self,
    Write,
};
use std::path::Path;

use rxkv::{
    Rxkv,
    StoreError,
    WalkOptions,
};

fn main() -> Result<(), StoreError> {
    let mut args = args();
    let mut only = None;
    let mut path = None;

    // The first arg is the name of the program, which we can ignore.
    args.next();

    while let Some(arg) = args.next() {
        if let Some(flag) = arg.strip_prefix('-') {
            match flag {
                "s" => {
                    only = match args.next() {
                        None => panic!("-s must be followed by a store name"),
                        Some(name) => Some(name),
                    };
                },
                other => panic!("arg -{} not recognized", other),
            }
        } else {
            if path.is_some() {
                panic!("must provide only one path to the environment");
            }
            path = Some(arg);
        }
    }

    let path = match path {
        Some(path) => path,
        None => panic!("must provide a path to the environment"),
    };

    let k = Rxkv::environment_builder().open_existing(Path::new(&path))?;
    let names = match only {
        Some(name) => vec![name],
        None => k.store_names(),
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "{} (version {})", k.name(), k.version())?;
    for name in &names {
        let definition = k.store_definition(name)?;
        let key_path = definition.key_path.as_ref().map_or_else(|| "(out-of-line)".to_string(), |p| p.to_string());
        writeln!(out, "\nstore `{}` key path {}{}", name, key_path, if definition.auto_increment {
            " auto-increment"
        } else {
            ""
        })?;
        for index in &definition.indexes {
            writeln!(out, "  index `{}` on {} {:?}", index.name, index.key_path, index.flags)?;
        }

        let store = k.open_store(name)?;
        let reader = k.read(&[name])?;
        for record in store.walk(&reader, WalkOptions::new()) {
            let record = record?;
            writeln!(out, "  {} => {}", record.key, record.value)?;
        }
    }
    Ok(())
}
