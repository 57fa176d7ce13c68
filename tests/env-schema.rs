// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

use tempfile::Builder;

use rxkv::{
    Direction,
    IndexDefinition,
    Key,
    KeyRange,
    Rxkv,
    Schema,
    StoreDefinition,
    StoreError,
    Value,
};

/// The version 1 layout, targeting `version`.
fn base(version: u32) -> Schema {
    Schema::new("tunewave", version).migration(1, |m| {
        m.create_store(StoreDefinition::new("songs").key_path("entryPath"));
    })
}

fn with_title_index(version: u32) -> Schema {
    base(version).migration(2, |m| {
        m.create_index("songs", IndexDefinition::new("title", "title"));
    })
}

fn v1() -> Schema {
    base(1)
}

fn v2() -> Schema {
    with_title_index(2)
}

fn song(path: &str, title: &str) -> Value {
    Value::map(vec![("entryPath", path), ("title", title)])
}

macro_rules! populate_songs {
    ($env:expr) => {
        let songs = $env.open_store("songs").expect("opened");
        let writer = $env.write(&["songs"]).expect("writer");
        songs.add(&writer, song("/b.mp3", "Bravo"), None).expect("wrote");
        songs.add(&writer, song("/a.mp3", "Alpha"), None).expect("wrote");
        songs.add(&writer, song("/c.mp3", "Alpha"), None).expect("wrote");
        writer.commit().expect("committed");
    };
}

#[test]
fn test_upgrade_adds_title_index() {
    let root = Builder::new().prefix("test_upgrade_adds_title_index").tempdir().expect("tempdir");
    {
        let k = Rxkv::open(root.path(), &v1()).expect("opened");
        assert_eq!(k.version(), 1);
        assert!(k.store_definition("songs").expect("defined").indexes.is_empty());
        populate_songs!(k);
    }

    let k = Rxkv::open(root.path(), &v2()).expect("upgraded");
    assert_eq!(k.version(), 2);
    let title = k.open_index("songs", "title").expect("index");
    let reader = k.read(&["songs"]).expect("reader");
    let by_title = title.get_all_keys(&reader, None, Direction::Ascending).expect("read");
    assert_eq!(by_title, vec![Key::from("/a.mp3"), Key::from("/c.mp3"), Key::from("/b.mp3")]);
    assert_eq!(title.count(&reader, Some(KeyRange::only("Alpha"))).expect("counted"), 2);
}

#[test]
fn test_every_intervening_migration_runs_once() {
    let root = Builder::new().prefix("test_every_intervening_migration").tempdir().expect("tempdir");
    Rxkv::open(root.path(), &v1()).expect("opened");

    let v3 = with_title_index(3).migration(3, |m| {
        m.create_store(StoreDefinition::new("albums").key_path("name"))
            .create_index("albums", IndexDefinition::new("year", "year"));
    });
    let k = Rxkv::open(root.path(), &v3).expect("upgraded");
    assert_eq!(k.store_names(), vec!["albums".to_string(), "songs".to_string()]);
    assert_eq!(k.store_definition("songs").expect("defined").indexes.len(), 1);
    assert_eq!(k.store_definition("albums").expect("defined").indexes[0].name, "year");
    drop(k);

    // Reopening at the same version is a no-op.
    let k = Rxkv::open(root.path(), &v3).expect("reopened");
    assert_eq!(k.version(), 3);
}

#[test]
#[should_panic(expected = "opened: VersionError { stored: 2, requested: 1 }")]
fn test_downgrade_is_refused() {
    let root = Builder::new().prefix("test_downgrade_is_refused").tempdir().expect("tempdir");
    Rxkv::open(root.path(), &v2()).expect("created");
    let _ = Rxkv::open(root.path(), &v1()).expect("opened");
}

#[test]
fn test_failed_upgrade_keeps_stored_version() {
    let root = Builder::new().prefix("test_failed_upgrade").tempdir().expect("tempdir");
    {
        let k = Rxkv::open(root.path(), &v1()).expect("opened");
        populate_songs!(k);
    }

    // Two songs share a title, so a unique title index can't be built.
    let unique = base(2).migration(2, |m| {
        m.create_store(StoreDefinition::new("albums"))
            .create_index("songs", IndexDefinition::new("title", "title").unique());
    });
    match Rxkv::open(root.path(), &unique) {
        Err(StoreError::ConstraintError(_)) => {},
        other => panic!("expected constraint error, got {:?}", other),
    }

    let k = Rxkv::environment_builder().open_existing(root.path()).expect("reopened");
    assert_eq!(k.version(), 1);
    assert_eq!(k.store_names(), vec!["songs".to_string()]);
    let songs = k.open_store("songs").expect("store");
    assert_eq!(k.read_with(&["songs"], |r| songs.count(r, None)).expect("counted"), 3);
}

#[test]
fn test_upgrade_blocked_by_live_handle() {
    let root = Builder::new().prefix("test_upgrade_blocked_by_live_handle").tempdir().expect("tempdir");
    let k = Rxkv::open(root.path(), &v1()).expect("opened");
    match Rxkv::open(root.path(), &v2()) {
        Err(StoreError::ConnectionBlocked {
            current,
            requested,
            ..
        }) => assert_eq!((current, requested), (1, 2)),
        other => panic!("expected blocked, got {:?}", other),
    }

    // The old handle keeps working, and its writes survive the later upgrade.
    populate_songs!(k);
    drop(k);

    let k = Rxkv::open(root.path(), &v2()).expect("upgraded");
    assert_eq!(k.version(), 2);
    let title = k.open_index("songs", "title").expect("index");
    assert_eq!(k.read_with(&["songs"], |r| title.count(r, None)).expect("counted"), 3);
}

#[test]
fn test_invalid_schemas() {
    let root = Builder::new().prefix("test_invalid_schemas").tempdir().expect("tempdir");
    match Rxkv::open(root.path(), &Schema::new("db", 0)) {
        Err(StoreError::InvalidSchema(_)) => {},
        other => panic!("expected invalid schema, got {:?}", other),
    }

    let compound_multi = Schema::new("db", 1).migration(1, |m| {
        m.create_store(StoreDefinition::new("s").index(IndexDefinition::new("i", &["a", "b"][..]).multi_entry()));
    });
    match Rxkv::open(root.path(), &compound_multi) {
        Err(StoreError::InvalidSchema(_)) => {},
        other => panic!("expected invalid schema, got {:?}", other),
    }

    let duplicate = Schema::new("db", 1).migration(1, |m| {
        m.create_store(StoreDefinition::new("s")).create_store(StoreDefinition::new("s"));
    });
    match Rxkv::open(root.path(), &duplicate) {
        Err(StoreError::ConstraintError(_)) => {},
        other => panic!("expected constraint error, got {:?}", other),
    }
}
