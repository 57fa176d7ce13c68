// Any copyright is dedicated to the Public Domain.
// http://creativecommons.org/publicdomain/zero/1.0/

//! A simple rxkv demo that showcases the basic usage (add/get/walk/delete) of rxkv.
//!
//! You can test this out by running:
//!
//!     cargo run --example simple-store

use rxkv::{
    Direction,
    IndexDefinition,
    KeyRange,
    Manager,
    Query,
    Schema,
    StoreDefinition,
    Value,
    WalkOptions,
};
use tempfile::Builder;

fn song(path: &str, title: &str, artists: &[&str]) -> Value {
    let artists = Value::Array(artists.iter().map(|a| Value::from(*a)).collect());
    Value::map(vec![("path", Value::from(path)), ("title", Value::from(title)), ("artists", artists)])
}

fn main() {
    let root = Builder::new().prefix("simple-db").tempdir().unwrap();
    let p = root.path();

    let schema = Schema::new("library", 2)
        .migration(1, |m| {
            m.create_store(StoreDefinition::new("songs").key_path("path"));
        })
        .migration(2, |m| {
            m.create_index("songs", IndexDefinition::new("artists", "artists").multi_entry())
                .create_index("songs", IndexDefinition::new("title", "title"));
        });

    // The manager enforces that each process opens the same environment at most once
    let k = Manager::singleton().write().unwrap().get_or_open(p, &schema).unwrap();
    let songs = k.open_store("songs").unwrap();

    println!("Inserting data...");
    {
        // Use a write transaction to mutate the store
        let writer = k.write(&["songs"]).unwrap();
        songs.add(&writer, song("/so-what.mp3", "So What", &["Miles Davis", "John Coltrane"]), None).unwrap();
        songs.add(&writer, song("/giant-steps.mp3", "Giant Steps", &["John Coltrane"]), None).unwrap();
        songs.add(&writer, song("/blue.mp3", "Blue", &["Joni Mitchell"]), None).unwrap();
        writer.commit().unwrap();
    }

    println!("Looking up keys...");
    {
        // Use a read transaction to query the store
        let r = &k.read(&["songs"]).unwrap();
        println!("Get /blue.mp3 {:?}", songs.get(r, "/blue.mp3").unwrap());
        println!("Get by title {:?}", songs.index("title").get(r, "Giant Steps").unwrap());
        let artists = songs.index("artists");
        let coltrane = artists.get_all_keys(r, Some(KeyRange::only("John Coltrane")), Direction::Ascending);
        println!("Songs with John Coltrane {:?}", coltrane.unwrap());
    }

    println!("Walking the title index...");
    {
        let r = &k.read(&["songs"]).unwrap();
        for record in songs.walk(r, WalkOptions::new().index("title").descending()) {
            let record = record.unwrap();
            println!("{} => {}", record.key, record.primary_key);
        }
    }

    println!("Aborting transaction...");
    {
        // Aborting a write transaction rolls back the change(s)
        let writer = k.write(&["songs"]).unwrap();
        songs.put(&writer, song("/foo.mp3", "Foo", &[]), None).unwrap();
        writer.abort();

        let r = &k.read(&["songs"]).unwrap();
        println!("It should be None! ({:?})", songs.get(r, "/foo.mp3").unwrap());
        // Explicitly aborting a transaction is not required unless an early
        // abort is desired, since write transactions are implicitly aborted
        // once they go out of scope.
    }

    println!("Failing an operation aborts the transaction...");
    {
        let writer = k.write(&["songs"]).unwrap();
        songs.put(&writer, song("/bar.mp3", "Bar", &[]), None).unwrap();
        // A duplicate key fails the add, which discards the put above as well.
        println!("Add existing key {:?}", songs.add(&writer, song("/blue.mp3", "Blue", &[]), None));
        println!("Commit {:?}", writer.commit());
    }

    println!("Deleting keys...");
    {
        let songs = Query::new(&k, "songs");
        songs.delete("/blue.mp3").resolve().unwrap();
        println!("Remaining songs {}", songs.count(None).resolve().unwrap());
    }
}
