// Copyright 2018-2019 Mozilla
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use
// this file except in compliance with the License. You may obtain a copy of the
// License at http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software distributed
// under the License is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR
// CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

use std::sync::Arc;
use std::thread::{
    self,
    JoinHandle,
};

use crossbeam_channel::{
    Receiver,
    Sender,
};
use log::{
    debug,
    warn,
};

use crate::cursor::{
    CursorRecord,
    WalkOptions,
};
use crate::env::Rxkv;
use crate::error::StoreError;

/// A stream of results produced on a worker thread.
///
/// The channel between the worker and the subscriber has no buffer, so the
/// worker cannot get ahead of the subscriber by more than the item it is
/// waiting to hand over. Dropping the subscription (or calling `unsubscribe`)
/// disconnects the channel; the worker notices on its next send, stops, and is
/// joined.
#[derive(Debug)]
pub struct Subscription<T> {
    receiver: Option<Receiver<Result<T, StoreError>>>,
    worker: Option<JoinHandle<()>>,
}

impl<T> Subscription<T>
where
    T: Send + 'static,
{
    /// Run `produce` on a new thread, receiving everything it sends.
    pub fn spawn<F>(produce: F) -> Result<Subscription<T>, StoreError>
    where
        F: FnOnce(&Sender<Result<T, StoreError>>) + Send + 'static,
    {
        let (sender, receiver) = crossbeam_channel::bounded(0);
        let worker = thread::Builder::new().name("rxkv-subscription".into()).spawn(move || produce(&sender))?;
        Ok(Subscription {
            receiver: Some(receiver),
            worker: Some(worker),
        })
    }

    pub fn unsubscribe(self) {}
}

impl Subscription<CursorRecord> {
    /// Walk `store` in a read-only transaction of its own, handing each record
    /// to the subscriber as it asks for it.
    pub fn walk(rkv: Arc<Rxkv>, store: &str, options: WalkOptions) -> Result<Subscription<CursorRecord>, StoreError> {
        let store = store.to_string();
        Subscription::spawn(move |sender| {
            let handle = match rkv.open_store(&store) {
                Ok(handle) => handle,
                Err(err) => {
                    let _ = sender.send(Err(err));
                    return;
                },
            };
            let reader = match rkv.read(&[&store]) {
                Ok(reader) => reader,
                Err(err) => {
                    let _ = sender.send(Err(err));
                    return;
                },
            };
            for record in handle.walk(&reader, options) {
                if sender.send(record).is_err() {
                    debug!("subscriber to `{}` went away", store);
                    return;
                }
            }
        })
    }
}

impl<T> Iterator for Subscription<T> {
    type Item = Result<T, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.receiver.as_ref()?.recv().ok()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.receiver.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("subscription worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{
        AtomicUsize,
        Ordering,
    };

    use tempfile::Builder;

    use super::*;
    use crate::query::ScanArrayExt;
    use crate::schema::{
        Schema,
        StoreDefinition,
    };
    use crate::value::{
        Key,
        Value,
    };

    #[test]
    fn test_producer_waits_for_consumer() {
        let produced = Arc::new(AtomicUsize::new(0));
        let counter = produced.clone();
        let mut subscription = Subscription::spawn(move |sender| {
            for i in 0..100 {
                counter.fetch_add(1, Ordering::SeqCst);
                if sender.send(Ok(i)).is_err() {
                    return;
                }
            }
        })
        .expect("spawned");

        assert_eq!(subscription.next().map(|r| r.expect("ok")), Some(0));
        subscription.unsubscribe();
        // The one handed over, plus at most the one it was waiting to send.
        assert!(produced.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_walk_subscription() {
        let root = Builder::new().prefix("test_walk_subscription").tempdir().expect("tempdir");
        let schema = Schema::new("test", 1).migration(1, |m| {
            m.create_store(StoreDefinition::new("entries"));
        });
        let k = Arc::new(Rxkv::open(root.path(), &schema).expect("opened"));
        let entries = k.open_store("entries").expect("store");
        k.write_with(&["entries"], |w| {
            for i in 1..=3 {
                entries.put(w, Value::from(i), Some(Key::from(i)))?;
            }
            Ok(())
        })
        .expect("seeded");

        let grown: Vec<usize> = Subscription::walk(k.clone(), "entries", WalkOptions::new().descending())
            .expect("subscribed")
            .map(|r| r.map(|record| record.key))
            .scan_array()
            .map(|keys| keys.expect("ok").len())
            .collect();
        assert_eq!(grown, vec![1, 2, 3]);

        let mut missing = Subscription::walk(k, "nope", WalkOptions::new()).expect("subscribed");
        assert!(matches!(missing.next(), Some(Err(StoreError::NotFoundError(_)))));
        assert!(missing.next().is_none());
    }
}
