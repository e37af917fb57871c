use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tracing::trace;

use crate::types::Snapshot;

type UpdateCallback = Box<dyn Fn(&Snapshot) + Send + Sync>;

/// Process-wide store of the latest known snapshot per location/device id.
///
/// One writer (the poll coordinator, plus transient optimistic writes from
/// command adapters), many readers. Snapshots are published behind `Arc` and
/// replaced wholesale, never mutated in place, so a reader's copy stays
/// coherent while a refresh lands underneath it. Subscriptions are keyed by
/// entity id: an adapter is only woken for its own entity.
#[derive(Default)]
pub struct StateCache {
    entries: RwLock<HashMap<String, Arc<Snapshot>>>,
    subscribers: Mutex<HashMap<String, Vec<UpdateCallback>>>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest snapshot for an entity, or `None` if it has never been polled.
    pub fn get(&self, id: &str) -> Option<Arc<Snapshot>> {
        self.entries
            .read()
            .expect("cache lock poisoned")
            .get(id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace one entity's snapshot and notify its subscribers. Used for
    /// transient optimistic writes after a command; the next poll cycle's
    /// batch overwrites it with vendor truth.
    pub fn insert(&self, id: impl Into<String>, snapshot: Snapshot) {
        let id = id.into();
        let snapshot = Arc::new(snapshot);
        self.entries
            .write()
            .expect("cache lock poisoned")
            .insert(id.clone(), snapshot.clone());
        self.notify(&id, &snapshot);
    }

    /// Replace a batch of entries under a single write lock, then notify in
    /// batch order. The coordinator places each location ahead of its
    /// devices, so no device notification fires against a stale parent.
    pub fn apply_batch(&self, batch: Vec<(String, Snapshot)>) {
        let published: Vec<(String, Arc<Snapshot>)> = batch
            .into_iter()
            .map(|(id, snapshot)| (id, Arc::new(snapshot)))
            .collect();

        {
            let mut entries = self.entries.write().expect("cache lock poisoned");
            for (id, snapshot) in &published {
                entries.insert(id.clone(), snapshot.clone());
            }
        }

        for (id, snapshot) in &published {
            self.notify(id, snapshot);
        }
    }

    /// Register a callback invoked whenever the given entity's snapshot is
    /// replaced. Callbacks run on the writer's task and should be cheap
    /// (typically: schedule a host-side entity refresh).
    pub fn subscribe(&self, id: impl Into<String>, callback: impl Fn(&Snapshot) + Send + Sync + 'static) {
        self.subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .entry(id.into())
            .or_default()
            .push(Box::new(callback));
    }

    fn notify(&self, id: &str, snapshot: &Snapshot) {
        let subscribers = self.subscribers.lock().expect("subscriber lock poisoned");
        if let Some(callbacks) = subscribers.get(id) {
            trace!(id = %id, count = callbacks.len(), "notifying subscribers");
            for callback in callbacks {
                callback(snapshot);
            }
        }
    }
}
