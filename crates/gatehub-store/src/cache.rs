use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gatehub_events::{Bus, TOPIC_CACHE_SWEPT};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{now_ms, LocalStore};

/// Record key the full-cache snapshot persists under.
pub const SNAPSHOT_KEY: &str = "cache";

/// Default background sweep cadence.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(12 * 60 * 60);

/// One cached value with its absolute expiry (ms since epoch).
/// `expires_at <= now` means logically absent, even while still in the map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub value: Value,
    pub expires_at: u64,
}

impl CacheEntry {
    fn expired(&self, now: u64) -> bool {
        self.expires_at <= now
    }
}

enum PersistMsg {
    Snapshot,
    Flush(oneshot::Sender<()>),
}

/// In-memory TTL cache mirrored to a single snapshot record.
///
/// Mutations signal a background persister task which rewrites the snapshot;
/// the signal is fire-and-forget, so the map and the snapshot may diverge
/// briefly. [`TtlCache::flush`] drains the persister deterministically — call
/// it before shutdown and in tests that read the snapshot back.
#[derive(Clone)]
pub struct TtlCache {
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
    tx: mpsc::UnboundedSender<PersistMsg>,
    bus: Option<Bus>,
}

impl TtlCache {
    /// Load the snapshot (if any) and start the persister task.
    /// Entries already expired at load time are kept until first touch or
    /// the next sweep, matching restart behavior of the snapshot format.
    pub fn load(store: LocalStore) -> Self {
        let map: HashMap<String, CacheEntry> = store
            .get::<Vec<(String, CacheEntry)>>(SNAPSHOT_KEY)
            .map(|pairs| pairs.into_iter().collect())
            .unwrap_or_default();
        info!(entries = map.len(), "cache loaded");
        let entries = Arc::new(Mutex::new(map));
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(persister(store, entries.clone(), rx));
        Self {
            entries,
            tx,
            bus: None,
        }
    }

    /// Attach a bus; sweeps that evict entries are announced on it.
    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Store `value` for `ttl`, then signal a snapshot persist.
    pub fn set(&self, key: &str, value: Value, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: now_ms().saturating_add(ttl.as_millis() as u64),
        };
        self.entries
            .lock()
            .expect("cache lock poisoned")
            .insert(key.to_string(), entry);
        self.signal();
    }

    /// Fetch a live value. Expired entries are evicted on the spot and the
    /// snapshot re-persisted.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = now_ms();
        let mut map = self.entries.lock().expect("cache lock poisoned");
        match map.get(key) {
            None => None,
            Some(entry) if entry.expired(now) => {
                map.remove(key);
                drop(map);
                self.signal();
                None
            }
            Some(entry) => Some(entry.value.clone()),
        }
    }

    /// Drop an entry eagerly. Returns whether anything was removed.
    pub fn remove(&self, key: &str) -> bool {
        let removed = self
            .entries
            .lock()
            .expect("cache lock poisoned")
            .remove(key)
            .is_some();
        if removed {
            self.signal();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict every expired entry; persists once only when something left.
    /// Returns the eviction count.
    pub fn sweep(&self) -> usize {
        let now = now_ms();
        let evicted = {
            let mut map = self.entries.lock().expect("cache lock poisoned");
            let before = map.len();
            map.retain(|_, entry| !entry.expired(now));
            before - map.len()
        };
        if evicted > 0 {
            debug!(evicted, "cache sweep evicted entries");
            self.signal();
            if let Some(bus) = &self.bus {
                bus.publish(TOPIC_CACHE_SWEPT, None, &json!({ "evicted": evicted }));
            }
        }
        evicted
    }

    /// Run [`TtlCache::sweep`] on a fixed cadence until the handle is dropped
    /// or aborted.
    pub fn spawn_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                cache.sweep();
            }
        })
    }

    /// Wait until every persist signal sent so far has been written out.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(PersistMsg::Flush(ack_tx)).is_err() {
            return; // persister gone; nothing left to wait for
        }
        let _ = ack_rx.await;
    }

    fn signal(&self) {
        let _ = self.tx.send(PersistMsg::Snapshot);
    }
}

/// Background task: coalesces persist signals and rewrites the snapshot.
async fn persister(
    store: LocalStore,
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
    mut rx: mpsc::UnboundedReceiver<PersistMsg>,
) {
    while let Some(msg) = rx.recv().await {
        let mut acks = Vec::new();
        if let PersistMsg::Flush(ack) = msg {
            acks.push(ack);
        }
        // Collapse a burst of signals into one write.
        while let Ok(next) = rx.try_recv() {
            if let PersistMsg::Flush(ack) = next {
                acks.push(ack);
            }
        }
        let snapshot: Vec<(String, CacheEntry)> = {
            let map = entries.lock().expect("cache lock poisoned");
            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        if let Err(err) = store.put(SNAPSHOT_KEY, &snapshot) {
            warn!(error = %err, "cache snapshot persist failed");
        }
        for ack in acks {
            let _ = ack.send(());
        }
    }
}
