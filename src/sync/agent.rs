// Node Agent - Binds a store to the gossip mesh
//
// The agent is the Gossiper the substrate calls for inbound traffic:
// - Broadcast: merge a delta, report what changed so the mesh can relay it
// - Unicast: merge a delta addressed to us, no relay
// - Gossip: merge a peer's full state
// - Snapshot: encode our full state for a peer that is catching up
//
// It also keeps a pending-send record: deltas written locally that the
// dissemination actor has not broadcast yet.

use crate::cache::{CacheError, CacheValue, Store};
use crate::substrate::{Gossiper, PeerName};
use parking_lot::{Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Statistics about inbound gossip
#[derive(Clone, Debug, Default)]
pub struct AgentStats {
    pub broadcasts_received: u64,
    pub unicasts_received: u64,
    pub gossips_received: u64,
    pub keys_merged: u64,
    pub decode_failures: u64,
    pub snapshots_sent: u64,
}

/// Which inbound path a payload arrived on
#[derive(Clone, Copy, Debug)]
enum Inbound {
    Broadcast,
    Unicast,
    Gossip,
}

/// The cache's participant on the gossip mesh
pub struct NodeAgent<V> {
    /// Authoritative state
    store: RwLock<Store<V>>,
    /// Local writes not yet broadcast
    pending: Mutex<Store<V>>,
    /// Statistics
    stats: Mutex<AgentStats>,
}

impl<V: CacheValue> Default for NodeAgent<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: CacheValue> NodeAgent<V> {
    /// Create an agent with an empty store
    pub fn new() -> Self {
        Self::with_store(Store::new())
    }

    /// Create an agent seeded with existing state
    pub fn with_store(store: Store<V>) -> Self {
        Self {
            store: RwLock::new(store),
            pending: Mutex::new(Store::new()),
            stats: Mutex::new(AgentStats::default()),
        }
    }

    /// Get statistics
    pub fn stats(&self) -> AgentStats {
        self.stats.lock().clone()
    }

    /// Number of stored entries, including masked ones
    pub fn len(&self) -> usize {
        self.store.read().len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.store.read().is_empty()
    }

    /// Copy of the full store
    pub fn snapshot_store(&self) -> Store<V> {
        self.store.read().clone()
    }

    // ========================================================================
    // LOCAL OPERATIONS
    // ========================================================================

    /// Read a live value
    pub fn get(&self, key: &str) -> Option<V> {
        self.store.read().get(key).cloned()
    }

    /// Read a live value as of `now`
    pub fn get_at(&self, key: &str, now: i64) -> Option<V> {
        self.store.read().get_at(key, now).cloned()
    }

    /// Write locally and return the one-key delta to disseminate
    pub fn put(&self, key: impl Into<String>, value: V, ttl: Duration) -> Store<V> {
        let key = key.into();
        let entry = self.store.write().put(key.clone(), value, ttl).clone();
        Store::singleton(key, entry)
    }

    /// Merge a delta, returning the subset that changed
    pub fn merge(&self, delta: Store<V>) -> Store<V> {
        let changed = self.store.write().merge(delta);
        if !changed.is_empty() {
            self.stats.lock().keys_merged += changed.len() as u64;
        }
        changed
    }

    // ========================================================================
    // PENDING SENDS
    // ========================================================================

    /// Write locally and queue the write for broadcast in one step.
    ///
    /// The store lock is held while the pending record is updated, so two
    /// writers racing on a key cannot leave an older entry queued. Returns
    /// the number of keys pending.
    pub fn put_and_queue(&self, key: impl Into<String>, value: V, ttl: Duration) -> usize {
        let key = key.into();
        let mut store = self.store.write();
        let entry = store.put(key.clone(), value, ttl).clone();

        let mut pending = self.pending.lock();
        pending.insert(key, entry);
        pending.len()
    }

    /// Fold a local delta into the record of what still has to be sent.
    ///
    /// Each key is queued with the entry the store holds now, so the next
    /// broadcast carries the newest local write even when deltas are folded
    /// out of order. Keys the store does not hold are queued as given.
    /// Returns the number of keys pending.
    pub fn merge_local_pending_send(&self, delta: Store<V>) -> usize {
        let store = self.store.read();
        let mut pending = self.pending.lock();
        for (key, entry) in delta {
            let current = store.entry(&key).cloned().unwrap_or(entry);
            pending.insert(key, current);
        }
        pending.len()
    }

    /// Number of keys waiting to be broadcast
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Drain everything waiting to be broadcast
    pub fn take_pending(&self) -> Option<Store<V>> {
        let batch = std::mem::take(&mut *self.pending.lock());
        if batch.is_empty() {
            None
        } else {
            Some(batch)
        }
    }

    // ========================================================================
    // INBOUND
    // ========================================================================

    fn receive(&self, kind: Inbound, payload: &[u8]) -> Option<Store<V>> {
        {
            let mut stats = self.stats.lock();
            match kind {
                Inbound::Broadcast => stats.broadcasts_received += 1,
                Inbound::Unicast => stats.unicasts_received += 1,
                Inbound::Gossip => stats.gossips_received += 1,
            }
        }

        let delta = match Store::<V>::from_bytes(payload) {
            Ok(delta) => delta,
            Err(e) => {
                self.stats.lock().decode_failures += 1;
                warn!(kind = ?kind, bytes = payload.len(), error = %e, "rejected malformed delta");
                return None;
            }
        };

        let changed = self.merge(delta);
        debug!(kind = ?kind, changed = changed.len(), "merged inbound delta");
        if changed.is_empty() {
            None
        } else {
            Some(changed)
        }
    }

    fn encode(&self, changed: &Store<V>) -> Option<Vec<u8>> {
        match changed.to_bytes() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(error = %e, "failed to encode changed delta");
                None
            }
        }
    }

    /// Encode the full store
    pub fn encode_snapshot(&self) -> Result<Vec<u8>, CacheError> {
        self.store.read().to_bytes()
    }
}

impl<V: CacheValue> Gossiper for NodeAgent<V> {
    fn on_broadcast(&self, src: PeerName, payload: &[u8]) -> Option<Vec<u8>> {
        let changed = self.receive(Inbound::Broadcast, payload)?;
        debug!(src = %src, keys = changed.len(), "broadcast changed local state");
        self.encode(&changed)
    }

    fn on_unicast(&self, src: PeerName, payload: &[u8]) {
        if let Some(changed) = self.receive(Inbound::Unicast, payload) {
            debug!(src = %src, keys = changed.len(), "unicast changed local state");
        }
    }

    fn on_gossip(&self, payload: &[u8]) -> Option<Vec<u8>> {
        let changed = self.receive(Inbound::Gossip, payload)?;
        self.encode(&changed)
    }

    fn snapshot(&self) -> Vec<u8> {
        self.stats.lock().snapshots_sent += 1;
        self.encode_snapshot().unwrap_or_else(|e| {
            warn!(error = %e, "failed to encode snapshot");
            Vec::new()
        })
    }
}
