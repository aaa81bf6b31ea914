// Store - Last-writer-wins register map
//
// Every key holds a LWW register. The same type is the unit of local state,
// the delta broadcast after a write, and the snapshot sent to new peers.
//
// Merge properties (per key, under Entry::precedence):
// - Commutative: merge(A, B) == merge(B, A)
// - Associative: merge(merge(A, B), C) == merge(A, merge(B, C))
// - Idempotent: merge(A, A) == A

use super::entry::{now_nanos, Entry};
use super::CacheError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::{self, HashMap};
use std::time::Duration;

/// Mapping from key to its winning entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Store<V> {
    entries: HashMap<String, Entry<V>>,
}

impl<V> Default for Store<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Store<V> {
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Create a one-key delta
    pub fn singleton(key: impl Into<String>, entry: Entry<V>) -> Self {
        let mut entries = HashMap::with_capacity(1);
        entries.insert(key.into(), entry);
        Self { entries }
    }

    /// Number of stored entries, including masked (expired) ones
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check if a key has an entry, expired or not
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Raw entry lookup. Does not apply expiry masking.
    pub fn entry(&self, key: &str) -> Option<&Entry<V>> {
        self.entries.get(key)
    }

    /// Iterate over all keys
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Iterate over all entries
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Entry<V>)> {
        self.entries.iter().map(|(k, e)| (k.as_str(), e))
    }

    /// Number of entries visible at time `now`
    pub fn live_len(&self, now: i64) -> usize {
        self.entries
            .values()
            .filter(|e| !e.is_expired_at(now))
            .count()
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Look up a key against the system clock
    pub fn get(&self, key: &str) -> Option<&V> {
        self.get_at(key, now_nanos())
    }

    /// Look up a key as of `now`.
    ///
    /// Expired entries are masked, never removed.
    pub fn get_at(&self, key: &str, now: i64) -> Option<&V> {
        self.entries
            .get(key)
            .filter(|e| !e.is_expired_at(now))
            .map(Entry::payload)
    }

    // ========================================================================
    // LOCAL WRITES
    // ========================================================================

    /// Replace a key's entry unconditionally, returning the previous one
    pub fn insert(&mut self, key: impl Into<String>, entry: Entry<V>) -> Option<Entry<V>> {
        self.entries.insert(key.into(), entry)
    }

    /// Write a value stamped with the system clock
    pub fn put(&mut self, key: impl Into<String>, value: V, ttl: Duration) -> &Entry<V> {
        self.put_at(key, value, ttl, now_nanos())
    }

    /// Write a value stamped with `now`.
    ///
    /// Local writes replace unconditionally, whatever the previous timestamp.
    pub fn put_at(
        &mut self,
        key: impl Into<String>,
        value: V,
        ttl: Duration,
        now: i64,
    ) -> &Entry<V> {
        let entry = Entry::written_at(value, now, ttl);
        match self.entries.entry(key.into()) {
            hash_map::Entry::Occupied(mut slot) => {
                slot.insert(entry);
                slot.into_mut()
            }
            hash_map::Entry::Vacant(slot) => slot.insert(entry),
        }
    }
}

impl<V: Serialize + Clone> Store<V> {
    /// Merge a delta into this store.
    ///
    /// An incoming entry wins only if it strictly supersedes the local one
    /// (absent keys always lose). Returns the subset that actually changed.
    pub fn merge(&mut self, delta: Store<V>) -> Store<V> {
        let mut changed = Store::new();

        for (key, incoming) in delta.entries {
            let wins = match self.entries.get(&key) {
                Some(current) => incoming.supersedes(current),
                None => true,
            };

            if wins {
                changed.entries.insert(key.clone(), incoming.clone());
                self.entries.insert(key, incoming);
            }
        }

        changed
    }
}

impl<V: Serialize + DeserializeOwned> Store<V> {
    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, CacheError> {
        postcard::to_allocvec(self).map_err(|e| CacheError::EncodingFailed(e.to_string()))
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CacheError> {
        postcard::from_bytes(bytes).map_err(|e| CacheError::DecodingFailed(e.to_string()))
    }
}

impl<V> FromIterator<(String, Entry<V>)> for Store<V> {
    fn from_iter<I: IntoIterator<Item = (String, Entry<V>)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<V> IntoIterator for Store<V> {
    type Item = (String, Entry<V>);
    type IntoIter = hash_map::IntoIter<String, Entry<V>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
