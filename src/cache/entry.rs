// Entry - A single versioned cache value
//
// An entry is immutable once built: a write never edits an entry in place,
// it replaces the store's mapping with a fresh one.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::Duration;

/// Expiry sentinel meaning "never expires"
pub const NEVER_EXPIRES: i64 = 0;

/// Current wall-clock time in nanoseconds since the Unix epoch
pub fn now_nanos() -> i64 {
    // Only out of range after the year 2262
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// A cached value with its write timestamp and optional absolute expiry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry<V> {
    /// The application value
    payload: V,
    /// When this value was produced (unix nanoseconds)
    last_write: i64,
    /// Absolute expiry (unix nanoseconds), or NEVER_EXPIRES
    expiry: i64,
}

impl<V> Entry<V> {
    /// Create an entry with explicit timestamps (for importing or tests)
    pub fn new(payload: V, last_write: i64, expiry: i64) -> Self {
        Self {
            payload,
            last_write,
            expiry,
        }
    }

    /// Create an entry written at `now` that lives for `ttl`.
    ///
    /// A zero `ttl` means the entry never expires.
    pub fn written_at(payload: V, now: i64, ttl: Duration) -> Self {
        let expiry = if ttl.is_zero() {
            NEVER_EXPIRES
        } else {
            let ttl_nanos = i64::try_from(ttl.as_nanos()).unwrap_or(i64::MAX);
            now.saturating_add(ttl_nanos)
        };

        Self::new(payload, now, expiry)
    }

    /// Get the payload
    pub fn payload(&self) -> &V {
        &self.payload
    }

    /// Consume the entry and return the payload
    pub fn into_payload(self) -> V {
        self.payload
    }

    /// Get the write timestamp
    pub fn last_write(&self) -> i64 {
        self.last_write
    }

    /// Get the absolute expiry timestamp
    pub fn expiry(&self) -> i64 {
        self.expiry
    }

    /// Check if this entry has no expiry
    pub fn never_expires(&self) -> bool {
        self.expiry == NEVER_EXPIRES
    }

    /// Check if this entry is masked at time `now`
    pub fn is_expired_at(&self, now: i64) -> bool {
        !self.never_expires() && self.expiry <= now
    }
}

impl<V: Serialize> Entry<V> {
    /// Total order used by merge to pick a winner.
    ///
    /// Compares the write timestamp first, then the encoded payload bytes,
    /// then the expiry. Payload bytes are only encoded on timestamp ties.
    pub fn precedence(&self, other: &Self) -> Ordering {
        self.last_write
            .cmp(&other.last_write)
            .then_with(|| self.payload_bytes().cmp(&other.payload_bytes()))
            .then_with(|| self.expiry.cmp(&other.expiry))
    }

    /// Check if this entry should replace `other` during a merge
    pub fn supersedes(&self, other: &Self) -> bool {
        self.precedence(other) == Ordering::Greater
    }

    fn payload_bytes(&self) -> Vec<u8> {
        postcard::to_allocvec(&self.payload).unwrap_or_default()
    }
}
