//! Keyspace entry and memory-footprint accounting.
//!
//! Every value stored in the engine carries the metadata the eviction and
//! expiration machinery needs: when it expires, when it was last touched, and
//! how many times it has been read. None of this is exposed to clients
//! directly — it only drives `maxmemory-policy` sampling and `TTL`.

use bytes::Bytes;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Fixed overhead charged per key, independent of its length.
///
/// Modeled on a map bucket entry header plus the cost of owning a distinct
/// allocation for the key bytes.
pub const PER_KEY_OVERHEAD: usize = 16;

/// Fixed overhead charged per value, independent of its length.
pub const PER_VALUE_OVERHEAD: usize = 16;

/// Fixed overhead charged per entry for the expiration/access metadata that
/// rides alongside the value (timestamp plus access counter).
pub const PER_ENTRY_OVERHEAD: usize = 32;

/// A single keyspace record: the value bytes plus the bookkeeping needed for
/// expiration and sampled eviction.
#[derive(Debug, Clone)]
pub struct Entry {
    pub value: Bytes,
    /// Absolute expiration time, or `None` for no expiration. Stored as a
    /// wall-clock timestamp (rather than `Instant`) so it survives an RDB
    /// round trip meaningfully.
    pub expires_at: Option<SystemTime>,
    /// Monotonic clock reading of the most recent access, used by the LRU
    /// sampler. Not persisted — a reload starts every entry as equally fresh.
    pub last_accessed: Instant,
    /// Monotonically increasing access count, used by the LFU sampler.
    pub access_count: u64,
}

impl Entry {
    pub fn new(value: Bytes) -> Self {
        Self {
            value,
            expires_at: None,
            last_accessed: Instant::now(),
            access_count: 0,
        }
    }

    pub fn with_expiration(value: Bytes, expires_at: SystemTime) -> Self {
        Self {
            value,
            expires_at: Some(expires_at),
            last_accessed: Instant::now(),
            access_count: 0,
        }
    }

    /// True iff the entry's expiration is set and has passed.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(t) => t <= SystemTime::now(),
            None => false,
        }
    }

    /// Whole seconds remaining until expiration, clamped at zero.
    pub fn ttl_seconds(&self) -> Option<i64> {
        self.expires_at.map(|t| {
            t.duration_since(SystemTime::now())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0)
        })
    }

    pub fn touch(&mut self) {
        self.last_accessed = Instant::now();
        self.access_count += 1;
    }
}

/// Approximate byte cost charged to an entry for memory accounting.
///
/// `footprint(key, entry) = per_key_overhead + len(key) + per_value_overhead
/// + len(value) + per_entry_overhead`, matching the engine's documented
/// accounting formula. The constants above are chosen once and never
/// recomputed per call.
pub fn footprint(key: &[u8], entry: &Entry) -> usize {
    PER_KEY_OVERHEAD + key.len() + PER_VALUE_OVERHEAD + entry.value.len() + PER_ENTRY_OVERHEAD
}

/// Converts a `SystemTime` to unix seconds, saturating at zero for times
/// before the epoch (which should not occur in practice).
pub fn unix_seconds(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}
