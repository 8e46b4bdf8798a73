//! The keyspace engine.
//!
//! A single `RwLock`-protected map holds every key. Earlier revisions of
//! this engine sharded the map to reduce lock contention, but the
//! maxmemory/eviction invariants below are defined over the *whole*
//! keyspace — "tracked memory ≤ maxmemory after every write", "sample across
//! all keys with a TTL" — and a single lock is the only way to hold those
//! exactly without reinventing cross-shard coordination. Readers that don't
//! mutate (EXISTS, KEYS, DBSIZE) only need the read side of the lock; only
//! SET/DEL/FLUSHDB/EXPIRE and the lazy-expiry-removal path inside GET take
//! the write side.

use crate::storage::entry::{footprint, Entry};
use crate::storage::eviction::{self, EvictionPolicy};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::debug;

/// Errors raised by the keyspace engine itself (as opposed to malformed
/// requests, which the dispatcher rejects before ever calling in here).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    #[error("memory limit reached")]
    OutOfMemory,
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Construction-time settings; immutable for the engine's lifetime since
/// nothing in the command surface here changes them at runtime.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub maxmemory: usize,
    pub policy: EvictionPolicy,
    pub samples: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            maxmemory: 0,
            policy: EvictionPolicy::NoEviction,
            samples: 5,
        }
    }
}

#[derive(Debug)]
pub struct StorageEngine {
    map: RwLock<HashMap<Bytes, Entry>>,
    tracked_memory: AtomicUsize,
    peak_memory: AtomicUsize,
    config: EngineConfig,

    get_count: AtomicU64,
    set_count: AtomicU64,
    del_count: AtomicU64,
    expired_count: AtomicU64,
    evicted_count: AtomicU64,
}

impl StorageEngine {
    /// A bare engine with no memory budget and `noeviction` — used by tests
    /// and benchmarks that don't care about the eviction machinery.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            tracked_memory: AtomicUsize::new(0),
            peak_memory: AtomicUsize::new(0),
            config,
            get_count: AtomicU64::new(0),
            set_count: AtomicU64::new(0),
            del_count: AtomicU64::new(0),
            expired_count: AtomicU64::new(0),
            evicted_count: AtomicU64::new(0),
        }
    }

    pub fn maxmemory(&self) -> usize {
        self.config.maxmemory
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.config.policy
    }

    pub fn samples(&self) -> usize {
        self.config.samples
    }

    /// Returns the current value for `key`, lazily expiring it first if its
    /// TTL has passed. A hit updates access recency/frequency, which needs
    /// mutable access, so this always takes the write side of the lock.
    pub fn get(&self, key: &Bytes) -> Option<Bytes> {
        self.get_count.fetch_add(1, Ordering::Relaxed);

        let mut map = self.map.write().unwrap();
        match map.get_mut(key) {
            Some(entry) if entry.is_expired() => {
                let removed = map.remove(key).unwrap();
                self.tracked_memory
                    .fetch_sub(footprint(key, &removed), Ordering::Relaxed);
                self.expired_count.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(entry) => {
                entry.touch();
                Some(entry.value.clone())
            }
            None => None,
        }
    }

    /// Returns the raw entry (value plus metadata) without touching access
    /// recency/frequency — used by TTL/PTTL, which must not count as a read
    /// for LRU/LFU purposes.
    pub fn peek_ttl(&self, key: &Bytes) -> Option<i64> {
        let map = self.map.read().unwrap();
        match map.get(key) {
            Some(entry) if entry.is_expired() => None,
            Some(entry) => Some(entry.ttl_seconds().unwrap_or(-1)),
            None => None,
        }
    }

    pub fn set(&self, key: Bytes, value: Bytes) -> EngineResult<()> {
        self.set_with_expiry(key, value, None)
    }

    pub fn set_with_ttl(&self, key: Bytes, value: Bytes, ttl: Duration) -> EngineResult<()> {
        self.set_with_expiry(key, value, Some(SystemTime::now() + ttl))
    }

    pub fn set_with_expiry(
        &self,
        key: Bytes,
        value: Bytes,
        expires_at: Option<SystemTime>,
    ) -> EngineResult<()> {
        self.set_with_expiry_logged(key, value, expires_at, || {})
    }

    /// Same as [`Self::set_with_expiry`], but `on_commit` runs after the
    /// entry lands in the map and before the write guard drops — the only
    /// place a caller can log the mutation (e.g. to the AOF) and be sure the
    /// log write is ordered identically to every other thread's view of the
    /// keyspace. `on_commit` must not block: it runs with the write lock
    /// held.
    pub fn set_with_expiry_logged(
        &self,
        key: Bytes,
        value: Bytes,
        expires_at: Option<SystemTime>,
        on_commit: impl FnOnce(),
    ) -> EngineResult<()> {
        self.set_count.fetch_add(1, Ordering::Relaxed);

        let new_entry = match expires_at {
            Some(t) => Entry::with_expiration(value, t),
            None => Entry::new(value),
        };
        let incoming_footprint = footprint(&key, &new_entry);

        let mut map = self.map.write().unwrap();
        let old_footprint = map.get(&key).map(|e| footprint(&key, e));
        let tracked = self.tracked_memory.load(Ordering::Relaxed);
        let tentative = tracked - old_footprint.unwrap_or(0);

        if self.config.maxmemory > 0 && tentative + incoming_footprint > self.config.maxmemory {
            let evicted = self.evict_to_fit(&mut map, &key, tentative, incoming_footprint);
            let tracked_after = self.tracked_memory.load(Ordering::Relaxed);
            let tentative_after = tracked_after - old_footprint.unwrap_or(0);
            if tentative_after + incoming_footprint > self.config.maxmemory {
                debug!(evicted, "set rejected: out of memory after sampled eviction");
                return Err(EngineError::OutOfMemory);
            }
        }

        map.insert(key, new_entry);
        let new_tracked = self
            .tracked_memory
            .load(Ordering::Relaxed)
            .wrapping_sub(old_footprint.unwrap_or(0))
            .wrapping_add(incoming_footprint);
        self.tracked_memory.store(new_tracked, Ordering::Relaxed);

        self.peak_memory
            .fetch_max(new_tracked, Ordering::Relaxed);

        on_commit();

        Ok(())
    }

    /// Evicts sampled candidates (excluding `protect`, the key being set)
    /// until `tentative + incoming <= maxmemory` or the sample runs dry.
    /// Returns the number of keys evicted.
    fn evict_to_fit(
        &self,
        map: &mut HashMap<Bytes, Entry>,
        protect: &Bytes,
        mut tentative: usize,
        incoming: usize,
    ) -> usize {
        let sample = eviction::sample_candidates(map, self.config.policy, self.config.samples);
        let mut evicted = 0;

        for candidate in sample {
            if tentative + incoming <= self.config.maxmemory {
                break;
            }
            if &candidate == protect {
                continue;
            }
            if let Some(entry) = map.remove(&candidate) {
                let freed = footprint(&candidate, &entry);
                self.tracked_memory.fetch_sub(freed, Ordering::Relaxed);
                tentative = tentative.saturating_sub(freed);
                evicted += 1;
            }
        }

        if evicted > 0 {
            self.evicted_count.fetch_add(evicted as u64, Ordering::Relaxed);
        }
        evicted
    }

    pub fn delete(&self, key: &Bytes) -> bool {
        self.delete_logged(key, || {})
    }

    /// Same as [`Self::delete`], but `on_commit` runs only if the key
    /// existed, before the write guard drops, so an AOF append stays
    /// ordered with the mutation. See [`Self::set_with_expiry_logged`].
    pub fn delete_logged(&self, key: &Bytes, on_commit: impl FnOnce()) -> bool {
        self.del_count.fetch_add(1, Ordering::Relaxed);
        let mut map = self.map.write().unwrap();
        match map.remove(key) {
            Some(entry) => {
                self.tracked_memory
                    .fetch_sub(footprint(key, &entry), Ordering::Relaxed);
                on_commit();
                true
            }
            None => false,
        }
    }

    pub fn exists(&self, key: &Bytes) -> bool {
        let map = self.map.read().unwrap();
        matches!(map.get(key), Some(e) if !e.is_expired())
    }

    /// Keys matching a shell-style glob. Does not lazily expire anything —
    /// reads here are non-mutating.
    pub fn keys(&self, pattern: &str) -> Vec<Bytes> {
        let glob = GlobPattern::new(pattern);
        let map = self.map.read().unwrap();
        map.iter()
            .filter(|(_, e)| !e.is_expired())
            .filter(|(k, _)| glob.matches(&String::from_utf8_lossy(k)))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Sets expiration to now + seconds; returns true if the key existed.
    pub fn expire(&self, key: &Bytes, seconds: i64) -> bool {
        self.expire_logged(key, seconds, || {})
    }

    /// Same as [`Self::expire`], but `on_commit` runs only if the key
    /// existed, before the write guard drops. See
    /// [`Self::set_with_expiry_logged`].
    pub fn expire_logged(&self, key: &Bytes, seconds: i64, on_commit: impl FnOnce()) -> bool {
        let mut map = self.map.write().unwrap();
        match map.get_mut(key) {
            Some(entry) if !entry.is_expired() => {
                entry.expires_at = Some(SystemTime::now() + Duration::from_secs(seconds.max(0) as u64));
                on_commit();
                true
            }
            _ => false,
        }
    }

    /// -2 missing/expired, -1 no expiration, else whole seconds remaining.
    pub fn ttl(&self, key: &Bytes) -> i64 {
        match self.peek_ttl(key) {
            Some(secs) => secs,
            None => -2,
        }
    }

    pub fn dbsize(&self) -> usize {
        self.map.read().unwrap().len()
    }

    pub fn len(&self) -> usize {
        self.dbsize()
    }

    pub fn is_empty(&self) -> bool {
        self.dbsize() == 0
    }

    pub fn flushdb(&self) {
        self.flushdb_logged(|| {})
    }

    /// Same as [`Self::flushdb`], but `on_commit` runs before the write
    /// guard drops. See [`Self::set_with_expiry_logged`].
    pub fn flushdb_logged(&self, on_commit: impl FnOnce()) {
        let mut map = self.map.write().unwrap();
        map.clear();
        self.tracked_memory.store(0, Ordering::Relaxed);
        on_commit();
    }

    pub fn flush(&self) {
        self.flushdb();
    }

    /// Active sweep: removes every currently-expired entry. Returns how many
    /// were removed. Used by the optional background sweeper; lazy
    /// expiration on `get`/`ttl`/`exists` does not depend on this running.
    pub fn cleanup_expired(&self) -> usize {
        let mut map = self.map.write().unwrap();
        let expired_keys: Vec<Bytes> = map
            .iter()
            .filter(|(_, e)| e.is_expired())
            .map(|(k, _)| k.clone())
            .collect();

        let mut freed = 0;
        for key in &expired_keys {
            if let Some(entry) = map.remove(key) {
                freed += footprint(key, &entry);
            }
        }
        drop(map);

        if freed > 0 {
            self.tracked_memory.fetch_sub(freed, Ordering::Relaxed);
        }
        if !expired_keys.is_empty() {
            self.expired_count
                .fetch_add(expired_keys.len() as u64, Ordering::Relaxed);
        }
        expired_keys.len()
    }

    pub fn stats(&self) -> StorageStats {
        StorageStats {
            keys: self.dbsize() as u64,
            get_ops: self.get_count.load(Ordering::Relaxed),
            set_ops: self.set_count.load(Ordering::Relaxed),
            del_ops: self.del_count.load(Ordering::Relaxed),
            expired: self.expired_count.load(Ordering::Relaxed),
            evicted: self.evicted_count.load(Ordering::Relaxed),
        }
    }

    pub fn memory_info(&self) -> MemoryInfo {
        MemoryInfo {
            keys: self.dbsize(),
            used_memory: self.tracked_memory.load(Ordering::Relaxed),
            used_memory_peak: self.peak_memory.load(Ordering::Relaxed),
        }
    }

    pub fn expired_keys(&self) -> u64 {
        self.expired_count.load(Ordering::Relaxed)
    }

    pub fn evicted_keys(&self) -> u64 {
        self.evicted_count.load(Ordering::Relaxed)
    }

    /// A shallow point-in-time copy of every live (non-expired) key/value
    /// pair plus its expiration, taken under a brief read lock. Used by
    /// BGSAVE, BGREWRITEAOF and RDB save — never mutated in place by this
    /// engine again once returned.
    pub fn snapshot(&self) -> Vec<(Bytes, Bytes, Option<SystemTime>)> {
        let map = self.map.read().unwrap();
        map.iter()
            .filter(|(_, e)| !e.is_expired())
            .map(|(k, e)| (k.clone(), e.value.clone(), e.expires_at))
            .collect()
    }

    /// Replaces the entire keyspace with `entries`, recomputing tracked
    /// memory from scratch. Used by RDB load, which decodes into an empty
    /// keyspace rather than going through `set`'s admission/eviction path.
    pub fn restore(&self, entries: Vec<(Bytes, Bytes, Option<SystemTime>)>) {
        let mut map = self.map.write().unwrap();
        map.clear();
        let mut total = 0usize;
        for (key, value, expires_at) in entries {
            let entry = match expires_at {
                Some(t) => Entry::with_expiration(value, t),
                None => Entry::new(value),
            };
            total += footprint(&key, &entry);
            map.insert(key, entry);
        }
        drop(map);
        self.tracked_memory.store(total, Ordering::Relaxed);
        self.peak_memory.fetch_max(total, Ordering::Relaxed);
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Database statistics.
#[derive(Debug, Clone, Copy)]
pub struct StorageStats {
    pub keys: u64,
    pub get_ops: u64,
    pub set_ops: u64,
    pub del_ops: u64,
    pub expired: u64,
    pub evicted: u64,
}

/// Memory usage information.
#[derive(Debug, Clone, Copy)]
pub struct MemoryInfo {
    pub keys: usize,
    pub used_memory: usize,
    pub used_memory_peak: usize,
}

/// Simple glob pattern matcher for the KEYS command.
struct GlobPattern {
    pattern: String,
}

impl GlobPattern {
    fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
        }
    }

    fn matches(&self, text: &str) -> bool {
        self.matches_recursive(self.pattern.as_bytes(), text.as_bytes())
    }

    fn matches_recursive(&self, pattern: &[u8], text: &[u8]) -> bool {
        if pattern.is_empty() {
            return text.is_empty();
        }

        match pattern[0] {
            b'*' => {
                for i in 0..=text.len() {
                    if self.matches_recursive(&pattern[1..], &text[i..]) {
                        return true;
                    }
                }
                false
            }
            b'?' => !text.is_empty() && self.matches_recursive(&pattern[1..], &text[1..]),
            b'[' => {
                if text.is_empty() {
                    return false;
                }

                let mut i = 1;
                let mut matched = false;
                let negate = pattern.get(1) == Some(&b'^');
                if negate {
                    i += 1;
                }

                while i < pattern.len() && pattern[i] != b']' {
                    if pattern[i] == text[0] {
                        matched = true;
                    }
                    if i + 2 < pattern.len() && pattern[i + 1] == b'-' && pattern[i + 2] != b']' {
                        if text[0] >= pattern[i] && text[0] <= pattern[i + 2] {
                            matched = true;
                        }
                        i += 2;
                    }
                    i += 1;
                }

                if negate {
                    matched = !matched;
                }

                if i < pattern.len() {
                    matched && self.matches_recursive(&pattern[i + 1..], &text[1..])
                } else {
                    false
                }
            }
            b'\\' => {
                if pattern.len() > 1 && !text.is_empty() && pattern[1] == text[0] {
                    self.matches_recursive(&pattern[2..], &text[1..])
                } else {
                    false
                }
            }
            c => !text.is_empty() && c == text[0] && self.matches_recursive(&pattern[1..], &text[1..]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_roundtrip() {
        let engine = StorageEngine::new();
        engine.set(Bytes::from("foo"), Bytes::from("bar")).unwrap();
        assert_eq!(engine.get(&Bytes::from("foo")), Some(Bytes::from("bar")));
    }

    #[test]
    fn delete_removes_key_and_memory() {
        let engine = StorageEngine::new();
        engine.set(Bytes::from("foo"), Bytes::from("bar")).unwrap();
        let before = engine.memory_info().used_memory;
        assert!(engine.delete(&Bytes::from("foo")));
        assert_eq!(engine.memory_info().used_memory, 0);
        assert!(before > 0);
        assert_eq!(engine.get(&Bytes::from("foo")), None);
    }

    #[test]
    fn exists_does_not_touch_access_metadata() {
        let engine = StorageEngine::new();
        engine.set(Bytes::from("foo"), Bytes::from("bar")).unwrap();
        assert!(engine.exists(&Bytes::from("foo")));
        assert!(!engine.exists(&Bytes::from("missing")));
    }

    #[test]
    fn expiry_is_lazy_on_get() {
        let engine = StorageEngine::new();
        engine
            .set_with_ttl(Bytes::from("foo"), Bytes::from("bar"), Duration::from_millis(10))
            .unwrap();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(engine.get(&Bytes::from("foo")), None);
        assert!(!engine.exists(&Bytes::from("foo")));
    }

    #[test]
    fn ttl_reports_missing_as_minus_two() {
        let engine = StorageEngine::new();
        assert_eq!(engine.ttl(&Bytes::from("nope")), -2);
    }

    #[test]
    fn ttl_reports_no_expiration_as_minus_one() {
        let engine = StorageEngine::new();
        engine.set(Bytes::from("foo"), Bytes::from("bar")).unwrap();
        assert_eq!(engine.ttl(&Bytes::from("foo")), -1);
    }

    #[test]
    fn expire_sets_ttl_on_existing_key() {
        let engine = StorageEngine::new();
        engine.set(Bytes::from("foo"), Bytes::from("bar")).unwrap();
        assert!(engine.expire(&Bytes::from("foo"), 1));
        assert!(engine.ttl(&Bytes::from("foo")) >= 0);
    }

    #[test]
    fn expire_on_missing_key_returns_false() {
        let engine = StorageEngine::new();
        assert!(!engine.expire(&Bytes::from("nope"), 1));
    }

    #[test]
    fn flushdb_clears_everything() {
        let engine = StorageEngine::new();
        engine.set(Bytes::from("a"), Bytes::from("1")).unwrap();
        engine.set(Bytes::from("b"), Bytes::from("2")).unwrap();
        engine.flushdb();
        assert_eq!(engine.dbsize(), 0);
        assert_eq!(engine.memory_info().used_memory, 0);
    }

    #[test]
    fn keys_glob_pattern() {
        let engine = StorageEngine::new();
        engine.set(Bytes::from("user:1"), Bytes::from("a")).unwrap();
        engine.set(Bytes::from("user:2"), Bytes::from("a")).unwrap();
        engine.set(Bytes::from("session:1"), Bytes::from("a")).unwrap();

        let mut matched = engine.keys("user:*");
        matched.sort();
        assert_eq!(matched, vec![Bytes::from("user:1"), Bytes::from("user:2")]);
    }

    #[test]
    fn cleanup_expired_removes_only_expired_entries() {
        let engine = StorageEngine::new();
        engine
            .set_with_ttl(Bytes::from("soon"), Bytes::from("v"), Duration::from_millis(5))
            .unwrap();
        engine.set(Bytes::from("forever"), Bytes::from("v")).unwrap();
        std::thread::sleep(Duration::from_millis(30));

        let removed = engine.cleanup_expired();
        assert_eq!(removed, 1);
        assert_eq!(engine.dbsize(), 1);
    }

    #[test]
    fn noeviction_rejects_set_over_budget_without_mutating_keyspace() {
        let engine = StorageEngine::with_config(EngineConfig {
            maxmemory: 10,
            policy: EvictionPolicy::NoEviction,
            samples: 5,
        });

        let result = engine.set(Bytes::from("foo"), Bytes::from("a value too big to fit"));
        assert_eq!(result, Err(EngineError::OutOfMemory));
        assert_eq!(engine.dbsize(), 0);
    }

    #[test]
    fn lru_eviction_keeps_tracked_memory_within_budget() {
        let engine = StorageEngine::with_config(EngineConfig {
            maxmemory: 200,
            policy: EvictionPolicy::AllKeysLru,
            samples: 5,
        });

        for i in 0..8 {
            let key = Bytes::from(format!("k{i}"));
            let value = Bytes::from("x".repeat(10));
            let _ = engine.set(key, value);
            assert!(engine.memory_info().used_memory <= 200);
        }
        assert!(engine.dbsize() <= 5);
    }

    #[test]
    fn concurrent_access_is_consistent() {
        use std::sync::Arc;
        use std::thread;

        let engine = Arc::new(StorageEngine::new());
        let mut handles = Vec::new();
        for t in 0..4 {
            let engine = Arc::clone(&engine);
            handles.push(thread::spawn(move || {
                for i in 0..1000 {
                    let key = Bytes::from(format!("k{t}:{i}"));
                    engine.set(key.clone(), Bytes::from("v")).unwrap();
                    engine.get(&key);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(engine.dbsize(), 4000);
    }

    #[test]
    fn glob_pattern_supports_sets_and_ranges() {
        let g = GlobPattern::new("h[ae]llo");
        assert!(g.matches("hello"));
        assert!(g.matches("hallo"));
        assert!(!g.matches("hillo"));

        let g = GlobPattern::new("[a-c]at");
        assert!(g.matches("bat"));
        assert!(!g.matches("dat"));
    }
}
