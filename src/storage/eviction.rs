//! Sampled eviction policies.
//!
//! When a `SET` would push tracked memory past `maxmemory`, the engine draws
//! a bounded sample of candidate keys and evicts from within that sample
//! rather than scanning the whole keyspace. Candidates are drawn through
//! `rand` rather than relying on the map's iteration order, so the sample is
//! non-deterministic across runs regardless of what the underlying map
//! happens to do internally.

use crate::storage::entry::Entry;
use bytes::Bytes;
use rand::seq::IteratorRandom;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// The eviction policy configured for `maxmemory-policy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    NoEviction,
    AllKeysRandom,
    AllKeysLru,
    AllKeysLfu,
    VolatileRandom,
    VolatileLru,
    VolatileLfu,
    VolatileTtl,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        EvictionPolicy::NoEviction
    }
}

impl FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "noeviction" => Ok(EvictionPolicy::NoEviction),
            "allkeys-random" => Ok(EvictionPolicy::AllKeysRandom),
            "allkeys-lru" => Ok(EvictionPolicy::AllKeysLru),
            "allkeys-lfu" => Ok(EvictionPolicy::AllKeysLfu),
            "volatile-random" => Ok(EvictionPolicy::VolatileRandom),
            "volatile-lru" => Ok(EvictionPolicy::VolatileLru),
            "volatile-lfu" => Ok(EvictionPolicy::VolatileLfu),
            "volatile-ttl" => Ok(EvictionPolicy::VolatileTtl),
            other => Err(format!("unknown maxmemory-policy: {other}")),
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EvictionPolicy::NoEviction => "noeviction",
            EvictionPolicy::AllKeysRandom => "allkeys-random",
            EvictionPolicy::AllKeysLru => "allkeys-lru",
            EvictionPolicy::AllKeysLfu => "allkeys-lfu",
            EvictionPolicy::VolatileRandom => "volatile-random",
            EvictionPolicy::VolatileLru => "volatile-lru",
            EvictionPolicy::VolatileLfu => "volatile-lfu",
            EvictionPolicy::VolatileTtl => "volatile-ttl",
        };
        f.write_str(s)
    }
}

/// Draws up to `samples` candidate keys for `policy` out of `map`, ordered
/// so the caller can evict from the front until enough memory is freed.
///
/// Returns keys only (cloned `Bytes`, cheap) — the caller re-reads each
/// entry under the write lock right before removing it, since the sample
/// itself is taken without holding the lock for the whole operation only in
/// the shard-less single-lock design this engine does not need: here the
/// caller already holds the write lock for the whole `set`, so the sample
/// and the eviction it drives are atomic with respect to other writers.
pub fn sample_candidates(
    map: &HashMap<Bytes, Entry>,
    policy: EvictionPolicy,
    samples: usize,
) -> Vec<Bytes> {
    if policy == EvictionPolicy::NoEviction || samples == 0 || map.is_empty() {
        return Vec::new();
    }

    let mut rng = rand::thread_rng();

    let volatile_only = matches!(
        policy,
        EvictionPolicy::VolatileRandom
            | EvictionPolicy::VolatileLru
            | EvictionPolicy::VolatileLfu
            | EvictionPolicy::VolatileTtl
    );

    let pool = map
        .iter()
        .filter(|(_, entry)| !volatile_only || entry.expires_at.is_some());

    let mut picked: Vec<(Bytes, Entry)> = pool
        .choose_multiple(&mut rng, samples)
        .into_iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    match policy {
        EvictionPolicy::NoEviction => {}
        EvictionPolicy::AllKeysRandom | EvictionPolicy::VolatileRandom => {
            // Sampling already drew these at random; eviction order within
            // the sample doesn't matter further.
        }
        EvictionPolicy::AllKeysLru | EvictionPolicy::VolatileLru => {
            picked.sort_by_key(|(_, e)| e.last_accessed);
        }
        EvictionPolicy::AllKeysLfu | EvictionPolicy::VolatileLfu => {
            picked.sort_by_key(|(_, e)| e.access_count);
        }
        EvictionPolicy::VolatileTtl => {
            picked.sort_by_key(|(_, e)| e.expires_at);
        }
    }

    picked.into_iter().map(|(k, _)| k).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_with(n: usize) -> HashMap<Bytes, Entry> {
        let mut m = HashMap::new();
        for i in 0..n {
            m.insert(
                Bytes::from(format!("k{i}")),
                Entry::new(Bytes::from("v")),
            );
        }
        m
    }

    #[test]
    fn noeviction_never_samples() {
        let map = map_with(10);
        let sample = sample_candidates(&map, EvictionPolicy::NoEviction, 5);
        assert!(sample.is_empty());
    }

    #[test]
    fn samples_are_bounded_by_requested_count() {
        let map = map_with(10);
        let sample = sample_candidates(&map, EvictionPolicy::AllKeysRandom, 5);
        assert_eq!(sample.len(), 5);
    }

    #[test]
    fn volatile_policy_only_samples_keys_with_ttl() {
        let mut map = map_with(5);
        let volatile_key = Bytes::from("volatile");
        let mut e = Entry::new(Bytes::from("v"));
        e.expires_at = Some(std::time::SystemTime::now() + std::time::Duration::from_secs(60));
        map.insert(volatile_key.clone(), e);

        let sample = sample_candidates(&map, EvictionPolicy::VolatileRandom, 10);
        assert_eq!(sample, vec![volatile_key]);
    }

    #[test]
    fn lru_orders_oldest_first() {
        let mut map = HashMap::new();
        let mut old = Entry::new(Bytes::from("v"));
        old.last_accessed -= std::time::Duration::from_secs(10);
        map.insert(Bytes::from("old"), old);
        map.insert(Bytes::from("new"), Entry::new(Bytes::from("v")));

        let sample = sample_candidates(&map, EvictionPolicy::AllKeysLru, 2);
        assert_eq!(sample[0], Bytes::from("old"));
    }
}
