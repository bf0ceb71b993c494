//! Sharded Concurrent Dictionary
//!
//! A thread-safe map partitioned into independently locked shards. A 32-bit
//! FNV-1a hash of the raw key bytes selects the shard, so two operations on
//! different keys usually touch different locks and proceed in parallel.
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                 ShardedDict<V>                   │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌────────┐  │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ ...N   │  │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │        │  │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │        │  │
//! │  └─────────┘ └─────────┘ └─────────┘ └────────┘  │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! The shard count is the smallest power of two at or above the requested
//! capacity (minimum 16), so the shard pick is a mask instead of a modulo.
//! A key lives in exactly one shard, determined solely by its hash. The
//! total entry count is kept in an atomic so `len()` never takes a lock.
//!
//! The dictionary guarantees consistency for single-key operations only.
//! Anything spanning keys (transactions, read-modify-write commands) layers
//! the striped [`LockTable`](crate::storage::LockTable) on top.

use bytes::Bytes;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a over raw key bytes. Shared by the dictionary and the
/// striped lock table so a key maps consistently in both.
pub fn fnv1a(key: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for &b in key {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Smallest power of two >= `max(requested, 16)`, saturating at `i32::MAX`.
fn compute_shard_count(requested: usize) -> usize {
    if requested <= 16 {
        return 16;
    }
    match requested.checked_next_power_of_two() {
        Some(n) if n <= i32::MAX as usize => n,
        _ => i32::MAX as usize,
    }
}

#[derive(Debug)]
struct Shard<V> {
    map: RwLock<HashMap<Bytes, V>>,
}

impl<V> Shard<V> {
    fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }
}

/// Sharded, reference-counted-friendly concurrent map keyed by raw bytes.
#[derive(Debug)]
pub struct ShardedDict<V> {
    shards: Vec<Shard<V>>,
    count: AtomicUsize,
}

impl<V: Clone> ShardedDict<V> {
    /// Creates a dictionary sized for roughly `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        let shard_count = compute_shard_count(capacity);
        let shards = (0..shard_count).map(|_| Shard::new()).collect();
        Self {
            shards,
            count: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn shard(&self, key: &[u8]) -> &Shard<V> {
        let index = fnv1a(key) as usize & (self.shards.len() - 1);
        &self.shards[index]
    }

    /// Looks up a key under the shard read lock, cloning the value out.
    pub fn get(&self, key: &[u8]) -> Option<V> {
        let map = self.shard(key).map.read().unwrap();
        map.get(key).cloned()
    }

    /// Inserts or overwrites. Returns `true` when the key was new.
    pub fn put(&self, key: Bytes, value: V) -> bool {
        let mut map = self.shard(&key).map.write().unwrap();
        let inserted = map.insert(key, value).is_none();
        if inserted {
            self.count.fetch_add(1, Ordering::Relaxed);
        }
        inserted
    }

    /// Inserts only when the key is absent. Returns `true` on insert.
    pub fn put_if_absent(&self, key: Bytes, value: V) -> bool {
        let mut map = self.shard(&key).map.write().unwrap();
        if map.contains_key(&key) {
            return false;
        }
        map.insert(key, value);
        self.count.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Overwrites only when the key is present. Returns `true` on update.
    pub fn put_if_exists(&self, key: Bytes, value: V) -> bool {
        let mut map = self.shard(&key).map.write().unwrap();
        match map.get_mut(&key) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Removes a key. Returns `true` when it was present.
    pub fn remove(&self, key: &[u8]) -> bool {
        let mut map = self.shard(key).map.write().unwrap();
        let removed = map.remove(key).is_some();
        if removed {
            self.count.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    /// Runs `f` on the value slot under the shard write lock. The closure
    /// sees `None` for a missing key; it cannot insert or delete, so the
    /// entry count stays consistent without re-checking.
    pub fn mutate<R>(&self, key: &[u8], f: impl FnOnce(Option<&mut V>) -> R) -> R {
        let mut map = self.shard(key).map.write().unwrap();
        f(map.get_mut(key))
    }

    /// Total entry count from the atomic; takes no shard lock.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visits every entry. Each shard's read lock is held only for that
    /// shard's iteration and is released before the visitor's `false`
    /// return propagates out.
    pub fn for_each(&self, mut visitor: impl FnMut(&Bytes, &V) -> bool) {
        for shard in &self.shards {
            let map = shard.map.read().unwrap();
            for (key, value) in map.iter() {
                if !visitor(key, value) {
                    return;
                }
            }
        }
    }

    /// Snapshot of every key.
    pub fn keys(&self) -> Vec<Bytes> {
        let mut keys = Vec::with_capacity(self.len());
        self.for_each(|key, _| {
            keys.push(key.clone());
            true
        });
        keys
    }

    /// Up to `limit` keys sampled by picking a random shard and then an
    /// arbitrary key inside it. May repeat keys.
    pub fn random_keys(&self, limit: usize) -> Vec<Bytes> {
        if limit >= self.len() {
            return self.keys();
        }
        let mut rng = rand::thread_rng();
        let mut result = Vec::with_capacity(limit);
        while result.len() < limit {
            if self.len() == 0 {
                break;
            }
            let shard = &self.shards[rng.gen_range(0..self.shards.len())];
            if let Some(key) = shard_random_key(shard, &mut rng) {
                result.push(key);
            }
        }
        result
    }

    /// Like [`random_keys`](Self::random_keys) but deduplicated.
    pub fn random_distinct_keys(&self, limit: usize) -> Vec<Bytes> {
        if limit >= self.len() {
            return self.keys();
        }
        let mut rng = rand::thread_rng();
        let mut seen = HashSet::with_capacity(limit);
        while seen.len() < limit {
            if self.len() == 0 {
                break;
            }
            let shard = &self.shards[rng.gen_range(0..self.shards.len())];
            if let Some(key) = shard_random_key(shard, &mut rng) {
                seen.insert(key);
            }
        }
        seen.into_iter().collect()
    }

    /// Empties every shard and resets the count to zero. Callers racing a
    /// clear may observe a partially emptied table for a moment.
    pub fn clear(&self) {
        for shard in &self.shards {
            let mut map = shard.map.write().unwrap();
            *map = HashMap::new();
        }
        self.count.store(0, Ordering::Relaxed);
    }
}

fn shard_random_key<V>(shard: &Shard<V>, rng: &mut impl Rng) -> Option<Bytes> {
    let map = shard.map.read().unwrap();
    if map.is_empty() {
        return None;
    }
    let nth = rng.gen_range(0..map.len());
    map.keys().nth(nth).cloned()
}
