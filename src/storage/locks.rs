//! Striped Key Lock Table
//!
//! The sharded dictionary only makes individual operations on a single key
//! safe. Commands that read-modify-write a key, or touch several keys at
//! once (MSET, RENAME, EXEC), serialize through this fixed-size table of
//! reader/writer locks. A key maps to a slot by the same FNV-1a hash the
//! dictionary uses, masked by the table size, so memory stays bounded at the
//! cost of occasional false sharing between unrelated keys.
//!
//! Deadlock avoidance: a multi-key acquisition computes the distinct slot
//! indices for all of its keys, then locks them in strictly ascending index
//! order and releases them in strictly descending order. Every caller uses
//! the same total order, so no circular wait can form. When a slot is named
//! by both a write key and a read key, write mode wins up front; lock
//! upgrades mid-operation are never attempted.
//!
//! Locks are surfaced as RAII guards. Dropping a guard is the unlock, which
//! makes release-on-every-exit-path automatic.

use crate::storage::dict::fnv1a;
use bytes::Bytes;
use std::collections::BTreeSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Fixed-size table of striped reader/writer locks.
#[derive(Debug)]
pub struct LockTable {
    slots: Vec<RwLock<()>>,
}

/// A single held slot, in either mode.
#[derive(Debug)]
enum SlotGuard<'a> {
    Read(#[allow(dead_code)] RwLockReadGuard<'a, ()>),
    Write(#[allow(dead_code)] RwLockWriteGuard<'a, ()>),
}

/// Guard for a multi-key acquisition. Slots were taken in ascending index
/// order; `Drop` releases them descending.
#[derive(Debug)]
pub struct MultiKeyGuard<'a> {
    guards: Vec<SlotGuard<'a>>,
}

impl Drop for MultiKeyGuard<'_> {
    fn drop(&mut self) {
        while self.guards.pop().is_some() {}
    }
}

/// Guard for a single-key acquisition.
#[derive(Debug)]
pub struct KeyGuard<'a> {
    _guard: SlotGuard<'a>,
}

impl LockTable {
    /// Creates a table with `size` slots, rounded up to a power of two so
    /// the slot pick is a mask.
    pub fn new(size: usize) -> Self {
        let size = size.max(1).next_power_of_two();
        let slots = (0..size).map(|_| RwLock::new(())).collect();
        Self { slots }
    }

    #[inline]
    fn slot_index(&self, key: &[u8]) -> usize {
        fnv1a(key) as usize & (self.slots.len() - 1)
    }

    /// Exclusive lock on one key's slot.
    pub fn lock(&self, key: &[u8]) -> KeyGuard<'_> {
        let slot = &self.slots[self.slot_index(key)];
        KeyGuard {
            _guard: SlotGuard::Write(slot.write().unwrap()),
        }
    }

    /// Shared lock on one key's slot.
    pub fn rlock(&self, key: &[u8]) -> KeyGuard<'_> {
        let slot = &self.slots[self.slot_index(key)];
        KeyGuard {
            _guard: SlotGuard::Read(slot.read().unwrap()),
        }
    }

    /// Locks every slot named by `write_keys` and `read_keys`, each slot at
    /// most once, in ascending index order. A slot referenced by any write
    /// key is taken in write mode even if read keys also map to it.
    pub fn lock_multi(&self, write_keys: &[Bytes], read_keys: &[Bytes]) -> MultiKeyGuard<'_> {
        let write_slots: BTreeSet<usize> =
            write_keys.iter().map(|k| self.slot_index(k)).collect();
        let mut all_slots = write_slots.clone();
        all_slots.extend(read_keys.iter().map(|k| self.slot_index(k)));

        let mut guards = Vec::with_capacity(all_slots.len());
        for index in all_slots {
            let slot = &self.slots[index];
            let guard = if write_slots.contains(&index) {
                SlotGuard::Write(slot.write().unwrap())
            } else {
                SlotGuard::Read(slot.read().unwrap())
            };
            guards.push(guard);
        }
        MultiKeyGuard { guards }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn b(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    #[test]
    fn size_rounds_up_to_power_of_two() {
        assert_eq!(LockTable::new(1000).slots.len(), 1024);
        assert_eq!(LockTable::new(1024).slots.len(), 1024);
        assert_eq!(LockTable::new(0).slots.len(), 1);
    }

    #[test]
    fn same_key_maps_to_same_slot() {
        let table = LockTable::new(1024);
        assert_eq!(table.slot_index(b"k1"), table.slot_index(b"k1"));
    }

    #[test]
    fn multi_guard_allows_reacquisition_after_drop() {
        let table = LockTable::new(64);
        let keys = vec![b("a"), b("b"), b("c")];
        {
            let _guard = table.lock_multi(&keys, &[]);
        }
        // released on drop: write-locking the same keys succeeds
        let _guard = table.lock_multi(&keys, &keys);
    }

    #[test]
    fn duplicate_and_overlapping_keys_lock_each_slot_once() {
        let table = LockTable::new(64);
        // "a" appears as both a write key and a read key; write mode must
        // win and the slot must only be taken once (no self-deadlock)
        let write = vec![b("a"), b("a")];
        let read = vec![b("a"), b("b")];
        let _guard = table.lock_multi(&write, &read);
    }

    #[test]
    fn readers_share_a_slot() {
        let table = Arc::new(LockTable::new(64));
        let _r1 = table.rlock(b"k");
        let _r2 = table.rlock(b"k");
    }

    #[test]
    fn ordered_acquisition_prevents_deadlock() {
        let table = Arc::new(LockTable::new(8));
        let counter = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        // every thread locks the same keys, presented in a different order;
        // without the slot-index ordering this interleaving deadlocks fast
        for t in 0..8 {
            let table = Arc::clone(&table);
            let counter = Arc::clone(&counter);
            handles.push(thread::spawn(move || {
                let mut keys: Vec<Bytes> =
                    (0..6).map(|i| Bytes::from(format!("key-{i}"))).collect();
                keys.rotate_left(t % 6);
                for _ in 0..200 {
                    let (write, read) = keys.split_at(3);
                    let _guard = table.lock_multi(write, read);
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 8 * 200);
    }

    #[test]
    fn writer_excludes_other_writers() {
        let table = Arc::new(LockTable::new(64));
        let running = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let table = Arc::clone(&table);
            let running = Arc::clone(&running);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    let _guard = table.lock(b"hot");
                    assert_eq!(running.fetch_add(1, Ordering::SeqCst), 0);
                    running.fetch_sub(1, Ordering::SeqCst);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
