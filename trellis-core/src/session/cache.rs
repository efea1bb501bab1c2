//! Sliding-Expiration Cache
//!
//! A bounded map where every entry expires after a fixed period of
//! inactivity. Reading an entry refreshes its deadline and marks it most
//! recently used; inserting past capacity evicts the least recently used
//! entry.
//!
//! Eviction is passive: nothing runs in the background. Expired entries are
//! dropped when they are touched, when an insert needs room, or when
//! [`TtlCache::purge_expired_at`] is called.
//!
//! The entry order of the underlying `IndexMap` is the recency order: the
//! front is least recently used, the back most recently used.

use std::hash::Hash;
use std::time::{Duration, Instant};

use indexmap::IndexMap;

#[derive(Debug)]
struct Slot<V> {
    value: V,
    expires_at: Instant,
}

/// Bounded map with per-entry sliding TTL and LRU eviction.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: IndexMap<K, Slot<V>>,
    capacity: usize,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq,
{
    /// Create an empty cache. A capacity of zero is treated as one.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: IndexMap::new(),
            capacity: capacity.max(1),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Look up a live entry, refreshing its deadline.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.get_at(key, Instant::now())
    }

    /// [`get`](Self::get) against an explicit clock reading.
    pub fn get_at(&mut self, key: &K, now: Instant) -> Option<&V> {
        let index = self.entries.get_index_of(key)?;
        if self.entries[index].expires_at <= now {
            self.entries.shift_remove_index(index);
            return None;
        }

        let last = self.entries.len() - 1;
        self.entries.move_index(index, last);
        let (_, slot) = self.entries.get_index_mut(last)?;
        slot.expires_at = now + self.ttl;
        Some(&slot.value)
    }

    /// Whether a live entry exists, without refreshing it.
    pub fn contains_at(&self, key: &K, now: Instant) -> bool {
        self.entries
            .get(key)
            .is_some_and(|slot| slot.expires_at > now)
    }

    /// Insert or replace an entry with a full TTL.
    ///
    /// Returns the number of live entries evicted to make room.
    pub fn insert(&mut self, key: K, value: V) -> usize {
        self.insert_at(key, value, Instant::now())
    }

    /// [`insert`](Self::insert) against an explicit clock reading.
    pub fn insert_at(&mut self, key: K, value: V, now: Instant) -> usize {
        self.purge_expired_at(now);
        self.entries.shift_remove(&key);

        let mut evicted = 0;
        while self.entries.len() >= self.capacity {
            self.entries.shift_remove_index(0);
            evicted += 1;
        }

        self.entries.insert(
            key,
            Slot {
                value,
                expires_at: now + self.ttl,
            },
        );
        evicted
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.shift_remove(key).map(|slot| slot.value)
    }

    /// Drop every expired entry. Returns how many were dropped.
    pub fn purge_expired_at(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, slot| slot.expires_at > now);
        before - self.entries.len()
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
