//! Bounded, bytes-accounted read-through cache.
//!
//! Backed by [`hashlink::LinkedHashMap`], which already pairs a hash index
//! with an intrusive insertion-order list, so `push`/`get` promotion is
//! the map's own O(1) `to_back` rather than a hand-rolled linked list.
//! Most-recently-used lives at the back; eviction pops from the front.
//!
//! Bytes-bounded, not count-bounded (see `SPEC_FULL.md` §3.4): the total
//! of `key.len() + value.len()` across all entries never exceeds
//! `max_bytes`. An entry larger than `max_bytes` on its own is rejected
//! outright rather than evicting everything to make room for it.
//! `max_bytes == 0` disables the cache: every operation is a no-op.

use std::sync::Mutex;

use hashlink::LinkedHashMap;

struct Inner {
    entries: LinkedHashMap<String, Vec<u8>>,
    current_bytes: usize,
    max_bytes: usize,
}

fn entry_size(key: &str, value: &[u8]) -> usize {
    key.len() + value.len()
}

/// A bytes-bounded LRU cache, safe to share across threads behind a
/// single mutex. Independent of any shard's own lock: cache operations
/// never block on shard I/O.
pub struct Lru {
    inner: Mutex<Inner>,
}

impl Lru {
    pub fn new(max_bytes: usize) -> Self {
        Lru { inner: Mutex::new(Inner { entries: LinkedHashMap::new(), current_bytes: 0, max_bytes }) }
    }

    /// Inserts or overwrites `key`, promoting it to most-recently-used.
    /// A no-op if the cache is disabled (`max_bytes == 0`) or if `value`
    /// alone is larger than `max_bytes`.
    pub fn push(&self, key: &str, value: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        if inner.max_bytes == 0 {
            return;
        }
        let size = entry_size(key, value);
        if size > inner.max_bytes {
            return;
        }

        if inner.entries.contains_key(key) {
            let old_size = entry_size(key, inner.entries.get(key).unwrap());
            *inner.entries.get_mut(key).unwrap() = value.to_vec();
            inner.entries.to_back(key);
            inner.current_bytes = inner.current_bytes - old_size + size;
            return;
        }

        while inner.current_bytes + size > inner.max_bytes {
            match inner.entries.pop_front() {
                Some((evicted_key, evicted_value)) => {
                    inner.current_bytes -= entry_size(&evicted_key, &evicted_value);
                }
                None => break,
            }
        }

        inner.entries.insert(key.to_string(), value.to_vec());
        inner.current_bytes += size;
    }

    /// Returns `key`'s value and promotes it to most-recently-used, or
    /// `None` on a miss.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.entries.contains_key(key) {
            return None;
        }
        inner.entries.to_back(key);
        inner.entries.get(key).cloned()
    }

    /// Removes `key` if present.
    pub fn del(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(value) = inner.entries.remove(key) {
            inner.current_bytes -= entry_size(key, &value);
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.clear();
        inner.current_bytes = 0;
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }
}
