//! Bounded cache of decompressed chunks; single in-flight build per chunk
//! (spec §3 "Lifecycles", §4.H, §5).
//!
//! Ref: `forensicxlab-exhume_body::ewf::ChunkCache` caches exactly one
//! decompressed chunk with no synchronization (`{number, segment, ptr,
//! data}`); this module generalizes that single slot into a bounded,
//! thread-safe map of `C` slots with the `Empty|Building|Ready|Dirty`
//! state machine spec §4.H specifies, using `std::sync::{Mutex, Condvar}`
//! for the per-slot waiter lists (spec §5: "parallel OS threads ...
//! per-chunk mutual exclusion lives in the cache slot state").

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};

use crate::error::Result;

/// One logical chunk's cache state.
enum Slot {
    Building,
    Ready { data: Arc<Vec<u8>>, crc_verified: bool },
    Dirty { data: Vec<u8> },
}

struct Inner {
    capacity: usize,
    slots: HashMap<u64, Slot>,
    /// LRU order among `Ready` entries only; front = least recently used.
    lru: VecDeque<u64>,
}

impl Inner {
    fn touch(&mut self, logical_index: u64) {
        self.lru.retain(|&i| i != logical_index);
        self.lru.push_back(logical_index);
    }

    fn evict_if_needed(&mut self) {
        while self.ready_count() > self.capacity {
            // Find and evict the least-recently-used Ready entry. Dirty
            // entries are pinned (spec §4.H) and never appear in `lru`.
            if let Some(pos) = self.lru.iter().position(|idx| {
                matches!(self.slots.get(idx), Some(Slot::Ready { .. }))
            }) {
                let idx = self.lru.remove(pos).unwrap();
                self.slots.remove(&idx);
            } else {
                break;
            }
        }
    }

    fn ready_count(&self) -> usize {
        self.slots
            .values()
            .filter(|s| matches!(s, Slot::Ready { .. }))
            .count()
    }
}

/// Fixed-capacity chunk cache, keyed by `logical_index` (spec §4.H).
pub struct ChunkCache {
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl ChunkCache {
    pub fn new(capacity: usize) -> Self {
        ChunkCache {
            inner: Mutex::new(Inner {
                capacity,
                slots: HashMap::new(),
                lru: VecDeque::new(),
            }),
            cond: Condvar::new(),
        }
    }

    /// Returns the cached bytes for `logical_index`, invoking `build`
    /// exactly once across all concurrent callers if the slot is
    /// currently `Empty` (spec §4.H contract: "at most one `Building`
    /// state per logical_index across all callers").
    pub fn get_or_build(
        &self,
        logical_index: u64,
        build: impl FnOnce() -> Result<(Vec<u8>, bool)>,
    ) -> Result<Arc<Vec<u8>>> {
        loop {
            let mut guard = self.inner.lock().unwrap();
            match guard.slots.get(&logical_index) {
                Some(Slot::Ready { data, .. }) => {
                    let data = data.clone();
                    guard.touch(logical_index);
                    return Ok(data);
                }
                Some(Slot::Dirty { data }) => {
                    return Ok(Arc::new(data.clone()));
                }
                Some(Slot::Building) => {
                    guard = self.cond.wait(guard).unwrap();
                    drop(guard);
                    continue;
                }
                None => {
                    guard.slots.insert(logical_index, Slot::Building);
                    drop(guard);
                    break;
                }
            }
        }

        // Build outside the lock — only this call owns the `Building`
        // slot for `logical_index`, so concurrent waiters block on the
        // condvar rather than re-entering the build.
        let result = build();

        let mut guard = self.inner.lock().unwrap();
        match result {
            Ok((data, crc_verified)) => {
                let data = Arc::new(data);
                guard.slots.insert(
                    logical_index,
                    Slot::Ready {
                        data: data.clone(),
                        crc_verified,
                    },
                );
                guard.touch(logical_index);
                guard.evict_if_needed();
                self.cond.notify_all();
                Ok(data)
            }
            Err(e) => {
                guard.slots.remove(&logical_index);
                self.cond.notify_all();
                Err(e)
            }
        }
    }

    /// Stages a write: `Ready|Empty → Dirty` (spec §4.H). Dirty entries
    /// are pinned until flushed by the write engine.
    pub fn write(&self, logical_index: u64, data: Vec<u8>) {
        let mut guard = self.inner.lock().unwrap();
        guard.lru.retain(|&i| i != logical_index);
        guard.slots.insert(logical_index, Slot::Dirty { data });
    }

    /// Removes and returns a dirty chunk's bytes for flushing, if any.
    pub fn take_dirty(&self, logical_index: u64) -> Option<Vec<u8>> {
        let mut guard = self.inner.lock().unwrap();
        match guard.slots.get(&logical_index) {
            Some(Slot::Dirty { .. }) => {
                if let Some(Slot::Dirty { data }) = guard.slots.remove(&logical_index) {
                    Some(data)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Transitions a flushed dirty chunk back to `Ready` (spec §4.H:
    /// "`Dirty → Ready` ... retains `Dirty` until segment rotation
    /// point").
    pub fn mark_ready(&self, logical_index: u64, data: Vec<u8>) {
        let mut guard = self.inner.lock().unwrap();
        guard.slots.insert(
            logical_index,
            Slot::Ready {
                data: Arc::new(data),
                crc_verified: true,
            },
        );
        guard.touch(logical_index);
        guard.evict_if_needed();
    }

    /// Number of slots currently in the `Building` state, across all
    /// indices — used by tests to assert the single-builder invariant.
    #[cfg(test)]
    fn building_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .slots
            .values()
            .filter(|s| matches!(s, Slot::Building))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn concurrent_readers_build_once() {
        let cache = Arc::new(ChunkCache::new(4));
        let build_calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                let build_calls = build_calls.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get_or_build(7, || {
                            build_calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(std::time::Duration::from_millis(20));
                            Ok((vec![42u8; 8], true))
                        })
                        .unwrap()
                })
            })
            .collect();

        for h in handles {
            let data = h.join().unwrap();
            assert_eq!(&data[..], &[42u8; 8][..]);
        }
        assert_eq!(build_calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.building_count(), 0);
    }

    #[test]
    fn eviction_respects_capacity() {
        let cache = ChunkCache::new(2);
        for i in 0..5u64 {
            cache.get_or_build(i, || Ok((vec![i as u8], true))).unwrap();
        }
        let ready = cache.inner.lock().unwrap().ready_count();
        assert!(ready <= 2);
    }

    #[test]
    fn dirty_entries_survive_eviction_pressure() {
        let cache = ChunkCache::new(1);
        cache.write(99, vec![1, 2, 3]);
        for i in 0..5u64 {
            cache.get_or_build(i, || Ok((vec![i as u8], true))).unwrap();
        }
        assert_eq!(cache.take_dirty(99), Some(vec![1, 2, 3]));
    }
}
