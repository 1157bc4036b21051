//! # Deduplication Cache
//!
//! The upstream delivers events at-least-once and is observed to redeliver
//! identical events within short windows. This cache answers "have we seen
//! this identity recently" in O(1), bounds itself by both time (TTL) and
//! size (half-compaction), and needs no external scheduler.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::model::EventIdentity;

/// Default bound on the number of identities held.
pub const DEFAULT_CAPACITY: usize = 1000;
/// Default window after which an admitted identity becomes re-admittable.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

struct Inner {
    seen: HashMap<EventIdentity, Instant>,
    /// Insertion order, oldest first. Drives TTL purging and compaction.
    order: VecDeque<EventIdentity>,
}

/// Bounded, time-windowed membership test over event identities.
///
/// Thread-safe: the lock lives inside, callers never coordinate. In
/// practice there is a single writer (the ingestion loop), but the
/// contract does not assume it.
pub struct DedupCache {
    inner: Mutex<Inner>,
    capacity: usize,
    ttl: Duration,
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

impl DedupCache {
    /// Creates a cache with an explicit capacity and TTL window.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner { seen: HashMap::new(), order: VecDeque::new() }),
            capacity,
            ttl,
        }
    }

    /// Admits an identity: `true` if it was not seen within the window
    /// (caller should process the event), `false` if it is a duplicate.
    pub fn admit(&self, identity: EventIdentity) -> bool {
        let mut guard = self.inner.lock().expect("dedup lock poisoned");
        let inner = &mut *guard;
        let now = Instant::now();

        // Purge expired entries from the old end of the insertion order.
        loop {
            let expired = match inner.order.front() {
                Some(id) => inner
                    .seen
                    .get(id)
                    .is_none_or(|at| now.duration_since(*at) > self.ttl),
                None => break,
            };
            if !expired {
                break;
            }
            if let Some(id) = inner.order.pop_front() {
                inner.seen.remove(&id);
            }
        }

        if inner.seen.contains_key(&identity) {
            return false;
        }
        inner.seen.insert(identity.clone(), now);
        inner.order.push_back(identity);

        // Size bound: keep only the most-recently-inserted half.
        if inner.order.len() > self.capacity {
            let drop_count = inner.order.len() / 2;
            for id in inner.order.drain(..drop_count) {
                inner.seen.remove(&id);
            }
        }

        true
    }

    /// Forgets everything. Called on service stop.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("dedup lock poisoned");
        inner.seen.clear();
        inner.order.clear();
    }

    /// Number of identities currently held.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("dedup lock poisoned").order.len()
    }

    /// True when no identities are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
