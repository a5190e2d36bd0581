//! # Sender Registry
//!
//! Maps sender identifiers to their [`SenderState`]. Entries are created on a
//! sender's first message and then live as long as the limiter; only their
//! contents change, under each entry's own lock.
//!
//! ```text
//!     Senders:
//!     alice ──┐
//!     bob ────┤
//!     carol ──┼──► Registry ──► per-sender bucket + lock
//!     dave ───┤        │
//!     erin ───┘        ▼
//!               ┌──────────────┐
//!               │  DashMap     │
//!               │  ┌────────┐  │
//!               │  │id → S  │  │  S = SenderState
//!               │  │id → S  │  │
//!               │  │id → S  │  │
//!               │  └────────┘  │
//!               └──────────────┘
//! ```
//!
//! The map is sharded, so lookups for unrelated senders rarely touch the same
//! lock, and no lock is held on the map while a sender's bucket is in use.

use super::sender::SenderState;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Expected number of distinct senders, used to pre-size the shards.
const EXPECTED_SENDERS: usize = 1024;

/// Upper bound on shard count.
const MAX_SHARDS: usize = 64;

#[derive(Debug)]
pub(crate) struct SenderRegistry {
    senders: DashMap<String, Arc<SenderState>, ahash::RandomState>,
    capacity: f64,
    total_created: AtomicU64,
}

impl SenderRegistry {
    /// Creates an empty registry whose buckets hold `capacity` credits.
    pub(crate) fn new(capacity: f64) -> Self {
        // DashMap requires a power-of-two shard count greater than one
        let num_shards = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(8)
            .next_power_of_two()
            .clamp(2, MAX_SHARDS);

        let initial_capacity = (EXPECTED_SENDERS / num_shards).max(16);

        Self {
            senders: DashMap::with_capacity_and_hasher_and_shard_amount(
                initial_capacity,
                ahash::RandomState::new(),
                num_shards,
            ),
            capacity,
            total_created: AtomicU64::new(0),
        }
    }

    /// Returns the sender's state, creating a full bucket on first sight.
    #[inline]
    pub(crate) fn get_or_insert(&self, sender: &str) -> Arc<SenderState> {
        // Fast path: the sender is already known
        if let Some(state) = self.senders.get(sender) {
            return state.clone();
        }

        match self.senders.entry(sender.to_owned()) {
            Entry::Occupied(occupied) => {
                // Another thread created it between our lookup and the entry call
                occupied.get().clone()
            }
            Entry::Vacant(vacant) => {
                let state = Arc::new(SenderState::new(sender, self.capacity, Instant::now()));
                vacant.insert(state.clone());

                let total = self.total_created.fetch_add(1, Ordering::Relaxed) + 1;
                debug!("Created bucket for sender: {} (total: {})", sender, total);

                state
            }
        }
    }

    pub(crate) fn get(&self, sender: &str) -> Option<Arc<SenderState>> {
        self.senders.get(sender).map(|state| state.clone())
    }

    /// Number of senders seen so far.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.senders.len()
    }

    /// Wakes every waiting `send`, on every sender.
    ///
    /// States are cloned out of the map first so no shard lock is held while
    /// sender locks are taken.
    pub(crate) fn wake_all(&self) -> usize {
        let states: Vec<Arc<SenderState>> =
            self.senders.iter().map(|entry| entry.value().clone()).collect();
        for state in &states {
            state.wake_all();
        }
        states.len()
    }

    /// Snapshot of every sender's state, in no particular order.
    pub(crate) fn states(&self) -> Vec<Arc<SenderState>> {
        self.senders.iter().map(|entry| entry.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_lazy_creation() {
        let registry = SenderRegistry::new(10.0);
        assert_eq!(registry.len(), 0);
        assert!(registry.get("alice").is_none());

        let alice = registry.get_or_insert("alice");
        assert_eq!(alice.sender(), "alice");
        assert_eq!(registry.len(), 1);

        // Same entry on later lookups
        let again = registry.get_or_insert("alice");
        assert!(Arc::ptr_eq(&alice, &again));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_buckets_are_independent() {
        let registry = SenderRegistry::new(2.0);
        let alice = registry.get_or_insert("alice");
        let bob = registry.get_or_insert("bob");

        {
            let mut bucket = alice.lock();
            assert!(bucket.try_take());
            assert!(bucket.try_take());
            assert!(!bucket.try_take());
        }

        assert!(bob.lock().try_take());
    }

    #[test]
    fn test_concurrent_creation_race() {
        let registry = Arc::new(SenderRegistry::new(10.0));
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || registry.get_or_insert("shared"))
            })
            .collect();

        let states: Vec<Arc<SenderState>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.total_created.load(Ordering::Relaxed), 1);
        assert!(states.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_wake_all_counts_senders() {
        let registry = SenderRegistry::new(1.0);
        for i in 0..5 {
            registry.get_or_insert(&format!("sender-{}", i));
        }
        assert_eq!(registry.wake_all(), 5);
        assert_eq!(registry.states().len(), 5);
    }
}
