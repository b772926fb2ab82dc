//! Concurrency-safe keyed store for harvested records.
//!
//! Page tasks call [`ResultAggregator::put`] from many tasks at once; the
//! orchestrator drains the store after its join barrier. The aggregator
//! itself has no notion of completion.
//!
//! Two write flavors:
//! - [`put`](ResultAggregator::put): last write wins. For keys reported by
//!   two pages the survivor depends on completion order.
//! - [`put_ranked`](ResultAggregator::put_ranked): the write with the higher
//!   rank (page number) wins regardless of completion order; equal ranks
//!   fall back to last write wins.
//!
//! Dedup-only call sites store `()` as the value.

use std::hash::Hash;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

#[derive(Debug, Clone)]
struct Ranked<V> {
    rank: u64,
    value: V,
}

/// Keyed store with at most one record per key.
#[derive(Debug)]
pub struct ResultAggregator<K, V>
where
    K: Eq + Hash,
{
    entries: DashMap<K, Ranked<V>>,
}

impl<K, V> Default for ResultAggregator<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<K, V> ResultAggregator<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn put(&self, key: K, value: V) {
        let rank = self.entries.get(&key).map_or(0, |existing| existing.rank);
        self.entries.insert(key, Ranked { rank, value });
    }

    /// Stores `value` under `key` unless a value with a higher rank is present.
    ///
    /// Returns true if the value was stored.
    pub fn put_ranked(&self, key: K, rank: u64, value: V) -> bool {
        match self.entries.entry(key) {
            Entry::Occupied(mut slot) => {
                if slot.get().rank > rank {
                    return false;
                }
                slot.insert(Ranked { rank, value });
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(Ranked { rank, value });
                true
            }
        }
    }

    /// Returns the number of distinct keys stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Removes and returns every entry, in no particular order.
    ///
    /// Call only after all producers have finished; entries written during a
    /// drain may or may not be included.
    pub fn drain(&self) -> Vec<(K, V)> {
        let keys: Vec<K> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.into_iter()
            .filter_map(|key| self.entries.remove(&key))
            .map(|(key, ranked)| (key, ranked.value))
            .collect()
    }

    /// Removes and returns only the keys, in no particular order.
    pub fn drain_keys(&self) -> Vec<K> {
        self.drain().into_iter().map(|(key, _)| key).collect()
    }
}

impl<K, V> ResultAggregator<K, V>
where
    K: Eq + Hash + Clone + Ord,
{
    /// Like [`drain`](Self::drain), ordered by key.
    pub fn drain_sorted(&self) -> Vec<(K, V)> {
        let mut entries = self.drain();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_distinct_keys_are_all_kept() {
        let aggregator = Arc::new(ResultAggregator::<u64, u64>::new());
        let handles: Vec<_> = (0..64u64)
            .map(|task| {
                let aggregator = Arc::clone(&aggregator);
                tokio::spawn(async move {
                    for i in 0..50u64 {
                        aggregator.put(task * 1000 + i, i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(aggregator.drain().len(), 64 * 50);
        assert!(aggregator.is_empty());
    }

    #[test]
    fn test_same_key_keeps_later_write() {
        let aggregator = ResultAggregator::new();
        aggregator.put(42u64, "page 1");
        aggregator.put(42u64, "page 3");
        assert_eq!(aggregator.drain(), vec![(42, "page 3")]);
    }

    #[test]
    fn test_ranked_write_ignores_completion_order() {
        let aggregator = ResultAggregator::new();
        assert!(aggregator.put_ranked(7u64, 3, "page 3"));
        assert!(!aggregator.put_ranked(7u64, 2, "page 2"));
        assert!(aggregator.put_ranked(7u64, 3, "page 3 again"));
        assert_eq!(aggregator.drain(), vec![(7, "page 3 again")]);
    }

    #[test]
    fn test_dedup_only_values() {
        let aggregator = ResultAggregator::<u64, ()>::new();
        for id in [5, 3, 5, 9, 3] {
            aggregator.put(id, ());
        }
        assert_eq!(aggregator.len(), 3);
        let mut keys = aggregator.drain_keys();
        keys.sort_unstable();
        assert_eq!(keys, vec![3, 5, 9]);
    }

    #[test]
    fn test_drain_sorted_orders_by_key() {
        let aggregator = ResultAggregator::new();
        aggregator.put(3u64, 'c');
        aggregator.put(1u64, 'a');
        aggregator.put(2u64, 'b');
        assert_eq!(aggregator.drain_sorted(), vec![(1, 'a'), (2, 'b'), (3, 'c')]);
    }
}
