use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::handle::{CacheHandle, Entry};
use crate::supports::Supports;

/// The count record a side-table entry retains for a key: sequence number
/// plus the same `use_count` atomic shared with the main-table entry (when
/// one still exists). The side-table is the "authoritative set of known
/// keys" spec §4.7 describes, and it grows monotonically — it is never
/// shrunk except by [`Cache::shrink_to_fit`].
struct CountRecord {
    sequence_number: u64,
    use_count: Arc<AtomicU32>,
}

/// A concurrent, reference-counted cache mapping `Key` to `Value`.
///
/// Entries are pinned against eviction by outstanding [`CacheHandle`]s.
/// [`Cache::drop_unused`] and [`Cache::drop_unused_but_last`] are the only
/// ways an entry is ever removed, and only once its `use_count` is zero.
///
/// Grounded on the teacher's `Arc<Mutex<HashMap<...>>>` idiom for shared
/// concurrent maps (`backends/foundation_core/src/wire/simple_http/client/dns.rs`);
/// the main table uses a `RwLock` since `at`/`entry_for` reads vastly
/// outnumber `emplace` writes in the scenarios spec §8 describes. Unlike
/// the original's per-bucket-locked `tbb::concurrent_hash_map`, both tables
/// here share one lock apiece — documented as a deliberate simplification
/// in `DESIGN.md` since no sharded concurrent map exists in this workspace's
/// dependency stack.
pub struct Cache<K, V> {
    next_sequence_number: AtomicU64,
    entries: RwLock<HashMap<K, Arc<Entry<V>>>>,
    counts: Mutex<HashMap<K, CountRecord>>,
}

impl<K, V> Default for Cache<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash,
{
    /// Builds an empty cache with a fresh sequence-number counter.
    pub fn new() -> Self {
        Self {
            next_sequence_number: AtomicU64::new(0),
            entries: RwLock::new(HashMap::new()),
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Whether the cache currently holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys known to the side-table, which may exceed
    /// [`Self::len`] since the side-table only shrinks on
    /// [`Self::shrink_to_fit`].
    pub fn capacity(&self) -> usize {
        self.counts.lock().unwrap().len()
    }
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Inserts `value` under `key` if absent, otherwise returns a handle to
    /// the existing entry. Either way the returned handle pins the entry.
    pub fn emplace(&self, key: K, value: V) -> CacheHandle<K, V> {
        {
            let entries = self.entries.read().unwrap();
            if let Some(entry) = entries.get(&key) {
                tracing::trace!("cache emplace found existing entry");
                return CacheHandle::new(key, Arc::clone(entry));
            }
        }

        let mut entries = self.entries.write().unwrap();
        // Re-check: another writer may have raced us between the read lock
        // above dropping and this write lock being acquired.
        if let Some(entry) = entries.get(&key) {
            return CacheHandle::new(key, Arc::clone(entry));
        }

        let sequence_number = self.next_sequence_number.fetch_add(1, Ordering::SeqCst);
        let use_count = Arc::new(AtomicU32::new(0));
        let entry = Arc::new(Entry {
            value,
            sequence_number,
            use_count: Arc::clone(&use_count),
        });
        entries.insert(key.clone(), Arc::clone(&entry));
        drop(entries);

        self.counts.lock().unwrap().insert(
            key.clone(),
            CountRecord {
                sequence_number,
                use_count,
            },
        );

        tracing::trace!(sequence_number, "cache emplace inserted new entry");
        CacheHandle::new(key, entry)
    }

    /// Finds `key` without inserting. Returns an invalid handle if absent.
    pub fn at(&self, key: &K) -> CacheHandle<K, V> {
        let entries = self.entries.read().unwrap();
        match entries.get(key) {
            Some(entry) => CacheHandle::new(key.clone(), Arc::clone(entry)),
            None => CacheHandle::invalid(),
        }
    }

    /// Removes every entry whose `use_count` is currently zero.
    pub fn drop_unused(&self) {
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|_, entry| entry.use_count.load(Ordering::SeqCst) != 0);
        let dropped = before - entries.len();
        if dropped > 0 {
            tracing::debug!(dropped, "cache drop_unused removed entries");
        }
    }

    /// Removes unused entries beyond the `k` most recently inserted ones:
    /// candidates (`use_count == 0`) are sorted by sequence number
    /// descending and the first `k` are retained, the rest erased.
    ///
    /// This workspace holds the main table's write lock for the whole
    /// operation, so the original's per-key re-check against a concurrent
    /// handle acquisition (spec §4.7) is unnecessary here: no handle can be
    /// acquired on any candidate while this call holds the lock.
    pub fn drop_unused_but_last(&self, k: usize) {
        let mut entries = self.entries.write().unwrap();

        let mut candidates: Vec<(K, u64)> = entries
            .iter()
            .filter(|(_, entry)| entry.use_count.load(Ordering::SeqCst) == 0)
            .map(|(key, entry)| (key.clone(), entry.sequence_number))
            .collect();
        candidates.sort_by(|a, b| b.1.cmp(&a.1));

        for (key, _) in candidates.into_iter().skip(k) {
            entries.remove(&key);
        }
    }

    /// Drops unused entries, then rebuilds the side-table from the
    /// surviving entries, shrinking [`Self::capacity`] down to
    /// [`Self::len`].
    ///
    /// Single-threaded precondition (spec §4.7): callers must ensure no
    /// concurrent `emplace`/`at`/`entry_for` is in flight.
    pub fn shrink_to_fit(&self) {
        self.drop_unused();

        let entries = self.entries.read().unwrap();
        let mut counts = self.counts.lock().unwrap();
        counts.clear();
        for (key, entry) in entries.iter() {
            counts.insert(
                key.clone(),
                CountRecord {
                    sequence_number: entry.sequence_number,
                    use_count: Arc::clone(&entry.use_count),
                },
            );
        }
    }
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Scans the side-table for the (at most one) key that `supports`
    /// `probe`, then returns a handle via [`Self::at`].
    ///
    /// # Panics
    ///
    /// Panics with "more than one key match" if more than one known key
    /// answers `supports(probe) == true` — an invariant violation on the
    /// caller's part (spec §7).
    pub fn entry_for<P>(&self, probe: &P) -> CacheHandle<K, V>
    where
        K: Supports<P>,
    {
        let counts = self.counts.lock().unwrap();
        let mut matches = counts.keys().filter(|key| key.supports(probe));
        let found = matches.next().cloned();
        if matches.next().is_some() {
            panic!("more than one key match");
        }
        drop(counts);

        match found {
            Some(key) => self.at(&key),
            None => CacheHandle::invalid(),
        }
    }

    /// As [`Self::entry_for`], but returns `hint` unchanged (no scan) when
    /// it is already valid and its key supports `probe` — the common case
    /// of re-probing within the same covering key.
    pub fn entry_for_hint<P>(&self, hint: &CacheHandle<K, V>, probe: &P) -> CacheHandle<K, V>
    where
        K: Supports<P>,
    {
        if hint.is_valid() && hint.key().supports(probe) {
            return hint.clone();
        }
        self.entry_for(probe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, PartialEq, Eq, Hash, Debug)]
    struct IntervalOfValidity {
        begin: u32,
        end: u32,
    }

    impl Supports<u32> for IntervalOfValidity {
        fn supports(&self, probe: &u32) -> bool {
            self.begin <= *probe && *probe < self.end
        }
    }

    impl Supports<IntervalOfValidity> for IntervalOfValidity {
        fn supports(&self, probe: &IntervalOfValidity) -> bool {
            self.begin <= probe.begin && probe.end <= self.end
        }
    }

    #[test]
    fn starts_empty() {
        let cache: Cache<String, i32> = Cache::new();
        assert!(cache.is_empty());
        let h = cache.at(&"Alice".to_string());
        assert!(!h.is_valid());
    }

    #[test]
    fn emplace_then_at_round_trips_and_copies_pin_until_all_invalidated() {
        let cache: Cache<String, i32> = Cache::new();
        cache.emplace("Alice".to_string(), 97);
        cache.emplace("David".to_string(), 98);

        let mut h = cache.at(&"Alice".to_string());
        assert!(h.is_valid());
        assert_eq!(h.sequence_number(), 0);
        assert_eq!(*h, 97);

        let copy = h.clone();
        h.invalidate();
        cache.drop_unused();
        assert_eq!(cache.len(), 2); // copy still pins Alice; David untouched

        drop(copy);
        cache.drop_unused();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn sequence_numbers_are_assigned_in_emplace_order_and_never_reused_while_live() {
        let cache: Cache<String, i32> = Cache::new();
        let h1 = cache.emplace("a".to_string(), 1);
        let h2 = cache.emplace("b".to_string(), 2);
        assert!(h1.sequence_number() < h2.sequence_number());

        // Re-emplacing an already-live key returns the existing entry's
        // sequence number, not a new one.
        let h1_again = cache.emplace("a".to_string(), 1);
        assert_eq!(h1.sequence_number(), h1_again.sequence_number());
    }

    #[test]
    fn re_emplacing_after_full_eviction_gets_a_fresh_sequence_number() {
        let cache: Cache<String, i32> = Cache::new();
        assert_eq!(cache.emplace("a".to_string(), 1).sequence_number(), 0);
        cache.drop_unused();
        assert_eq!(cache.emplace("a".to_string(), 1).sequence_number(), 1);
    }

    #[test]
    fn drop_unused_but_last_keeps_the_k_most_recently_inserted_unused_entries() {
        let cache: Cache<String, i32> = Cache::new();
        let h = cache.emplace("Billy".to_string(), 14);
        cache.drop_unused_but_last(1);
        assert_eq!(cache.len(), 1); // the only unused candidate is retained

        drop(h);
        cache.emplace("Bessie".to_string(), 19);
        let hj = cache.emplace("Jason".to_string(), 20);
        assert_eq!(cache.len(), 3);
        drop(hj);

        cache.drop_unused_but_last(1);
        assert!(!cache.at(&"Billy".to_string()).is_valid());
        assert!(!cache.at(&"Bessie".to_string()).is_valid());
        assert_eq!(cache.len(), 1);
        assert!(cache.at(&"Jason".to_string()).is_valid());
    }

    #[test]
    fn handle_pinning_survives_drop_unused_but_last() {
        let cache: Cache<String, i32> = Cache::new();
        let pinned = cache.emplace("keep".to_string(), 1);
        cache.emplace("evict-me".to_string(), 2);
        cache.drop_unused_but_last(0);
        assert!(cache.at(&"keep".to_string()).is_valid());
        assert!(!cache.at(&"evict-me".to_string()).is_valid());
        drop(pinned);
    }

    #[test]
    fn entry_for_scans_by_the_supports_relation() {
        let cache: Cache<IntervalOfValidity, &'static str> = Cache::new();
        cache.emplace(IntervalOfValidity { begin: 0, end: 10 }, "Run 1");
        cache.emplace(IntervalOfValidity { begin: 10, end: 20 }, "Run 2");

        let first = cache.entry_for(&5u32);
        assert_eq!(*first, "Run 1");
        let second = cache.entry_for(&15u32);
        assert_eq!(*second, "Run 2");
        assert!(!cache.entry_for(&20u32).is_valid());
    }

    #[test]
    fn entry_for_hint_avoids_the_scan_when_the_hint_still_covers() {
        let cache: Cache<IntervalOfValidity, &'static str> = Cache::new();
        cache.emplace(IntervalOfValidity { begin: 0, end: 10 }, "Run 1");
        cache.emplace(IntervalOfValidity { begin: 10, end: 20 }, "Run 2");

        let hint = cache.entry_for(&0u32);
        let same = cache.entry_for_hint(&hint, &5u32);
        assert_eq!(hint, same);

        let moved = cache.entry_for_hint(&hint, &15u32);
        assert_eq!(*moved, "Run 2");
    }

    #[test]
    #[should_panic(expected = "more than one key match")]
    fn entry_for_panics_when_more_than_one_key_matches() {
        let cache: Cache<IntervalOfValidity, &'static str> = Cache::new();
        cache.emplace(IntervalOfValidity { begin: 0, end: 10 }, "a");
        cache.emplace(IntervalOfValidity { begin: 5, end: 15 }, "b");
        cache.entry_for(&7u32);
    }

    #[test]
    fn shrink_to_fit_drops_unused_and_rebuilds_capacity_to_match_len() {
        let cache: Cache<IntervalOfValidity, &'static str> = Cache::new();
        cache.emplace(IntervalOfValidity { begin: 0, end: 10 }, "Run 1");
        cache.emplace(IntervalOfValidity { begin: 10, end: 20 }, "Run 2");
        assert_eq!(cache.capacity(), 2);

        cache.shrink_to_fit();
        assert_eq!(cache.capacity(), 0);
        assert!(cache.is_empty());
    }

    #[tracing_test::traced_test]
    #[test]
    fn drop_unused_logs_how_many_entries_it_removed() {
        let cache: Cache<String, i32> = Cache::new();
        cache.emplace("gone".to_string(), 1);
        cache.drop_unused();
        assert!(logs_contain("cache drop_unused removed entries"));
    }

    #[test]
    fn concurrent_emplace_of_the_same_key_yields_one_entry() {
        use std::thread;

        let cache = Arc::new(Cache::<String, i32>::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    let h = cache.emplace("shared".to_string(), 1);
                    h.sequence_number()
                })
            })
            .collect();

        let seqs: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(seqs.iter().all(|&s| s == seqs[0]));
        assert_eq!(cache.len(), 1);
    }

    /// Grounded on `original_source/hep_concurrency/test/cache_mt_t.cc`'s
    /// "User-defined" scenario: many concurrent lookups, each either hitting
    /// an existing entry via `entry_for` or racing to `emplace` the one it
    /// belongs to, interleaved with `drop_unused_but_last` at varying `n` —
    /// exactly where a race between eviction and the side-table scan in
    /// `entry_for` would surface.
    #[test]
    fn concurrent_entry_for_emplace_and_drop_unused_but_last_tally_correctly() {
        use std::sync::atomic::AtomicUsize;

        const NUM_EVENTS: u32 = 20;
        const HALF: u32 = NUM_EVENTS / 2;

        for drop_n in [None, Some(0usize), Some(1), Some(2)] {
            let cache: Cache<IntervalOfValidity, String> = Cache::new();
            let goods = AtomicUsize::new(0);
            let bads = AtomicUsize::new(0);
            let uglies = AtomicUsize::new(0);

            std::thread::scope(|scope| {
                for event in 0..NUM_EVENTS {
                    let cache = &cache;
                    let goods = &goods;
                    let bads = &bads;
                    let uglies = &uglies;
                    scope.spawn(move || {
                        let found = cache.entry_for(&event);
                        let h = if found.is_valid() {
                            found
                        } else if event < HALF {
                            cache.emplace(
                                IntervalOfValidity { begin: 0, end: HALF },
                                "Good".to_string(),
                            )
                        } else {
                            cache.emplace(
                                IntervalOfValidity { begin: HALF, end: NUM_EVENTS },
                                "Bad".to_string(),
                            )
                        };

                        if event < HALF && *h == "Good" {
                            goods.fetch_add(1, Ordering::SeqCst);
                        } else if event >= HALF && *h == "Bad" {
                            bads.fetch_add(1, Ordering::SeqCst);
                        } else {
                            uglies.fetch_add(1, Ordering::SeqCst);
                        }

                        if let Some(n) = drop_n {
                            cache.drop_unused_but_last(n);
                        }
                    });
                }
            });

            assert_eq!(goods.load(Ordering::SeqCst), HALF as usize, "drop_n={drop_n:?}");
            assert_eq!(bads.load(Ordering::SeqCst), HALF as usize, "drop_n={drop_n:?}");
            assert_eq!(uglies.load(Ordering::SeqCst), 0, "drop_n={drop_n:?}");
        }
    }
}
