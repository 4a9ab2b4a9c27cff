use std::ops::Deref;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub(crate) struct Entry<V> {
    pub(crate) value: V,
    pub(crate) sequence_number: u64,
    pub(crate) use_count: Arc<AtomicU32>,
}

/// A shared, copyable, movable token that pins one [`crate::Cache`] entry
/// against eviction for as long as the token (or any clone of it) is alive.
///
/// Constructing or cloning a handle increments the pinned entry's
/// `use_count`; dropping or [`invalidate`](Self::invalidate)ing one
/// decrements it. An invalid handle (the empty, "doesn't point anywhere"
/// state reached via [`Self::invalid`] or after invalidation) rejects every
/// accessor with a panic, the same way an out-of-bounds index does — these
/// are caller invariant violations, not recoverable conditions (spec §7).
pub struct CacheHandle<K, V> {
    inner: Option<(K, Arc<Entry<V>>)>,
}

impl<K, V> CacheHandle<K, V> {
    pub(crate) fn new(key: K, entry: Arc<Entry<V>>) -> Self {
        entry.use_count.fetch_add(1, Ordering::AcqRel);
        Self {
            inner: Some((key, entry)),
        }
    }

    /// An empty handle pinning nothing.
    pub fn invalid() -> Self {
        Self { inner: None }
    }

    /// Whether this handle currently pins an entry.
    pub fn is_valid(&self) -> bool {
        self.inner.is_some()
    }

    /// Releases the pinned entry (if any), decrementing its `use_count`.
    /// After this call the handle is [`Self::invalid`].
    pub fn invalidate(&mut self) {
        if let Some((_, entry)) = self.inner.take() {
            entry.use_count.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// The key this handle pins.
    ///
    /// # Panics
    ///
    /// Panics with "invalid key access" if the handle is invalid.
    pub fn key(&self) -> &K {
        &self.inner.as_ref().expect("invalid key access").0
    }

    /// The sequence number assigned when this entry's key was first inserted.
    ///
    /// # Panics
    ///
    /// Panics with "invalid sequence-number access" if the handle is invalid.
    pub fn sequence_number(&self) -> u64 {
        self.inner
            .as_ref()
            .expect("invalid sequence-number access")
            .1
            .sequence_number
    }
}

impl<K, V> Deref for CacheHandle<K, V> {
    type Target = V;

    /// # Panics
    ///
    /// Panics with "invalid cache handle dereference" if the handle is
    /// invalid.
    fn deref(&self) -> &V {
        &self
            .inner
            .as_ref()
            .expect("invalid cache handle dereference")
            .1
            .value
    }
}

impl<K: Clone, V> Clone for CacheHandle<K, V> {
    fn clone(&self) -> Self {
        if let Some((key, entry)) = &self.inner {
            entry.use_count.fetch_add(1, Ordering::AcqRel);
            Self {
                inner: Some((key.clone(), Arc::clone(entry))),
            }
        } else {
            Self { inner: None }
        }
    }
}

impl<K, V> Drop for CacheHandle<K, V> {
    fn drop(&mut self) {
        if let Some((_, entry)) = self.inner.take() {
            entry.use_count.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl<K: PartialEq, V> PartialEq for CacheHandle<K, V> {
    /// Two invalid handles compare equal. Two valid handles compare equal
    /// iff they pin the same entry (same key, same underlying allocation).
    /// A valid and an invalid handle are never equal.
    fn eq(&self, other: &Self) -> bool {
        match (&self.inner, &other.inner) {
            (None, None) => true,
            (Some((k1, e1)), Some((k2, e2))) => k1 == k2 && Arc::ptr_eq(e1, e2),
            _ => false,
        }
    }
}

impl<K: PartialEq, V> Eq for CacheHandle<K, V> {}
