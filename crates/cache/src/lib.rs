//! A concurrent, reference-counted cache. Entries are pinned against
//! eviction by outstanding [`CacheHandle`]s, inserted under a monotonic
//! sequence number, and reclaimed only cooperatively via
//! [`Cache::drop_unused`] / [`Cache::drop_unused_but_last`].
//!
//! Every failure mode here — dereferencing an invalid handle, `entry_for`
//! matching more than one key — is a caller invariant violation rather
//! than a recoverable condition, so the crate exposes no `Result`-returning
//! fallible API and carries no error enum; it panics with a descriptive
//! message instead, the same way an out-of-bounds index does.

mod cache;
mod handle;
mod supports;

pub use cache::Cache;
pub use handle::CacheHandle;
pub use supports::Supports;
