//! Module `core` define traits and types that tie together the
//! package's components.
//!
//! The hybrid orchestrator treats both of its indexes as opaque
//! ordered maps, reached through the [PrimaryStore] and [DeltaStore]
//! contracts. Values are opaque 64-bit payloads; [NOT_FOUND] is the
//! reserved sentinel returned by lookups for missing keys.

use std::fmt;

/// Sentinel value returned by lookup for keys that are not in the
/// index. Applications shall not bind this value to a key.
pub const NOT_FOUND: u64 = u64::MAX;

/// Iterator over `(key, value)` entries, in key order.
pub type IndexIter<'a, K> = Box<dyn Iterator<Item = (K, u64)> + 'a>;

/// Trait for key types.
///
/// Keys must be totally ordered and cheap to copy. The `f64`
/// projection feeds the piecewise linear models and interpolation
/// search; it must be monotonic with respect to `Ord`.
pub trait Key: Copy + Ord + fmt::Debug + Send + Sync + 'static {
    fn to_f64(&self) -> f64;
}

impl Key for u64 {
    #[inline]
    fn to_f64(&self) -> f64 {
        *self as f64
    }
}

impl Key for u32 {
    #[inline]
    fn to_f64(&self) -> f64 {
        *self as f64
    }
}

/// Trait to measure the memory footprint of an index, in bytes.
pub trait Footprint {
    fn footprint(&self) -> usize;
}

/// Contract for the primary store, the read-optimized index holding
/// the stable, mostly-read dataset.
pub trait PrimaryStore<K>: Footprint
where
    K: Key,
{
    /// Construct the index from `pairs`, keys unique but in any
    /// order. Replaces previous content.
    fn bulk_load(&mut self, pairs: Vec<(K, u64)>);

    /// Point insert, overwrite if `key` is already bound. May be
    /// slow, the primary is optimized for read latency.
    fn insert(&mut self, key: K, value: u64);

    /// Merge a sorted, deduplicated batch into the index. Pairs may
    /// shadow existing keys, in which case the batch value wins.
    fn bulk_insert(&mut self, batch: &[(K, u64)]) -> crate::Result<()>;

    /// Return the value bound to `key`, if any.
    fn find(&self, key: &K) -> Option<u64>;

    /// Iterate entries with `lo <= key <= hi`, in key order.
    fn range_scan(&self, lo: &K, hi: &K) -> IndexIter<'_, K>;

    /// Number of live entries.
    fn len(&self) -> usize;
}

/// Contract for the delta store, the write-optimized index absorbing
/// recent mutations. Starts empty, must be cheap for point inserts.
pub trait DeltaStore<K>: Footprint
where
    K: Key,
{
    /// Return a fresh, empty instance carrying this instance's
    /// configuration.
    fn empty(&self) -> Self;

    /// Point insert. A key inserted again shadows its older binding,
    /// lookups observe last-writer-wins.
    fn insert(&mut self, key: K, value: u64) -> crate::Result<()>;

    /// Return the latest value bound to `key`, if any.
    fn find(&self, key: &K) -> Option<u64>;

    /// Iterate live bindings with `lo <= key <= hi`, in key order,
    /// shadowed bindings excluded.
    fn range_scan(&self, lo: &K, hi: &K) -> IndexIter<'_, K>;

    /// Number of absorbed inserts, shadowed bindings included.
    fn len(&self) -> usize;
}
