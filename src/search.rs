//! Module `search` implement the last-mile search strategies used by
//! the learned indexes.
//!
//! A model predicts an approximate position for a key; the searcher
//! finds the exact lower-bound position inside the model's error
//! window. Which strategy wins depends on the key distribution and
//! on how tight the window is, so the strategy is a configuration
//! knob threaded through both indexes.

use crate::core::Key;

/// Search strategy for resolving a predicted position to an exact
/// lower-bound position within a sorted run of keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Searcher {
    /// Branch-based binary search over the window.
    BranchingBinary,
    /// Interpolated probes over the window, assumes keys are roughly
    /// uniform under their `f64` projection.
    Interpolation,
    /// Exponential expansion around the predicted position followed
    /// by binary search over the bracket.
    Exponential,
    /// Sequential scan from the start of the window.
    Linear,
    /// Block-wise sequential scan. Stand-in for the vectorized
    /// variant, kept so the name is recognized and declined by the
    /// applicability predicate.
    LinearAvx,
}

impl Default for Searcher {
    fn default() -> Searcher {
        Searcher::BranchingBinary
    }
}

impl Searcher {
    /// Strategy name, as reported in the variants string.
    pub fn name(&self) -> &'static str {
        match self {
            Searcher::BranchingBinary => "BranchingBinarySearch",
            Searcher::Interpolation => "InterpolationSearch",
            Searcher::Exponential => "ExponentialSearch",
            Searcher::Linear => "LinearSearch",
            Searcher::LinearAvx => "LinearAVX",
        }
    }

    pub fn from_name(name: &str) -> Option<Searcher> {
        match name {
            "BranchingBinarySearch" => Some(Searcher::BranchingBinary),
            "InterpolationSearch" => Some(Searcher::Interpolation),
            "ExponentialSearch" => Some(Searcher::Exponential),
            "LinearSearch" => Some(Searcher::Linear),
            "LinearAVX" => Some(Searcher::LinearAvx),
            _ => None,
        }
    }

    /// Return the smallest index `i` in `[0, keys.len()]` such that
    /// `keys[i] >= key`. `hint` is the predicted position of `key`
    /// within `keys`; strategies that do not exploit a hint ignore it.
    pub fn lower_bound<K>(&self, keys: &[K], key: &K, hint: usize) -> usize
    where
        K: Key,
    {
        match self {
            Searcher::BranchingBinary => binary(keys, key),
            Searcher::Interpolation => interpolation(keys, key),
            Searcher::Exponential => exponential(keys, key, hint),
            Searcher::Linear => linear(keys, key),
            Searcher::LinearAvx => linear_blocked(keys, key),
        }
    }
}

fn binary<K>(keys: &[K], key: &K) -> usize
where
    K: Key,
{
    let (mut lo, mut hi) = (0, keys.len());
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if keys[mid] < *key {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

fn linear<K>(keys: &[K], key: &K) -> usize
where
    K: Key,
{
    for (i, k) in keys.iter().enumerate() {
        if k >= key {
            return i;
        }
    }
    keys.len()
}

const BLOCK: usize = 8;

fn linear_blocked<K>(keys: &[K], key: &K) -> usize
where
    K: Key,
{
    // skip whole blocks by their last element, then scan one block.
    let mut base = 0;
    while base + BLOCK <= keys.len() {
        if keys[base + BLOCK - 1] >= *key {
            break;
        }
        base += BLOCK;
    }
    base + linear(&keys[base..], key)
}

fn exponential<K>(keys: &[K], key: &K, hint: usize) -> usize
where
    K: Key,
{
    if keys.is_empty() {
        return 0;
    }
    let pos = usize::min(hint, keys.len() - 1);

    let (lo, hi) = if keys[pos] < *key {
        // expand right
        let mut step = 1;
        let mut hi = pos + 1;
        while hi < keys.len() && keys[hi] < *key {
            hi = usize::min(hi + step, keys.len());
            step *= 2;
        }
        (pos + 1, usize::min(hi + 1, keys.len()))
    } else {
        // expand left
        let mut step = 1;
        let mut lo = pos;
        while lo > 0 && keys[lo - 1] >= *key {
            lo = lo.saturating_sub(step);
            step *= 2;
        }
        (lo, pos + 1)
    };

    lo + binary(&keys[lo..hi], key)
}

fn interpolation<K>(keys: &[K], key: &K) -> usize
where
    K: Key,
{
    let (mut lo, mut hi) = (0, keys.len());
    while hi - lo > 8 {
        let (klo, khi) = (keys[lo].to_f64(), keys[hi - 1].to_f64());
        if khi <= klo {
            break;
        }
        let frac = (key.to_f64() - klo) / (khi - klo);
        let frac = frac.max(0.0).min(1.0);
        let mid = lo + (frac * ((hi - lo - 1) as f64)) as usize;
        if keys[mid] < *key {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo + binary(&keys[lo..hi], key)
}

#[cfg(test)]
#[path = "search_test.rs"]
mod search_test;
