//! Module `pgm` implement a dynamically-updatable learned index in
//! the piecewise-geometric-model family.
//!
//! Mutability comes from the logarithmic method: entries live in a
//! small stack of sorted runs of geometrically growing size, each
//! run served by its own [Model]. A point insert creates a run of
//! one entry and carries a merge across the occupied prefix of the
//! stack, so inserts cost amortized `O(log n)` merge work while every
//! run stays sorted and model-backed.
//!
//! Lower runs hold newer entries. Lookups probe runs bottom-up and
//! the first hit wins, which gives last-writer-wins for re-inserted
//! keys without touching older shadowed bindings.

use std::mem;

use crate::{
    core::{DeltaStore, Footprint, IndexIter, Key},
    model::Model,
    search::Searcher,
    Result,
};

struct Run<K> {
    keys: Vec<K>,
    values: Vec<u64>,
    model: Model<K>,
}

impl<K> Run<K>
where
    K: Key,
{
    fn build(entries: Vec<(K, u64)>, epsilon: usize, searcher: Searcher) -> Run<K> {
        let mut keys = Vec::with_capacity(entries.len());
        let mut values = Vec::with_capacity(entries.len());
        for (k, v) in entries.into_iter() {
            keys.push(k);
            values.push(v);
        }
        let model = Model::build(&keys, epsilon, searcher);
        Run {
            keys,
            values,
            model,
        }
    }

    fn find(&self, key: &K) -> Option<u64> {
        let i = self.model.lower_bound(&self.keys, key);
        if i < self.keys.len() && self.keys[i] == *key {
            Some(self.values[i])
        } else {
            None
        }
    }

    // index range covering lo <= key <= hi.
    fn span(&self, lo: &K, hi: &K) -> (usize, usize) {
        let start = self.model.lower_bound(&self.keys, lo);
        let mut end = self.model.lower_bound(&self.keys, hi);
        if end < self.keys.len() && self.keys[end] == *hi {
            end += 1;
        }
        (start, usize::max(start, end))
    }

    fn footprint(&self) -> usize {
        self.keys.capacity() * mem::size_of::<K>()
            + self.values.capacity() * mem::size_of::<u64>()
            + self.model.footprint()
    }
}

/// Write-optimized ordered index for `key -> u64` entries.
pub struct Pgm<K> {
    epsilon: usize,
    searcher: Searcher,
    runs: Vec<Option<Run<K>>>,
    n_inserts: usize,
}

impl<K> Pgm<K>
where
    K: Key,
{
    /// Create an empty index. `epsilon` is the model error bound,
    /// `searcher` the last-mile strategy.
    pub fn new(epsilon: usize, searcher: Searcher) -> Pgm<K> {
        Pgm {
            epsilon,
            searcher,
            runs: vec![],
            n_inserts: 0,
        }
    }

    pub fn to_epsilon(&self) -> usize {
        self.epsilon
    }

    pub fn to_searcher(&self) -> Searcher {
        self.searcher
    }

    /// Number of live bindings, shadowed ones excluded.
    pub fn distinct_len(&self) -> usize {
        let mut n = 0;
        let (lo, hi) = match self.bounds() {
            Some(b) => b,
            None => return 0,
        };
        let mut iter = self.range_entries(&lo, &hi);
        while iter.next().is_some() {
            n += 1;
        }
        n
    }

    fn bounds(&self) -> Option<(K, K)> {
        let mut bounds: Option<(K, K)> = None;
        for run in self.runs.iter().flatten() {
            let (first, last) = (run.keys[0], run.keys[run.keys.len() - 1]);
            bounds = match bounds {
                None => Some((first, last)),
                Some((lo, hi)) => Some((K::min(lo, first), K::max(hi, last))),
            };
        }
        bounds
    }

    fn range_entries(&self, lo: &K, hi: &K) -> MergeIter<'_, K> {
        let mut cursors = vec![];
        for run in self.runs.iter().flatten() {
            let (start, end) = run.span(lo, hi);
            if start < end {
                cursors.push(Cursor {
                    keys: &run.keys[start..end],
                    values: &run.values[start..end],
                    off: 0,
                });
            }
        }
        MergeIter { cursors }
    }

    // merge two sorted runs; on equal keys the newer entry wins and
    // the shadowed one is dropped.
    fn merge(newer: Vec<(K, u64)>, older: Run<K>) -> Vec<(K, u64)> {
        let mut out = Vec::with_capacity(newer.len() + older.keys.len());
        let (mut i, mut j) = (0, 0);
        while i < newer.len() && j < older.keys.len() {
            if newer[i].0 < older.keys[j] {
                out.push(newer[i]);
                i += 1;
            } else if older.keys[j] < newer[i].0 {
                out.push((older.keys[j], older.values[j]));
                j += 1;
            } else {
                out.push(newer[i]);
                i += 1;
                j += 1;
            }
        }
        out.extend_from_slice(&newer[i..]);
        while j < older.keys.len() {
            out.push((older.keys[j], older.values[j]));
            j += 1;
        }
        out
    }
}

impl<K> DeltaStore<K> for Pgm<K>
where
    K: Key,
{
    fn empty(&self) -> Self {
        Pgm::new(self.epsilon, self.searcher)
    }

    fn insert(&mut self, key: K, value: u64) -> Result<()> {
        let mut carry = vec![(key, value)];
        let mut slot = self.runs.len();
        for (i, run) in self.runs.iter_mut().enumerate() {
            match run.take() {
                Some(older) => carry = Self::merge(carry, older),
                None => {
                    slot = i;
                    break;
                }
            }
        }
        let run = Run::build(carry, self.epsilon, self.searcher);
        if slot == self.runs.len() {
            self.runs.push(Some(run));
        } else {
            self.runs[slot] = Some(run);
        }
        self.n_inserts += 1;
        Ok(())
    }

    fn find(&self, key: &K) -> Option<u64> {
        for run in self.runs.iter().flatten() {
            if let Some(value) = run.find(key) {
                return Some(value);
            }
        }
        None
    }

    fn range_scan(&self, lo: &K, hi: &K) -> IndexIter<'_, K> {
        Box::new(self.range_entries(lo, hi))
    }

    fn len(&self) -> usize {
        self.n_inserts
    }
}

impl<K> Footprint for Pgm<K>
where
    K: Key,
{
    fn footprint(&self) -> usize {
        self.runs.iter().flatten().map(|r| r.footprint()).sum()
    }
}

struct Cursor<'a, K> {
    keys: &'a [K],
    values: &'a [u64],
    off: usize,
}

// k-way merge over the runs of a Pgm value, newest run first in
// `cursors`; on equal keys the newest wins and older cursors are
// advanced past the shadowed binding.
struct MergeIter<'a, K> {
    cursors: Vec<Cursor<'a, K>>,
}

impl<'a, K> Iterator for MergeIter<'a, K>
where
    K: Key,
{
    type Item = (K, u64);

    fn next(&mut self) -> Option<Self::Item> {
        let mut min: Option<(usize, K)> = None;
        for (i, c) in self.cursors.iter().enumerate() {
            if c.off >= c.keys.len() {
                continue;
            }
            let key = c.keys[c.off];
            min = match min {
                None => Some((i, key)),
                Some((_, mkey)) if key < mkey => Some((i, key)),
                Some(m) => Some(m),
            };
        }
        let (i, key) = min?;
        let value = self.cursors[i].values[self.cursors[i].off];
        for c in self.cursors.iter_mut() {
            if c.off < c.keys.len() && c.keys[c.off] == key {
                c.off += 1;
            }
        }
        Some((key, value))
    }
}

#[cfg(test)]
#[path = "pgm_test.rs"]
mod pgm_test;
