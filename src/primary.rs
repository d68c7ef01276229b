//! Module `primary` implement the read-optimized learned index that
//! holds the stable bulk of the dataset.
//!
//! Entries live in two parallel sorted arrays served by one [Model].
//! The layout is cheap to bulk-load and cheap to rebuild from a
//! sorted stream, which is what makes the periodic merge of drained
//! batches viable; what it is not cheap for is point mutation, so
//! sustained writes belong in the delta index.

use std::mem;

use crate::{
    core::{Footprint, IndexIter, Key, PrimaryStore},
    model::Model,
    search::Searcher,
    Result,
};

// below this many entries a drained batch amortizes poorly through
// a full rebuild, individual point inserts win.
const SMALL_BATCH: usize = 100;

/// Bulk-loaded ordered index for `key -> u64` entries.
pub struct Primary<K> {
    epsilon: usize,
    searcher: Searcher,
    keys: Vec<K>,
    values: Vec<u64>,
    model: Model<K>,
}

impl<K> Primary<K>
where
    K: Key,
{
    /// Create an empty index. `epsilon` is the model error bound,
    /// `searcher` the last-mile strategy.
    pub fn new(epsilon: usize, searcher: Searcher) -> Primary<K> {
        Primary {
            epsilon,
            searcher,
            keys: vec![],
            values: vec![],
            model: Model::build(&[], epsilon, searcher),
        }
    }

    pub fn to_epsilon(&self) -> usize {
        self.epsilon
    }

    /// Number of model segments currently serving the index.
    pub fn to_n_segments(&self) -> usize {
        self.model.len()
    }

    fn load_sorted(&mut self, pairs: Vec<(K, u64)>) {
        self.keys = Vec::with_capacity(pairs.len());
        self.values = Vec::with_capacity(pairs.len());
        for (k, v) in pairs.into_iter() {
            self.keys.push(k);
            self.values.push(v);
        }
        self.model = Model::build(&self.keys, self.epsilon, self.searcher);
    }

    // insert into the arrays without refreshing the model.
    fn upsert(&mut self, key: K, value: u64) {
        let i = self.model.lower_bound(&self.keys, &key);
        if i < self.keys.len() && self.keys[i] == key {
            self.values[i] = value;
        } else {
            self.keys.insert(i, key);
            self.values.insert(i, value);
        }
    }

    // the rebuild path of bulk-insert: scan out the arrays, append
    // the batch, stable-sort an index array so batch items win ties,
    // keep the last index of every equal-key run, rebuild.
    fn rebuild_with(&mut self, batch: &[(K, u64)]) {
        let mut keys = mem::take(&mut self.keys);
        let mut values = mem::take(&mut self.values);
        let n = keys.len();
        keys.reserve(batch.len());
        values.reserve(batch.len());
        for (k, v) in batch.iter() {
            keys.push(*k);
            values.push(*v);
        }

        let mut index: Vec<usize> = (0..n + batch.len()).collect();
        index.sort_by_key(|&i| keys[i]);

        let mut pairs = Vec::with_capacity(index.len());
        let mut iter = index.into_iter().peekable();
        while let Some(i) = iter.next() {
            match iter.peek() {
                Some(&j) if keys[j] == keys[i] => (), // shadowed, skip
                _ => pairs.push((keys[i], values[i])),
            }
        }

        self.load_sorted(pairs);
    }

    fn span(&self, lo: &K, hi: &K) -> (usize, usize) {
        let start = self.model.lower_bound(&self.keys, lo);
        let mut end = self.model.lower_bound(&self.keys, hi);
        if end < self.keys.len() && self.keys[end] == *hi {
            end += 1;
        }
        (start, usize::max(start, end))
    }
}

impl<K> PrimaryStore<K> for Primary<K>
where
    K: Key,
{
    fn bulk_load(&mut self, mut pairs: Vec<(K, u64)>) {
        pairs.sort_by_key(|(k, _)| *k);
        self.load_sorted(pairs);
    }

    fn insert(&mut self, key: K, value: u64) {
        self.upsert(key, value);
        self.model = Model::build(&self.keys, self.epsilon, self.searcher);
    }

    fn bulk_insert(&mut self, batch: &[(K, u64)]) -> Result<()> {
        for w in batch.windows(2) {
            if w[0].0 >= w[1].0 {
                return err_at!(
                    Fatal,
                    msg: "bulk_insert batch not sorted-unique at {:?}", w[1].0
                );
            }
        }

        if self.keys.is_empty() {
            self.load_sorted(batch.to_vec());
        } else if batch.len() < SMALL_BATCH {
            for (k, v) in batch.iter() {
                self.upsert(*k, *v);
            }
            self.model = Model::build(&self.keys, self.epsilon, self.searcher);
        } else {
            self.rebuild_with(batch);
        }
        Ok(())
    }

    fn find(&self, key: &K) -> Option<u64> {
        let i = self.model.lower_bound(&self.keys, key);
        if i < self.keys.len() && self.keys[i] == *key {
            Some(self.values[i])
        } else {
            None
        }
    }

    fn range_scan(&self, lo: &K, hi: &K) -> IndexIter<'_, K> {
        let (start, end) = self.span(lo, hi);
        let iter = self.keys[start..end]
            .iter()
            .copied()
            .zip(self.values[start..end].iter().copied());
        Box::new(iter)
    }

    fn len(&self) -> usize {
        self.keys.len()
    }
}

impl<K> Footprint for Primary<K>
where
    K: Key,
{
    fn footprint(&self) -> usize {
        self.keys.capacity() * mem::size_of::<K>()
            + self.values.capacity() * mem::size_of::<u64>()
            + self.model.footprint()
    }
}

#[cfg(test)]
#[path = "primary_test.rs"]
mod primary_test;
