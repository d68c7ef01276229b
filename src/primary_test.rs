use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use std::collections::BTreeMap;

use super::*;

#[test]
fn test_bulk_load() {
    let mut primary: Primary<u64> = Primary::new(16, Searcher::BranchingBinary);
    // input in any order.
    primary.bulk_load(vec![(30, 300), (10, 100), (20, 200)]);

    assert_eq!(primary.len(), 3);
    assert_eq!(primary.find(&10), Some(100));
    assert_eq!(primary.find(&20), Some(200));
    assert_eq!(primary.find(&30), Some(300));
    assert_eq!(primary.find(&15), None);

    let entries: Vec<(u64, u64)> = primary.range_scan(&10, &20).collect();
    assert_eq!(entries, vec![(10, 100), (20, 200)]);
}

#[test]
fn test_point_insert() {
    let mut primary: Primary<u64> = Primary::new(16, Searcher::BranchingBinary);
    primary.bulk_load(vec![(10, 100), (30, 300)]);

    primary.insert(20, 200);
    primary.insert(10, 111); // rebind
    assert_eq!(primary.len(), 3);
    assert_eq!(primary.find(&10), Some(111));
    assert_eq!(primary.find(&20), Some(200));
}

#[test]
fn test_bulk_insert_into_empty() {
    let mut primary: Primary<u64> = Primary::new(16, Searcher::Exponential);
    let batch: Vec<(u64, u64)> = (0..500).map(|i| (i * 3, i)).collect();
    primary.bulk_insert(&batch).unwrap();
    assert_eq!(primary.len(), 500);
    assert_eq!(primary.find(&9), Some(3));
}

#[test]
fn test_bulk_insert_small_batch() {
    let mut primary: Primary<u64> = Primary::new(16, Searcher::BranchingBinary);
    primary.bulk_load((0..1000_u64).map(|i| (i * 2, i)).collect());

    // fewer than the rebuild cutoff, goes through point inserts.
    let batch: Vec<(u64, u64)> = vec![(1, 1000), (4, 1001), (2001, 1002)];
    primary.bulk_insert(&batch).unwrap();

    assert_eq!(primary.len(), 1002);
    assert_eq!(primary.find(&1), Some(1000));
    assert_eq!(primary.find(&4), Some(1001)); // rebound
    assert_eq!(primary.find(&2001), Some(1002));
    assert_eq!(primary.find(&6), Some(3));
}

#[test]
fn test_bulk_insert_rebuild() {
    let seed: u64 = random();
    println!("test_bulk_insert_rebuild seed:{}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let mut primary: Primary<u64> = Primary::new(32, Searcher::BranchingBinary);
    let mut btmap: BTreeMap<u64, u64> = BTreeMap::new();

    let pairs: Vec<(u64, u64)> = (0..10_000)
        .map(|_| (rng.gen::<u64>() % 100_000, rng.gen::<u64>()))
        .collect();
    let pairs: Vec<(u64, u64)> = {
        let mut pairs = pairs;
        pairs.sort_by_key(|(k, _)| *k);
        pairs.dedup_by_key(|(k, _)| *k);
        pairs
    };
    for (k, v) in pairs.iter() {
        btmap.insert(*k, *v);
    }
    primary.bulk_load(pairs);

    // several batches, each large enough for the rebuild path and
    // shadowing some existing keys.
    for _i in 0..5 {
        let mut batch: Vec<(u64, u64)> = (0..500)
            .map(|_| (rng.gen::<u64>() % 120_000, rng.gen::<u64>()))
            .collect();
        batch.sort_by_key(|(k, _)| *k);
        batch.dedup_by_key(|(k, _)| *k);

        for (k, v) in batch.iter() {
            btmap.insert(*k, *v);
        }
        primary.bulk_insert(&batch).unwrap();
        assert_eq!(primary.len(), btmap.len());
    }

    for _i in 0..5_000 {
        let key = rng.gen::<u64>() % 125_000;
        assert_eq!(primary.find(&key), btmap.get(&key).copied(), "key:{}", key);
    }
    for _i in 0..100 {
        let (a, b) = (rng.gen::<u64>() % 120_000, rng.gen::<u64>() % 120_000);
        let (lo, hi) = (u64::min(a, b), u64::max(a, b));
        let entries: Vec<(u64, u64)> = primary.range_scan(&lo, &hi).collect();
        let expect: Vec<(u64, u64)> = btmap.range(lo..=hi).map(|(k, v)| (*k, *v)).collect();
        assert_eq!(entries, expect, "lo:{} hi:{}", lo, hi);
    }
}

#[test]
fn test_bulk_insert_unsorted() {
    let mut primary: Primary<u64> = Primary::new(16, Searcher::BranchingBinary);
    primary.bulk_load(vec![(10, 100)]);

    assert!(primary.bulk_insert(&[(3, 0), (1, 0)]).is_err());
    assert!(primary.bulk_insert(&[(3, 0), (3, 1)]).is_err());
}
