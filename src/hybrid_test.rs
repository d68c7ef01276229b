use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use std::collections::BTreeMap;

use super::*;
use crate::core::IndexIter;

type Index = Hybrid<u64, Primary<u64>, Pgm<u64>>;

// primary double whose bulk-insert can be made to fail on demand,
// to drive the drainer into its fail-stop state.
struct FailingPrimary {
    inner: Primary<u64>,
    fail: Arc<AtomicBool>,
}

impl PrimaryStore<u64> for FailingPrimary {
    fn bulk_load(&mut self, pairs: Vec<(u64, u64)>) {
        self.inner.bulk_load(pairs)
    }

    fn insert(&mut self, key: u64, value: u64) {
        self.inner.insert(key, value)
    }

    fn bulk_insert(&mut self, batch: &[(u64, u64)]) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return err_at!(Fatal, msg: "bulk_insert failure injected");
        }
        self.inner.bulk_insert(batch)
    }

    fn find(&self, key: &u64) -> Option<u64> {
        self.inner.find(key)
    }

    fn range_scan(&self, lo: &u64, hi: &u64) -> IndexIter<'_, u64> {
        self.inner.range_scan(lo, hi)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

impl Footprint for FailingPrimary {
    fn footprint(&self) -> usize {
        self.inner.footprint()
    }
}

fn wait_drained(index: &Index) {
    for _i in 0..10_000_000 {
        if !index.to_stats().is_flushing {
            return;
        }
        thread::yield_now();
    }
    panic!("drain did not settle");
}

#[test]
fn test_build_lookup() {
    let mut index = Index::learned("test-build-lookup", Config::default()).unwrap();
    index.build(vec![(1, 10), (2, 20), (3, 30)]).unwrap();

    assert_eq!(index.lookup(&2), 20);
    assert_eq!(index.lookup(&4), NOT_FOUND);
}

#[test]
fn test_insert_path() {
    let mut index = Index::learned("test-insert-path", Config::default()).unwrap();
    index.build(vec![(1, 10)]).unwrap();

    index.insert(5, 50).unwrap();
    index.insert(7, 70).unwrap();
    assert_eq!(index.lookup(&5), 50);
    assert_eq!(index.lookup(&7), 70);
    assert_eq!(index.lookup(&1), 10);
}

#[test]
fn test_overwrite() {
    let mut index = Index::learned("test-overwrite", Config::default()).unwrap();
    index.build(vec![(1, 10)]).unwrap();

    index.insert(1, 99).unwrap();
    assert_eq!(index.lookup(&1), 99);

    // rebinding survives a drain into the primary.
    index.flush().unwrap();
    assert_eq!(index.lookup(&1), 99);
}

#[test]
fn test_threshold_drain() {
    let config = Config::from_params(&[5]);
    let mut index = Index::learned("test-threshold-drain", config).unwrap();

    let data: Vec<(u64, u64)> = (0..2000_u64).map(|i| (100_000 + i, i)).collect();
    index.build(data).unwrap();
    // base_count = 2000 * 5 / 100 / 10.
    assert_eq!(index.scheduler.base_count, 10);

    for key in 0..20_u64 {
        index.insert(key, key + 1).unwrap();
    }
    index.flush().unwrap();

    assert!(index.to_stats().flush_count >= 1);
    for key in 0..20_u64 {
        assert_eq!(index.lookup(&key), key + 1);
    }
    assert_eq!(index.lookup(&100_007), 7);
}

#[test]
fn test_range_spanning_tiers() {
    let mut index = Index::learned("test-range-tiers", Config::default()).unwrap();
    index.build(vec![(1, 1), (2, 2), (3, 3)]).unwrap();

    index.insert(4, 4).unwrap();
    index.insert(5, 5).unwrap();
    assert_eq!(index.range_sum(&1, &5), 15);

    index.flush().unwrap();
    assert_eq!(index.to_stats().flush_count, 1);
    assert_eq!(index.range_sum(&1, &5), 15);
    assert_eq!(index.range_sum(&2, &4), 9);
    assert_eq!(index.range_sum(&6, &100), 0);
}

#[test]
fn test_adaptive_downshift() {
    // initial_data_size * 5 / 100 / 10 = 1000.
    let mut index = Index::learned("test-adaptive-down", Config::default()).unwrap();
    let data: Vec<(u64, u64)> = (0..200_000_u64).map(|i| (i * 2, i)).collect();
    index.build(data).unwrap();
    assert_eq!(index.scheduler.base_count, 1000);

    for i in 0..900_u64 {
        index.lookup(&((i % 1000) * 2));
    }
    for i in 0..200_u64 {
        index.insert(1_000_000 + i, i).unwrap();
    }

    // r = 900 / 1100, lookup-heavy; threshold halves.
    assert_eq!(index.scheduler.effective_threshold(&index.stats), 500);
    assert_eq!(index.to_stats().flush_count, 0);
    assert_eq!(index.to_stats().pgm_size, 200);
}

#[test]
fn test_adaptive_upshift() {
    let mut index = Index::learned("test-adaptive-up", Config::default()).unwrap();
    let data: Vec<(u64, u64)> = (0..200_000_u64).map(|i| (i * 2, i)).collect();
    index.build(data).unwrap();
    assert_eq!(index.scheduler.base_count, 1000);

    for i in 0..100_u64 {
        index.lookup(&(i * 2));
    }
    for i in 0..901_u64 {
        index.insert(1_000_000 + i, i).unwrap();
    }

    // r = 100 / 1001, insert-heavy; threshold doubles.
    assert_eq!(index.scheduler.effective_threshold(&index.stats), 2000);
    assert_eq!(index.to_stats().flush_count, 0);
}

#[test]
fn test_fixed_mode_bound() {
    // FIXED mode, inserts only: the active tier stays within
    // 2 * base_count, one threshold plus one in-flight drain.
    let config = Config::from_params(&[5, 1000, 0]);
    assert_eq!(config.to_mode(), Mode::Fixed);

    let mut index = Index::learned("test-fixed-bound", config).unwrap();
    let data: Vec<(u64, u64)> = (0..2000_u64).map(|i| (1_000_000 + i, i)).collect();
    index.build(data).unwrap();
    let base = index.scheduler.base_count;
    assert_eq!(base, 10);

    let mut key = 0_u64;
    for _burst in 0..30 {
        for _i in 0..base {
            index.insert(key, key).unwrap();
            key += 1;
            assert!(index.to_stats().pgm_size <= 2 * base);
        }
        wait_drained(&index);
    }

    assert_eq!(index.to_stats().flush_count, 30);
    for k in 0..key {
        assert_eq!(index.lookup(&k), k);
    }
}

#[test]
fn test_rebind_shadows_primary() {
    let mut index = Index::learned("test-rebind-shadow", Config::default()).unwrap();
    index.build((0..1000_u64).map(|i| (i, i)).collect()).unwrap();
    assert_eq!(index.scheduler.base_count, 5);

    // rebind keys that live in the primary; until a drain carries
    // the new bindings over, both tiers hold the keys and only the
    // delta binding may count.
    index.insert(10, 1000).unwrap();
    index.insert(11, 2000).unwrap();
    assert_eq!(index.lookup(&10), 1000);
    assert_eq!(index.range_sum(&10, &11), 3000);
    assert_eq!(index.range_sum(&0, &9), 45);
    assert_eq!(index.range_sum(&0, &12), 45 + 3000 + 12);

    index.flush().unwrap();
    assert_eq!(index.range_sum(&10, &11), 3000);
    assert_eq!(index.range_sum(&0, &12), 45 + 3000 + 12);
}

#[test]
fn test_drain_fail_stop() {
    let fail = Arc::new(AtomicBool::new(false));
    let primary = FailingPrimary {
        inner: Primary::new(64, Searcher::default()),
        fail: Arc::clone(&fail),
    };
    let delta: Pgm<u64> = Pgm::new(64, Searcher::default());
    let mut index = Hybrid::new("test-fail-stop", Config::default(), primary, delta).unwrap();
    index.build((0..1000_u64).map(|i| (i * 2, i)).collect()).unwrap();
    assert_eq!(index.scheduler.base_count, 5);

    fail.store(true, Ordering::SeqCst);
    // the fifth insert trips the scheduler; the drain fails against
    // the primary and the drainer exits fail-stop.
    for i in 0..5_u64 {
        index.insert(i * 2 + 1, 100 + i).unwrap();
    }
    assert!(index.flush().is_err());
    assert!(index.to_stats().is_flushing);
    assert_eq!(index.to_stats().flush_count, 0);

    // reads keep serving the pre-failure state: the batch from the
    // stuck inflight tier, everything else from the primary.
    assert_eq!(index.lookup(&1), 100);
    assert_eq!(index.lookup(&9), 104);
    assert_eq!(index.lookup(&0), 0);
    assert_eq!(index.range_sum(&0, &9), 10 + 510);

    // rebind a key from the failed batch; the stale inflight
    // binding is shadowed, not double-counted.
    index.insert(1, 999).unwrap();
    assert_eq!(index.lookup(&1), 999);
    assert_eq!(index.range_sum(&1, &1), 999);
    assert_eq!(index.range_sum(&0, &9), 10 + 999 + 410);

    // writes keep accumulating in the active tier, drains stay off.
    for i in 5..20_u64 {
        index.insert(i * 2 + 1, 100 + i).unwrap();
    }
    assert!(index.to_stats().is_flushing);
    assert_eq!(index.to_stats().flush_count, 0);
    assert_eq!(index.lookup(&31), 115);
    assert!(index.flush().is_err());
}

#[test]
fn test_drain_idempotence() {
    let mut index = Index::learned("test-drain-idem", Config::default()).unwrap();
    index.build((0..1000_u64).map(|i| (i * 3, i)).collect()).unwrap();

    for i in 0..500_u64 {
        index.insert(i * 3 + 1, i).unwrap();
    }
    let before: Vec<u64> = (0..2000_u64).map(|k| index.lookup(&k)).collect();
    let sum_before = index.range_sum(&0, &10_000);

    index.flush().unwrap();
    assert!(index.to_stats().flush_count >= 1);

    let after: Vec<u64> = (0..2000_u64).map(|k| index.lookup(&k)).collect();
    assert_eq!(before, after);
    assert_eq!(index.range_sum(&0, &10_000), sum_before);
}

#[test]
fn test_hybrid_vs_btreemap() {
    let seed: u64 = random();
    println!("test_hybrid_vs_btreemap seed:{}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let mut btmap: BTreeMap<u64, u64> = BTreeMap::new();
    let data: Vec<(u64, u64)> = {
        let mut keys: Vec<u64> = (0..20_000).map(|_| rng.gen::<u64>() % 500_000).collect();
        keys.sort_unstable();
        keys.dedup();
        keys.into_iter().map(|k| (k, rng.gen::<u64>() % 1000)).collect()
    };
    for (k, v) in data.iter() {
        btmap.insert(*k, *v);
    }

    let mut index = Index::learned("test-vs-btreemap", Config::default()).unwrap();
    index.build(data).unwrap();

    let mut inserted: Vec<u64> = btmap.keys().copied().collect();
    for _i in 0..30_000 {
        match rng.gen::<u64>() % 10 {
            0..=4 => {
                // half fresh keys, half rebinds.
                let key = if rng.gen::<bool>() {
                    rng.gen::<u64>() % 500_000
                } else {
                    inserted[rng.gen::<usize>() % inserted.len()]
                };
                let value = rng.gen::<u64>() % 1000;
                index.insert(key, value).unwrap();
                btmap.insert(key, value);
                inserted.push(key);
            }
            5..=7 => {
                let key = rng.gen::<u64>() % 510_000;
                let expect = btmap.get(&key).copied().unwrap_or(NOT_FOUND);
                assert_eq!(index.lookup(&key), expect, "key:{}", key);
            }
            _ => {
                let lo = rng.gen::<u64>() % 500_000;
                let hi = lo + rng.gen::<u64>() % 2000;
                let expect: u64 = btmap
                    .range(lo..=hi)
                    .fold(0_u64, |acc, (_, v)| acc.wrapping_add(*v));
                assert_eq!(index.range_sum(&lo, &hi), expect, "lo:{} hi:{}", lo, hi);
            }
        }
    }

    index.flush().unwrap();
    for (key, value) in btmap.iter() {
        assert_eq!(index.lookup(key), *value, "key:{}", key);
    }
    let expect: u64 = btmap.values().fold(0_u64, |acc, v| acc.wrapping_add(*v));
    assert_eq!(index.range_sum(&0, &u64::MAX), expect);
}

#[test]
fn test_concurrent_readers() {
    let seed: u64 = random();
    println!("test_concurrent_readers seed:{}", seed);

    let mut index = Index::learned("test-concurrent", Config::default()).unwrap();
    // built keys are never rebound, readers can assert exact values.
    let data: Vec<(u64, u64)> = (0..50_000_u64).map(|i| (i * 2, i + 1)).collect();
    index.build(data).unwrap();
    let built_sum = index.range_sum(&0, &99_998);

    let index = Arc::new(index);
    let mut handles = vec![];
    for t in 0..4_u64 {
        let index = Arc::clone(&index);
        handles.push(thread::spawn(move || {
            let mut rng = SmallRng::seed_from_u64(seed ^ t);
            for _i in 0..20_000 {
                let i = rng.gen::<u64>() % 50_000;
                assert_eq!(index.lookup(&(i * 2)), i + 1);
                assert_eq!(index.lookup(&(i * 2 + 1)), NOT_FOUND);
            }
            for _i in 0..100 {
                assert_eq!(index.range_sum(&0, &99_998), built_sum);
            }
        }));
    }

    // single logical writer, inserts beyond the built domain while
    // the readers run; drains happen along the way.
    for i in 0..20_000_u64 {
        index.insert(1_000_000 + i, i).unwrap();
    }

    for handle in handles.into_iter() {
        handle.join().unwrap();
    }

    index.flush().unwrap();
    assert!(index.to_stats().flush_count >= 1);
    for i in 0..20_000_u64 {
        assert_eq!(index.lookup(&(1_000_000 + i)), i);
    }
}

#[test]
fn test_config_params() {
    let config = Config::from_params(&[]);
    assert_eq!(config.to_threshold_pct(), 5);
    assert_eq!(config.to_batch_size(), 1000);
    assert_eq!(config.to_mode(), Mode::Adaptive);

    // threshold_pct <= 0 falls back to the default.
    assert_eq!(Config::from_params(&[0]).to_threshold_pct(), 5);
    assert_eq!(Config::from_params(&[-3]).to_threshold_pct(), 5);
    assert_eq!(Config::from_params(&[15]).to_threshold_pct(), 15);

    let config = Config::from_params(&[3, 500, 0]);
    assert_eq!(config.to_threshold_pct(), 3);
    assert_eq!(config.to_batch_size(), 500);
    assert_eq!(config.to_mode(), Mode::Fixed);

    assert_eq!(Config::from_params(&[3, -1]).to_batch_size(), 1000);
    assert_eq!(Config::from_params(&[3, 500, 1]).to_mode(), Mode::Adaptive);
}

#[test]
fn test_variants() {
    let mut config = Config::from_params(&[7]);
    config.set_epsilon(128).unwrap();
    config.set_searcher(Searcher::Exponential).unwrap();

    let mut index = Index::learned("test-variants", config).unwrap();
    index.build(vec![(1, 1)]).unwrap();

    assert_eq!(
        index.variants(),
        vec!["ExponentialSearch", "128", "7", "ADAPTIVE", "flushes:0"]
    );

    index.insert(2, 2).unwrap();
    index.flush().unwrap();
    assert_eq!(index.variants()[4], "flushes:1");
}

#[test]
fn test_applicable() {
    let index = Index::learned("test-applicable", Config::default()).unwrap();
    assert!(index.applicable(true, false));
    assert!(!index.applicable(false, false));
    assert!(!index.applicable(true, true));

    let mut config = Config::default();
    config.set_searcher(Searcher::LinearAvx).unwrap();
    let index = Index::learned("test-applicable-avx", config).unwrap();
    assert!(!index.applicable(true, false));
}

#[test]
fn test_bypass() {
    let mut config = Config::default();
    config.set_bypass(true).unwrap();
    let mut index = Index::learned("test-bypass", config).unwrap();
    index.build((0..1000_u64).map(|i| (i * 2, i)).collect()).unwrap();

    for i in 0..800_u64 {
        index.lookup(&((i % 1000) * 2));
    }
    // the workload is overwhelmingly lookups, inserts short-circuit
    // to the primary.
    for i in 0..10_u64 {
        index.insert(100_001 + i, i).unwrap();
    }

    assert_eq!(index.to_stats().pgm_size, 0);
    assert_eq!(rlock(&index.primary).len(), 1010);
    for i in 0..10_u64 {
        assert_eq!(index.lookup(&(100_001 + i)), i);
    }
}

#[test]
fn test_size() {
    let mut index = Index::learned("test-size", Config::default()).unwrap();
    index.build((0..10_000_u64).map(|i| (i, i)).collect()).unwrap();
    let loaded = index.size();
    assert!(loaded > 10_000 * 16, "{}", loaded);

    for i in 0..100_u64 {
        index.insert(1_000_000 + i, i).unwrap();
    }
    assert!(index.size() > loaded);
}
