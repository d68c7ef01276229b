//! Module `hybrid` implement the two-tier hybrid index and its
//! orchestration: where a key lives, how reads fan out, when the
//! write tier is drained into the primary, and the double-buffered
//! swap protocol that lets writes continue while a drain is in
//! flight.
//!
//! Writes land in the *active* delta tier and its shadow batch. When
//! the scheduler trips, active and *inflight* swap under the tier
//! locks and the batch is handed to a single background drainer,
//! which sorts it, deduplicates it and bulk-merges it into the
//! primary. Reads fan out newest-first: active delta, inflight delta
//! while a drain is pending, then the primary.
//!
//! The orchestrator serializes writes (single logical writer);
//! readers may overlap writes and the drain.

use log::{debug, error, info};

use std::{
    fmt, mem, result,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
    thread, time,
};

use crate::{
    core::{DeltaStore, Footprint, Key, PrimaryStore, NOT_FOUND},
    pgm::Pgm,
    primary::Primary,
    search::Searcher,
    util::thread as rt,
    Result,
};

/// Flushing mode for the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Drain whenever the active batch reaches the base threshold.
    Fixed,
    /// Derive the threshold from the lookup-to-insert ratio observed
    /// since the last swap.
    Adaptive,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        match self {
            Mode::Fixed => write!(f, "FIXED"),
            Mode::Adaptive => write!(f, "ADAPTIVE"),
        }
    }
}

/// Configuration type for [Hybrid] indexes.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    threshold_pct: usize,
    batch_size: usize,
    mode: Mode,
    epsilon: usize,
    searcher: Searcher,
    bypass: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            threshold_pct: Self::THRESHOLD_PCT,
            batch_size: Self::BATCH_SIZE,
            mode: Mode::Adaptive,
            epsilon: Self::EPSILON,
            searcher: Searcher::default(),
            bypass: false,
        }
    }
}

impl Config {
    /// Default drain threshold, as a percentage of the bulk-loaded
    /// data size.
    pub const THRESHOLD_PCT: usize = 5;

    /// Default maximum items per sub-batch within a drain. Only
    /// incremental drain variants consume this; the stock drainer
    /// merges the whole batch in one call.
    pub const BATCH_SIZE: usize = 1000;

    /// Default model error bound for both indexes.
    pub const EPSILON: usize = 64;

    /// Build a configuration from the positional integer parameters
    /// `[threshold_pct, batch_size, mode]`. Fewer arguments are
    /// tolerated; out-of-range values fall back to defaults.
    pub fn from_params(params: &[i64]) -> Config {
        let mut config = Config::default();
        match params.first() {
            Some(&pct) if pct > 0 => config.threshold_pct = pct as usize,
            Some(_) | None => (),
        }
        if let Some(&size) = params.get(1) {
            if size > 0 {
                config.batch_size = size as usize;
            }
        }
        if let Some(&mode) = params.get(2) {
            config.mode = if mode == 0 { Mode::Fixed } else { Mode::Adaptive };
        }
        config
    }

    /// Set the drain threshold percentage. Values `<= 0` keep the
    /// default.
    pub fn set_threshold_pct(&mut self, pct: isize) -> Result<&mut Self> {
        if pct > 0 {
            self.threshold_pct = pct as usize;
        }
        Ok(self)
    }

    /// Set the flushing mode.
    pub fn set_mode(&mut self, mode: Mode) -> Result<&mut Self> {
        self.mode = mode;
        Ok(self)
    }

    /// Set the model error bound used by both indexes.
    pub fn set_epsilon(&mut self, epsilon: usize) -> Result<&mut Self> {
        self.epsilon = usize::max(epsilon, 1);
        Ok(self)
    }

    /// Set the last-mile search strategy used by both indexes.
    pub fn set_searcher(&mut self, searcher: Searcher) -> Result<&mut Self> {
        self.searcher = searcher;
        Ok(self)
    }

    /// Enable the write bypass: when the observed workload is
    /// overwhelmingly lookups, route inserts directly to the primary
    /// instead of accumulating a delta that must later be drained.
    pub fn set_bypass(&mut self, bypass: bool) -> Result<&mut Self> {
        self.bypass = bypass;
        Ok(self)
    }

    pub fn to_threshold_pct(&self) -> usize {
        self.threshold_pct
    }

    pub fn to_batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn to_mode(&self) -> Mode {
        self.mode
    }

    pub fn to_epsilon(&self) -> usize {
        self.epsilon
    }

    pub fn to_searcher(&self) -> Searcher {
        self.searcher
    }
}

// Process-lifetime counters shared between the writer, readers and
// the drainer. All relaxed, except is_flushing which publishes the
// swap to the drainer and the drain completion back.
#[derive(Default)]
struct Counters {
    pgm_size: AtomicUsize,
    flush_count: AtomicUsize,
    lookups_since_flush: AtomicUsize,
    inserts_since_flush: AtomicUsize,
    is_flushing: AtomicBool,
}

/// Point-in-time snapshot of the orchestrator's counters.
#[derive(Clone, Debug, Default)]
pub struct Stats {
    /// Entries in the active batch, i.e. inserts absorbed since the
    /// last swap.
    pub pgm_size: usize,
    /// Completed drains.
    pub flush_count: usize,
    /// Lookups observed since the last swap.
    pub lookups_since_flush: usize,
    /// Inserts observed since the last swap.
    pub inserts_since_flush: usize,
    /// Whether a drain is in flight.
    pub is_flushing: bool,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(
            f,
            concat!(
                "{{ pgm_size = {}, flush_count = {}, lookups_since_flush = {}, ",
                "inserts_since_flush = {}, is_flushing = {} }}",
            ),
            self.pgm_size,
            self.flush_count,
            self.lookups_since_flush,
            self.inserts_since_flush,
            self.is_flushing,
        )
    }
}

// Scheduler decides, on every insert, whether to trigger a
// swap-and-drain, from the active batch population and the workload
// mix observed since the last swap.
struct Scheduler {
    mode: Mode,
    base_count: usize,
}

// workload window below which the adaptive mode sticks to the base
// threshold.
const ADAPTIVE_WINDOW: usize = 1000;

impl Scheduler {
    fn new(mode: Mode) -> Scheduler {
        Scheduler {
            mode,
            base_count: 1,
        }
    }

    // the `/ 10` dampens threshold runaway on very large datasets.
    fn rebase(&mut self, initial_data_size: usize, threshold_pct: usize) {
        self.base_count = usize::max(initial_data_size * threshold_pct / 100 / 10, 1);
    }

    fn effective_threshold(&self, stats: &Counters) -> usize {
        match self.mode {
            Mode::Fixed => self.base_count,
            Mode::Adaptive => {
                let l = stats.lookups_since_flush.load(Ordering::Relaxed);
                let i = stats.inserts_since_flush.load(Ordering::Relaxed);
                let n = l + i;
                if n <= ADAPTIVE_WINDOW {
                    return self.base_count;
                }
                let r = (l as f64) / (n as f64);
                if r > 0.8 {
                    // lookup-heavy, drain sooner so reads hit a
                    // consolidated primary.
                    usize::max(self.base_count / 2, 1)
                } else if r < 0.2 {
                    // insert-heavy, delay to amortize merge cost.
                    self.base_count * 2
                } else {
                    self.base_count
                }
            }
        }
    }

    fn bypass_to_primary(&self, stats: &Counters) -> bool {
        let l = stats.lookups_since_flush.load(Ordering::Relaxed);
        let i = stats.inserts_since_flush.load(Ordering::Relaxed);
        let n = l + i;
        n > 0 && (l as f64) / (n as f64) > 0.7
    }
}

// One tier of the double buffer: a delta index and the append-only
// batch shadowing it. Both live under the same lock so they stay in
// agreement at every observable point.
struct Tier<K, D> {
    delta: D,
    batch: Vec<(K, u64)>,
}

enum Cmd {
    Drain,
}

/// Hybrid two-tier index. `P` is the bulk-loaded primary, `D` the
/// write-optimized delta; both are reached through their [core]
/// contracts only, so either can be swapped for another ordered map.
///
/// Writes must come from a single logical writer; reads may overlap
/// writes and the background drain.
///
/// [core]: crate::core
pub struct Hybrid<K, P, D>
where
    K: Key,
    P: PrimaryStore<K>,
    D: DeltaStore<K>,
{
    name: String,
    config: Config,
    initial_data_size: usize,
    scheduler: Scheduler,

    primary: Arc<RwLock<P>>,
    active: Arc<RwLock<Tier<K, D>>>,
    inflight: Arc<RwLock<Tier<K, D>>>,
    stats: Arc<Counters>,

    drainer: Option<rt::Thread<Cmd, Result<()>, ()>>,
}

impl<K> Hybrid<K, Primary<K>, Pgm<K>>
where
    K: Key,
{
    /// Create a hybrid index over this package's learned indexes,
    /// the primary bulk-loaded and model-served, the delta a
    /// dynamic piecewise-geometric-model index.
    pub fn learned(name: &str, config: Config) -> Result<Self> {
        let primary = Primary::new(config.epsilon, config.searcher);
        let delta = Pgm::new(config.epsilon, config.searcher);
        Hybrid::new(name, config, primary, delta)
    }
}

impl<K, P, D> Hybrid<K, P, D>
where
    K: Key,
    P: 'static + Send + Sync + PrimaryStore<K>,
    D: 'static + Send + Sync + DeltaStore<K>,
{
    /// Create an empty hybrid index from its two stores. `primary`
    /// and `delta` shall be empty; data is supplied through
    /// [build][Hybrid::build] and [insert][Hybrid::insert]. The
    /// drainer is running from this point on.
    pub fn new(name: &str, config: Config, primary: P, delta: D) -> Result<Hybrid<K, P, D>> {
        let inflight = Tier {
            delta: delta.empty(),
            batch: vec![],
        };
        let active = Tier {
            delta,
            batch: vec![],
        };

        let primary = Arc::new(RwLock::new(primary));
        let active = Arc::new(RwLock::new(active));
        let inflight = Arc::new(RwLock::new(inflight));
        let stats = Arc::new(Counters::default());

        let drainer = {
            let (name, primary) = (name.to_string(), Arc::clone(&primary));
            let (inflight, stats) = (Arc::clone(&inflight), Arc::clone(&stats));
            rt::Thread::new_sync("hybrid-drainer", 1, move |rx| {
                move || drain_loop(name, primary, inflight, stats, rx)
            })
        };

        info!(target: "hybrid", "{}, drainer thread started", name);

        Ok(Hybrid {
            name: name.to_string(),
            scheduler: Scheduler::new(config.mode),
            config,
            initial_data_size: 0,
            primary,
            active,
            inflight,
            stats,
            drainer: Some(drainer),
        })
    }

    /// Bulk-load the primary with `data`, unique keys in any order.
    /// Both delta tiers start empty and all counters reset. Returns
    /// elapsed wall time for the load.
    pub fn build(&mut self, data: Vec<(K, u64)>) -> Result<time::Duration> {
        let start = time::Instant::now();

        self.initial_data_size = data.len();
        self.scheduler.rebase(self.initial_data_size, self.config.threshold_pct);

        wlock(&self.primary)?.bulk_load(data);
        {
            let mut active = wlock(&self.active)?;
            active.delta = active.delta.empty();
            active.batch = vec![];
        }
        {
            let mut inflight = wlock(&self.inflight)?;
            inflight.delta = inflight.delta.empty();
            inflight.batch = vec![];
        }
        self.stats.pgm_size.store(0, Ordering::Relaxed);
        self.stats.flush_count.store(0, Ordering::Relaxed);
        self.stats.lookups_since_flush.store(0, Ordering::Relaxed);
        self.stats.inserts_since_flush.store(0, Ordering::Relaxed);
        self.stats.is_flushing.store(false, Ordering::Release);

        let elapsed = start.elapsed();
        info!(
            target: "hybrid",
            "{}, loaded {} entries in {:?}, base_count {}",
            self.name, self.initial_data_size, elapsed, self.scheduler.base_count,
        );
        Ok(elapsed)
    }

    /// Return the value bound to `key`, [NOT_FOUND] otherwise.
    ///
    /// Search order is newest first: active delta, inflight delta
    /// while a drain is in flight, then the primary. First hit wins.
    pub fn lookup(&self, key: &K) -> u64 {
        self.stats.lookups_since_flush.fetch_add(1, Ordering::Relaxed);

        if let Some(value) = rlock(&self.active).delta.find(key) {
            return value;
        }
        if self.stats.is_flushing.load(Ordering::Acquire) {
            if let Some(value) = rlock(&self.inflight).delta.find(key) {
                return value;
            }
        }
        match rlock(&self.primary).find(key) {
            Some(value) => value,
            None => NOT_FOUND,
        }
    }

    /// Return the sum of values bound to keys in `[lo, hi]`, both
    /// bounds inclusive.
    ///
    /// The three shared locks are held together, in the same order
    /// the swap and the drainer take them, so a batch cannot migrate
    /// between tiers mid-sum. A binding contributes only when no
    /// newer tier shadows its key, the priority order lookups use;
    /// a rebound key, or a batch stuck in the inflight tier after a
    /// failed drain, is counted exactly once.
    pub fn range_sum(&self, lo: &K, hi: &K) -> u64 {
        if lo > hi {
            return 0;
        }
        let inflight = rlock(&self.inflight);
        let active = rlock(&self.active);
        let primary = rlock(&self.primary);
        let flushing = self.stats.is_flushing.load(Ordering::Acquire);

        let iter = active.delta.range_scan(lo, hi);
        let mut sum = iter.fold(0u64, |acc, (_, v)| acc.wrapping_add(v));
        if flushing {
            for (k, v) in inflight.delta.range_scan(lo, hi) {
                if active.delta.find(&k).is_none() {
                    sum = sum.wrapping_add(v);
                }
            }
        }
        for (k, v) in primary.range_scan(lo, hi) {
            let shadowed = active.delta.find(&k).is_some()
                || (flushing && inflight.delta.find(&k).is_some());
            if !shadowed {
                sum = sum.wrapping_add(v);
            }
        }
        sum
    }

    /// Insert `key -> value`. Re-inserting a key rebinds it,
    /// last-writer-wins. Single logical writer; concurrent inserts
    /// are outside the contract.
    pub fn insert(&self, key: K, value: u64) -> Result<()> {
        self.stats.inserts_since_flush.fetch_add(1, Ordering::Relaxed);

        if self.config.bypass && self.scheduler.bypass_to_primary(&self.stats) {
            wlock(&self.primary)?.insert(key, value);
            return Ok(());
        }

        {
            let mut active = wlock(&self.active)?;
            active.delta.insert(key, value)?;
            active.batch.push((key, value));
        }
        self.stats.pgm_size.fetch_add(1, Ordering::Relaxed);

        self.maybe_flush()
    }

    /// Force a swap-and-drain of the active tier and wait for the
    /// drain to complete. A no-op when the active tier is empty.
    pub fn flush(&self) -> Result<()> {
        let deadline = time::Instant::now() + time::Duration::from_secs(60);
        loop {
            let cas = self.stats.is_flushing.compare_exchange(
                false,
                true,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
            if cas.is_ok() {
                break;
            }
            // a failed drain exits the drainer and leaves the flag
            // set permanently.
            let dead = self.drainer.as_ref().map_or(true, |d| d.is_finished());
            if dead || time::Instant::now() > deadline {
                return err_at!(Fatal, msg: "{} flush stalled, drain stuck", self.name);
            }
            // a drain is in flight, wait for it to settle.
            thread::yield_now();
        }

        if self.swap_tiers()? {
            match &self.drainer {
                Some(drainer) => drainer.request(Cmd::Drain)??,
                None => err_at!(ThreadFail, msg: "{} drainer gone", self.name)?,
            }
        } else {
            self.stats.is_flushing.store(false, Ordering::Release);
        }
        Ok(())
    }

    /// Byte footprint: the sum of the three stores' sizes.
    pub fn size(&self) -> usize {
        let mut size = rlock(&self.primary).footprint();
        size += rlock(&self.active).delta.footprint();
        size += rlock(&self.inflight).delta.footprint();
        size
    }

    /// Stable, ordered variant identification for result tagging:
    /// `[searcher, epsilon, threshold_pct, mode, "flushes:<n>"]`.
    pub fn variants(&self) -> Vec<String> {
        vec![
            self.config.searcher.name().to_string(),
            self.config.epsilon.to_string(),
            self.config.threshold_pct.to_string(),
            self.config.mode.to_string(),
            format!("flushes:{}", self.stats.flush_count.load(Ordering::Relaxed)),
        ]
    }

    /// Whether this index applies to a workload: keys must be unique
    /// and writes single-threaded, and the vectorized searcher is
    /// not supported.
    pub fn applicable(&self, unique: bool, multithread: bool) -> bool {
        self.config.searcher != Searcher::LinearAvx && unique && !multithread
    }

    /// Return name of this index instance.
    pub fn to_name(&self) -> String {
        self.name.clone()
    }

    pub fn to_config(&self) -> Config {
        self.config.clone()
    }

    /// Snapshot the orchestrator counters.
    pub fn to_stats(&self) -> Stats {
        Stats {
            pgm_size: self.stats.pgm_size.load(Ordering::Relaxed),
            flush_count: self.stats.flush_count.load(Ordering::Relaxed),
            lookups_since_flush: self.stats.lookups_since_flush.load(Ordering::Relaxed),
            inserts_since_flush: self.stats.inserts_since_flush.load(Ordering::Relaxed),
            is_flushing: self.stats.is_flushing.load(Ordering::Acquire),
        }
    }

    // Scheduler entry, invoked on every delta-path insert. Trips a
    // swap-and-drain when the active batch crosses the effective
    // threshold and no drain is already in flight.
    fn maybe_flush(&self) -> Result<()> {
        let threshold = self.scheduler.effective_threshold(&self.stats);
        if self.stats.pgm_size.load(Ordering::Relaxed) < threshold {
            return Ok(());
        }

        let cas = self.stats.is_flushing.compare_exchange(
            false,
            true,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if cas.is_err() {
            // another drain owns the flag; the active tier keeps
            // growing past the threshold until it completes.
            return Ok(());
        }

        if self.swap_tiers()? {
            match &self.drainer {
                Some(drainer) => drainer.post(Cmd::Drain)?,
                None => err_at!(ThreadFail, msg: "{} drainer gone", self.name)?,
            }
        } else {
            self.stats.is_flushing.store(false, Ordering::Release);
        }
        Ok(())
    }

    // The swap protocol. Caller owns the is_flushing flag. Lock
    // order is inflight before active, matching the range reader.
    // Returns false, leaving the flag for the caller to release,
    // when there is nothing to swap or the previous drain has not
    // recycled the inflight tier yet.
    fn swap_tiers(&self) -> Result<bool> {
        let mut inflight = wlock(&self.inflight)?;
        if !inflight.batch.is_empty() {
            return Ok(false);
        }
        let mut active = wlock(&self.active)?;
        if active.batch.is_empty() {
            return Ok(false);
        }

        let fresh = active.delta.empty();
        inflight.delta = mem::replace(&mut active.delta, fresh);
        inflight.batch = mem::take(&mut active.batch);

        self.stats.pgm_size.store(0, Ordering::Relaxed);
        self.stats.lookups_since_flush.store(0, Ordering::Relaxed);
        self.stats.inserts_since_flush.store(0, Ordering::Relaxed);

        debug!(
            target: "hybrid",
            "{}, swapped {} entries into the inflight tier",
            self.name,
            inflight.batch.len(),
        );
        Ok(true)
    }
}

// The drainer's main loop. Exits when the orchestrator drops its
// sending side; a failed drain is fail-stop, the flushing flag stays
// set and no further drains run, while reads keep serving.
fn drain_loop<K, P, D>(
    name: String,
    primary: Arc<RwLock<P>>,
    inflight: Arc<RwLock<Tier<K, D>>>,
    stats: Arc<Counters>,
    rx: rt::Rx<Cmd, Result<()>>,
) -> Result<()>
where
    K: Key,
    P: PrimaryStore<K>,
    D: DeltaStore<K>,
{
    for (cmd, resp_tx) in rx {
        let res = match cmd {
            Cmd::Drain => drain(&primary, &inflight, &stats),
        };
        match &res {
            Ok(n) => {
                info!(target: "hybrid", "{}, drained {} entries into the primary", name, n)
            }
            Err(err) => error!(target: "hybrid", "{}, drain failed {}", name, err),
        }
        let res = res.map(|_| ());
        if let Some(tx) = resp_tx {
            tx.send(res.clone()).ok();
        }
        res?;
    }
    Ok(())
}

// Drain the inflight tier into the primary. The inflight lock is
// held across merge and reset, so the transition "batch fully merged
// into the primary, inflight reset" is a single observable step for
// readers.
fn drain<K, P, D>(
    primary: &RwLock<P>,
    inflight: &RwLock<Tier<K, D>>,
    stats: &Counters,
) -> Result<usize>
where
    K: Key,
    P: PrimaryStore<K>,
    D: DeltaStore<K>,
{
    let mut tier = wlock(inflight)?;

    // take ownership of the batch; sort is stable, so of duplicated
    // keys the append order survives and the last write wins.
    let mut batch = mem::take(&mut tier.batch);
    batch.sort_by_key(|(k, _)| *k);
    batch.reverse();
    batch.dedup_by_key(|(k, _)| *k);
    batch.reverse();

    wlock(primary)?.bulk_insert(&batch)?;

    tier.delta = tier.delta.empty();
    drop(tier);

    stats.flush_count.fetch_add(1, Ordering::Relaxed);
    stats.is_flushing.store(false, Ordering::Release);
    Ok(batch.len())
}

// Readers tolerate poisoned locks: a drainer panic must not take
// lookups down with it.
fn rlock<T>(lock: &RwLock<T>) -> RwLockReadGuard<T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn wlock<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<T>> {
    match lock.write() {
        Ok(guard) => Ok(guard),
        Err(_) => err_at!(Fatal, msg: "lock poisoned, writer or drainer panicked"),
    }
}

#[cfg(test)]
#[path = "hybrid_test.rs"]
mod hybrid_test;
