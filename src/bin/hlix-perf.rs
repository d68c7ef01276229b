use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};
use structopt::StructOpt;

use std::time;

use hlix::{
    hybrid::{Config, Hybrid},
    pgm::Pgm,
    primary::Primary,
    search::Searcher,
};

/// Command line options.
#[derive(Clone, StructOpt)]
pub struct Opt {
    #[structopt(long = "seed", default_value = "0")]
    seed: u64,

    #[structopt(long = "loads", default_value = "1000000")] // default 1M
    loads: usize,

    #[structopt(long = "gets", default_value = "1000000")] // default 1M
    gets: usize,

    #[structopt(long = "sets", default_value = "100000")] // default 100K
    sets: usize,

    #[structopt(long = "ranges", default_value = "10000")] // default 10K
    ranges: usize,

    #[structopt(long = "threshold", default_value = "5")]
    threshold: i64,

    #[structopt(long = "batch", default_value = "1000")]
    batch: i64,

    // 0 = FIXED, 1 = ADAPTIVE
    #[structopt(long = "mode", default_value = "1")]
    mode: i64,

    #[structopt(long = "epsilon", default_value = "64")]
    epsilon: usize,

    #[structopt(long = "searcher", default_value = "BranchingBinarySearch")]
    searcher: String,

    #[structopt(long = "bypass")]
    bypass: bool,
}

fn main() {
    let mut opts = Opt::from_args();
    if opts.seed == 0 {
        opts.seed = random();
    }
    println!("hlix-perf: seed:{}", opts.seed);

    let searcher = match Searcher::from_name(&opts.searcher) {
        Some(searcher) => searcher,
        None => {
            println!("hlix-perf: error invalid searcher {}", opts.searcher);
            return;
        }
    };

    let mut config = Config::from_params(&[opts.threshold, opts.batch, opts.mode]);
    config.set_epsilon(opts.epsilon).unwrap();
    config.set_searcher(searcher).unwrap();
    config.set_bypass(opts.bypass).unwrap();

    let mut index: Hybrid<u64, Primary<u64>, Pgm<u64>> =
        Hybrid::learned("hlix-perf", config).expect("create index");
    if !index.applicable(true, false) {
        println!("hlix-perf: error {:?} not applicable", index.variants());
        return;
    }

    let mut rng = SmallRng::seed_from_u64(opts.seed);
    let key_max = (opts.loads as u64) * 16;

    let data: Vec<(u64, u64)> = {
        let mut keys: Vec<u64> = (0..opts.loads * 2).map(|_| rng.gen::<u64>() % key_max).collect();
        keys.sort_unstable();
        keys.dedup();
        keys.truncate(opts.loads);
        keys.into_iter().map(|k| (k, rng.gen::<u64>() % 1000)).collect()
    };
    let n_loads = data.len();

    let elapsed = index.build(data).expect("bulk load");
    println!("hlix-perf: loaded {} entries in {:?}", n_loads, elapsed);

    if opts.gets > 0 {
        let start = time::Instant::now();
        let mut n_found = 0;
        for _i in 0..opts.gets {
            let key = rng.gen::<u64>() % key_max;
            if index.lookup(&key) != hlix::core::NOT_FOUND {
                n_found += 1;
            }
        }
        let elapsed = start.elapsed();
        println!(
            "hlix-perf: {} gets, {} found, in {:?}, {} ops/sec",
            opts.gets,
            n_found,
            elapsed,
            ops_per_sec(opts.gets, elapsed),
        );
    }

    if opts.sets > 0 {
        let start = time::Instant::now();
        for i in 0..opts.sets {
            let key = key_max + (i as u64);
            index.insert(key, rng.gen::<u64>() % 1000).expect("insert");
        }
        let elapsed = start.elapsed();
        println!(
            "hlix-perf: {} sets in {:?}, {} ops/sec",
            opts.sets,
            elapsed,
            ops_per_sec(opts.sets, elapsed),
        );
    }

    if opts.ranges > 0 {
        let width = u64::max(key_max / 1000, 1);
        let start = time::Instant::now();
        let mut sum: u64 = 0;
        for _i in 0..opts.ranges {
            let lo = rng.gen::<u64>() % key_max;
            sum = sum.wrapping_add(index.range_sum(&lo, &(lo + width)));
        }
        let elapsed = start.elapsed();
        println!(
            "hlix-perf: {} ranges in {:?}, {} ops/sec, checksum {}",
            opts.ranges,
            elapsed,
            ops_per_sec(opts.ranges, elapsed),
            sum,
        );
    }

    index.flush().expect("final flush");
    println!("hlix-perf: variants {:?}", index.variants());
    println!("hlix-perf: footprint {} bytes", index.size());
    println!("hlix-perf: stats {}", index.to_stats());
}

fn ops_per_sec(ops: usize, elapsed: time::Duration) -> u64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        ((ops as f64) / secs) as u64
    } else {
        0
    }
}
