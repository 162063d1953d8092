//! Benchmarks for `DoubleTreeMap` using Divan.
//!
//! Run with: `cargo bench --bench tree`

use divan::{Bencher, black_box};
use double_tree::DoubleTreeMap;


use bench_utils::{ascending_keys, scrambled_keys};

fn main() {
    divan::main();
}

// =============================================================================
// Construction
// =============================================================================

#[divan::bench_group]
mod construction {
    use super::*;

    #[divan::bench]
    fn new_map() -> DoubleTreeMap<u64, u64> {
        DoubleTreeMap::new()
    }
}

// =============================================================================
// Insert
// =============================================================================

#[divan::bench_group]
mod insert {
    use super::*;

    #[divan::bench(args = [1_000, 100_000])]
    fn ascending(bencher: Bencher, n: usize) {
        let keys = ascending_keys(n);
        bencher.bench_local(|| {
            let mut map: DoubleTreeMap<u64, u64> = DoubleTreeMap::new();
            for &k in &keys {
                map.insert(black_box(k), k);
            }
            map
        });
    }

    #[divan::bench(args = [1_000, 100_000])]
    fn scrambled(bencher: Bencher, n: usize) {
        let keys = scrambled_keys(n);
        bencher.bench_local(|| {
            let mut map: DoubleTreeMap<u64, u64> = DoubleTreeMap::new();
            for &k in &keys {
                map.insert(black_box(k), k);
            }
            map
        });
    }
}

// =============================================================================
// Lookup
// =============================================================================

#[divan::bench_group]
mod get {
    use super::*;

    #[divan::bench(args = [1_000, 100_000])]
    fn hit_every_key(bencher: Bencher, n: usize) {
        let keys = scrambled_keys(n);
        let map: DoubleTreeMap<u64, u64> = keys.iter().map(|&k| (k, k)).collect();
        bencher.bench_local(|| {
            let mut sum = 0u64;
            for &k in &keys {
                sum = sum.wrapping_add(*map.get(black_box(&k)).expect("present"));
            }
            sum
        });
    }

    #[divan::bench(args = [100_000])]
    fn miss_every_key(bencher: Bencher, n: usize) {
        let keys = scrambled_keys(n);
        // Offset probes fall between the scrambled keys.
        let map: DoubleTreeMap<u64, u64> = keys.iter().map(|&k| (k, k)).collect();
        bencher.bench_local(|| {
            let mut misses = 0usize;
            for &k in &keys {
                if map.get(black_box(&k.wrapping_add(1))).is_none() {
                    misses += 1;
                }
            }
            misses
        });
    }
}

// =============================================================================
// Iteration
// =============================================================================

#[divan::bench_group]
mod iterate {
    use super::*;

    #[divan::bench(args = [100_000])]
    fn sum_values(bencher: Bencher, n: usize) {
        let map: DoubleTreeMap<u64, u64> =
            scrambled_keys(n).into_iter().map(|k| (k, 1)).collect();
        bencher.bench_local(|| map.values().sum::<u64>());
    }
}

// =============================================================================
// Erase
// =============================================================================

#[divan::bench_group]
mod erase {
    use super::*;

    #[divan::bench(args = [1_000, 100_000])]
    fn all_scrambled(bencher: Bencher, n: usize) {
        let keys = scrambled_keys(n);
        bencher
            .with_inputs(|| keys.iter().map(|&k| (k, k)).collect::<DoubleTreeMap<u64, u64>>())
            .bench_local_values(|mut map| {
                for &k in &keys {
                    map.remove(black_box(&k));
                }
                map
            });
    }
}
