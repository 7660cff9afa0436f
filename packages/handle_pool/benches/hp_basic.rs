//! Basic benchmarks for the `handle_pool` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::iter;
use std::time::Instant;

use criterion::{Criterion, criterion_group, criterion_main};
use handle_pool::HandlePool;

criterion_group!(benches, entrypoint);
criterion_main!(benches);

const TOTAL_SIZE: usize = 1024 * 1024;
const BLOCK_SIZE: usize = 1024;

fn new_pool() -> HandlePool {
    HandlePool::builder()
        .total_size(TOTAL_SIZE)
        .block_size(BLOCK_SIZE)
        .salt_seed(42)
        .build()
        .unwrap()
}

fn entrypoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("hp_basic");

    group.bench_function("build", |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(new_pool()));
            }

            start.elapsed()
        });
    });

    group.bench_function("allocate_one", |b| {
        b.iter_custom(|iters| {
            let mut pools = iter::repeat_with(new_pool)
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let start = Instant::now();

            for pool in &mut pools {
                _ = black_box(pool.allocate().unwrap());
            }

            start.elapsed()
        });
    });

    group.bench_function("resolve_last_of_half_full", |b| {
        b.iter_custom(|iters| {
            let mut pool = new_pool();

            let half = pool.num_blocks() / 2;
            let last = iter::repeat_with(|| pool.allocate().unwrap())
                .take(half)
                .last()
                .unwrap();

            let start = Instant::now();

            for _ in 0..iters {
                _ = black_box(pool.resolve_pointer(black_box(last)));
            }

            start.elapsed()
        });
    });

    group.bench_function("allocate_free_churn", |b| {
        // Allocate 10 blocks, free the first 5 and repeat 100 times.
        // This stresses the first-fit search and the salt collision checks.
        b.iter_custom(|iters| {
            let mut pools = iter::repeat_with(new_pool)
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let mut to_free = Vec::with_capacity(5);

            let start = Instant::now();

            for pool in &mut pools {
                for _ in 0..100 {
                    to_free.clear();

                    for _ in 0..5 {
                        to_free.push(pool.allocate().unwrap());
                    }

                    for _ in 0..5 {
                        _ = black_box(pool.allocate().unwrap());
                    }

                    for handle in to_free.drain(..) {
                        pool.free(handle).unwrap();
                    }
                }
            }

            start.elapsed()
        });
    });

    group.finish();
}
