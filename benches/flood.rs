//! Throughput benchmarks for flat and recursive task floods.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use divan::Bencher;
use filch::{Config, StealStrategy, Worker};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

// -----------------------------------------------------------------------------
// Workloads

/// Spawns `count` leaf tasks from the master and waits for the partition to
/// drain them.
fn flood(workers: usize, strategy: StealStrategy, count: u64) {
    let executed = Arc::new(AtomicU64::new(0));
    let tally = Arc::clone(&executed);
    filch::run(Config::new(workers).strategy(strategy), move |worker| {
        for _ in 0..count {
            let tally = Arc::clone(&tally);
            worker.spawn(move |_| {
                tally.fetch_add(1, Ordering::Relaxed);
            });
        }
    })
    .unwrap();
    assert_eq!(executed.load(Ordering::Relaxed), count);
}

/// Recursively doubles until `depth` is exhausted, touching every worker.
fn fan_out(worker: &Worker, tally: Arc<AtomicU64>, depth: u32) {
    tally.fetch_add(1, Ordering::Relaxed);
    if depth == 0 {
        return;
    }
    for _ in 0..2 {
        let tally = Arc::clone(&tally);
        worker.spawn(move |worker| fan_out(worker, tally, depth - 1));
    }
}

// -----------------------------------------------------------------------------
// Benchmarks

const WORKERS: &[usize] = &[1, 2, 4, 8];

#[divan::bench(args = WORKERS)]
fn flat_steal_one(bencher: Bencher, workers: usize) {
    bencher.bench(|| flood(workers, StealStrategy::One, 50_000));
}

#[divan::bench(args = WORKERS)]
fn flat_steal_half(bencher: Bencher, workers: usize) {
    bencher.bench(|| flood(workers, StealStrategy::Half, 50_000));
}

#[divan::bench(args = WORKERS)]
fn flat_adaptive(bencher: Bencher, workers: usize) {
    bencher.bench(|| flood(workers, StealStrategy::Adaptive, 50_000));
}

#[divan::bench(args = WORKERS)]
fn recursive_fan_out(bencher: Bencher, workers: usize) {
    bencher.bench(|| {
        let executed = Arc::new(AtomicU64::new(0));
        let tally = Arc::clone(&executed);
        filch::run(Config::new(workers), move |worker| {
            worker.spawn(move |worker| fan_out(worker, tally, 14));
        })
        .unwrap();
        assert_eq!(executed.load(Ordering::Relaxed), (1 << 15) - 1);
    });
}

fn main() {
    let fmt_layer = fmt::layer()
        .without_time()
        .with_target(false)
        .with_thread_names(true)
        .compact();

    tracing_subscriber::registry().with(fmt_layer).init();

    divan::main();
}
