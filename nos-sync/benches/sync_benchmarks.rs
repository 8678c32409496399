//! Synchronization benchmarks

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use nos_sync::host::HostProvider;
use nos_sync::{AtomicCell, AtomicOps, CriticalSection, Emulated, Interlock, Native};

fn bench_interlocked_increment(c: &mut Criterion) {
    let cell = AtomicCell::new(0);
    c.bench_function("increment_native", |b| {
        b.iter(|| Native.increment(black_box(&cell)))
    });

    let emulated = Emulated::bind(&Interlock::new());
    c.bench_function("increment_emulated", |b| {
        b.iter(|| emulated.increment(black_box(&cell)))
    });
}

fn bench_compare_and_swap(c: &mut Criterion) {
    let cell = AtomicCell::new(0);
    c.bench_function("compare_and_swap_native", |b| {
        b.iter(|| Native.compare_and_swap(black_box(&cell), 1, 1))
    });
}

fn bench_uncontended_acquire(c: &mut Criterion) {
    let host = HostProvider::shared();
    let lock = CriticalSection::new(host, host.interlock());
    c.bench_function("acquire_release", |b| {
        b.iter(|| {
            lock.acquire();
            lock.release();
        })
    });

    lock.acquire();
    c.bench_function("acquire_release_recursive", |b| {
        b.iter(|| {
            lock.acquire();
            lock.release();
        })
    });
    lock.release();
}

criterion_group!(
    benches,
    bench_interlocked_increment,
    bench_compare_and_swap,
    bench_uncontended_acquire
);

criterion_main!(benches);
