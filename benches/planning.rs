// Copyright (c) Diablo Benchmark Developers
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use diablo::rate_curve::{RateCheckpoint, RateCurve};
use diablo::workload::{PayloadPool, SecondaryWorkload, WorkloadAllocator};
use divan::counter::ItemsCount;

fn main() {
    divan::main();
}

fn checkpoints(count: u64) -> Vec<RateCheckpoint> {
    (0..count)
        .map(|i| RateCheckpoint::new(i * 60, ((i * 37) % 500) as f64))
        .collect()
}

#[divan::bench(args = [2, 16, 128])]
fn build_curve(bencher: divan::Bencher, count: u64) {
    let checkpoints = checkpoints(count);
    bencher.bench(|| RateCurve::build(divan::black_box(&checkpoints)).unwrap());
}

#[divan::bench(args = [(1, 1), (4, 8), (16, 32)])]
fn allocate(bencher: divan::Bencher, shape: (usize, usize)) {
    let (secondaries, threads) = shape;
    let curve = RateCurve::from_rates(vec![1000; 60]);
    let allocator = WorkloadAllocator::new(secondaries, threads);
    let payload = Bytes::from(vec![0; 256]);
    bencher
        .counter(ItemsCount::new(curve.total() as usize))
        .with_inputs(|| PayloadPool::new(std::iter::repeat_n(payload.clone(), curve.total() as usize)))
        .bench_local_values(|mut pool| allocator.allocate(&curve, &mut pool).unwrap());
}

#[divan::bench()]
fn decode_slice(bencher: divan::Bencher) {
    let curve = RateCurve::from_rates(vec![500; 60]);
    let mut pool = PayloadPool::new(std::iter::repeat_n(Bytes::from(vec![7; 256]), curve.total() as usize));
    let workload = WorkloadAllocator::new(1, 8).allocate(&curve, &mut pool).unwrap();
    let bytes = workload.secondary(0).unwrap().to_bytes().unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(bytes.len()))
        .bench(|| SecondaryWorkload::from_bytes(divan::black_box(&bytes)).unwrap());
}
