// Copyright 2024 Saorsa Labs
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Performance benchmarks for the shard codec.

use cde::codec::Codec;
use cde::gf256::{self, Gf256};
use cde::types::Policy;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    for &size in &[1_048_576usize, 8_388_608, 67_108_864] {
        let k = 16u16;
        let m = 4u16;
        let chunk_size = (size as u32 / k as u32) * k as u32;
        let policy = Policy::new(k, m, chunk_size).unwrap();
        let chunk = vec![0u8; chunk_size as usize];

        group.throughput(Throughput::Bytes(chunk_size as u64));
        group.bench_with_input(
            BenchmarkId::new("gf256_matrix", format!("{}MB", size / 1_000_000)),
            &chunk_size,
            |b, _| {
                let codec = Codec::new();
                b.iter(|| codec.encode(black_box(&policy), black_box(&chunk)).unwrap());
            },
        );
    }

    group.finish();
}

fn bench_reconstruct(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconstruct");

    for &size in &[1_048_576usize, 8_388_608] {
        let k = 16u16;
        let m = 4u16;
        let chunk_size = (size as u32 / k as u32) * k as u32;
        let policy = Policy::new(k, m, chunk_size).unwrap();
        let chunk = vec![0u8; chunk_size as usize];

        let codec = Codec::new();
        let shards = codec.encode(&policy, &chunk).unwrap();
        let mut present: Vec<Option<Vec<u8>>> = shards.into_iter().map(Some).collect();
        present[0] = None;
        present[1] = None;
        present[2] = None;
        present[3] = None;

        group.throughput(Throughput::Bytes(chunk_size as u64));
        group.bench_with_input(
            BenchmarkId::new("gf256_matrix", format!("{}MB", size / 1_000_000)),
            &chunk_size,
            |b, _| {
                b.iter(|| {
                    let mut test_present = present.clone();
                    codec.reconstruct(black_box(&policy), black_box(&mut test_present)).unwrap();
                });
            },
        );
    }

    group.finish();
}

fn bench_matrix_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("matrix_generation");

    for &(k, m) in &[(8usize, 2usize), (16, 4), (20, 5), (32, 8)] {
        group.bench_with_input(BenchmarkId::new("cauchy", format!("{k}+{m}")), &(k, m), |b, &(k, m)| {
            b.iter(|| gf256::generate_cauchy_matrix(black_box(k), black_box(m)));
        });
    }

    group.finish();
}

fn bench_gf256_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("gf256");

    let data = vec![0u8; 65536];
    let mut result = vec![0u8; 65536];
    let scalar = Gf256(7);

    group.throughput(Throughput::Bytes(65536));
    group.bench_function("mul_slice", |b| {
        b.iter(|| {
            gf256::mul_slice(black_box(&mut result), black_box(&data), black_box(scalar));
        });
    });

    group.bench_function("add_slice", |b| {
        b.iter(|| {
            gf256::add_slice(black_box(&mut result), black_box(&data));
        });
    });

    group.finish();
}

criterion_group!(benches, bench_encode, bench_reconstruct, bench_matrix_generation, bench_gf256_operations);
criterion_main!(benches);
