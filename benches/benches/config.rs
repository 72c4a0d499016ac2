// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Benchmarks for `understory_config`.

use criterion::{BatchSize, BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::sync::Arc;

use understory_config::{
    Declaration, DeclaredConfiguration, MemorySource, SchemaRegistry, TypeShape,
};

struct Upstream;

impl DeclaredConfiguration for Upstream {
    const NAME: &'static str = "Upstream";

    fn declare(d: &mut Declaration) {
        d.scalar::<String>("Host").default("localhost");
        d.scalar::<u16>("Port").default(80);
        d.nullable::<u32>("Weight");
        d.dictionary("Tags", TypeShape::scalar::<String>());
    }
}

struct Gateway;

impl DeclaredConfiguration for Gateway {
    const NAME: &'static str = "Gateway";

    fn declare(d: &mut Declaration) {
        d.root_path("Gateway");
        d.scalar::<bool>("Enabled").default(true);
        d.collection("Upstreams", TypeShape::object::<Upstream>());
    }
}

fn source_with(upstreams: usize) -> Arc<MemorySource> {
    let mut entries = Vec::with_capacity(upstreams * 4);
    for i in 0..upstreams {
        entries.push((format!("Gateway:Upstreams:{i}:Host"), format!("host-{i}")));
        entries.push((format!("Gateway:Upstreams:{i}:Port"), (8000 + i).to_string()));
        entries.push((format!("Gateway:Upstreams:{i}:Tags:zone"), "a".to_owned()));
        entries.push((format!("Gateway:Upstreams:{i}:Tags:tier"), "web".to_owned()));
    }
    Arc::new(MemorySource::from_entries(entries))
}

fn bench_config(c: &mut Criterion) {
    c.bench_function("config/derive_schema", |b| {
        b.iter(|| {
            let registry = SchemaRegistry::new();
            black_box(registry.schema_of::<Gateway>().unwrap());
        });
    });

    let registry = SchemaRegistry::new();
    let mut group = c.benchmark_group("config/load");
    for &n in &[10_usize, 100, 1000] {
        let source = source_with(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter_batched(
                || registry.materialize::<Gateway>(source.clone()).unwrap(),
                |gateway| {
                    gateway.load().unwrap();
                    black_box(gateway)
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();

    let mut group = c.benchmark_group("config/reload_unchanged");
    for &n in &[10_usize, 100, 1000] {
        let gateway = registry.materialize::<Gateway>(source_with(n)).unwrap();
        gateway.load().unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| gateway.load().unwrap());
        });
    }
    group.finish();

    let mut group = c.benchmark_group("config/is_dirty");
    for &n in &[10_usize, 100, 1000] {
        let gateway = registry.materialize::<Gateway>(source_with(n)).unwrap();
        gateway.load().unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| black_box(gateway.is_dirty().unwrap()));
        });
    }
    group.finish();

    let mut group = c.benchmark_group("config/save");
    for &n in &[10_usize, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter_batched(
                || {
                    let gateway = registry.materialize::<Gateway>(source_with(n)).unwrap();
                    gateway.load().unwrap();
                    let upstreams = gateway.collection("Upstreams").unwrap();
                    upstreams.remove_at(0).unwrap();
                    gateway
                },
                |gateway| gateway.save().unwrap(),
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_config);
criterion_main!(benches);
