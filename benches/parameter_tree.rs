//! Criterion benchmarks for parameter tree hot paths.
//!
//! Key metrics:
//! - Tree build from a full feature enumeration
//! - Pre-order walk over a snapshot
//! - Path resolution and local validation
//! - Validated writes against the emulated device
//!
//! Run with: cargo bench --bench parameter_tree

use std::sync::Arc;

use camctl::hardware::{DeviceHandle, MockCamera};
use camctl::parameter::{ParameterTree, ParameterValue};
use camctl::render::{self, NameFilter};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tokio::runtime::Runtime;

fn handle() -> Arc<DeviceHandle> {
    Arc::new(DeviceHandle::new(Arc::new(MockCamera::new(0))))
}

fn tree(rt: &Runtime) -> ParameterTree {
    rt.block_on(ParameterTree::build(handle())).unwrap()
}

/// Building a tree queries the device and converts every feature.
fn tree_build(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    c.bench_function("tree_build", |b| {
        b.to_async(&rt)
            .iter(|| async { ParameterTree::build(black_box(handle())).await.unwrap() });
    });
}

fn tree_walk(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let snapshot = tree(&rt).snapshot();
    c.bench_function("tree_walk", |b| {
        b.iter(|| black_box(&snapshot).walk().count());
    });
}

/// Name resolution plus local checks, no device traffic.
fn resolve_and_validate(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let tree = tree(&rt);
    let mut group = c.benchmark_group("resolve_validate");

    for path in ["Width", "AOI/Width", "AcquisitionControl/ExposureTime", "TriggerSource"] {
        group.bench_with_input(BenchmarkId::new("resolve", path), path, |b, path| {
            b.iter(|| tree.resolve(black_box(path)).unwrap());
        });
    }

    let (_, width) = tree.resolve("Width").unwrap();
    let value = ParameterValue::Int(512);
    group.bench_function("validate_int", |b| {
        b.iter(|| width.validate(black_box(&value)).unwrap());
    });

    let (_, exposure) = tree.resolve("ExposureTime").unwrap();
    let value = ParameterValue::Float(20_000.0);
    group.bench_function("validate_float", |b| {
        b.iter(|| exposure.validate(black_box(&value)).unwrap());
    });

    group.finish();
}

fn validated_write(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let tree = &tree(&rt);
    c.bench_function("set_height", |b| {
        b.to_async(&rt).iter(move || async move {
            tree.set("Height", black_box(ParameterValue::Int(512)))
                .await
                .unwrap()
        });
    });
}

fn render_tree(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let snapshot = tree(&rt).snapshot();
    let mut group = c.benchmark_group("render_tree");
    for pattern in ["*", "Trigger*"] {
        let filter = NameFilter::new(pattern).unwrap();
        group.bench_with_input(BenchmarkId::new("filter", pattern), &filter, |b, filter| {
            b.iter(|| render::parameter_tree(black_box(&snapshot), filter));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    tree_build,
    tree_walk,
    resolve_and_validate,
    validated_write,
    render_tree
);
criterion_main!(benches);
