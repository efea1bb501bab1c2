//! Benchmarks for the cell read/write path
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use trellis_core::{ComponentId, ReactiveCell, Runtime, RuntimeConfig, Value};

fn bench_cell_get(c: &mut Criterion) {
    let runtime = Runtime::new(RuntimeConfig::default()).unwrap();
    let ctx = runtime.session_context("bench");
    let cell = ReactiveCell::new("count", 0);
    cell.set(&ctx, 42);

    c.bench_function("cell_get_untracked", |b| b.iter(|| black_box(cell.get_untracked(&ctx))));

    let render = ctx.for_component(ComponentId::from("text_0"));
    c.bench_function("cell_get_tracked", |b| b.iter(|| black_box(cell.get(&render))));
}

fn bench_cell_set(c: &mut Criterion) {
    let runtime = Runtime::new(RuntimeConfig::default()).unwrap();
    let ctx = runtime.session_context("bench");
    let mut group = c.benchmark_group("cell_set_with_subscribers");

    for subscribers in [0usize, 1, 8] {
        let cell = ReactiveCell::new("count", 0);
        for _ in 0..subscribers {
            cell.on_change(|value| {
                black_box(value);
            });
        }
        group.bench_with_input(BenchmarkId::from_parameter(subscribers), &cell, |b, cell| {
            let mut n = 0i64;
            b.iter(|| {
                n += 1;
                cell.set(&ctx, n);
            })
        });
    }
    group.finish();
}

fn bench_expression_evaluate(c: &mut Criterion) {
    let runtime = Runtime::new(RuntimeConfig::default()).unwrap();
    let ctx = runtime.session_context("bench");
    let done = ReactiveCell::new("done", 3);
    let total = ReactiveCell::new("total", 4);
    let percent = done.mul(100).floor_div(&total);
    let label = percent.add("%").or(Value::from("n/a"));

    c.bench_function("expression_evaluate", |b| b.iter(|| black_box(label.evaluate(&ctx))));
}

criterion_group!(benches, bench_cell_get, bench_cell_set, bench_expression_evaluate);
criterion_main!(benches);
