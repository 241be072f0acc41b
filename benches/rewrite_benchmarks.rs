//! Benchmarks for the rewrite pipeline.
//!
//! Benchmarks cover:
//! - Translator registry construction
//! - Rewriting chains that translate completely
//! - Rewriting chains that fall back to in-memory evaluation
//! - End-to-end execution with provider pushdown
//!
//! Run with: `cargo bench`

use std::sync::Arc;

use asyncquery::adapter::{Capabilities, MemoryProvider, QueryAdapter};
use asyncquery::config::AdapterOptions;
use asyncquery::expr::{AsyncQuery, BinaryOp, Expr, Param, ScalarMethod, TypeToken, Value};
use asyncquery::operator::Family;
use asyncquery::sequence::CancellationSignal;
use asyncquery::translate::TranslatorRegistry;
use asyncquery::QueryEngine;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn provider(
    rows: i32,
    options: AdapterOptions,
    capabilities: Capabilities,
) -> Arc<dyn QueryAdapter> {
    Arc::new(
        MemoryProvider::with_capabilities("bench", options, capabilities)
            .with_table(TypeToken::Int32, (1..=rows).map(Value::from).collect())
            .unwrap(),
    )
}

fn greater_than(n: i32) -> Expr {
    let x = Param::new("x", TypeToken::Int32);
    Expr::lambda(
        vec![x.clone()],
        Expr::binary(BinaryOp::GreaterThan, Expr::param(&x), Expr::int32(n)).unwrap(),
    )
}

fn doubled() -> Expr {
    let x = Param::new("x", TypeToken::Int32);
    Expr::lambda(
        vec![x.clone()],
        Expr::binary(BinaryOp::Multiply, Expr::param(&x), Expr::int32(2)).unwrap(),
    )
}

fn text_length() -> Expr {
    let x = Param::new("x", TypeToken::Int32);
    let text = Expr::method(ScalarMethod::ToString, vec![Expr::param(&x)]).unwrap();
    Expr::lambda(vec![x], Expr::method(ScalarMethod::Length, vec![text]).unwrap())
}

/// `where(x > 2)` followed by `depth` alternating selects and skips.
fn chain(adapter: &Arc<dyn QueryAdapter>, depth: usize) -> Expr {
    let mut query = AsyncQuery::from_adapter(adapter.clone(), TypeToken::Int32)
        .where_(greater_than(2))
        .unwrap();
    for i in 0..depth {
        query = if i % 2 == 0 {
            query.select(doubled()).unwrap()
        } else {
            query.skip(1).unwrap()
        };
    }
    query.sum().unwrap()
}

// ---------------------------------------------------------------------------
// Benchmark groups
// ---------------------------------------------------------------------------

fn bench_registry(c: &mut Criterion) {
    c.bench_function("registry_with_defaults", |b| {
        b.iter(|| black_box(TranslatorRegistry::with_defaults()));
    });
}

fn bench_rewrite_translated(c: &mut Criterion) {
    let mut group = c.benchmark_group("rewrite_translated");
    let adapter = provider(5, AdapterOptions::default(), Capabilities::all());
    let engine = QueryEngine::new();

    for depth in [1, 4, 16] {
        let expr = chain(&adapter, depth);
        group.bench_with_input(BenchmarkId::new("chain", depth), &expr, |b, expr| {
            b.iter(|| engine.rewrite(black_box(expr)).unwrap());
        });
    }

    group.finish();
}

fn bench_rewrite_fallback(c: &mut Criterion) {
    let mut group = c.benchmark_group("rewrite_fallback");
    let adapter = provider(
        5,
        AdapterOptions::permissive(),
        Capabilities::all().with_scalar_methods(false),
    );
    let engine = QueryEngine::new();

    let expr = AsyncQuery::from_adapter(adapter, TypeToken::Int32)
        .where_(greater_than(1))
        .unwrap()
        .select(text_length())
        .unwrap()
        .into_expr();
    group.bench_function("select_scalar_method", |b| {
        b.iter(|| engine.rewrite(black_box(&expr)).unwrap());
    });

    group.finish();
}

fn bench_execute(c: &mut Criterion) {
    let mut group = c.benchmark_group("execute");
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let engine = QueryEngine::new();

    for rows in [100, 10_000] {
        let adapter = provider(
            rows,
            AdapterOptions::default(),
            Capabilities::only(&[Family::Where, Family::Sum]),
        );
        let expr = AsyncQuery::from_adapter(adapter, TypeToken::Int32)
            .where_(greater_than(2))
            .unwrap()
            .sum()
            .unwrap();
        group.bench_with_input(BenchmarkId::new("where_sum", rows), &expr, |b, expr| {
            b.iter(|| {
                runtime
                    .block_on(engine.execute(black_box(expr), CancellationSignal::new()))
                    .unwrap()
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_registry,
    bench_rewrite_translated,
    bench_rewrite_fallback,
    bench_execute,
);
criterion_main!(benches);
