use chainsql::{MySqlDriver, PostgresDriver, Preprocessor, SqlBuilder, StaticConventions, Value};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::sync::Arc;

/// `n` where conditions, every other one following a relationship chain.
fn build_chained(n: usize) -> SqlBuilder {
    let mut builder = SqlBuilder::new(
        "book",
        Arc::new(MySqlDriver::new()),
        Arc::new(StaticConventions::new()),
    );
    for i in 0..n {
        let condition = if i % 2 == 0 {
            format!("author.col{i}")
        } else {
            format!("col{i}")
        };
        builder
            .add_where(&condition, chainsql::args![i as i64])
            .unwrap();
    }
    builder
}

fn bench_build_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("sql_builder/build_select");

    for n in [1, 5, 10, 50] {
        let builder = build_chained(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &builder, |b, builder| {
            b.iter(|| black_box(builder.build_select_query(None).unwrap()));
        });
    }

    group.finish();
}

fn bench_add_conditions(c: &mut Criterion) {
    let mut group = c.benchmark_group("sql_builder/add_conditions");

    for n in [1, 5, 10, 50] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| black_box(build_chained(n)));
        });
    }

    group.finish();
}

fn bench_preprocess_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("sql_builder/preprocess_list");
    let driver = PostgresDriver::new();

    for n in [5, 20, 100, 500] {
        let values = Value::list(0..n as i64);
        group.bench_with_input(BenchmarkId::from_parameter(n), &values, |b, values| {
            b.iter(|| {
                let query = Preprocessor::new(&driver)
                    .process("SELECT * FROM t WHERE id IN (?)", vec![values.clone()])
                    .unwrap();
                black_box(query.sql);
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_build_select,
    bench_add_conditions,
    bench_preprocess_list
);
criterion_main!(benches);
