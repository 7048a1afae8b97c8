//! Criterion benchmarks for the reshaping hot path.
//!
//! Benchmarks:
//! 1. Long-to-wide pivot over growing symbol counts
//! 2. Wide table to Polars DataFrame conversion
//! 3. Content fingerprint

use ashare_core::data::{pivot, DataKind, FieldSet, LongTable};
use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

// ── Helpers ──────────────────────────────────────────────────────────

/// `symbols` x `days` rows in provider order (newest first, interleaved),
/// with every seventh row of each symbol missing.
fn make_long(symbols: usize, days: usize) -> LongTable {
    let base = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap();
    let mut table = LongTable::with_columns(["open", "high", "low", "close", "vol"]);
    for day in (0..days).rev() {
        for s in 0..symbols {
            if (day + s) % 7 == 0 {
                continue;
            }
            let close = 10.0 + s as f64 + (day as f64 * 0.1).sin();
            table
                .push(
                    base + chrono::Duration::days(day as i64),
                    format!("{:06}.SZ", s),
                    vec![
                        Some(close - 0.2),
                        Some(close + 0.5),
                        Some(close - 0.5),
                        Some(close),
                        Some(1_000_000.0 + day as f64),
                    ],
                )
                .unwrap();
        }
    }
    table
}

fn fields() -> FieldSet {
    FieldSet::parse(DataKind::Price, ["open", "close", "vol"]).unwrap()
}

// ── 1. Pivot ─────────────────────────────────────────────────────────

fn bench_pivot(c: &mut Criterion) {
    let mut group = c.benchmark_group("pivot");
    let fields = fields();
    for symbols in [10, 50, 300] {
        let long = make_long(symbols, 250);
        group.bench_with_input(BenchmarkId::from_parameter(symbols), &long, |b, long| {
            b.iter(|| pivot(black_box(long), &fields).unwrap())
        });
    }
    group.finish();
}

// ── 2. DataFrame conversion ──────────────────────────────────────────

fn bench_to_dataframe(c: &mut Criterion) {
    let wide = pivot(&make_long(50, 250), &fields()).unwrap();
    c.bench_function("to_dataframe_50x250", |b| {
        b.iter(|| black_box(&wide).to_dataframe().unwrap())
    });
}

// ── 3. Fingerprint ───────────────────────────────────────────────────

fn bench_fingerprint(c: &mut Criterion) {
    let wide = pivot(&make_long(50, 250), &fields()).unwrap();
    c.bench_function("fingerprint_50x250", |b| {
        b.iter(|| black_box(&wide).fingerprint())
    });
}

criterion_group!(benches, bench_pivot, bench_to_dataframe, bench_fingerprint);
criterion_main!(benches);
