//! Property tests for reshaping invariants.
//!
//! Uses proptest to verify:
//! 1. Wide dates are strictly ascending whatever order rows arrive in
//! 2. Columns are exactly (symbols with rows) x (requested fields)
//! 3. Sequential and coalesced fetches pivot to identical tables
//! 4. Benchmark series always start at exactly 1.0

use ashare_core::data::{
    fetch_coalesced, fetch_sequential, normalize_benchmark, pivot, DataKind, DateRange,
    FakeClient, FieldSet, LongTable,
};
use chrono::{Duration as ChronoDuration, NaiveDate};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

const SYMBOLS: [&str; 4] = ["600000.SH", "000001.SZ", "300750.SZ", "601318.SH"];

fn base() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

fn range() -> DateRange {
    DateRange::new(base(), base() + ChronoDuration::days(40)).unwrap()
}

// ── Strategies (proptest) ────────────────────────────────────────────

/// Unique (symbol index, day offset) -> close.
fn arb_market() -> impl Strategy<Value = BTreeMap<(usize, i64), f64>> {
    prop::collection::btree_map((0..SYMBOLS.len(), 0..30i64), 1.0..500.0f64, 0..60)
}

fn arb_fields() -> impl Strategy<Value = Vec<&'static str>> {
    prop::sample::subsequence(vec!["open", "high", "low", "close", "vol", "amount"], 1..=6)
        .prop_shuffle()
}

fn long_from(market: &BTreeMap<(usize, i64), f64>, reverse: bool) -> LongTable {
    let mut rows: Vec<_> = market.iter().collect();
    if reverse {
        rows.reverse();
    }
    let mut table = LongTable::with_columns(["open", "high", "low", "close", "vol", "amount"]);
    for (&(sym, day), &close) in rows {
        let values = vec![
            Some(close - 0.5),
            Some(close + 1.0),
            Some(close - 1.0),
            Some(close),
            Some(1000.0 + close),
            Some(100.0 * close),
        ];
        table
            .push(base() + ChronoDuration::days(day), SYMBOLS[sym], values)
            .unwrap();
    }
    table
}

fn fake_from(market: &BTreeMap<(usize, i64), f64>) -> FakeClient {
    let mut fake = FakeClient::new();
    for (&(sym, day), &close) in market {
        fake.add_daily(SYMBOLS[sym], base() + ChronoDuration::days(day), close);
    }
    fake
}

// ── 1. Date ordering ─────────────────────────────────────────────────

proptest! {
    #[test]
    fn dates_strictly_ascending(market in arb_market(), reverse in any::<bool>()) {
        let fields = FieldSet::parse(DataKind::Price, ["close"]).unwrap();
        let wide = pivot(&long_from(&market, reverse), &fields).unwrap();

        prop_assert!(wide.dates().windows(2).all(|w| w[0] < w[1]));
        let expected: BTreeSet<i64> = market.keys().map(|&(_, day)| day).collect();
        prop_assert_eq!(wide.height(), expected.len());
    }
}

// ── 2. Exact column set ──────────────────────────────────────────────

proptest! {
    #[test]
    fn columns_are_symbols_times_fields(market in arb_market(), names in arb_fields()) {
        let fields = FieldSet::parse(DataKind::Price, names.iter().copied()).unwrap();
        let long = long_from(&market, false);
        let wide = pivot(&long, &fields).unwrap();

        let mut expected = Vec::new();
        for symbol in long.symbols() {
            for field in fields.canonical_names() {
                expected.push((symbol.to_string(), field.to_string()));
            }
        }
        let actual: Vec<(String, String)> = wide
            .columns()
            .iter()
            .map(|k| (k.symbol.clone(), k.field.clone()))
            .collect();
        prop_assert_eq!(actual, expected);

        let present = market.len() * fields.len();
        prop_assert_eq!(wide.height() * wide.width() - wide.missing_count(), present);
    }
}

// ── 3. Strategy equivalence ──────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn sequential_equals_coalesced(
        market in arb_market(),
        names in arb_fields(),
        order in Just(SYMBOLS.to_vec()).prop_shuffle(),
    ) {
        let fields = FieldSet::parse(DataKind::Price, names.iter().copied()).unwrap();
        let fake = fake_from(&market);

        let sequential = fetch_sequential(&fake, &order, &fields, &range(), Duration::ZERO).unwrap();
        let coalesced = fetch_coalesced(&fake, &order, &fields, &range()).unwrap();

        match coalesced {
            None => prop_assert!(sequential.is_empty()),
            Some(coalesced) => {
                let a = pivot(&sequential, &fields).unwrap();
                let b = pivot(&coalesced, &fields).unwrap();
                prop_assert_eq!(a.fingerprint(), b.fingerprint());
                prop_assert_eq!(a, b);
            }
        }
    }
}

// ── 4. Benchmark anchoring ───────────────────────────────────────────

proptest! {
    #[test]
    fn benchmark_starts_at_one(
        changes in prop::collection::vec(-10.0..10.0f64, 1..60),
    ) {
        let mut raw = LongTable::with_columns(["close", "pct_chg"]);
        for (i, pct) in changes.iter().enumerate().rev() {
            raw.push(base() + ChronoDuration::days(i as i64), "000300.SH", vec![Some(3500.0), Some(*pct)])
                .unwrap();
        }
        let series = normalize_benchmark(&raw).unwrap();

        prop_assert_eq!(series.net_values[0], 1.0);
        prop_assert_eq!(series.len(), changes.len());
        prop_assert!(series.net_values.iter().all(|v| *v > 0.0));
        prop_assert!(series.dates.windows(2).all(|w| w[0] < w[1]));
    }
}
