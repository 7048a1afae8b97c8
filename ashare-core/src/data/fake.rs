//! In-memory market-data client for tests and offline dry runs.
//!
//! Rows are registered per code and endpoint. Coalesced requests return the
//! rows of every listed code interleaved by date, newest first, the way the
//! real provider orders them, so consumers can't rely on arrival order.

use super::provider::{DataError, DateRange, IndexWeight, LongTable, MarketDataClient};
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Value columns served by the `daily` endpoint.
pub const DAILY_COLUMNS: &[&str] = &[
    "open",
    "high",
    "low",
    "close",
    "pre_close",
    "change",
    "pct_chg",
    "vol",
    "amount",
];

/// Value columns served by the `daily_basic` endpoint.
pub const DAILY_BASIC_COLUMNS: &[&str] = &[
    "close",
    "turnover_rate",
    "turnover_rate_f",
    "volume_ratio",
    "pe",
    "pe_ttm",
    "pb",
    "ps",
    "ps_ttm",
    "dv_ratio",
    "dv_ttm",
    "total_share",
    "float_share",
    "free_share",
    "total_mv",
    "circ_mv",
];

/// Value columns served by the `index_daily` endpoint.
pub const INDEX_DAILY_COLUMNS: &[&str] = &[
    "close",
    "open",
    "high",
    "low",
    "pre_close",
    "change",
    "pct_chg",
    "vol",
    "amount",
];

type Rows = Vec<(NaiveDate, Vec<Option<f64>>)>;

/// Scriptable fake provider. Every call is recorded as `endpoint:codes`.
#[derive(Debug, Default)]
pub struct FakeClient {
    daily: HashMap<String, Rows>,
    daily_basic: HashMap<String, Rows>,
    index_daily: HashMap<String, Rows>,
    index_weight: Vec<IndexWeight>,
    failing: HashSet<String>,
    omitted: HashSet<String>,
    omitted_for: HashMap<String, HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

fn row(columns: &[&str], values: &[(&str, f64)]) -> Vec<Option<f64>> {
    columns
        .iter()
        .map(|c| values.iter().find(|(k, _)| k == c).map(|&(_, v)| v))
        .collect()
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a `daily` row with arbitrary columns (others are null).
    pub fn add_daily_row(&mut self, code: &str, date: NaiveDate, values: &[(&str, f64)]) {
        self.daily
            .entry(code.to_string())
            .or_default()
            .push((date, row(DAILY_COLUMNS, values)));
    }

    /// Register a plausible `daily` bar around `close`.
    pub fn add_daily(&mut self, code: &str, date: NaiveDate, close: f64) {
        self.add_daily_row(
            code,
            date,
            &[
                ("open", close - 0.5),
                ("high", close + 1.0),
                ("low", close - 1.0),
                ("close", close),
                ("vol", 1000.0 + close),
                ("amount", 100.0 * close),
            ],
        );
    }

    pub fn add_daily_basic(&mut self, code: &str, date: NaiveDate, values: &[(&str, f64)]) {
        self.daily_basic
            .entry(code.to_string())
            .or_default()
            .push((date, row(DAILY_BASIC_COLUMNS, values)));
    }

    pub fn add_index_daily(&mut self, index_code: &str, date: NaiveDate, close: f64, pct_chg: f64) {
        self.index_daily
            .entry(index_code.to_string())
            .or_default()
            .push((
                date,
                row(INDEX_DAILY_COLUMNS, &[("close", close), ("pct_chg", pct_chg)]),
            ));
    }

    pub fn add_index_weight(&mut self, index_code: &str, con_code: &str, date: NaiveDate, weight: f64) {
        self.index_weight.push(IndexWeight {
            index_code: index_code.to_string(),
            con_code: con_code.to_string(),
            trade_date: date,
            weight: Some(weight),
        });
    }

    /// Any request naming `code` fails with a network error.
    pub fn fail_for(&mut self, code: &str) {
        self.failing.insert(code.to_string());
    }

    /// Drop `column` from every response, as if the provider stopped serving it.
    pub fn omit_column(&mut self, column: &str) {
        self.omitted.insert(column.to_string());
    }

    /// Drop `column` from any response that includes `code`.
    pub fn omit_column_for(&mut self, code: &str, column: &str) {
        self.omitted_for
            .entry(code.to_string())
            .or_default()
            .insert(column.to_string());
    }

    fn is_omitted(&self, column: &str, codes: &[&str]) -> bool {
        self.omitted.contains(column)
            || codes
                .iter()
                .any(|c| self.omitted_for.get(*c).is_some_and(|cols| cols.contains(column)))
    }

    /// Calls made so far, oldest first.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, call: String) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
    }

    fn check_failures(&self, codes: &[&str]) -> Result<(), DataError> {
        match codes.iter().find(|c| self.failing.contains(**c)) {
            Some(code) => Err(DataError::NetworkUnreachable(format!(
                "simulated failure for {code}"
            ))),
            None => Ok(()),
        }
    }

    /// Build a response for `codes` from `store`, keeping only `wanted` columns.
    fn respond(
        &self,
        store: &HashMap<String, Rows>,
        all_columns: &[&str],
        wanted: &[&str],
        codes: &[&str],
        range: &DateRange,
    ) -> Result<LongTable, DataError> {
        let picked: Vec<usize> = wanted
            .iter()
            .filter(|w| !self.is_omitted(w, codes))
            .filter_map(|w| all_columns.iter().position(|c| c == w))
            .collect();

        let mut rows: Vec<(NaiveDate, &str, Vec<Option<f64>>)> = Vec::new();
        for code in codes {
            for (date, values) in store.get(*code).into_iter().flatten() {
                if range.contains(*date) {
                    rows.push((*date, *code, picked.iter().map(|&i| values[i]).collect()));
                }
            }
        }
        // Provider order: newest first.
        rows.sort_by(|a, b| b.0.cmp(&a.0));

        let mut table = LongTable::new(picked.iter().map(|&i| all_columns[i].to_string()).collect());
        for (date, code, values) in rows {
            table.push(date, code, values)?;
        }
        Ok(table)
    }
}

fn split_codes(codes: &str) -> Vec<&str> {
    codes
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect()
}

impl MarketDataClient for FakeClient {
    fn name(&self) -> &str {
        "fake"
    }

    fn daily(&self, codes: &str, range: &DateRange) -> Result<LongTable, DataError> {
        self.record(format!("daily:{codes}"));
        let codes = split_codes(codes);
        self.check_failures(&codes)?;
        self.respond(&self.daily, DAILY_COLUMNS, DAILY_COLUMNS, &codes, range)
    }

    fn daily_basic(
        &self,
        codes: &str,
        range: &DateRange,
        fields: &[&str],
    ) -> Result<LongTable, DataError> {
        self.record(format!("daily_basic:{codes}[{}]", fields.join(",")));
        let codes = split_codes(codes);
        self.check_failures(&codes)?;
        self.respond(&self.daily_basic, DAILY_BASIC_COLUMNS, fields, &codes, range)
    }

    fn index_daily(&self, index_code: &str, range: &DateRange) -> Result<LongTable, DataError> {
        self.record(format!("index_daily:{index_code}"));
        self.check_failures(&[index_code])?;
        self.respond(
            &self.index_daily,
            INDEX_DAILY_COLUMNS,
            INDEX_DAILY_COLUMNS,
            &[index_code],
            range,
        )
    }

    fn index_weight(
        &self,
        index_code: &str,
        range: &DateRange,
    ) -> Result<Vec<IndexWeight>, DataError> {
        self.record(format!("index_weight:{index_code}"));
        self.check_failures(&[index_code])?;
        let mut weights: Vec<IndexWeight> = self
            .index_weight
            .iter()
            .filter(|w| w.index_code == index_code && range.contains(w.trade_date))
            .cloned()
            .collect();
        weights.sort_by(|a, b| b.trade_date.cmp(&a.trade_date));
        Ok(weights)
    }
}
