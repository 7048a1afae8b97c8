//! Benchmark net value from an index's daily percent changes.

use super::provider::{DataError, LongTable};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Column of the `index_daily` response holding the period return in percent.
pub const PCT_CHG_COLUMN: &str = "pct_chg";

/// Cumulative net value of an index, anchored at exactly 1.0 on the first date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkSeries {
    pub index_code: String,
    pub dates: Vec<NaiveDate>,
    pub net_values: Vec<f64>,
}

impl BenchmarkSeries {
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Net value on the last date.
    pub fn last_value(&self) -> Option<f64> {
        self.net_values.last().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, f64)> + '_ {
        self.dates.iter().copied().zip(self.net_values.iter().copied())
    }
}

/// Turn one index's daily rows into a net-value series.
///
/// Rows are sorted by date first. The first value is 1.0 whatever the first
/// row's `pct_chg` says; each later value is the previous one times
/// `1 + pct_chg / 100`.
pub fn normalize_benchmark(raw: &LongTable) -> Result<BenchmarkSeries, DataError> {
    let pct_col = raw
        .column_index(PCT_CHG_COLUMN)
        .ok_or_else(|| DataError::MissingField {
            field: PCT_CHG_COLUMN.to_string(),
        })?;

    let codes = raw.symbols();
    let index_code = match codes.as_slice() {
        [] => return Err(DataError::NoData("benchmark index".into())),
        [code] => code.to_string(),
        many => return Err(DataError::MixedSeries(many.iter().map(|s| s.to_string()).collect())),
    };

    let mut rows: Vec<(NaiveDate, Option<f64>)> = raw
        .records()
        .iter()
        .map(|r| (r.trade_date, r.values[pct_col]))
        .collect();
    rows.sort_by_key(|(date, _)| *date);

    let mut seen = HashSet::with_capacity(rows.len());
    let mut dates = Vec::with_capacity(rows.len());
    let mut net_values = Vec::with_capacity(rows.len());

    for (date, pct_chg) in rows {
        if !seen.insert(date) {
            return Err(DataError::DuplicateRow {
                symbol: index_code,
                date,
            });
        }
        let value = match (net_values.last(), pct_chg) {
            (None, _) => 1.0,
            (Some(prev), Some(pct)) => prev * (1.0 + pct / 100.0),
            (Some(_), None) => {
                return Err(DataError::MissingValue {
                    column: PCT_CHG_COLUMN.to_string(),
                    symbol: index_code,
                    date,
                })
            }
        };
        dates.push(date);
        net_values.push(value);
    }

    Ok(BenchmarkSeries {
        index_code,
        dates,
        net_values,
    })
}
