//! Long-to-wide reshaping.
//!
//! Turns a `(trade_date, symbol)`-keyed long table into one row per trading
//! date and one column per `(symbol, canonical field)` pair. Missing rows
//! become `None` cells; nothing is forward-filled or zeroed.

use super::fields::FieldSet;
use super::provider::{DataError, LongTable, WIRE_DATE_FORMAT};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Two-level column key of a wide table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnKey {
    pub symbol: String,
    pub field: String,
}

impl ColumnKey {
    pub fn new(symbol: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            field: field.into(),
        }
    }

    /// Single-level name used where only flat column names exist
    /// (DataFrames, Parquet).
    pub fn flat_name(&self) -> String {
        format!("{}|{}", self.symbol, self.field)
    }
}

impl fmt::Display for ColumnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.symbol, self.field)
    }
}

/// Date-indexed table with `(symbol, field)` columns.
///
/// Invariants:
/// - `dates` is strictly ascending
/// - column order is symbol first-seen order × caller field order
/// - every column has exactly `dates.len()` cells
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WideTable {
    dates: Vec<NaiveDate>,
    columns: Vec<ColumnKey>,
    cells: Vec<Vec<Option<f64>>>,
}

impl WideTable {
    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn columns(&self) -> &[ColumnKey] {
        &self.columns
    }

    /// Number of rows (trading dates).
    pub fn height(&self) -> usize {
        self.dates.len()
    }

    /// Number of `(symbol, field)` columns.
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Symbols that own columns, in column order.
    pub fn symbols(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for key in &self.columns {
            if out.last() != Some(&key.symbol.as_str()) {
                out.push(&key.symbol);
            }
        }
        out
    }

    fn column_position(&self, symbol: &str, field: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|k| k.symbol == symbol && k.field == field)
    }

    /// Cells of one column, aligned with `dates()`.
    pub fn column(&self, symbol: &str, field: &str) -> Option<&[Option<f64>]> {
        self.column_position(symbol, field)
            .map(|i| self.cells[i].as_slice())
    }

    /// One cell. `None` if the column or date is unknown or the value is missing.
    pub fn get(&self, date: NaiveDate, symbol: &str, field: &str) -> Option<f64> {
        let row = self.dates.binary_search(&date).ok()?;
        self.column(symbol, field)?.get(row).copied().flatten()
    }

    pub fn iter_columns(&self) -> impl Iterator<Item = (&ColumnKey, &[Option<f64>])> {
        self.columns
            .iter()
            .zip(self.cells.iter().map(Vec::as_slice))
    }

    /// Total number of missing cells.
    pub fn missing_count(&self) -> usize {
        self.cells
            .iter()
            .map(|c| c.iter().filter(|v| v.is_none()).count())
            .sum()
    }

    /// BLAKE3 digest over dates, column keys and cell values.
    ///
    /// Two tables have the same fingerprint iff they have the same shape,
    /// ordering and values.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for date in &self.dates {
            hasher.update(date.format(WIRE_DATE_FORMAT).to_string().as_bytes());
        }
        for (key, cells) in self.iter_columns() {
            hasher.update(key.symbol.as_bytes());
            hasher.update(&[0x1f]);
            hasher.update(key.field.as_bytes());
            hasher.update(&[0x1e]);
            for cell in cells {
                match cell {
                    Some(v) => {
                        hasher.update(&[1]);
                        hasher.update(&v.to_le_bytes());
                    }
                    None => {
                        hasher.update(&[0]);
                    }
                }
            }
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Convert to a Polars DataFrame: a `trade_date` Date column followed by
    /// one nullable f64 column per key, named `"{symbol}|{field}"`.
    pub fn to_dataframe(&self) -> Result<DataFrame, DataError> {
        let epoch = NaiveDate::default();
        let days: Vec<i32> = self
            .dates
            .iter()
            .map(|d| (*d - epoch).num_days() as i32)
            .collect();

        let mut columns = Vec::with_capacity(self.width() + 1);
        columns.push(
            Column::new("trade_date".into(), days)
                .cast(&DataType::Date)
                .map_err(|e| DataError::Export(format!("date cast: {e}")))?,
        );
        for (key, cells) in self.iter_columns() {
            columns.push(Column::new(key.flat_name().as_str().into(), cells.to_vec()));
        }

        DataFrame::new(columns).map_err(|e| DataError::Export(format!("dataframe creation: {e}")))
    }
}

/// Pivot a long table into a wide table for the requested fields.
///
/// Only symbols with at least one row get columns. Fails with
/// `MissingField` if a requested field is not a column of `long`, and with
/// `DuplicateRow` if a symbol has two rows for the same date.
pub fn pivot(long: &LongTable, fields: &FieldSet) -> Result<WideTable, DataError> {
    let field_columns: Vec<(usize, &'static str)> = fields
        .fields()
        .iter()
        .map(|f| {
            long.column_index(f.raw())
                .map(|i| (i, f.canonical()))
                .ok_or_else(|| DataError::MissingField {
                    field: f.raw().to_string(),
                })
        })
        .collect::<Result<_, _>>()?;

    // symbol -> (date -> record index), symbols in first-seen order
    let mut symbols: Vec<&str> = Vec::new();
    let mut by_symbol: HashMap<&str, HashMap<NaiveDate, usize>> = HashMap::new();
    let mut all_dates = BTreeSet::new();

    for (idx, record) in long.records().iter().enumerate() {
        let rows = by_symbol.entry(record.symbol.as_str()).or_insert_with(|| {
            symbols.push(record.symbol.as_str());
            HashMap::new()
        });
        if rows.insert(record.trade_date, idx).is_some() {
            return Err(DataError::DuplicateRow {
                symbol: record.symbol.clone(),
                date: record.trade_date,
            });
        }
        all_dates.insert(record.trade_date);
    }

    let dates: Vec<NaiveDate> = all_dates.into_iter().collect();
    let row_of: HashMap<NaiveDate, usize> =
        dates.iter().enumerate().map(|(i, d)| (*d, i)).collect();

    let mut columns = Vec::with_capacity(symbols.len() * field_columns.len());
    let mut cells = Vec::with_capacity(symbols.len() * field_columns.len());

    for symbol in &symbols {
        let rows = &by_symbol[symbol];
        for &(col, canonical) in &field_columns {
            let mut series = vec![None; dates.len()];
            for (date, &idx) in rows {
                series[row_of[date]] = long.records()[idx].values[col];
            }
            columns.push(ColumnKey::new(*symbol, canonical));
            cells.push(series);
        }
    }

    Ok(WideTable {
        dates,
        columns,
        cells,
    })
}
