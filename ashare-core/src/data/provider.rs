//! Remote client trait, long-format tables and structured error types.
//!
//! The `MarketDataClient` trait abstracts over the market-data provider so the
//! fetch/reshape pipeline can run against the real HTTP client or an in-memory
//! fake. Everything the provider hands back is normalised into a `LongTable`
//! (one row per symbol and trading date) before it reaches the reshaper.

use super::fields::DataKind;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{info, warn};

/// Date format used on the wire (`20240102`).
pub const WIRE_DATE_FORMAT: &str = "%Y%m%d";

/// Broad category of a [`DataError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Rejected before any remote call was made.
    Configuration,
    /// The remote call itself failed.
    RemoteFetch,
    /// The provider answered, but the answer breaks a table invariant.
    DataQuality,
    /// Writing a result to disk failed.
    Export,
}

/// Structured error type for the whole data layer.
///
/// Displayable in CLI contexts; use [`DataError::kind`] to branch on the
/// category rather than matching individual variants.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("unknown {kind} field '{field}'")]
    UnknownField { field: String, kind: DataKind },

    #[error("field '{0}' requested more than once")]
    DuplicateField(String),

    #[error("no fields requested")]
    EmptyFieldSet,

    #[error("no symbols requested")]
    EmptySymbolList,

    #[error("invalid date '{0}' (expected YYYYMMDD)")]
    InvalidDate(String),

    #[error("invalid date range: start {start} is after end {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    #[error("unsupported frequency '{0}' (only daily 'D' is supported)")]
    UnsupportedFrequency(String),

    #[error("no provider token configured (pass --token, set `token` in the config, or export TUSHARE_TOKEN)")]
    MissingToken,

    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("rate limited by provider: {0}")]
    RateLimited(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("provider error {code}: {message}")]
    Provider { code: i64, message: String },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("hard stop: provider circuit breaker is open")]
    CircuitBreakerTripped,

    #[error("duplicate row for symbol '{symbol}' on {date}")]
    DuplicateRow { symbol: String, date: NaiveDate },

    #[error("requested field '{field}' is absent from the response")]
    MissingField { field: String },

    #[error("missing value in column '{column}' for '{symbol}' on {date}")]
    MissingValue {
        column: String,
        symbol: String,
        date: NaiveDate,
    },

    #[error("expected a single series, got {0:?}")]
    MixedSeries(Vec<String>),

    #[error("no data returned for {0}")]
    NoData(String),

    #[error("export failed: {0}")]
    Export(String),

    #[error("data error: {0}")]
    Other(String),
}

impl DataError {
    /// Category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DataError::UnknownField { .. }
            | DataError::DuplicateField(_)
            | DataError::EmptyFieldSet
            | DataError::EmptySymbolList
            | DataError::InvalidDate(_)
            | DataError::InvalidDateRange { .. }
            | DataError::UnsupportedFrequency(_)
            | DataError::MissingToken => ErrorKind::Configuration,

            DataError::NetworkUnreachable(_)
            | DataError::Timeout(_)
            | DataError::RateLimited(_)
            | DataError::AuthenticationRequired(_)
            | DataError::Provider { .. }
            | DataError::ResponseFormatChanged(_)
            | DataError::CircuitBreakerTripped
            | DataError::Other(_) => ErrorKind::RemoteFetch,

            DataError::DuplicateRow { .. }
            | DataError::MissingField { .. }
            | DataError::MissingValue { .. }
            | DataError::MixedSeries(_)
            | DataError::NoData(_) => ErrorKind::DataQuality,

            DataError::Export(_) => ErrorKind::Export,
        }
    }

    /// Whether a retry of the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DataError::NetworkUnreachable(_) | DataError::Timeout(_) | DataError::RateLimited(_)
        )
    }
}

/// Parse a `YYYYMMDD` wire date.
pub fn parse_wire_date(raw: &str) -> Result<NaiveDate, DataError> {
    NaiveDate::parse_from_str(raw.trim(), WIRE_DATE_FORMAT)
        .map_err(|_| DataError::InvalidDate(raw.to_string()))
}

/// Inclusive calendar date range. Invariant: `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, DataError> {
        if start > end {
            return Err(DataError::InvalidDateRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Build a range from two `YYYYMMDD` strings.
    pub fn parse(start: &str, end: &str) -> Result<Self, DataError> {
        Self::new(parse_wire_date(start)?, parse_wire_date(end)?)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn start_wire(&self) -> String {
        self.start.format(WIRE_DATE_FORMAT).to_string()
    }

    pub fn end_wire(&self) -> String {
        self.end.format(WIRE_DATE_FORMAT).to_string()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// One long-format row: a symbol's observation on one trading date.
///
/// `values` is positionally aligned with the owning table's `columns`.
#[derive(Debug, Clone, PartialEq)]
pub struct LongRecord {
    pub trade_date: NaiveDate,
    pub symbol: String,
    pub values: Vec<Option<f64>>,
}

/// Long-format table: one row per (symbol, trade date), one column per field.
///
/// The identifying columns (`ts_code`, `trade_date`) are held structurally on
/// each record; `columns` names only the value columns, using the provider's
/// raw field names.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LongTable {
    columns: Vec<String>,
    records: Vec<LongRecord>,
}

impl LongTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            records: Vec::new(),
        }
    }

    /// Empty table with the given value columns.
    pub fn with_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(columns.into_iter().map(Into::into).collect())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn records(&self) -> &[LongRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Append a row. `values` must line up with `columns`.
    pub fn push(
        &mut self,
        trade_date: NaiveDate,
        symbol: impl Into<String>,
        values: Vec<Option<f64>>,
    ) -> Result<(), DataError> {
        if values.len() != self.columns.len() {
            return Err(DataError::ResponseFormatChanged(format!(
                "row has {} values but table has {} columns",
                values.len(),
                self.columns.len()
            )));
        }
        self.records.push(LongRecord {
            trade_date,
            symbol: symbol.into(),
            values,
        });
        Ok(())
    }

    /// Value of `column` in `record`, `None` if the column is absent or null.
    pub fn value(&self, record: &LongRecord, column: &str) -> Option<f64> {
        self.column_index(column)
            .and_then(|i| record.values.get(i).copied().flatten())
    }

    /// Distinct symbols in first-seen order.
    pub fn symbols(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.records
            .iter()
            .filter(|r| seen.insert(r.symbol.as_str()))
            .map(|r| r.symbol.as_str())
            .collect()
    }

    /// Stable-sort rows so symbols appear in `order`; unlisted symbols go last.
    ///
    /// Rows of one symbol keep their relative order.
    pub fn order_symbols<S: AsRef<str>>(&mut self, order: &[S]) {
        let rank: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(i, s)| (s.as_ref(), i))
            .collect();
        self.records
            .sort_by_key(|r| rank.get(r.symbol.as_str()).copied().unwrap_or(usize::MAX));
    }

    /// Concatenate tables row-wise.
    ///
    /// The result's columns are the union of the inputs' columns in
    /// first-seen order; cells for columns a table did not carry are null.
    pub fn concat<I>(tables: I) -> LongTable
    where
        I: IntoIterator<Item = LongTable>,
    {
        let tables: Vec<LongTable> = tables.into_iter().collect();

        let mut columns: Vec<String> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for table in &tables {
            for col in &table.columns {
                if !positions.contains_key(col) {
                    positions.insert(col.clone(), columns.len());
                    columns.push(col.clone());
                }
            }
        }

        let total = tables.iter().map(|t| t.records.len()).sum();
        let mut records = Vec::with_capacity(total);
        for table in tables {
            let mapping: Vec<usize> = table.columns.iter().map(|c| positions[c]).collect();
            for record in table.records {
                let mut values = vec![None; columns.len()];
                for (src, value) in record.values.into_iter().enumerate() {
                    values[mapping[src]] = value;
                }
                records.push(LongRecord {
                    trade_date: record.trade_date,
                    symbol: record.symbol,
                    values,
                });
            }
        }

        LongTable { columns, records }
    }
}

/// One index membership record (`index_weight` endpoint).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexWeight {
    pub index_code: String,
    pub con_code: String,
    pub trade_date: NaiveDate,
    pub weight: Option<f64>,
}

/// Remote market-data provider.
///
/// `codes` may be a single symbol or several joined by `,`; the provider
/// decides how many it accepts in one request. Implementations hold their
/// own credentials; callers pass the client by reference to every fetch.
pub trait MarketDataClient: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Daily OHLCV bars.
    fn daily(&self, codes: &str, range: &DateRange) -> Result<LongTable, DataError>;

    /// Daily valuation/size indicators, restricted to `fields`.
    fn daily_basic(
        &self,
        codes: &str,
        range: &DateRange,
        fields: &[&str],
    ) -> Result<LongTable, DataError>;

    /// Daily bars of an index, including `pct_chg`.
    fn index_daily(&self, index_code: &str, range: &DateRange) -> Result<LongTable, DataError>;

    /// Constituent weights of an index over the range.
    fn index_weight(
        &self,
        index_code: &str,
        range: &DateRange,
    ) -> Result<Vec<IndexWeight>, DataError>;
}

/// Progress callback for multi-symbol fetches.
///
/// Purely observational: nothing a progress sink does can change what a
/// fetch returns.
pub trait FetchProgress: Send + Sync {
    /// Called once before the first remote call.
    fn on_start(&self, what: &str, total: usize);

    /// Called after each symbol (or coalesced chunk) completes.
    fn on_symbol(&self, symbol: &str, index: usize, total: usize, rows: usize);

    /// Called when a coalesced request came back empty.
    fn on_empty(&self, requested: usize);

    /// Called once after the last remote call.
    fn on_finish(&self, rows: usize);
}

/// Progress reporter that emits `tracing` events.
pub struct LogProgress;

impl FetchProgress for LogProgress {
    fn on_start(&self, what: &str, total: usize) {
        info!(total, "fetching {what}...");
    }

    fn on_symbol(&self, symbol: &str, index: usize, total: usize, rows: usize) {
        info!(rows, "[{}/{}] {symbol}", index + 1, total);
    }

    fn on_empty(&self, requested: usize) {
        warn!(
            requested,
            "provider returned no data, check the symbols and date range"
        );
    }

    fn on_finish(&self, rows: usize) {
        info!(rows, "fetch complete");
    }
}

/// Progress reporter that discards everything.
pub struct SilentProgress;

impl FetchProgress for SilentProgress {
    fn on_start(&self, _what: &str, _total: usize) {}
    fn on_symbol(&self, _symbol: &str, _index: usize, _total: usize, _rows: usize) {}
    fn on_empty(&self, _requested: usize) {}
    fn on_finish(&self, _rows: usize) {}
}
