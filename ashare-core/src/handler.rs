//! Facade over the data layer: one client, one validated date window.
//!
//! Field names are validated before the first remote call.

use crate::config::{Frequency, HandlerConfig};
use crate::data::benchmark::{normalize_benchmark, BenchmarkSeries};
use crate::data::fetch::{CoalescedFetcher, ConcurrentFetcher, SequentialFetcher};
use crate::data::fields::{DataKind, FieldSet};
use crate::data::pacing::{pause_policy, Pacer, RateLimit};
use crate::data::provider::{DataError, DateRange, FetchProgress, LogProgress, MarketDataClient};
use crate::data::reshape::{pivot, WideTable};
use crate::data::universe::resolve_members;
use std::time::Duration;
use tracing::info;

/// How symbols are turned into remote calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    /// One call per symbol, sleeping `pause` after each.
    Sequential { pause: Duration },
    /// One call for all symbols.
    Coalesced,
    /// One call per symbol over a pool of `threads` workers.
    Concurrent { threads: usize },
}

impl Default for FetchStrategy {
    fn default() -> Self {
        FetchStrategy::Sequential {
            pause: Duration::ZERO,
        }
    }
}

pub struct MarketDataHandler<C: MarketDataClient> {
    client: C,
    range: DateRange,
    frequency: Frequency,
    progress: Box<dyn FetchProgress>,
    rate_limit: Option<RateLimit>,
}

impl<C: MarketDataClient> MarketDataHandler<C> {
    pub fn new(client: C, range: DateRange, frequency: Frequency) -> Self {
        Self {
            client,
            range,
            frequency,
            progress: Box::new(LogProgress),
            rate_limit: None,
        }
    }

    /// Validate the config's window and frequency and wrap `client`.
    pub fn from_config(client: C, config: &HandlerConfig) -> Result<Self, DataError> {
        let mut handler = Self::new(client, config.date_range()?, config.frequency()?);
        handler.rate_limit = config.provider.rate_limit();
        Ok(handler)
    }

    /// Enforce a call quota on per-symbol strategies. It takes the place of
    /// any fixed pause.
    pub fn with_rate_limit(mut self, limit: RateLimit) -> Self {
        self.rate_limit = Some(limit);
        self
    }

    pub fn rate_limit(&self) -> Option<&RateLimit> {
        self.rate_limit.as_ref()
    }

    pub fn with_progress(mut self, progress: impl FetchProgress + 'static) -> Self {
        self.progress = Box::new(progress);
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn range(&self) -> &DateRange {
        &self.range
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    /// Symbols that were members of `index_code` at any point in the window.
    pub fn index_members(&self, index_code: &str) -> Result<Vec<String>, DataError> {
        resolve_members(&self.client, index_code, &self.range)
    }

    /// Net-value series of `index_code`, starting at 1.0.
    pub fn benchmark(&self, index_code: &str) -> Result<BenchmarkSeries, DataError> {
        let raw = self.client.index_daily(index_code, &self.range)?;
        if raw.is_empty() {
            return Err(DataError::NoData(index_code.to_string()));
        }
        let series = normalize_benchmark(&raw)?;
        info!(
            index_code,
            days = series.len(),
            last = series.last_value(),
            "benchmark ready"
        );
        Ok(series)
    }

    /// Wide price table, one call per symbol with `pause` after each call.
    pub fn prices<S: AsRef<str>>(
        &self,
        symbols: &[S],
        fields: &[&str],
        pause: Duration,
    ) -> Result<WideTable, DataError> {
        self.sequential(DataKind::Price, symbols, fields, pause)
    }

    /// Wide price table from one coalesced call; `None` if the provider had
    /// no rows for any symbol.
    pub fn prices_coalesced<S: AsRef<str>>(
        &self,
        symbols: &[S],
        fields: &[&str],
    ) -> Result<Option<WideTable>, DataError> {
        self.coalesced(DataKind::Price, symbols, fields)
    }

    /// Wide factor table, one call per symbol with `pause` after each call.
    pub fn factors<S: AsRef<str>>(
        &self,
        symbols: &[S],
        fields: &[&str],
        pause: Duration,
    ) -> Result<WideTable, DataError> {
        self.sequential(DataKind::Factor, symbols, fields, pause)
    }

    pub fn factors_coalesced<S: AsRef<str>>(
        &self,
        symbols: &[S],
        fields: &[&str],
    ) -> Result<Option<WideTable>, DataError> {
        self.coalesced(DataKind::Factor, symbols, fields)
    }

    /// Fetch with any strategy. Only the coalesced strategy can yield `None`.
    pub fn fetch<S: AsRef<str>>(
        &self,
        kind: DataKind,
        symbols: &[S],
        fields: &[&str],
        strategy: FetchStrategy,
    ) -> Result<Option<WideTable>, DataError> {
        match strategy {
            FetchStrategy::Sequential { pause } => {
                self.sequential(kind, symbols, fields, pause).map(Some)
            }
            FetchStrategy::Coalesced => self.coalesced(kind, symbols, fields),
            FetchStrategy::Concurrent { threads } => {
                let fields = FieldSet::parse(kind, fields.iter().copied())?;
                let mut fetcher = ConcurrentFetcher::new(&self.client, threads)
                    .with_progress(self.progress.as_ref());
                if let Some(limit) = &self.rate_limit {
                    fetcher = fetcher.with_pacer(limit);
                }
                let long = fetcher.fetch(symbols, &fields, &self.range)?;
                pivot(&long, &fields).map(Some)
            }
        }
    }

    fn sequential<S: AsRef<str>>(
        &self,
        kind: DataKind,
        symbols: &[S],
        fields: &[&str],
        pause: Duration,
    ) -> Result<WideTable, DataError> {
        let fields = FieldSet::parse(kind, fields.iter().copied())?;
        let pause = pause_policy(pause);
        let pacer: &dyn Pacer = match &self.rate_limit {
            Some(limit) => limit,
            None => pause.as_ref(),
        };
        let long = SequentialFetcher::new(&self.client)
            .with_pacer(pacer)
            .with_progress(self.progress.as_ref())
            .fetch(symbols, &fields, &self.range)?;
        pivot(&long, &fields)
    }

    fn coalesced<S: AsRef<str>>(
        &self,
        kind: DataKind,
        symbols: &[S],
        fields: &[&str],
    ) -> Result<Option<WideTable>, DataError> {
        let fields = FieldSet::parse(kind, fields.iter().copied())?;
        let long = CoalescedFetcher::new(&self.client)
            .with_progress(self.progress.as_ref())
            .fetch(symbols, &fields, &self.range)?;
        long.map(|long| pivot(&long, &fields)).transpose()
    }
}
