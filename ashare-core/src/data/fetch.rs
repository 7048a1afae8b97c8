//! Fetch strategies: one call per symbol, or coalesced multi-symbol calls.
//!
//! Every strategy returns a `LongTable` that the reshaper pivots the same
//! way, so callers can pick a strategy for throughput (coalesced) or for
//! providers and plans that reject large combined requests (sequential)
//! without downstream code noticing the difference.

use super::fields::{DataKind, FieldSet};
use super::pacing::{pause_policy, NoPacing, Pacer};
use super::provider::{
    DataError, DateRange, FetchProgress, LogProgress, LongTable, MarketDataClient,
};
use rayon::prelude::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::warn;

/// Separator the provider expects between codes in a coalesced request.
pub const CODE_SEPARATOR: &str = ",";

/// Drop repeated and empty symbols, keeping first-seen order.
pub fn dedup_symbols<S: AsRef<str>>(symbols: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    symbols
        .iter()
        .map(AsRef::as_ref)
        .filter(|s| !s.is_empty() && seen.insert(*s))
        .map(str::to_string)
        .collect()
}

fn checked_symbols<S: AsRef<str>>(symbols: &[S]) -> Result<Vec<String>, DataError> {
    let symbols = dedup_symbols(symbols);
    if symbols.is_empty() {
        return Err(DataError::EmptySymbolList);
    }
    Ok(symbols)
}

fn describe(kind: DataKind) -> &'static str {
    match kind {
        DataKind::Price => "price data",
        DataKind::Factor => "factor data",
    }
}

/// Issue one remote call for `codes` against the endpoint serving `fields`.
fn request(
    client: &dyn MarketDataClient,
    codes: &str,
    fields: &FieldSet,
    range: &DateRange,
) -> Result<LongTable, DataError> {
    match fields.kind() {
        DataKind::Price => client.daily(codes, range),
        DataKind::Factor => {
            let mut wanted = fields.raw_names();
            wanted.extend(["ts_code", "trade_date"]);
            client.daily_basic(codes, range, &wanted)
        }
    }
}

/// Reject a response that has rows but lacks a requested column.
///
/// Checked per response, before concatenation fills the gap with nulls.
fn require_fields(table: &LongTable, fields: &FieldSet) -> Result<(), DataError> {
    if table.is_empty() {
        return Ok(());
    }
    match fields
        .raw_names()
        .into_iter()
        .find(|name| table.column_index(name).is_none())
    {
        Some(name) => Err(DataError::MissingField {
            field: name.to_string(),
        }),
        None => Ok(()),
    }
}

/// What to do when the remote call for one symbol fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Abort the whole fetch with the first error.
    #[default]
    FailFast,
    /// Log the failure, drop the symbol, keep going.
    SkipFailed,
}

/// Result of a sequential fetch, including symbols dropped under
/// [`FailurePolicy::SkipFailed`].
#[derive(Debug)]
pub struct FetchReport {
    pub table: LongTable,
    pub skipped: Vec<(String, DataError)>,
}

/// One remote call per symbol, in input order, with pacing between calls.
pub struct SequentialFetcher<'a> {
    client: &'a dyn MarketDataClient,
    pacer: &'a dyn Pacer,
    progress: &'a dyn FetchProgress,
    on_error: FailurePolicy,
}

impl<'a> SequentialFetcher<'a> {
    pub fn new(client: &'a dyn MarketDataClient) -> Self {
        Self {
            client,
            pacer: &NoPacing,
            progress: &LogProgress,
            on_error: FailurePolicy::FailFast,
        }
    }

    pub fn with_pacer(mut self, pacer: &'a dyn Pacer) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn FetchProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.on_error = policy;
        self
    }

    /// Fetch and concatenate every symbol's rows.
    pub fn fetch<S: AsRef<str>>(
        &self,
        symbols: &[S],
        fields: &FieldSet,
        range: &DateRange,
    ) -> Result<LongTable, DataError> {
        self.fetch_with_report(symbols, fields, range)
            .map(|report| report.table)
    }

    pub fn fetch_with_report<S: AsRef<str>>(
        &self,
        symbols: &[S],
        fields: &FieldSet,
        range: &DateRange,
    ) -> Result<FetchReport, DataError> {
        let symbols = checked_symbols(symbols)?;
        let total = symbols.len();
        self.progress.on_start(describe(fields.kind()), total);

        let mut tables = Vec::with_capacity(total);
        let mut skipped = Vec::new();

        for (i, symbol) in symbols.iter().enumerate() {
            self.pacer.before_call();
            let result = request(self.client, symbol, fields, range);
            self.pacer.after_call(i + 1);

            match result {
                Ok(table) => {
                    require_fields(&table, fields)?;
                    self.progress.on_symbol(symbol, i, total, table.len());
                    tables.push(table);
                }
                Err(e) if self.on_error == FailurePolicy::SkipFailed => {
                    warn!(symbol = %symbol, error = %e, "skipping symbol after failed fetch");
                    skipped.push((symbol.clone(), e));
                }
                Err(e) => return Err(e),
            }
        }

        let table = LongTable::concat(tables);
        self.progress.on_finish(table.len());
        Ok(FetchReport { table, skipped })
    }
}

/// Sequential fetch with the reference pacing: sleep `pause` after each call.
pub fn fetch_sequential<S: AsRef<str>>(
    client: &dyn MarketDataClient,
    symbols: &[S],
    fields: &FieldSet,
    range: &DateRange,
    pause: Duration,
) -> Result<LongTable, DataError> {
    let pacer = pause_policy(pause);
    SequentialFetcher::new(client)
        .with_pacer(pacer.as_ref())
        .fetch(symbols, fields, range)
}

/// Request coalescing: all symbols joined into a single call.
///
/// This is not concurrency; it trades many small requests for one large one.
/// `chunk_size` caps how many codes go into one request for providers that
/// reject very long lists.
pub struct CoalescedFetcher<'a> {
    client: &'a dyn MarketDataClient,
    progress: &'a dyn FetchProgress,
    chunk_size: Option<usize>,
}

impl<'a> CoalescedFetcher<'a> {
    pub fn new(client: &'a dyn MarketDataClient) -> Self {
        Self {
            client,
            progress: &LogProgress,
            chunk_size: None,
        }
    }

    pub fn with_progress(mut self, progress: &'a dyn FetchProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size.max(1));
        self
    }

    /// `Ok(None)` means the provider answered successfully with no rows for
    /// any requested symbol; the "no data" diagnostic has been emitted.
    pub fn fetch<S: AsRef<str>>(
        &self,
        symbols: &[S],
        fields: &FieldSet,
        range: &DateRange,
    ) -> Result<Option<LongTable>, DataError> {
        let symbols = checked_symbols(symbols)?;
        let chunk_size = self.chunk_size.unwrap_or(symbols.len());
        let chunks: Vec<&[String]> = symbols.chunks(chunk_size).collect();
        self.progress.on_start(describe(fields.kind()), chunks.len());

        let mut tables = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            let codes = chunk.join(CODE_SEPARATOR);
            let table = request(self.client, &codes, fields, range)?;
            require_fields(&table, fields)?;
            self.progress.on_symbol(&codes, i, chunks.len(), table.len());
            tables.push(table);
        }

        if tables.iter().all(LongTable::is_empty) {
            self.progress.on_empty(symbols.len());
            return Ok(None);
        }

        // Provider order interleaves symbols; restore request order so the
        // pivot's column order matches the sequential strategy.
        let mut table = LongTable::concat(tables);
        table.order_symbols(&symbols);
        self.progress.on_finish(table.len());
        Ok(Some(table))
    }
}

/// Single coalesced call for all symbols.
pub fn fetch_coalesced<S: AsRef<str>>(
    client: &dyn MarketDataClient,
    symbols: &[S],
    fields: &FieldSet,
    range: &DateRange,
) -> Result<Option<LongTable>, DataError> {
    CoalescedFetcher::new(client).fetch(symbols, fields, range)
}

/// One call per symbol, fanned out over a bounded thread pool.
///
/// Results are assembled in symbol order, never in completion order, so the
/// output matches the sequential strategy row for row. Fail-fast. A pacer,
/// if set, is shared by all workers.
pub struct ConcurrentFetcher<'a> {
    client: &'a dyn MarketDataClient,
    pacer: &'a dyn Pacer,
    progress: &'a dyn FetchProgress,
    threads: usize,
}

impl<'a> ConcurrentFetcher<'a> {
    pub fn new(client: &'a dyn MarketDataClient, threads: usize) -> Self {
        Self {
            client,
            pacer: &NoPacing,
            progress: &LogProgress,
            threads: threads.max(1),
        }
    }

    pub fn with_pacer(mut self, pacer: &'a dyn Pacer) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn FetchProgress) -> Self {
        self.progress = progress;
        self
    }

    pub fn fetch<S: AsRef<str>>(
        &self,
        symbols: &[S],
        fields: &FieldSet,
        range: &DateRange,
    ) -> Result<LongTable, DataError> {
        let symbols = checked_symbols(symbols)?;
        let total = symbols.len();
        self.progress.on_start(describe(fields.kind()), total);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()
            .map_err(|e| DataError::Other(format!("failed to build fetch pool: {e}")))?;

        let done = AtomicUsize::new(0);
        let tables = pool.install(|| {
            symbols
                .par_iter()
                .map(|symbol| -> Result<LongTable, DataError> {
                    self.pacer.before_call();
                    let result = request(self.client, symbol, fields, range);
                    let i = done.fetch_add(1, Ordering::SeqCst);
                    self.pacer.after_call(i + 1);
                    let table = result?;
                    require_fields(&table, fields)?;
                    self.progress.on_symbol(symbol, i, total, table.len());
                    Ok(table)
                })
                .collect::<Result<Vec<LongTable>, DataError>>()
        })?;

        let table = LongTable::concat(tables);
        self.progress.on_finish(table.len());
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::fake::FakeClient;
    use crate::data::provider::{parse_wire_date, SilentProgress};
    use std::sync::Mutex;

    fn range() -> DateRange {
        DateRange::parse("20240102", "20240105").unwrap()
    }

    fn client() -> FakeClient {
        let mut fake = FakeClient::new();
        for (sym, base) in [("AAA", 10.0), ("BBB", 20.0)] {
            for (i, date) in ["20240102", "20240103", "20240104"].iter().enumerate() {
                fake.add_daily(sym, parse_wire_date(date).unwrap(), base + i as f64);
            }
        }
        fake
    }

    fn close() -> FieldSet {
        FieldSet::parse(DataKind::Price, ["close"]).unwrap()
    }

    /// Logs each pacing hook with the number of calls the client had seen.
    struct CallCountingPacer<'a> {
        client: &'a FakeClient,
        events: Mutex<Vec<String>>,
    }

    impl<'a> CallCountingPacer<'a> {
        fn new(client: &'a FakeClient) -> Self {
            Self {
                client,
                events: Mutex::new(Vec::new()),
            }
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl Pacer for CallCountingPacer<'_> {
        fn before_call(&self) {
            let seen = self.client.calls().len();
            self.events.lock().unwrap().push(format!("before@{seen}"));
        }

        fn after_call(&self, calls_made: usize) {
            let seen = self.client.calls().len();
            self.events
                .lock()
                .unwrap()
                .push(format!("after({calls_made})@{seen}"));
        }
    }

    #[derive(Default)]
    struct RecordingProgress {
        empty: Mutex<Vec<usize>>,
        finished: Mutex<Vec<usize>>,
    }

    impl FetchProgress for RecordingProgress {
        fn on_start(&self, _what: &str, _total: usize) {}
        fn on_symbol(&self, _symbol: &str, _index: usize, _total: usize, _rows: usize) {}

        fn on_empty(&self, requested: usize) {
            self.empty.lock().unwrap().push(requested);
        }

        fn on_finish(&self, rows: usize) {
            self.finished.lock().unwrap().push(rows);
        }
    }

    #[test]
    fn dedup_keeps_first_seen_order() {
        assert_eq!(
            dedup_symbols(&["BBB", "AAA", "BBB", "", "CCC", "AAA"]),
            vec!["BBB", "AAA", "CCC"]
        );
    }

    #[test]
    fn sequential_issues_one_call_per_unique_symbol() {
        let fake = client();
        let table = SequentialFetcher::new(&fake)
            .with_progress(&SilentProgress)
            .fetch(&["AAA", "BBB", "AAA"], &close(), &range())
            .unwrap();

        assert_eq!(table.len(), 6);
        assert_eq!(fake.calls(), vec!["daily:AAA", "daily:BBB"]);
    }

    #[test]
    fn sequential_tolerates_symbol_with_no_rows() {
        let fake = client();
        let table = SequentialFetcher::new(&fake)
            .with_progress(&SilentProgress)
            .fetch(&["AAA", "DELISTED"], &close(), &range())
            .unwrap();
        assert_eq!(table.symbols(), vec!["AAA"]);
    }

    #[test]
    fn sequential_fails_fast_by_default() {
        let mut fake = client();
        fake.fail_for("AAA");
        let err = SequentialFetcher::new(&fake)
            .with_progress(&SilentProgress)
            .fetch(&["AAA", "BBB"], &close(), &range())
            .unwrap_err();

        assert!(matches!(err, DataError::NetworkUnreachable(_)));
        assert_eq!(fake.calls(), vec!["daily:AAA"]);
    }

    #[test]
    fn skip_failed_reports_dropped_symbols() {
        let mut fake = client();
        fake.fail_for("AAA");
        let report = SequentialFetcher::new(&fake)
            .with_progress(&SilentProgress)
            .with_failure_policy(FailurePolicy::SkipFailed)
            .fetch_with_report(&["AAA", "BBB"], &close(), &range())
            .unwrap();

        assert_eq!(report.table.symbols(), vec!["BBB"]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, "AAA");
    }

    #[test]
    fn empty_symbol_list_fails_before_any_call() {
        let fake = client();
        let empty: [&str; 0] = [];
        let err = fetch_sequential(&fake, &empty, &close(), &range(), Duration::ZERO).unwrap_err();
        assert!(matches!(err, DataError::EmptySymbolList));
        assert!(fake.calls().is_empty());
    }

    #[test]
    fn coalesced_joins_codes_into_one_call() {
        let fake = client();
        let table = CoalescedFetcher::new(&fake)
            .with_progress(&SilentProgress)
            .fetch(&["AAA", "BBB"], &close(), &range())
            .unwrap()
            .unwrap();

        assert_eq!(table.len(), 6);
        assert_eq!(fake.calls(), vec!["daily:AAA,BBB"]);
    }

    #[test]
    fn coalesced_empty_response_is_none() {
        let fake = client();
        let result = CoalescedFetcher::new(&fake)
            .with_progress(&SilentProgress)
            .fetch(&["XXX", "YYY"], &close(), &range())
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn coalesced_chunks_split_requests() {
        let fake = client();
        let table = CoalescedFetcher::new(&fake)
            .with_progress(&SilentProgress)
            .with_chunk_size(1)
            .fetch(&["AAA", "BBB"], &close(), &range())
            .unwrap()
            .unwrap();
        assert_eq!(table.len(), 6);
        assert_eq!(fake.calls(), vec!["daily:AAA", "daily:BBB"]);
    }

    #[test]
    fn factor_requests_carry_identifying_columns() {
        let mut fake = FakeClient::new();
        fake.add_daily_basic(
            "AAA",
            parse_wire_date("20240102").unwrap(),
            &[("pe_ttm", 12.0), ("pb", 1.5)],
        );
        let fields = FieldSet::parse(DataKind::Factor, ["pb"]).unwrap();
        let table = fetch_sequential(&fake, &["AAA"], &fields, &range(), Duration::ZERO).unwrap();

        assert_eq!(table.columns(), ["pb"]);
        assert_eq!(fake.calls(), vec!["daily_basic:AAA[pb,ts_code,trade_date]"]);
    }

    #[test]
    fn concurrent_matches_sequential_row_order() {
        let fake = client();
        let symbols = ["BBB", "AAA"];
        let sequential = SequentialFetcher::new(&fake)
            .with_progress(&SilentProgress)
            .fetch(&symbols, &close(), &range())
            .unwrap();
        let concurrent = ConcurrentFetcher::new(&fake, 4)
            .with_progress(&SilentProgress)
            .fetch(&symbols, &close(), &range())
            .unwrap();
        assert_eq!(sequential, concurrent);
    }

    #[test]
    fn pacer_brackets_every_remote_call_in_order() {
        let fake = client();
        let pacer = CallCountingPacer::new(&fake);
        let paced = SequentialFetcher::new(&fake)
            .with_pacer(&pacer)
            .with_progress(&SilentProgress)
            .fetch(&["AAA", "BBB", "CCC"], &close(), &range())
            .unwrap();

        assert_eq!(
            pacer.events(),
            vec![
                "before@0", "after(1)@1", "before@1", "after(2)@2", "before@2", "after(3)@3",
            ]
        );

        let unpaced = SequentialFetcher::new(&fake)
            .with_progress(&SilentProgress)
            .fetch(&["AAA", "BBB", "CCC"], &close(), &range())
            .unwrap();
        assert_eq!(paced, unpaced);
    }

    #[test]
    fn pacer_still_runs_after_a_failed_call() {
        let mut fake = client();
        fake.fail_for("AAA");
        let pacer = CallCountingPacer::new(&fake);
        let report = SequentialFetcher::new(&fake)
            .with_pacer(&pacer)
            .with_progress(&SilentProgress)
            .with_failure_policy(FailurePolicy::SkipFailed)
            .fetch_with_report(&["AAA", "BBB"], &close(), &range())
            .unwrap();

        assert_eq!(report.skipped.len(), 1);
        assert_eq!(pacer.events().len(), 4);
    }

    #[test]
    fn concurrent_workers_share_the_pacer() {
        let fake = client();
        let pacer = CallCountingPacer::new(&fake);
        ConcurrentFetcher::new(&fake, 2)
            .with_pacer(&pacer)
            .with_progress(&SilentProgress)
            .fetch(&["AAA", "BBB", "CCC"], &close(), &range())
            .unwrap();

        let events = pacer.events();
        assert_eq!(events.iter().filter(|e| e.starts_with("before")).count(), 3);
        assert_eq!(events.iter().filter(|e| e.starts_with("after")).count(), 3);
    }

    #[test]
    fn field_dropped_for_one_symbol_is_rejected() {
        let mut fake = client();
        fake.omit_column_for("BBB", "vol");
        let fields = FieldSet::parse(DataKind::Price, ["close", "vol"]).unwrap();

        let sequential = SequentialFetcher::new(&fake)
            .with_progress(&SilentProgress)
            .fetch(&["AAA", "BBB"], &fields, &range());
        let concurrent = ConcurrentFetcher::new(&fake, 2)
            .with_progress(&SilentProgress)
            .fetch(&["AAA", "BBB"], &fields, &range());
        let chunked = CoalescedFetcher::new(&fake)
            .with_progress(&SilentProgress)
            .with_chunk_size(1)
            .fetch(&["AAA", "BBB"], &fields, &range());

        for result in [sequential, concurrent, chunked.map(|t| t.unwrap_or_default())] {
            assert!(
                matches!(result, Err(DataError::MissingField { ref field }) if field == "vol"),
                "{result:?}"
            );
        }
    }

    #[test]
    fn dropped_field_is_not_checked_on_empty_responses() {
        let mut fake = client();
        fake.omit_column_for("DELISTED", "vol");
        let fields = FieldSet::parse(DataKind::Price, ["close", "vol"]).unwrap();
        let table = SequentialFetcher::new(&fake)
            .with_progress(&SilentProgress)
            .fetch(&["AAA", "DELISTED"], &fields, &range())
            .unwrap();
        assert_eq!(table.symbols(), vec!["AAA"]);
    }

    #[test]
    fn empty_coalesced_response_reports_once() {
        let fake = client();
        let progress = RecordingProgress::default();
        let result = CoalescedFetcher::new(&fake)
            .with_progress(&progress)
            .fetch(&["XXX", "YYY", "XXX"], &close(), &range())
            .unwrap();

        assert!(result.is_none());
        assert_eq!(*progress.empty.lock().unwrap(), vec![2]);
        assert!(progress.finished.lock().unwrap().is_empty());
    }

    #[test]
    fn coalesced_rows_do_not_report_empty() {
        let fake = client();
        let progress = RecordingProgress::default();
        let table = CoalescedFetcher::new(&fake)
            .with_progress(&progress)
            .fetch(&["AAA", "XXX"], &close(), &range())
            .unwrap()
            .unwrap();

        assert!(progress.empty.lock().unwrap().is_empty());
        assert_eq!(*progress.finished.lock().unwrap(), vec![table.len()]);
    }

    #[test]
    fn coalesced_restores_request_order() {
        let mut fake = FakeClient::new();
        fake.add_daily("AAA", parse_wire_date("20240102").unwrap(), 10.0);
        fake.add_daily("BBB", parse_wire_date("20240104").unwrap(), 20.0);
        let table = CoalescedFetcher::new(&fake)
            .with_progress(&SilentProgress)
            .fetch(&["AAA", "BBB"], &close(), &range())
            .unwrap()
            .unwrap();
        assert_eq!(table.symbols(), vec!["AAA", "BBB"]);
    }
}
