//! Market data retrieval, reshaping and export.

pub mod benchmark;
pub mod circuit_breaker;
pub mod export;
pub mod fake;
pub mod fetch;
pub mod fields;
pub mod pacing;
pub mod provider;
pub mod reshape;
pub mod tushare;
pub mod universe;

pub use benchmark::{normalize_benchmark, BenchmarkSeries};
pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use export::{write_benchmark_csv, write_csv, write_parquet};
pub use fake::FakeClient;
pub use fetch::{
    fetch_coalesced, fetch_sequential, CoalescedFetcher, ConcurrentFetcher, FailurePolicy,
    FetchReport, SequentialFetcher,
};
pub use fields::{DataKind, Field, FieldSet};
pub use pacing::{pause_policy, FixedPause, NoPacing, Pacer, RateLimit};
pub use provider::{
    DataError, DateRange, ErrorKind, FetchProgress, IndexWeight, LogProgress, LongRecord,
    LongTable, MarketDataClient, SilentProgress,
};
pub use reshape::{pivot, ColumnKey, WideTable};
pub use tushare::{ClientSettings, TushareClient};
pub use universe::resolve_members;
