//! A-share market data handler: fetch daily bars and valuation factors from a
//! Tushare-style provider and reshape them into date-indexed wide tables.
//!
//! The pipeline is:
//! - Field normalization (user-facing names to provider and canonical names)
//! - Remote fetch, one call per symbol or one coalesced call
//! - Long-to-wide pivot keyed by `(symbol, field)`
//! - Optional export to Parquet or CSV
//!
//! Side pieces: benchmark net value from index returns, and index membership
//! resolution over a date window.

pub mod config;
pub mod data;
pub mod handler;

pub use config::{ConfigError, Frequency, HandlerConfig, ProviderSettings};
pub use handler::{FetchStrategy, MarketDataHandler};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: tables and clients can cross thread boundaries.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<data::LongTable>();
        require_sync::<data::LongTable>();
        require_send::<data::WideTable>();
        require_sync::<data::WideTable>();
        require_send::<data::BenchmarkSeries>();
        require_sync::<data::BenchmarkSeries>();
        require_send::<data::DataError>();
        require_sync::<data::DataError>();

        require_send::<data::TushareClient>();
        require_sync::<data::TushareClient>();
        require_send::<data::FakeClient>();
        require_sync::<data::FakeClient>();
        require_send::<data::CircuitBreaker>();
        require_sync::<data::CircuitBreaker>();
        require_send::<data::RateLimit>();
        require_sync::<data::RateLimit>();
        require_send::<HandlerConfig>();
        require_sync::<HandlerConfig>();
    }

    /// Every fetch strategy goes through the object-safe client trait.
    #[test]
    fn client_trait_is_object_safe() {
        fn _check(client: &dyn data::MarketDataClient) -> &str {
            client.name()
        }
        assert_eq!(_check(&data::FakeClient::new()), "fake");
    }
}
