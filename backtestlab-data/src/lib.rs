//! BacktestLab Data: OHLCV market data loading for backtests.
//!
//! This crate contains the data layer feeding the backtester:
//! - Domain types (bars, frequencies, requests, validated market data)
//! - DataProvider trait with network (Yahoo chart API) and file providers
//! - `{symbol}_{code}.{ext}` naming convention and directory discovery
//! - Parquet/CSV persistence with metadata sidecars
//! - StockDataLoader registry routing requests by provider name

pub mod config;
pub mod data;
pub mod domain;
pub mod loader;

pub use config::LoaderConfig;
pub use data::{DataError, DataProvider, ErrorKind, FileFormat, FileProvider, NetworkProvider};
pub use domain::{Bar, DataFrequency, MarketData, MarketDataRequest};
pub use loader::{BatchResult, StockDataLoader};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: data types and providers are Send + Sync, so a
    /// loader can be moved to a worker thread.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<Bar>();
        require_sync::<Bar>();
        require_send::<MarketData>();
        require_sync::<MarketData>();
        require_send::<MarketDataRequest>();
        require_sync::<MarketDataRequest>();
        require_send::<DataError>();
        require_sync::<DataError>();

        require_send::<NetworkProvider>();
        require_sync::<NetworkProvider>();
        require_send::<FileProvider>();
        require_sync::<FileProvider>();
        require_send::<StockDataLoader>();
        require_sync::<StockDataLoader>();
    }

    /// Providers are usable as trait objects.
    #[test]
    fn provider_trait_is_object_safe() {
        fn _check(provider: &dyn DataProvider, request: &MarketDataRequest) -> Result<MarketData, DataError> {
            provider.fetch(request)
        }
        let provider: Box<dyn DataProvider> = Box::new(FileProvider::new("unused"));
        assert_eq!(provider.name(), "file");
    }
}
