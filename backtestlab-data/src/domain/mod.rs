//! Domain types for the market data layer

pub mod bar;
pub mod frequency;
pub mod market_data;
pub mod request;

pub use bar::Bar;
pub use frequency::DataFrequency;
pub use market_data::{MarketData, Metadata};
pub use request::{in_date_range, normalize_symbol, MarketDataRequest, MarketDataRequestBuilder, ProviderParams};
