//! Data provider trait and structured error types.
//!
//! The DataProvider trait abstracts over data sources (the network quote
//! service, a local file directory) so the loader can route requests by name
//! and tests can swap in mocks.

use crate::domain::{DataFrequency, MarketData, MarketDataRequest};
use std::path::PathBuf;
use thiserror::Error;

/// Structured error types for data operations.
///
/// Every variant belongs to exactly one [`ErrorKind`], which is what callers
/// should match on when they only care about the failure category.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("symbol not found or no data in range: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("no data for '{symbol}' between {start} and {end}")]
    NoDataInRange {
        symbol: String,
        start: String,
        end: String,
    },

    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("provider '{provider}' does not support frequency {frequency}")]
    UnsupportedFrequency {
        provider: String,
        frequency: DataFrequency,
    },

    #[error("provider '{name}' not found (available: {available})")]
    UnknownProvider { name: String, available: String },

    #[error("unsupported file format '{0}' (use parquet or csv)")]
    UnsupportedFormat(String),

    #[error("file not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),
}

/// Failure category of a [`DataError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed request or malformed table.
    Validation,
    /// Provider-side fetch failure.
    Provider,
    /// Unknown provider name, unsupported format, bad config.
    Configuration,
    /// Requested file is absent.
    FileNotFound,
    /// Underlying read/write failed.
    Storage,
}

impl DataError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DataError::Validation(_) => ErrorKind::Validation,
            DataError::SymbolNotFound { .. }
            | DataError::NoDataInRange { .. }
            | DataError::NetworkUnreachable(_)
            | DataError::RateLimited { .. }
            | DataError::ResponseFormatChanged(_)
            | DataError::UnsupportedFrequency { .. } => ErrorKind::Provider,
            DataError::UnknownProvider { .. }
            | DataError::UnsupportedFormat(_)
            | DataError::Config(_) => ErrorKind::Configuration,
            DataError::FileNotFound { .. } => ErrorKind::FileNotFound,
            DataError::Storage(_) | DataError::Io(_) => ErrorKind::Storage,
        }
    }

    /// Shorthand for building a [`DataError::Validation`].
    pub fn validation(msg: impl Into<String>) -> Self {
        DataError::Validation(msg.into())
    }
}

/// A pluggable source of market data.
///
/// Implementations return a fully validated [`MarketData`] whose symbol and
/// frequency match the request, restricted to the requested date range when
/// both bounds are given. An empty result is an error, never an empty success.
pub trait DataProvider: Send + Sync {
    /// Human-readable name of this provider, recorded in the returned data.
    fn name(&self) -> &str;

    /// Fetch data for an already-validated request.
    fn fetch(&self, request: &MarketDataRequest) -> Result<MarketData, DataError>;

    /// Whether the provider can serve `symbol` at `frequency`.
    fn validate_symbol(&self, symbol: &str, frequency: DataFrequency) -> bool;

    /// Symbols this provider can enumerate. Remote services that have no
    /// listing endpoint return an empty list.
    fn available_symbols(&self) -> Vec<String> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(DataError::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(
            DataError::SymbolNotFound {
                symbol: "X".into()
            }
            .kind(),
            ErrorKind::Provider
        );
        assert_eq!(
            DataError::UnknownProvider {
                name: "nope".into(),
                available: "network".into()
            }
            .kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            DataError::UnsupportedFormat("json".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            DataError::FileNotFound {
                path: PathBuf::from("a.parquet")
            }
            .kind(),
            ErrorKind::FileNotFound
        );
    }

    #[test]
    fn messages_name_the_failed_precondition() {
        let err = DataError::UnknownProvider {
            name: "bloomberg".into(),
            available: "file, network".into(),
        };
        assert_eq!(
            err.to_string(),
            "provider 'bloomberg' not found (available: file, network)"
        );
    }
}
