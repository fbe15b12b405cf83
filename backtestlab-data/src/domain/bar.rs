//! Bar: one OHLCV row of a market data table.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// OHLCV row at a single timestamp. The symbol lives on the owning
/// [`MarketData`](super::MarketData), not on each row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Returns true if any OHLCV field is NaN or infinite.
    pub fn has_missing_values(&self) -> bool {
        [self.open, self.high, self.low, self.close, self.volume]
            .iter()
            .any(|v| !v.is_finite())
    }
}
