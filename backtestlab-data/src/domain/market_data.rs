//! MarketData: a validated, time-indexed OHLCV table plus its identity.
//!
//! Construction is the only place rows are checked. Once built, a
//! `MarketData` is read-only: derived tables (date filtering, extra
//! metadata) are new values.

use super::request::{in_date_range, normalize_symbol};
use super::{Bar, DataFrequency};
use crate::data::provider::DataError;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::BTreeMap;

/// Free-form metadata attached to a table (source file, row counts, ...).
pub type Metadata = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketData {
    symbol: String,
    frequency: DataFrequency,
    provider: String,
    bars: Vec<Bar>,
    metadata: Metadata,
}

impl MarketData {
    /// Validate and wrap rows that are already in timestamp order.
    ///
    /// Fails if the symbol is blank, the table is empty, any OHLCV value is
    /// non-finite, any volume is negative, or timestamps are not strictly
    /// increasing.
    pub fn new(
        symbol: &str,
        frequency: DataFrequency,
        provider: impl Into<String>,
        bars: Vec<Bar>,
        metadata: Metadata,
    ) -> Result<Self, DataError> {
        let symbol = normalize_symbol(symbol)?;
        validate_bars(&bars)?;
        Ok(Self {
            symbol,
            frequency,
            provider: provider.into(),
            bars,
            metadata,
        })
    }

    /// Like [`new`](Self::new) but sorts rows by timestamp first. Duplicate
    /// timestamps are still rejected.
    pub fn from_unsorted(
        symbol: &str,
        frequency: DataFrequency,
        provider: impl Into<String>,
        mut bars: Vec<Bar>,
        metadata: Metadata,
    ) -> Result<Self, DataError> {
        bars.sort_by_key(|b| b.timestamp);
        Self::new(symbol, frequency, provider, bars, metadata)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn frequency(&self) -> DataFrequency {
        self.frequency
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// String value of a metadata entry, if present and a string.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    /// Always false for a constructed value; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn first_timestamp(&self) -> NaiveDateTime {
        self.bars[0].timestamp
    }

    pub fn last_timestamp(&self) -> NaiveDateTime {
        self.bars[self.bars.len() - 1].timestamp
    }

    pub fn timestamps(&self) -> Vec<NaiveDateTime> {
        self.bars.iter().map(|b| b.timestamp).collect()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    /// Rows whose date falls in `[start, end]` (inclusive, open when `None`).
    ///
    /// Fails with [`DataError::NoDataInRange`] when nothing is left.
    pub fn filter_date_range(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<MarketData, DataError> {
        let bars: Vec<Bar> = self
            .bars
            .iter()
            .filter(|b| in_date_range(b.timestamp, start, end))
            .copied()
            .collect();

        if bars.is_empty() {
            return Err(DataError::NoDataInRange {
                symbol: self.symbol.clone(),
                start: start.map_or_else(|| "-".to_string(), |d| d.to_string()),
                end: end.map_or_else(|| "-".to_string(), |d| d.to_string()),
            });
        }

        Ok(MarketData {
            symbol: self.symbol.clone(),
            frequency: self.frequency,
            provider: self.provider.clone(),
            bars,
            metadata: self.metadata.clone(),
        })
    }

    /// Copy with one metadata entry set.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

fn validate_bars(bars: &[Bar]) -> Result<(), DataError> {
    if bars.is_empty() {
        return Err(DataError::validation("market data table has no rows"));
    }

    for (i, bar) in bars.iter().enumerate() {
        if bar.has_missing_values() {
            return Err(DataError::validation(format!(
                "row {i} ({}) has a missing or non-numeric OHLCV value",
                bar.timestamp
            )));
        }
        if bar.volume < 0.0 {
            return Err(DataError::validation(format!(
                "row {i} ({}) has negative volume {}",
                bar.timestamp, bar.volume
            )));
        }
    }

    for (i, pair) in bars.windows(2).enumerate() {
        if pair[1].timestamp <= pair[0].timestamp {
            let what = if pair[1].timestamp == pair[0].timestamp {
                "duplicate"
            } else {
                "out-of-order"
            };
            return Err(DataError::validation(format!(
                "{what} timestamp {} at row {}",
                pair[1].timestamp,
                i + 1
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::ErrorKind;

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn bar(d: u32, close: f64) -> Bar {
        Bar {
            timestamp: day(d),
            open: close - 1.0,
            high: close + 1.0,
            low: close - 2.0,
            close,
            volume: 1000.0,
        }
    }

    fn sample() -> MarketData {
        MarketData::new(
            "aapl",
            DataFrequency::Daily,
            "test",
            vec![bar(2, 100.0), bar(3, 101.0), bar(4, 102.0)],
            Metadata::new(),
        )
        .unwrap()
    }

    #[test]
    fn symbol_is_normalized() {
        assert_eq!(sample().symbol(), "AAPL");
    }

    #[test]
    fn empty_table_is_rejected() {
        let err =
            MarketData::new("AAPL", DataFrequency::Daily, "t", vec![], Metadata::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn duplicate_timestamps_are_rejected() {
        let err = MarketData::new(
            "AAPL",
            DataFrequency::Daily,
            "t",
            vec![bar(2, 100.0), bar(2, 101.0)],
            Metadata::new(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn unsorted_rows_rejected_by_new_but_sorted_by_from_unsorted() {
        let rows = vec![bar(4, 102.0), bar(2, 100.0), bar(3, 101.0)];
        assert!(MarketData::new("AAPL", DataFrequency::Daily, "t", rows.clone(), Metadata::new())
            .is_err());
        let md =
            MarketData::from_unsorted("AAPL", DataFrequency::Daily, "t", rows, Metadata::new())
                .unwrap();
        assert_eq!(md.first_timestamp(), day(2));
        assert_eq!(md.last_timestamp(), day(4));
    }

    #[test]
    fn nan_and_negative_volume_are_rejected() {
        let mut nan = bar(2, 100.0);
        nan.high = f64::NAN;
        assert!(MarketData::new("A", DataFrequency::Daily, "t", vec![nan], Metadata::new()).is_err());

        let mut neg = bar(2, 100.0);
        neg.volume = -1.0;
        assert!(MarketData::new("A", DataFrequency::Daily, "t", vec![neg], Metadata::new()).is_err());
    }

    #[test]
    fn filter_is_inclusive_and_leaves_original_untouched() {
        let md = sample();
        let start = NaiveDate::from_ymd_opt(2024, 1, 3);
        let filtered = md.filter_date_range(start, start).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.closes(), vec![101.0]);
        assert_eq!(md.len(), 3);
    }

    #[test]
    fn filter_to_nothing_is_an_error() {
        let later = NaiveDate::from_ymd_opt(2025, 1, 1);
        let err = sample().filter_date_range(later, None).unwrap_err();
        assert!(matches!(err, DataError::NoDataInRange { .. }));
    }

    #[test]
    fn with_metadata_returns_new_value() {
        let md = sample().with_metadata("source", "unit");
        assert_eq!(md.metadata_str("source"), Some("unit"));
    }
}
