//! Validated market data query.

use super::DataFrequency;
use crate::data::provider::DataError;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Provider-specific request parameters (e.g. `auto_adjust`, `prepost`).
pub type ProviderParams = HashMap<String, serde_json::Value>;

/// A market data query. Only constructible through validation, so holding one
/// means the symbol is normalized and the date range is ordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRequest")]
pub struct MarketDataRequest {
    symbol: String,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    frequency: DataFrequency,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    params: ProviderParams,
}

/// Unvalidated wire form of a request.
#[derive(Debug, Deserialize)]
struct RawRequest {
    symbol: String,
    #[serde(default)]
    start_date: Option<NaiveDate>,
    #[serde(default)]
    end_date: Option<NaiveDate>,
    #[serde(default)]
    frequency: DataFrequency,
    #[serde(default)]
    params: ProviderParams,
}

impl TryFrom<RawRequest> for MarketDataRequest {
    type Error = DataError;

    fn try_from(raw: RawRequest) -> Result<Self, Self::Error> {
        MarketDataRequest::validated(
            &raw.symbol,
            raw.start_date,
            raw.end_date,
            raw.frequency,
            raw.params,
        )
    }
}

/// Whether `timestamp`'s calendar date lies in `[start, end]`. A missing
/// bound is open.
pub fn in_date_range(
    timestamp: NaiveDateTime,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> bool {
    let date = timestamp.date();
    start.is_none_or(|s| date >= s) && end.is_none_or(|e| date <= e)
}

/// Trim and uppercase a symbol. Fails on a blank result.
pub fn normalize_symbol(symbol: &str) -> Result<String, DataError> {
    let cleaned = symbol.trim().to_uppercase();
    if cleaned.is_empty() {
        return Err(DataError::validation("symbol cannot be empty"));
    }
    Ok(cleaned)
}

impl MarketDataRequest {
    /// Request with no date bounds and no provider parameters.
    pub fn new(symbol: &str, frequency: DataFrequency) -> Result<Self, DataError> {
        Self::validated(symbol, None, None, frequency, ProviderParams::new())
    }

    pub fn builder(symbol: impl Into<String>) -> MarketDataRequestBuilder {
        MarketDataRequestBuilder {
            symbol: symbol.into(),
            start_date: None,
            end_date: None,
            frequency: DataFrequency::default(),
            params: ProviderParams::new(),
        }
    }

    fn validated(
        symbol: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
        frequency: DataFrequency,
        params: ProviderParams,
    ) -> Result<Self, DataError> {
        let symbol = normalize_symbol(symbol)?;
        if let (Some(start), Some(end)) = (start_date, end_date) {
            if start > end {
                return Err(DataError::validation(format!(
                    "start date {start} is after end date {end}"
                )));
            }
        }
        Ok(Self {
            symbol,
            start_date,
            end_date,
            frequency,
            params,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn start_date(&self) -> Option<NaiveDate> {
        self.start_date
    }

    pub fn end_date(&self) -> Option<NaiveDate> {
        self.end_date
    }

    pub fn frequency(&self) -> DataFrequency {
        self.frequency
    }

    pub fn params(&self) -> &ProviderParams {
        &self.params
    }

    /// Boolean provider parameter. Accepts JSON booleans and the strings
    /// `"true"`/`"false"`; anything else yields `default`.
    pub fn param_bool(&self, key: &str, default: bool) -> bool {
        match self.params.get(key) {
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::String(s)) => match s.to_ascii_lowercase().as_str() {
                "true" => true,
                "false" => false,
                _ => default,
            },
            _ => default,
        }
    }

    /// Whether `timestamp` falls within the requested range. Bounds are
    /// inclusive calendar dates; a missing bound is open.
    pub fn contains(&self, timestamp: NaiveDateTime) -> bool {
        in_date_range(timestamp, self.start_date, self.end_date)
    }

    pub fn has_date_range(&self) -> bool {
        self.start_date.is_some() || self.end_date.is_some()
    }

    /// Same request for a different symbol.
    pub fn with_symbol(&self, symbol: &str) -> Result<Self, DataError> {
        Self::validated(
            symbol,
            self.start_date,
            self.end_date,
            self.frequency,
            self.params.clone(),
        )
    }
}

/// Builder for [`MarketDataRequest`]. Validation runs in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct MarketDataRequestBuilder {
    symbol: String,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    frequency: DataFrequency,
    params: ProviderParams,
}

impl MarketDataRequestBuilder {
    pub fn start(mut self, date: NaiveDate) -> Self {
        self.start_date = Some(date);
        self
    }

    pub fn end(mut self, date: NaiveDate) -> Self {
        self.end_date = Some(date);
        self
    }

    pub fn range(self, start: NaiveDate, end: NaiveDate) -> Self {
        self.start(start).end(end)
    }

    pub fn frequency(mut self, frequency: DataFrequency) -> Self {
        self.frequency = frequency;
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn params(mut self, params: ProviderParams) -> Self {
        self.params.extend(params);
        self
    }

    pub fn build(self) -> Result<MarketDataRequest, DataError> {
        MarketDataRequest::validated(
            &self.symbol,
            self.start_date,
            self.end_date,
            self.frequency,
            self.params,
        )
    }
}
