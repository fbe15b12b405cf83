//! Network data provider backed by Yahoo Finance's v8 chart API.
//!
//! Fetches OHLCV bars for a symbol, range and interval, normalizes them into
//! the MarketData schema and rejects empty results. Retries transient
//! failures with exponential backoff only when `max_retries > 0`.
//!
//! Yahoo Finance has no official API and is subject to unannounced format
//! changes. The file provider is the fallback when it is unavailable.

use super::provider::{DataError, DataProvider};
use crate::config::NetworkConfig;
use crate::domain::{in_date_range, Bar, DataFrequency, MarketData, MarketDataRequest, Metadata};
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Yahoo Finance v8 chart API response.
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    meta: Option<ChartMeta>,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    currency: Option<String>,
    #[serde(rename = "exchangeName")]
    exchange_name: Option<String>,
    /// Exchange offset from UTC in seconds.
    gmtoffset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjCloseData>>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseData {
    adjclose: Vec<Option<f64>>,
}

/// Network data provider.
pub struct NetworkProvider {
    client: reqwest::blocking::Client,
    config: NetworkConfig,
}

impl NetworkProvider {
    pub fn new() -> Result<Self, DataError> {
        Self::with_config(NetworkConfig::default())
    }

    pub fn with_config(config: NetworkConfig) -> Result<Self, DataError> {
        let mut builder = reqwest::blocking::Client::builder().user_agent(config.user_agent.clone());
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|e| DataError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Interval code sent to the service. Yahoo has no 4-hour bars.
    pub fn interval(frequency: DataFrequency) -> Option<&'static str> {
        match frequency {
            DataFrequency::Hour4 => None,
            other => Some(other.code()),
        }
    }

    /// Effective `[start, end]` for a request: missing end is today, missing
    /// start is `default_lookback_days` before the end.
    fn effective_range(&self, request: &MarketDataRequest) -> (NaiveDate, NaiveDate) {
        let end = request
            .end_date()
            .unwrap_or_else(|| chrono::Utc::now().date_naive());
        let start = request
            .start_date()
            .unwrap_or_else(|| end - ChronoDuration::days(self.config.default_lookback_days));
        (start, end)
    }

    fn chart_url(&self, symbol: &str) -> String {
        format!(
            "{}/v8/finance/chart/{symbol}",
            self.config.base_url.trim_end_matches('/')
        )
    }

    /// Execute the chart request with retry on transient failures.
    fn fetch_chart(
        &self,
        symbol: &str,
        query: &[(&str, String)],
    ) -> Result<ChartResponse, DataError> {
        let url = self.chart_url(symbol);
        debug!(%url, ?query, "requesting chart");

        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(self.config.retry_base_delay_ms)
                    * 2u32.saturating_pow(attempt - 1);
                warn!(symbol, attempt, ?delay, "retrying chart request");
                std::thread::sleep(delay);
            }

            let resp = match self.client.get(&url).query(query).send() {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() => {
                    last_error = Some(DataError::NetworkUnreachable(e.to_string()));
                    continue;
                }
                Err(e) => return Err(DataError::NetworkUnreachable(e.to_string())),
            };

            let status = resp.status();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                let retry_after = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(60);
                last_error = Some(DataError::RateLimited {
                    retry_after_secs: retry_after,
                });
                continue;
            }

            if status == reqwest::StatusCode::NOT_FOUND {
                // Body usually carries {"chart":{"error":{"code":"Not Found",...}}}
                return Err(DataError::SymbolNotFound {
                    symbol: symbol.to_string(),
                });
            }

            if status.is_server_error() {
                last_error = Some(DataError::NetworkUnreachable(format!(
                    "HTTP {status} for {symbol}"
                )));
                continue;
            }

            if !status.is_success() {
                return Err(DataError::NetworkUnreachable(format!(
                    "HTTP {status} for {symbol}"
                )));
            }

            return resp.json::<ChartResponse>().map_err(|e| {
                DataError::ResponseFormatChanged(format!(
                    "failed to parse response for {symbol}: {e}"
                ))
            });
        }

        Err(last_error.unwrap_or_else(|| {
            DataError::NetworkUnreachable("max retries exceeded".into())
        }))
    }

    /// Normalize a chart response into MarketData for `request`.
    ///
    /// Rows outside `[start, end]` are dropped; duplicate timestamps keep
    /// the last row seen.
    fn parse_response(
        &self,
        request: &MarketDataRequest,
        range: (NaiveDate, NaiveDate),
        resp: ChartResponse,
    ) -> Result<MarketData, DataError> {
        let symbol = request.symbol();
        let not_found = || DataError::SymbolNotFound {
            symbol: symbol.to_string(),
        };

        let result = match resp.chart.result {
            Some(result) => result,
            None => {
                return Err(match resp.chart.error {
                    Some(err) if err.code == "Not Found" => not_found(),
                    Some(err) => DataError::ResponseFormatChanged(format!(
                        "{}: {}",
                        err.code, err.description
                    )),
                    None => DataError::ResponseFormatChanged("empty result with no error".into()),
                });
            }
        };

        let data = result.into_iter().next().ok_or_else(not_found)?;
        // No timestamps means no rows in range
        let timestamps = data.timestamp.ok_or_else(not_found)?;

        let quote = data
            .indicators
            .quote
            .into_iter()
            .next()
            .ok_or_else(|| DataError::ResponseFormatChanged("no quote data".into()))?;

        let adj_closes = data
            .indicators
            .adjclose
            .and_then(|v| v.into_iter().next())
            .map(|a| a.adjclose);

        let gmtoffset = data.meta.as_ref().and_then(|m| m.gmtoffset).unwrap_or(0);
        let auto_adjust = request.param_bool("auto_adjust", true);
        let frequency = request.frequency();

        let mut bars: Vec<Bar> = Vec::with_capacity(timestamps.len());
        let mut partial = 0usize;

        for (i, &ts) in timestamps.iter().enumerate() {
            let timestamp = exchange_time(ts, gmtoffset, frequency).ok_or_else(|| {
                DataError::ResponseFormatChanged(format!("invalid timestamp: {ts}"))
            })?;

            let open = quote.open.get(i).copied().flatten();
            let high = quote.high.get(i).copied().flatten();
            let low = quote.low.get(i).copied().flatten();
            let close = quote.close.get(i).copied().flatten();
            let volume = quote.volume.get(i).copied().flatten();

            let (Some(mut open), Some(mut high), Some(mut low), Some(mut close)) =
                (open, high, low, close)
            else {
                // Holidays/non-trading slots come back all-null
                if open.is_some() || high.is_some() || low.is_some() || close.is_some() {
                    partial += 1;
                }
                continue;
            };

            if auto_adjust {
                let adj = adj_closes.as_ref().and_then(|v| v.get(i).copied().flatten());
                if let Some(adj) = adj.filter(|_| close != 0.0) {
                    let ratio = adj / close;
                    open *= ratio;
                    high *= ratio;
                    low *= ratio;
                    close = adj;
                }
            }

            if !in_date_range(timestamp, Some(range.0), Some(range.1)) {
                continue;
            }

            bars.push(Bar {
                timestamp,
                open,
                high,
                low,
                close,
                volume: volume.unwrap_or(0.0),
            });
        }

        if partial > 0 {
            warn!(symbol, rows = partial, "skipped rows with partial OHLC values");
        }

        bars.sort_by_key(|b| b.timestamp);
        let before = bars.len();
        // dedup_by_key keeps the first; reverse so the latest update wins
        bars.reverse();
        bars.dedup_by_key(|b| b.timestamp);
        bars.reverse();
        if bars.len() != before {
            debug!(symbol, dropped = before - bars.len(), "dropped duplicate timestamps");
        }

        if bars.is_empty() {
            return Err(not_found());
        }

        let mut metadata = Metadata::new();
        metadata.insert("provider".into(), json!(self.name()));
        metadata.insert("symbol".into(), json!(symbol));
        metadata.insert("frequency".into(), json!(frequency.code()));
        metadata.insert("start_date".into(), json!(range.0.to_string()));
        metadata.insert("end_date".into(), json!(range.1.to_string()));
        metadata.insert("rows_count".into(), json!(bars.len()));
        if let Some(meta) = data.meta {
            if let Some(currency) = meta.currency {
                metadata.insert("currency".into(), json!(currency));
            }
            if let Some(exchange) = meta.exchange_name {
                metadata.insert("exchange".into(), json!(exchange));
            }
        }

        MarketData::new(symbol, frequency, self.name(), bars, metadata)
    }
}

/// Convert a UTC epoch to exchange wall-clock time. Daily and longer bars
/// are truncated to midnight so they index by trading date.
fn exchange_time(ts: i64, gmtoffset: i64, frequency: DataFrequency) -> Option<NaiveDateTime> {
    let local = chrono::DateTime::from_timestamp(ts.checked_add(gmtoffset)?, 0)?.naive_utc();
    if frequency.is_intraday() {
        Some(local)
    } else {
        local.date().and_hms_opt(0, 0, 0)
    }
}

impl DataProvider for NetworkProvider {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn fetch(&self, request: &MarketDataRequest) -> Result<MarketData, DataError> {
        let interval =
            Self::interval(request.frequency()).ok_or_else(|| DataError::UnsupportedFrequency {
                provider: self.name().to_string(),
                frequency: request.frequency(),
            })?;

        let (start, end) = self.effective_range(request);
        let period1 = start
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or_default();
        let period2 = end
            .and_hms_opt(23, 59, 59)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or_default();
        let prepost = request.param_bool("prepost", false);

        let query = [
            ("period1", period1.to_string()),
            ("period2", period2.to_string()),
            ("interval", interval.to_string()),
            ("includePrePost", prepost.to_string()),
            ("includeAdjustedClose", "true".to_string()),
            ("events", "div|split".to_string()),
        ];

        let chart = self.fetch_chart(request.symbol(), &query)?;
        let data = self.parse_response(request, (start, end), chart)?;

        info!(
            symbol = data.symbol(),
            frequency = %data.frequency(),
            rows = data.len(),
            "fetched market data"
        );
        Ok(data)
    }

    fn validate_symbol(&self, symbol: &str, frequency: DataFrequency) -> bool {
        let today = chrono::Utc::now().date_naive();
        let request = MarketDataRequest::builder(symbol)
            .frequency(frequency)
            .range(today - ChronoDuration::days(40), today)
            .build();
        match request {
            Ok(request) => self.fetch(&request).is_ok(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> NetworkProvider {
        NetworkProvider::new().unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn request(frequency: DataFrequency) -> MarketDataRequest {
        MarketDataRequest::builder("AAPL")
            .range(date(2024, 1, 2), date(2024, 1, 4))
            .frequency(frequency)
            .build()
            .unwrap()
    }

    fn parse(req: &MarketDataRequest, body: &str) -> Result<MarketData, DataError> {
        let resp: ChartResponse = serde_json::from_str(body).unwrap();
        let range = (req.start_date().unwrap(), req.end_date().unwrap());
        provider().parse_response(req, range, resp)
    }

    // 2024-01-02..04 14:30 UTC (NYSE open), exchange offset -5h
    const DAILY_BODY: &str = r#"{"chart":{"result":[{
        "meta":{"currency":"USD","exchangeName":"NMS","gmtoffset":-18000},
        "timestamp":[1704205800,1704292200,1704378600,1704465000],
        "indicators":{
            "quote":[{"open":[187.15,184.22,null,181.99],
                      "high":[188.44,185.88,null,182.76],
                      "low":[183.89,183.43,null,180.17],
                      "close":[185.64,184.25,null,181.18],
                      "volume":[82488700,58414500,null,62303300]}],
            "adjclose":[{"adjclose":[92.82,92.125,null,90.59]}]}}],
        "error":null}}"#;

    #[test]
    fn interval_mapping_rejects_four_hour() {
        assert_eq!(NetworkProvider::interval(DataFrequency::Weekly), Some("1wk"));
        assert_eq!(NetworkProvider::interval(DataFrequency::Minute1), Some("1m"));
        assert_eq!(NetworkProvider::interval(DataFrequency::Hour4), None);
    }

    #[test]
    fn four_hour_request_fails_before_any_network_call() {
        let err = provider().fetch(&request(DataFrequency::Hour4)).unwrap_err();
        assert!(matches!(err, DataError::UnsupportedFrequency { .. }));
    }

    #[test]
    fn parses_and_adjusts_daily_bars() {
        let req = request(DataFrequency::Daily);
        let data = parse(&req, DAILY_BODY).unwrap();

        // null row skipped, 2024-01-05 outside range
        assert_eq!(data.len(), 2);
        assert_eq!(data.symbol(), "AAPL");
        assert_eq!(data.provider(), "yahoo_finance");
        assert_eq!(
            data.first_timestamp(),
            date(2024, 1, 2).and_hms_opt(0, 0, 0).unwrap()
        );
        let first = data.bars()[0];
        assert!((first.close - 92.82).abs() < 1e-9);
        assert!((first.open - 187.15 * 92.82 / 185.64).abs() < 1e-9);
        assert_eq!(first.volume, 82_488_700.0);
        assert_eq!(data.metadata_str("currency"), Some("USD"));
        assert_eq!(data.metadata_str("frequency"), Some("1d"));
    }

    #[test]
    fn auto_adjust_can_be_disabled() {
        let req = MarketDataRequest::builder("AAPL")
            .range(date(2024, 1, 2), date(2024, 1, 4))
            .param("auto_adjust", false)
            .build()
            .unwrap();
        let data = parse(&req, DAILY_BODY).unwrap();
        assert!((data.bars()[0].close - 185.64).abs() < 1e-9);
    }

    #[test]
    fn intraday_keeps_exchange_clock_time() {
        let req = request(DataFrequency::Hour1);
        let data = parse(&req, DAILY_BODY).unwrap();
        assert_eq!(
            data.first_timestamp(),
            date(2024, 1, 2).and_hms_opt(9, 30, 0).unwrap()
        );
    }

    #[test]
    fn not_found_error_body_maps_to_symbol_not_found() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        let err = parse(&request(DataFrequency::Daily), body).unwrap_err();
        assert!(matches!(err, DataError::SymbolNotFound { symbol } if symbol == "AAPL"));
    }

    #[test]
    fn empty_result_is_an_error_not_empty_data() {
        let body = r#"{"chart":{"result":[{"meta":{},"indicators":{"quote":[{}]}}],"error":null}}"#;
        let err = parse(&request(DataFrequency::Daily), body).unwrap_err();
        assert!(matches!(err, DataError::SymbolNotFound { .. }));
    }

    #[test]
    fn other_service_errors_are_format_errors() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Bad Request","description":"Invalid input"}}}"#;
        let err = parse(&request(DataFrequency::Daily), body).unwrap_err();
        assert!(matches!(err, DataError::ResponseFormatChanged(_)));
    }

    #[test]
    fn duplicate_timestamps_keep_latest_row() {
        let body = r#"{"chart":{"result":[{
            "meta":{"gmtoffset":0},
            "timestamp":[1704153600,1704153600],
            "indicators":{"quote":[{"open":[1.0,2.0],"high":[1.0,2.0],"low":[1.0,2.0],
                                    "close":[1.0,2.0],"volume":[10,20]}]}}],"error":null}}"#;
        let req = MarketDataRequest::builder("X")
            .range(date(2024, 1, 1), date(2024, 1, 1))
            .build()
            .unwrap();
        let data = parse(&req, body).unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data.bars()[0].close, 2.0);
    }

    #[test]
    fn missing_bounds_default_to_lookback_window() {
        let p = provider();
        let req = MarketDataRequest::builder("AAPL")
            .end(date(2024, 6, 30))
            .build()
            .unwrap();
        let (start, end) = p.effective_range(&req);
        assert_eq!(end, date(2024, 6, 30));
        assert_eq!((end - start).num_days(), 365);
    }
}
