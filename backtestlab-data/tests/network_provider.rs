//! Network provider against a local one-shot HTTP server standing in for the
//! quote service. No test here touches the real internet.

use backtestlab_data::config::NetworkConfig;
use backtestlab_data::{
    DataError, DataFrequency, DataProvider, ErrorKind, MarketDataRequest, NetworkProvider,
    StockDataLoader,
};
use chrono::NaiveDate;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread::{self, JoinHandle};

struct Canned {
    status: u16,
    headers: &'static str,
    body: String,
}

impl Canned {
    fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: "",
            body: body.to_string(),
        }
    }
}

/// Serve each canned response to one connection, in order. Joining the
/// handle yields the request lines received.
fn serve(responses: Vec<Canned>) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let handle = thread::spawn(move || {
        let mut seen = Vec::new();
        for canned in responses {
            let (mut stream, _) = listener.accept().unwrap();

            let mut raw = Vec::new();
            let mut buf = [0u8; 1024];
            while !raw.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
            }
            let request = String::from_utf8_lossy(&raw);
            seen.push(request.lines().next().unwrap_or_default().to_string());

            let response = format!(
                "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n{}\r\n{}",
                canned.status,
                canned.body.len(),
                canned.headers,
                canned.body
            );
            stream.write_all(response.as_bytes()).unwrap();
            stream.flush().unwrap();
        }
        seen
    });

    (base_url, handle)
}

fn provider(base_url: &str, max_retries: u32) -> NetworkProvider {
    NetworkProvider::with_config(NetworkConfig {
        base_url: base_url.to_string(),
        timeout_secs: Some(5),
        max_retries,
        retry_base_delay_ms: 10,
        ..NetworkConfig::default()
    })
    .unwrap()
}

fn january(symbol: &str, frequency: DataFrequency) -> MarketDataRequest {
    MarketDataRequest::builder(symbol)
        .range(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        )
        .frequency(frequency)
        .build()
        .unwrap()
}

const NOT_FOUND_BODY: &str = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;

// Mondays 2024-01-01/08/15 at 14:30 UTC, NYSE offset
const WEEKLY_BODY: &str = r#"{"chart":{"result":[{
    "meta":{"currency":"USD","exchangeName":"NMS","gmtoffset":-18000},
    "timestamp":[1704119400,1704724200,1705329000],
    "indicators":{
        "quote":[{"open":[187.1,181.9,182.1],"high":[188.4,186.4,191.9],
                  "low":[180.1,180.2,180.3],"close":[181.1,185.9,191.5],
                  "volume":[300000000,250000000,null]}],
        "adjclose":[{"adjclose":[181.1,185.9,191.5]}]}}],"error":null}}"#;

#[test]
fn unknown_symbol_is_provider_error() {
    let (url, server) = serve(vec![Canned::json(404, NOT_FOUND_BODY)]);
    let err = provider(&url, 0)
        .fetch(&january("INVALID_SYMBOL_123", DataFrequency::Daily))
        .unwrap_err();

    assert!(matches!(&err, DataError::SymbolNotFound { symbol } if symbol == "INVALID_SYMBOL_123"));
    assert_eq!(err.kind(), ErrorKind::Provider);

    let seen = server.join().unwrap();
    assert!(seen[0].starts_with("GET /v8/finance/chart/INVALID_SYMBOL_123?"));
}

#[test]
fn weekly_fetch_sends_interval_and_normalizes_rows() {
    let (url, server) = serve(vec![Canned::json(200, WEEKLY_BODY)]);
    let data = provider(&url, 0)
        .fetch(&january("aapl", DataFrequency::Weekly))
        .unwrap();

    assert_eq!(data.symbol(), "AAPL");
    assert_eq!(data.frequency(), DataFrequency::Weekly);
    assert_eq!(data.len(), 3);
    assert_eq!(
        data.first_timestamp(),
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    );
    // null volume becomes zero rather than dropping the row
    assert_eq!(data.bars()[2].volume, 0.0);
    assert_eq!(data.metadata_str("exchange"), Some("NMS"));
    assert_eq!(data.metadata_str("start_date"), Some("2024-01-01"));
    assert_eq!(data.metadata_str("end_date"), Some("2024-01-31"));

    let seen = server.join().unwrap();
    assert!(seen[0].contains("interval=1wk"));
    assert!(seen[0].contains("includePrePost=false"));
    // 2024-01-01T00:00:00Z .. 2024-01-31T23:59:59Z
    assert!(seen[0].contains("period1=1704067200"));
    assert!(seen[0].contains("period2=1706745599"));
}

#[test]
fn rows_outside_requested_range_are_dropped() {
    let (url, server) = serve(vec![Canned::json(200, WEEKLY_BODY)]);
    let request = MarketDataRequest::builder("AAPL")
        .range(
            NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
        )
        .frequency(DataFrequency::Weekly)
        .build()
        .unwrap();
    let data = provider(&url, 0).fetch(&request).unwrap();

    assert_eq!(data.len(), 1);
    assert_eq!(
        data.first_timestamp().date(),
        NaiveDate::from_ymd_opt(2024, 1, 8).unwrap()
    );
    server.join().unwrap();
}

#[test]
fn rate_limit_without_retries_surfaces() {
    let (url, server) = serve(vec![Canned {
        status: 429,
        headers: "Retry-After: 7\r\n",
        body: String::new(),
    }]);
    let err = provider(&url, 0)
        .fetch(&january("AAPL", DataFrequency::Daily))
        .unwrap_err();

    assert!(matches!(err, DataError::RateLimited { retry_after_secs: 7 }));
    assert_eq!(server.join().unwrap().len(), 1);
}

#[test]
fn server_error_is_retried_when_enabled() {
    let (url, server) = serve(vec![
        Canned::json(503, "{}"),
        Canned::json(200, WEEKLY_BODY),
    ]);
    let data = provider(&url, 2)
        .fetch(&january("AAPL", DataFrequency::Weekly))
        .unwrap();

    assert_eq!(data.len(), 3);
    assert_eq!(server.join().unwrap().len(), 2);
}

#[test]
fn server_error_without_retries_is_unreachable() {
    let (url, server) = serve(vec![Canned::json(503, "{}")]);
    let err = provider(&url, 0)
        .fetch(&january("AAPL", DataFrequency::Daily))
        .unwrap_err();

    assert!(matches!(err, DataError::NetworkUnreachable(_)));
    server.join().unwrap();
}

#[test]
fn malformed_body_is_format_error() {
    let (url, server) = serve(vec![Canned::json(200, r#"{"unexpected":true}"#)]);
    let err = provider(&url, 0)
        .fetch(&january("AAPL", DataFrequency::Daily))
        .unwrap_err();

    assert!(matches!(err, DataError::ResponseFormatChanged(_)));
    server.join().unwrap();
}

#[test]
fn loader_routes_default_requests_to_network() {
    let (url, server) = serve(vec![Canned::json(200, WEEKLY_BODY)]);
    let loader = StockDataLoader::with_network(provider(&url, 0));

    let data = loader
        .get_data(&january("AAPL", DataFrequency::Weekly), None)
        .unwrap();
    assert_eq!(data.provider(), "yahoo_finance");
    server.join().unwrap();
}
