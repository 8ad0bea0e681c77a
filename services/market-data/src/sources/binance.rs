use crate::types::*;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const SOURCE_NAME: &str = "binance";
const DEFAULT_BASE_URL: &str = "https://api.binance.com";

/// Internal health tracking for API-free health checks
struct HealthTracker {
    last_success_ms: AtomicU64,
    last_failure_ms: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    last_latency_ms: AtomicU64,
}

impl HealthTracker {
    fn new() -> Self {
        Self {
            last_success_ms: AtomicU64::new(0),
            last_failure_ms: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            last_latency_ms: AtomicU64::new(0),
        }
    }

    fn record_success(&self, latency_ms: u64) {
        let now_ms = Utc::now().timestamp_millis() as u64;
        self.last_success_ms.store(now_ms, Ordering::Relaxed);
        self.last_latency_ms.store(latency_ms, Ordering::Relaxed);
        self.success_count.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        let now_ms = Utc::now().timestamp_millis() as u64;
        self.last_failure_ms.store(now_ms, Ordering::Relaxed);
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    fn is_healthy(&self) -> bool {
        let last_success = self.last_success_ms.load(Ordering::Relaxed);
        let last_failure = self.last_failure_ms.load(Ordering::Relaxed);
        last_success > 0 && (last_failure == 0 || last_success >= last_failure)
    }

    fn success_rate(&self) -> f64 {
        let successes = self.success_count.load(Ordering::Relaxed);
        let failures = self.failure_count.load(Ordering::Relaxed);
        let total = successes + failures;
        if total == 0 {
            return 1.0;
        }
        successes as f64 / total as f64
    }
}

/// Binance spot REST client (public endpoints, no key needed)
///
/// Serves both live quotes (`/api/v3/ticker/price`) and candles
/// (`/api/v3/klines`) for pairs written as "BTC/USDT".
pub struct BinanceClient {
    client: Client,
    base_url: String,
    rate_limiter: tokio::sync::Semaphore,
    health_tracker: HealthTracker,
}

impl BinanceClient {
    /// Per-request timeout for individual API calls
    const REQUEST_TIMEOUT_SECS: u64 = 10;

    /// Concurrent in-flight requests against the exchange
    const MAX_CONCURRENT_REQUESTS: usize = 8;

    pub fn new(base_url: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| MarketDataError::ApiError(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            rate_limiter: tokio::sync::Semaphore::new(Self::MAX_CONCURRENT_REQUESTS),
            health_tracker: HealthTracker::new(),
        })
    }

    /// "BTC/USDT" -> "BTCUSDT"
    pub fn exchange_symbol(pair: &str) -> String {
        pair.trim()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_uppercase()
    }

    /// Rate-limited GET with per-request timeout and one retry on 429
    async fn rate_limited_request<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let request_start = Instant::now();
        let url = format!("{}{}", self.base_url, endpoint);

        for attempt in 0..2 {
            let _permit = self.rate_limiter.acquire().await.map_err(|e| {
                self.health_tracker.record_failure();
                MarketDataError::ApiError(e.to_string())
            })?;

            let request_future = self.client.get(&url).query(query).send();
            let response = match tokio::time::timeout(
                Duration::from_secs(Self::REQUEST_TIMEOUT_SECS),
                request_future,
            )
            .await
            {
                Ok(Ok(resp)) => resp,
                Ok(Err(e)) => {
                    self.health_tracker.record_failure();
                    return Err(MarketDataError::ApiError(e.to_string()));
                }
                Err(_) => {
                    self.health_tracker.record_failure();
                    return Err(MarketDataError::ApiError(format!(
                        "Binance request to {} timed out after {}s",
                        endpoint,
                        Self::REQUEST_TIMEOUT_SECS
                    )));
                }
            };

            let status = response.status();

            if status == 429 || status == 418 {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok());

                if attempt == 0 && status == 429 {
                    let wait_secs = retry_after.unwrap_or(5).min(60);
                    tracing::warn!(
                        "Binance rate limited, waiting {} seconds before retry",
                        wait_secs
                    );
                    tokio::time::sleep(Duration::from_secs(wait_secs)).await;
                    continue;
                }

                self.health_tracker.record_failure();
                return Err(MarketDataError::RateLimit {
                    source_name: SOURCE_NAME.to_string(),
                    retry_after,
                });
            }

            if !status.is_success() {
                self.health_tracker.record_failure();
                let text = response.text().await.unwrap_or_default();
                // -1121 is Binance's "Invalid symbol."
                if status == 400 && text.contains("-1121") {
                    return Err(MarketDataError::SymbolNotFound(text));
                }
                return Err(MarketDataError::ApiError(format!(
                    "Binance API error ({}): {}",
                    status, text
                )));
            }

            let latency_ms = request_start.elapsed().as_millis() as u64;
            self.health_tracker.record_success(latency_ms);

            return response.json::<T>().await.map_err(|e| {
                self.health_tracker.record_failure();
                MarketDataError::InvalidResponse(e.to_string())
            });
        }

        Err(MarketDataError::ApiError(
            "Unexpected retry loop exit".to_string(),
        ))
    }

    /// Current price as a full point (symbol, source, timestamp)
    pub async fn get_price(&self, pair: &str) -> Result<PricePoint> {
        let ticker: TickerPrice = self
            .rate_limited_request(
                "/api/v3/ticker/price",
                &[("symbol", Self::exchange_symbol(pair))],
            )
            .await?;

        Ok(PricePoint {
            symbol: normalize_pair(pair),
            source: SOURCE_NAME.to_string(),
            timestamp: Utc::now(),
            price: parse_decimal(&ticker.price)?,
        })
    }

    /// Single-symbol tickers; unknown symbols are left out
    async fn tickers_one_by_one(&self, exchange_symbols: &[&String]) -> Result<Vec<TickerPrice>> {
        let mut tickers = Vec::with_capacity(exchange_symbols.len());
        for symbol in exchange_symbols {
            match self
                .rate_limited_request::<TickerPrice>(
                    "/api/v3/ticker/price",
                    &[("symbol", (*symbol).clone())],
                )
                .await
            {
                Ok(ticker) => tickers.push(ticker),
                Err(MarketDataError::SymbolNotFound(_)) => {
                    tracing::warn!(symbol = %symbol, "Binance does not know symbol, skipped");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(tickers)
    }

    /// Klines, oldest first
    ///
    /// Row format: `[open_time_ms, "open", "high", "low", "close", "volume", close_time_ms, ...]`
    pub async fn get_candles(
        &self,
        pair: &str,
        timeframe: TimeFrame,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let limit = limit.clamp(1, 1000);
        let rows: Vec<Vec<serde_json::Value>> = self
            .rate_limited_request(
                "/api/v3/klines",
                &[
                    ("symbol", Self::exchange_symbol(pair)),
                    ("interval", timeframe.as_str().to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        rows.iter().map(|row| parse_kline(row)).collect()
    }
}

#[async_trait::async_trait]
impl QuoteFeed for BinanceClient {
    async fn price(&self, symbol: &str) -> Result<Decimal> {
        Ok(self.get_price(symbol).await?.price)
    }

    async fn prices(&self, symbols: &[String]) -> Result<HashMap<String, Decimal>> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }

        // One exchange symbol may stand for several spellings of the same pair
        let mut wanted: HashMap<String, Vec<&String>> = HashMap::new();
        for symbol in symbols {
            wanted
                .entry(Self::exchange_symbol(symbol))
                .or_default()
                .push(symbol);
        }

        let mut exchange_symbols: Vec<&String> = wanted.keys().collect();
        exchange_symbols.sort();
        let param = serde_json::to_string(&exchange_symbols)
            .map_err(|e| MarketDataError::InvalidResponse(e.to_string()))?;

        let tickers = match self
            .rate_limited_request::<Vec<TickerPrice>>("/api/v3/ticker/price", &[("symbols", param)])
            .await
        {
            Ok(tickers) => tickers,
            // One unknown symbol fails the whole batch
            Err(MarketDataError::SymbolNotFound(body)) => {
                tracing::warn!("Binance batch quote rejected ({}), quoting one by one", body);
                self.tickers_one_by_one(&exchange_symbols).await?
            }
            Err(e) => return Err(e),
        };

        let mut out = HashMap::with_capacity(symbols.len());
        for ticker in tickers {
            let Some(requested) = wanted.get(&ticker.symbol) else {
                continue;
            };
            let price = parse_decimal(&ticker.price)?;
            for symbol in requested {
                out.insert((*symbol).clone(), price);
            }
        }

        if out.len() < symbols.len() {
            tracing::debug!(
                requested = symbols.len(),
                returned = out.len(),
                "Binance batch quote missing some symbols"
            );
        }

        Ok(out)
    }

    async fn health(&self) -> SourceHealth {
        let last_success_ms = self.health_tracker.last_success_ms.load(Ordering::Relaxed);
        let last_success = if last_success_ms > 0 {
            DateTime::from_timestamp_millis(last_success_ms as i64)
        } else {
            None
        };

        let is_healthy = self.health_tracker.is_healthy();

        SourceHealth {
            source: SOURCE_NAME.to_string(),
            is_healthy,
            last_success,
            last_error: if is_healthy {
                None
            } else {
                Some("Recent failures detected".to_string())
            },
            success_rate: self.health_tracker.success_rate(),
            avg_latency_ms: self.health_tracker.last_latency_ms.load(Ordering::Relaxed),
        }
    }

    fn name(&self) -> &str {
        SOURCE_NAME
    }
}

#[async_trait::async_trait]
impl CandleSource for BinanceClient {
    async fn candles(&self, symbol: &str, timeframe: TimeFrame, limit: usize) -> Result<Vec<Candle>> {
        self.get_candles(symbol, timeframe, limit).await
    }
}

// Response types for Binance API
#[derive(Debug, serde::Deserialize)]
struct TickerPrice {
    symbol: String,
    price: String,
}

fn parse_decimal(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw)
        .map_err(|e| MarketDataError::InvalidResponse(format!("bad decimal '{}': {}", raw, e)))
}

fn parse_kline(row: &[serde_json::Value]) -> Result<Candle> {
    if row.len() < 6 {
        return Err(MarketDataError::InvalidResponse(format!(
            "kline row has {} fields, expected at least 6",
            row.len()
        )));
    }

    let open_time_ms = row[0]
        .as_i64()
        .ok_or_else(|| MarketDataError::InvalidResponse("kline open time is not an integer".to_string()))?;
    let open_time = DateTime::from_timestamp_millis(open_time_ms)
        .ok_or_else(|| MarketDataError::InvalidResponse(format!("kline open time out of range: {}", open_time_ms)))?;

    let field = |idx: usize| -> Result<Decimal> {
        match &row[idx] {
            serde_json::Value::String(s) => parse_decimal(s),
            other => Err(MarketDataError::InvalidResponse(format!(
                "kline field {} is not a string: {}",
                idx, other
            ))),
        }
    };

    Ok(Candle {
        open_time,
        open: field(1)?,
        high: field(2)?,
        low: field(3)?,
        close: field(4)?,
        volume: field(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    async fn client_for(server: &MockServer) -> BinanceClient {
        BinanceClient::new(Some(server.uri())).unwrap()
    }

    #[test]
    fn test_exchange_symbol() {
        assert_eq!(BinanceClient::exchange_symbol("BTC/USDT"), "BTCUSDT");
        assert_eq!(BinanceClient::exchange_symbol(" eth/usdt "), "ETHUSDT");
        assert_eq!(BinanceClient::exchange_symbol("SOLUSDT"), "SOLUSDT");
    }

    #[tokio::test]
    async fn test_price_single_symbol() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/ticker/price"))
            .and(query_param("symbol", "BTCUSDT"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"symbol": "BTCUSDT", "price": "43000.10000000"})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let price = client.price("BTC/USDT").await.unwrap();
        assert_eq!(price, d("43000.1"));

        let health = client.health().await;
        assert!(health.is_healthy);
        assert_eq!(health.source, "binance");
    }

    #[tokio::test]
    async fn test_prices_batch_maps_back_to_requested_symbols() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/ticker/price"))
            .and(query_param("symbols", r#"["BTCUSDT","ETHUSDT"]"#))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"symbol": "BTCUSDT", "price": "43000.00"},
                {"symbol": "ETHUSDT", "price": "2300.50"}
            ])))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let symbols = vec!["BTC/USDT".to_string(), "ETH/USDT".to_string()];
        let prices = client.prices(&symbols).await.unwrap();

        assert_eq!(prices.len(), 2);
        assert_eq!(prices["BTC/USDT"], d("43000"));
        assert_eq!(prices["ETH/USDT"], d("2300.5"));
    }

    #[tokio::test]
    async fn test_prices_empty_input_skips_request() {
        let server = MockServer::start().await;
        let client = client_for(&server).await;
        let prices = client.prices(&[]).await.unwrap();
        assert!(prices.is_empty());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_symbol_maps_to_symbol_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/ticker/price"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({"code": -1121, "msg": "Invalid symbol."})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let err = client.price("NOPE/USDT").await.unwrap_err();
        assert!(matches!(err, MarketDataError::SymbolNotFound(_)));
        assert!(!client.health().await.is_healthy);
    }

    #[tokio::test]
    async fn test_unknown_symbol_in_batch_falls_back_per_symbol() {
        let server = MockServer::start().await;
        let invalid = ResponseTemplate::new(400)
            .set_body_json(json!({"code": -1121, "msg": "Invalid symbol."}));
        Mock::given(method("GET"))
            .and(path("/api/v3/ticker/price"))
            .and(query_param("symbols", r#"["BTCUSDT","DEADUSDT"]"#))
            .respond_with(invalid.clone())
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v3/ticker/price"))
            .and(query_param("symbol", "DEADUSDT"))
            .respond_with(invalid)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v3/ticker/price"))
            .and(query_param("symbol", "BTCUSDT"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"symbol": "BTCUSDT", "price": "43000.00"})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let symbols = vec!["BTC/USDT".to_string(), "DEAD/USDT".to_string()];
        let prices = client.prices(&symbols).await.unwrap();

        assert_eq!(prices.len(), 1);
        assert_eq!(prices["BTC/USDT"], d("43000"));
    }

    #[tokio::test]
    async fn test_rate_limit_retries_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/ticker/price"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v3/ticker/price"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"symbol": "BTCUSDT", "price": "42000"})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let price = client.price("BTC/USDT").await.unwrap();
        assert_eq!(price, d("42000"));
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_candles_parse_klines() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/klines"))
            .and(query_param("symbol", "ETHUSDT"))
            .and(query_param("interval", "4h"))
            .and(query_param("limit", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                [1700000000000i64, "2000.0", "2050.5", "1990.0", "2040.0", "1234.5", 1700014399999i64, "0", 10, "0", "0", "0"],
                [1700014400000i64, "2040.0", "2060.0", "2010.0", "2015.0", "987.0", 1700028799999i64, "0", 8, "0", "0", "0"]
            ])))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let candles = client.candles("ETH/USDT", TimeFrame::Hour4, 2).await.unwrap();

        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].high, d("2050.5"));
        assert_eq!(candles[1].close, d("2015"));
        assert!(candles[0].open_time < candles[1].open_time);
    }

    #[test]
    fn test_parse_kline_rejects_short_rows() {
        let row = vec![json!(1700000000000i64), json!("1")];
        assert!(parse_kline(&row).is_err());
    }
}
