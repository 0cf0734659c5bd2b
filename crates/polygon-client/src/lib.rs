use analysis_core::{AnalysisError, Bar, BarHistoryProvider, QuoteProvider};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const BASE_URL: &str = "https://api.polygon.io";

/// Sliding-window rate limiter: at most `max_requests` per `window` duration.
#[derive(Clone)]
struct RateLimiter {
    timestamps: Arc<Mutex<VecDeque<Instant>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            timestamps: Arc::new(Mutex::new(VecDeque::new())),
            max_requests: max_requests.max(1),
            window,
        }
    }

    async fn acquire(&self) {
        loop {
            let mut ts = self.timestamps.lock().await;
            let now = Instant::now();

            while let Some(&front) = ts.front() {
                if now.duration_since(front) >= self.window {
                    ts.pop_front();
                } else {
                    break;
                }
            }

            if ts.len() < self.max_requests {
                ts.push_back(now);
                return;
            }
            let Some(oldest) = ts.front().copied() else {
                return;
            };

            // Wait for the oldest request to leave the window
            let sleep_dur = (oldest + self.window).duration_since(now) + Duration::from_millis(50);
            drop(ts);
            tracing::debug!("Rate limiter: waiting {:.1}s for Polygon API slot", sleep_dur.as_secs_f64());
            tokio::time::sleep(sleep_dur).await;
        }
    }
}

/// Daily bars and last-trade quotes from the Polygon REST API
#[derive(Clone)]
pub struct PolygonClient {
    api_key: String,
    base_url: String,
    client: Client,
    rate_limiter: RateLimiter,
    retry_wait: Duration,
}

impl PolygonClient {
    pub fn new(api_key: String) -> Self {
        // Free tier users should set POLYGON_RATE_LIMIT=5
        let rate_limit: usize = std::env::var("POLYGON_RATE_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(500);

        let client = Client::builder()
            .timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            api_key,
            base_url: BASE_URL.to_string(),
            client,
            rate_limiter: RateLimiter::new(rate_limit, Duration::from_secs(60)),
            retry_wait: Duration::from_secs(15),
        }
    }

    /// Build from `POLYGON_API_KEY`
    pub fn from_env() -> Result<Self, AnalysisError> {
        let api_key = std::env::var("POLYGON_API_KEY")
            .map_err(|_| AnalysisError::DataUnavailable("POLYGON_API_KEY is not set".to_string()))?;
        Ok(Self::new(api_key))
    }

    /// Point at another host, e.g. a mock server
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Pause before retrying a 429 response
    pub fn with_retry_wait(mut self, retry_wait: Duration) -> Self {
        self.retry_wait = retry_wait;
        self
    }

    /// Send a request with rate limiting and automatic 429 retry.
    async fn send_request(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, AnalysisError> {
        let request = builder.build().map_err(|e| AnalysisError::ApiError(e.to_string()))?;

        for attempt in 0..3u32 {
            self.rate_limiter.acquire().await;
            let req_clone = request.try_clone()
                .ok_or_else(|| AnalysisError::ApiError("Cannot clone request".to_string()))?;
            let response = self.client.execute(req_clone).await
                .map_err(|e| AnalysisError::ApiError(e.to_string()))?;

            if response.status().as_u16() != 429 {
                return Ok(response);
            }

            tracing::warn!(
                "Polygon 429 rate limited, waiting {:.1}s before retry {}/3",
                self.retry_wait.as_secs_f64(),
                attempt + 1
            );
            tokio::time::sleep(self.retry_wait).await;
        }

        Err(AnalysisError::ApiError("Rate limited by Polygon after 3 retries".to_string()))
    }

    /// Get aggregates (bars) for a symbol, oldest first
    pub async fn get_aggregates(
        &self,
        symbol: &str,
        multiplier: u32,
        timespan: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Bar>, AnalysisError> {
        let url = format!(
            "{}/v2/aggs/ticker/{}/range/{}/{}/{}/{}",
            self.base_url,
            symbol,
            multiplier,
            timespan,
            from.format("%Y-%m-%d"),
            to.format("%Y-%m-%d")
        );

        let response = self.send_request(
            self.client.get(&url).query(&[
                ("apiKey", self.api_key.as_str()),
                ("adjusted", "true"),
                ("sort", "asc"),
                ("limit", "50000"),
            ])
        ).await?;

        if !response.status().is_success() {
            return Err(AnalysisError::ApiError(format!(
                "HTTP {}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }

        let agg_response: AggregateResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::ApiError(e.to_string()))?;

        let mut bars: Vec<Bar> = agg_response
            .results
            .into_iter()
            .filter_map(|r| {
                let timestamp = DateTime::from_timestamp_millis(r.t)?;
                Some(Bar {
                    timestamp,
                    open: r.o,
                    high: r.h,
                    low: r.l,
                    close: r.c,
                    volume: r.v,
                })
            })
            .collect();
        bars.sort_by_key(|b| b.timestamp);
        bars.dedup_by_key(|b| b.timestamp);
        Ok(bars)
    }

    /// At least `min_bars` daily bars ending today
    pub async fn get_daily_bars(&self, symbol: &str, min_bars: usize) -> Result<Vec<Bar>, AnalysisError> {
        let to = Utc::now();
        let from = to - chrono::Duration::days(calendar_days_for(min_bars));
        let bars = self.get_aggregates(symbol, 1, "day", from, to).await?;

        if bars.len() < min_bars {
            return Err(AnalysisError::DataUnavailable(format!(
                "{} has {} daily bars, {} required",
                symbol,
                bars.len(),
                min_bars
            )));
        }
        tracing::info!("Fetched {} daily bars for {}", bars.len(), symbol);
        Ok(bars)
    }

    pub async fn get_snapshot(&self, symbol: &str) -> Result<SnapshotTicker, AnalysisError> {
        let url = format!(
            "{}/v2/snapshot/locale/us/markets/stocks/tickers/{}",
            self.base_url, symbol
        );

        let response = self.send_request(
            self.client.get(&url).query(&[("apiKey", &self.api_key)])
        ).await?;

        if !response.status().is_success() {
            return Err(AnalysisError::ApiError(format!(
                "Snapshot HTTP {}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }

        let snap_response: SnapshotResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::ApiError(e.to_string()))?;

        Ok(snap_response.ticker)
    }
}

/// Calendar days that comfortably hold `trading_days` sessions
fn calendar_days_for(trading_days: usize) -> i64 {
    trading_days as i64 * 365 / 252 + 30
}

#[async_trait]
impl BarHistoryProvider for PolygonClient {
    async fn fetch_history(&self, symbol: &str, min_bars: usize) -> Result<Vec<Bar>, AnalysisError> {
        self.get_daily_bars(symbol, min_bars).await
    }
}

#[async_trait]
impl QuoteProvider for PolygonClient {
    async fn latest_price(&self, symbol: &str) -> Result<Option<f64>, AnalysisError> {
        let snapshot = self.get_snapshot(symbol).await?;
        Ok(snapshot.last_trade.and_then(|lt| lt.p))
    }
}

// Response structures
#[derive(Debug, Deserialize)]
struct AggregateResponse {
    #[serde(default)]
    results: Vec<AggregateResult>,
}

#[derive(Debug, Deserialize)]
struct AggregateResult {
    t: i64, // timestamp
    o: f64, // open
    h: f64, // high
    l: f64, // low
    c: f64, // close
    v: f64, // volume
}

#[derive(Debug, Deserialize)]
struct SnapshotResponse {
    ticker: SnapshotTicker,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotTicker {
    pub day: Option<SnapshotDay>,
    #[serde(rename = "lastTrade")]
    pub last_trade: Option<SnapshotLastTrade>,
    #[serde(rename = "prevDay")]
    pub prev_day: Option<SnapshotDay>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotDay {
    pub o: Option<f64>,
    pub h: Option<f64>,
    pub l: Option<f64>,
    pub c: Option<f64>,
    pub v: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotLastTrade {
    pub p: Option<f64>,
    pub t: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, path_regex, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> PolygonClient {
        PolygonClient::new("test-key".to_string())
            .with_base_url(server.uri())
            .with_retry_wait(Duration::from_millis(10))
    }

    fn aggregates(n: usize) -> serde_json::Value {
        let start = 1_704_153_600_000i64; // 2024-01-02
        let results: Vec<serde_json::Value> = (0..n)
            .map(|i| {
                let close = 100.0 + i as f64;
                json!({
                    "t": start + i as i64 * 86_400_000,
                    "o": close - 0.5,
                    "h": close + 1.0,
                    "l": close - 1.0,
                    "c": close,
                    "v": 1_000_000.0,
                })
            })
            .collect();
        json!({ "ticker": "AAPL", "status": "OK", "resultsCount": n, "results": results })
    }

    #[tokio::test]
    async fn test_get_aggregates_parses_bars() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/aggs/ticker/AAPL/range/1/day/2024-01-01/2024-03-01"))
            .and(query_param("apiKey", "test-key"))
            .and(query_param("adjusted", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(aggregates(3)))
            .mount(&server)
            .await;

        let from = "2024-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let to = "2024-03-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let bars = client_for(&server)
            .get_aggregates("AAPL", 1, "day", from, to)
            .await
            .unwrap();

        assert_eq!(bars.len(), 3);
        assert_eq!(bars[0].close, 100.0);
        assert_eq!(bars[2].high, 103.0);
        assert!(bars.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test]
    async fn test_fetch_history_requires_min_bars() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/v2/aggs/ticker/MSFT/range/1/day/.+"))
            .respond_with(ResponseTemplate::new(200).set_body_json(aggregates(50)))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.fetch_history("MSFT", 200).await.unwrap_err();
        assert!(matches!(err, AnalysisError::DataUnavailable(_)));

        let bars = client.fetch_history("MSFT", 40).await.unwrap();
        assert_eq!(bars.len(), 50);
    }

    #[tokio::test]
    async fn test_http_error_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = client_for(&server).fetch_history("AAPL", 10).await.unwrap_err();
        assert!(matches!(err, AnalysisError::ApiError(msg) if msg.contains("500")));
    }

    #[tokio::test]
    async fn test_retries_after_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(aggregates(5)))
            .mount(&server)
            .await;

        let bars = client_for(&server).fetch_history("AAPL", 5).await.unwrap();
        assert_eq!(bars.len(), 5);
    }

    #[tokio::test]
    async fn test_latest_price_from_last_trade() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/snapshot/locale/us/markets/stocks/tickers/AAPL"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "OK",
                "ticker": {
                    "ticker": "AAPL",
                    "day": { "o": 189.0, "h": 191.0, "l": 188.5, "c": 190.2, "v": 51234567.0 },
                    "lastTrade": { "p": 190.31, "s": 100, "t": 1717430400000i64 },
                    "prevDay": { "c": 188.9 }
                }
            })))
            .mount(&server)
            .await;

        let price = client_for(&server).latest_price("AAPL").await.unwrap();
        assert_eq!(price, Some(190.31));
    }

    #[tokio::test]
    async fn test_latest_price_without_trade() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/snapshot/locale/us/markets/stocks/tickers/NEWCO"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "OK",
                "ticker": { "ticker": "NEWCO" }
            })))
            .mount(&server)
            .await;

        let price = client_for(&server).latest_price("NEWCO").await.unwrap();
        assert_eq!(price, None);
    }

    #[test]
    fn test_calendar_window_covers_trading_days() {
        assert!(calendar_days_for(200) >= 290);
        assert!(calendar_days_for(0) > 0);
    }
}
