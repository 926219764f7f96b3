use analysis_core::{AnalysisError, CompanyOverview, DailyBar, NewsArticle};
use dashmap::DashMap;
use reqwest::Url;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub mod parse;
mod rate_limiter;
pub mod retry;
pub mod transport;

pub use parse::{parse_daily_series, parse_news_feed, parse_overview};
pub use retry::RetryPolicy;
pub use transport::{HttpTransport, Transport, TransportResponse};

use rate_limiter::RateLimiter;

pub const PROVIDER_NAME: &str = "Alpha Vantage";
pub const DEFAULT_BASE_URL: &str = "https://www.alphavantage.co";

/// Free tier allows 5 requests per minute
pub const MIN_REQUEST_INTERVAL: Duration = Duration::from_secs(12);
pub const CACHE_TTL: Duration = Duration::from_secs(300);

/// Provider endpoints the scoring pipeline consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Overview,
    DailyAdjusted,
    NewsSentiment,
}

impl Endpoint {
    pub fn function(&self) -> &'static str {
        match self {
            Endpoint::Overview => "OVERVIEW",
            Endpoint::DailyAdjusted => "TIME_SERIES_DAILY_ADJUSTED",
            Endpoint::NewsSentiment => "NEWS_SENTIMENT",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub api_key: String,
    pub base_url: String,
    pub min_interval: Duration,
    pub cache_ttl: Duration,
    pub retry: RetryPolicy,
    pub http_timeout: Duration,
}

impl GatewayConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            min_interval: MIN_REQUEST_INTERVAL,
            cache_ttl: CACHE_TTL,
            retry: RetryPolicy::default(),
            http_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

/// Where a fetch was answered from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchSource {
    Cache,
    Network,
    Failed,
    TimedOut,
}

/// Everything fetched for one symbol. A `None` field means that call failed.
#[derive(Debug, Clone, Default)]
pub struct ProviderBundle {
    pub overview: Option<CompanyOverview>,
    pub daily_series: Option<Vec<DailyBar>>,
    pub news: Option<Vec<NewsArticle>>,
    /// Endpoint calls made for this bundle, e.g. `OVERVIEW:IBM (cache)`
    pub requests: Vec<String>,
}

/// Internal cache entry with timestamp
struct CacheEntry {
    value: Value,
    stored_at: Instant,
}

/// Rate-limited, caching access to the provider.
///
/// One gateway owns one request budget. Share it behind an `Arc` when several
/// analyses run at once so they all draw from the same budget.
pub struct Gateway {
    config: GatewayConfig,
    transport: Arc<dyn Transport>,
    cache: DashMap<String, CacheEntry>,
    /// One lock per URL so concurrent misses on the same key make a single call
    in_flight: DashMap<String, Arc<Mutex<()>>>,
    limiter: RateLimiter,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Self {
        let transport = Arc::new(HttpTransport::new(config.http_timeout));
        Self::with_transport(config, transport)
    }

    pub fn with_transport(config: GatewayConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            limiter: RateLimiter::new(config.min_interval),
            config,
            transport,
            cache: DashMap::new(),
            in_flight: DashMap::new(),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Query URL for one endpoint. Parameters are form-encoded, so a symbol
    /// can't smuggle in extra query fields.
    pub fn endpoint_url(&self, endpoint: Endpoint, symbol: &str) -> Result<String, AnalysisError> {
        let base = format!("{}/query", self.config.base_url);
        let function = ("function", endpoint.function());
        let apikey = ("apikey", self.config.api_key.as_str());
        let params: Vec<(&str, &str)> = match endpoint {
            Endpoint::Overview => vec![function, ("symbol", symbol), apikey],
            Endpoint::DailyAdjusted => {
                vec![function, ("symbol", symbol), ("outputsize", "full"), apikey]
            }
            Endpoint::NewsSentiment => vec![function, ("tickers", symbol), apikey],
        };
        Url::parse_with_params(&base, &params)
            .map(String::from)
            .map_err(|e| AnalysisError::InvalidData(format!("bad base URL {}: {}", base, e)))
    }

    /// Fetch a provider URL. Returns `None` instead of an error once the retry
    /// budget is spent.
    pub async fn fetch(&self, url: &str) -> Option<Value> {
        self.fetch_traced(url).await.0
    }

    async fn fetch_traced(&self, url: &str) -> (Option<Value>, FetchSource) {
        if let Some(value) = self.cached(url) {
            tracing::debug!("Cache hit for {}", redact(url));
            return (Some(value), FetchSource::Cache);
        }

        let flight = self.in_flight.entry(url.to_string()).or_default().clone();
        let _guard = flight.lock().await;
        // Another caller may have filled the cache while we waited
        if let Some(value) = self.cached(url) {
            tracing::debug!("Cache filled while waiting for {}", redact(url));
            return (Some(value), FetchSource::Cache);
        }

        let label = redact(url);
        match self.config.retry.run(&label, || self.fetch_once(url)).await {
            Ok(value) => {
                self.cache.insert(
                    url.to_string(),
                    CacheEntry {
                        value: value.clone(),
                        stored_at: Instant::now(),
                    },
                );
                (Some(value), FetchSource::Network)
            }
            Err(e) => {
                tracing::warn!("Giving up on {}: {}", label, e);
                (None, FetchSource::Failed)
            }
        }
    }

    async fn fetch_with_deadline(
        &self,
        url: &str,
        deadline: Option<Instant>,
    ) -> (Option<Value>, FetchSource) {
        match deadline {
            None => self.fetch_traced(url).await,
            Some(deadline) => match tokio::time::timeout_at(deadline, self.fetch_traced(url)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::warn!("Deadline reached before {} completed", redact(url));
                    (None, FetchSource::TimedOut)
                }
            },
        }
    }

    /// One rate-limited network attempt with payload validation.
    async fn fetch_once(&self, url: &str) -> Result<Value, AnalysisError> {
        self.limiter.acquire().await;

        let response = self.transport.get(url).await?;
        if !response.is_success() {
            return Err(AnalysisError::ApiError(format!("HTTP {}", response.status)));
        }

        let json: Value = serde_json::from_str(&response.body)
            .map_err(|e| AnalysisError::InvalidData(format!("malformed JSON: {}", e)))?;
        check_payload(&json)?;

        self.limiter.record_response().await;
        Ok(json)
    }

    fn cached(&self, url: &str) -> Option<Value> {
        let entry = self.cache.get(url)?;
        if entry.stored_at.elapsed() < self.config.cache_ttl {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    /// Fetch overview, daily series and news for one symbol.
    pub async fn fetch_all(&self, symbol: &str) -> ProviderBundle {
        self.fetch_all_before(symbol, None).await
    }

    /// Like [`Gateway::fetch_all`], but calls still pending at `deadline` are
    /// abandoned and reported as missing.
    pub async fn fetch_all_before(&self, symbol: &str, deadline: Option<Instant>) -> ProviderBundle {
        let symbol = symbol.trim().to_uppercase();

        // Issued together; the shared limiter still spaces them out.
        let ((overview, overview_src), (daily, daily_src), (news, news_src)) = tokio::join!(
            self.fetch_endpoint(Endpoint::Overview, &symbol, deadline),
            self.fetch_endpoint(Endpoint::DailyAdjusted, &symbol, deadline),
            self.fetch_endpoint(Endpoint::NewsSentiment, &symbol, deadline),
        );

        ProviderBundle {
            overview: overview.as_ref().and_then(parse_overview),
            daily_series: daily.as_ref().and_then(parse_daily_series),
            news: news.as_ref().and_then(|v| parse_news_feed(v, &symbol)),
            requests: vec![
                describe_request(Endpoint::Overview, &symbol, overview_src),
                describe_request(Endpoint::DailyAdjusted, &symbol, daily_src),
                describe_request(Endpoint::NewsSentiment, &symbol, news_src),
            ],
        }
    }

    async fn fetch_endpoint(
        &self,
        endpoint: Endpoint,
        symbol: &str,
        deadline: Option<Instant>,
    ) -> (Option<Value>, FetchSource) {
        match self.endpoint_url(endpoint, symbol) {
            Ok(url) => self.fetch_with_deadline(&url, deadline).await,
            Err(e) => {
                tracing::warn!("Skipping {} for {}: {}", endpoint.function(), symbol, e);
                (None, FetchSource::Failed)
            }
        }
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        self.in_flight.retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}

/// Reject error payloads and rate-limit notices the provider returns with HTTP 200.
fn check_payload(json: &Value) -> Result<(), AnalysisError> {
    for key in ["Error Message", "Error"] {
        if let Some(msg) = json.get(key) {
            return Err(AnalysisError::ProviderError(value_text(msg)));
        }
    }
    for key in ["Note", "Information"] {
        if let Some(msg) = json.get(key) {
            return Err(AnalysisError::RateLimited(value_text(msg)));
        }
    }
    Ok(())
}

fn value_text(value: &Value) -> String {
    value
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| value.to_string())
}

fn describe_request(endpoint: Endpoint, symbol: &str, source: FetchSource) -> String {
    let suffix = match source {
        FetchSource::Cache => " (cache)",
        FetchSource::Network => "",
        FetchSource::Failed => " (failed)",
        FetchSource::TimedOut => " (timed out)",
    };
    format!("{}:{}{}", endpoint.function(), symbol, suffix)
}

/// Strip the API key before a URL reaches the logs.
fn redact(url: &str) -> String {
    match url.find("apikey=") {
        Some(idx) => {
            let start = idx + "apikey=".len();
            let end = url[start..].find('&').map(|i| start + i).unwrap_or(url.len());
            format!("{}***{}", &url[..start], &url[end..])
        }
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    type Responder = dyn Fn(&str, usize) -> Result<TransportResponse, AnalysisError> + Send + Sync;

    /// In-memory transport that records when each call was issued
    struct FakeTransport {
        responder: Box<Responder>,
        calls: Mutex<Vec<(String, Instant)>>,
    }

    impl FakeTransport {
        fn new<F>(responder: F) -> Arc<Self>
        where
            F: Fn(&str, usize) -> Result<TransportResponse, AnalysisError> + Send + Sync + 'static,
        {
            Arc::new(Self {
                responder: Box::new(responder),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().iter().map(|(_, t)| *t).collect()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn get(&self, url: &str) -> Result<TransportResponse, AnalysisError> {
            let index = {
                let mut calls = self.calls.lock().unwrap();
                calls.push((url.to_string(), Instant::now()));
                calls.len() - 1
            };
            (self.responder)(url, index)
        }
    }

    fn gateway(transport: Arc<FakeTransport>) -> Gateway {
        Gateway::with_transport(
            GatewayConfig::new("demo").with_base_url("https://av.test/"),
            transport,
        )
    }

    fn daily_payload() -> String {
        json!({
            "Time Series (Daily)": {
                "2024-01-02": { "4. close": "100.0", "5. adjusted close": "100.0" }
            }
        })
        .to_string()
    }

    fn routed_ok(url: &str) -> TransportResponse {
        if url.contains("function=OVERVIEW") {
            TransportResponse::ok(json!({ "Symbol": "IBM", "EVToEBITDA": "5.0" }).to_string())
        } else if url.contains("function=TIME_SERIES_DAILY_ADJUSTED") {
            TransportResponse::ok(daily_payload())
        } else {
            TransportResponse::ok(json!({ "feed": [] }).to_string())
        }
    }

    #[test]
    fn test_endpoint_urls() {
        let gw = gateway(FakeTransport::new(|url, _| Ok(routed_ok(url))));
        assert_eq!(
            gw.endpoint_url(Endpoint::Overview, "IBM").unwrap(),
            "https://av.test/query?function=OVERVIEW&symbol=IBM&apikey=demo"
        );
        assert_eq!(
            gw.endpoint_url(Endpoint::NewsSentiment, "IBM").unwrap(),
            "https://av.test/query?function=NEWS_SENTIMENT&tickers=IBM&apikey=demo"
        );
        assert!(gw
            .endpoint_url(Endpoint::DailyAdjusted, "IBM")
            .unwrap()
            .contains("function=TIME_SERIES_DAILY_ADJUSTED&symbol=IBM&outputsize=full"));
    }

    #[test]
    fn test_endpoint_url_encodes_symbol() {
        let gw = gateway(FakeTransport::new(|url, _| Ok(routed_ok(url))));
        let url = gw.endpoint_url(Endpoint::Overview, "A&function=X").unwrap();

        assert_eq!(
            url,
            "https://av.test/query?function=OVERVIEW&symbol=A%26function%3DX&apikey=demo"
        );
        assert_eq!(url.matches("function=").count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_base_url_fails_without_network() {
        let transport = FakeTransport::new(|url, _| Ok(routed_ok(url)));
        let gw = Gateway::with_transport(
            GatewayConfig::new("demo").with_base_url("not a url"),
            transport.clone(),
        );

        assert!(gw.endpoint_url(Endpoint::Overview, "IBM").is_err());
        let bundle = gw.fetch_all("IBM").await;
        assert!(bundle.overview.is_none());
        assert!(bundle.requests.iter().all(|r| r.ends_with("(failed)")));
        assert_eq!(transport.call_count(), 0);
    }

    #[test]
    fn test_redact_hides_api_key() {
        assert_eq!(
            redact("https://x/query?function=OVERVIEW&apikey=secret&symbol=IBM"),
            "https://x/query?function=OVERVIEW&apikey=***&symbol=IBM"
        );
        assert_eq!(redact("https://x/query?apikey=secret"), "https://x/query?apikey=***");
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_fetch_within_ttl_is_served_from_cache() {
        let transport = FakeTransport::new(|url, _| Ok(routed_ok(url)));
        let gw = gateway(transport.clone());
        let url = gw.endpoint_url(Endpoint::Overview, "IBM").unwrap();

        let first = gw.fetch(&url).await;
        tokio::time::advance(Duration::from_secs(60)).await;
        let second = gw.fetch(&url).await;

        assert!(first.is_some());
        assert_eq!(first, second);
        assert_eq!(transport.call_count(), 1);
        assert_eq!(gw.cached_entries(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_entry_expires_after_ttl() {
        let transport = FakeTransport::new(|url, _| Ok(routed_ok(url)));
        let gw = gateway(transport.clone());
        let url = gw.endpoint_url(Endpoint::Overview, "IBM").unwrap();

        gw.fetch(&url).await;
        tokio::time::advance(CACHE_TTL + Duration::from_secs(1)).await;
        gw.fetch(&url).await;

        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_misses_are_spaced_by_min_interval() {
        let transport = FakeTransport::new(|url, _| Ok(routed_ok(url)));
        let gw = gateway(transport.clone());

        gw.fetch(&gw.endpoint_url(Endpoint::Overview, "IBM").unwrap()).await;
        gw.fetch(&gw.endpoint_url(Endpoint::Overview, "MSFT").unwrap()).await;

        let times = transport.call_times();
        assert_eq!(times.len(), 2);
        assert!(times[1] - times[0] >= MIN_REQUEST_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_all_shares_the_rate_budget() {
        let transport = FakeTransport::new(|url, _| Ok(routed_ok(url)));
        let gw = gateway(transport.clone());

        let bundle = gw.fetch_all("ibm").await;

        assert!(bundle.overview.is_some());
        assert_eq!(bundle.daily_series.as_ref().map(Vec::len), Some(1));
        assert_eq!(bundle.news, Some(vec![]));

        let mut times = transport.call_times();
        times.sort();
        assert_eq!(times.len(), 3);
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= MIN_REQUEST_INTERVAL);
        }
        assert_eq!(
            bundle.requests,
            vec![
                "OVERVIEW:IBM".to_string(),
                "TIME_SERIES_DAILY_ADJUSTED:IBM".to_string(),
                "NEWS_SENTIMENT:IBM".to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried_once() {
        let transport = FakeTransport::new(|url, index| {
            if index == 0 {
                Ok(TransportResponse {
                    status: 503,
                    body: String::new(),
                })
            } else {
                Ok(routed_ok(url))
            }
        });
        let gw = gateway(transport.clone());

        let value = gw.fetch(&gw.endpoint_url(Endpoint::Overview, "IBM").unwrap()).await;

        assert!(value.is_some());
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_after_retry_yields_none() {
        let transport = FakeTransport::new(|_, _| Err(AnalysisError::ApiError("connection reset".into())));
        let gw = gateway(transport.clone());

        let value = gw.fetch(&gw.endpoint_url(Endpoint::Overview, "IBM").unwrap()).await;

        assert_eq!(value, None);
        assert_eq!(transport.call_count(), 2);
        assert_eq!(gw.cached_entries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_error_payloads_are_failures() {
        for body in [
            json!({ "Error Message": "Invalid API call." }),
            json!({ "Note": "Thank you for using Alpha Vantage! Our standard API call frequency is 5 calls per minute" }),
            json!({ "Information": "API rate limit reached" }),
        ] {
            let body = body.to_string();
            let transport = FakeTransport::new(move |_, _| Ok(TransportResponse::ok(body.clone())));
            let gw = gateway(transport.clone());

            assert_eq!(gw.fetch(&gw.endpoint_url(Endpoint::Overview, "IBM").unwrap()).await, None);
            assert_eq!(transport.call_count(), 2);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_json_is_a_failure() {
        let transport = FakeTransport::new(|_, _| Ok(TransportResponse::ok("<html>oops</html>")));
        let gw = gateway(transport.clone());

        assert_eq!(gw.fetch(&gw.endpoint_url(Endpoint::Overview, "IBM").unwrap()).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_all_reports_partial_failures() {
        let transport = FakeTransport::new(|url, _| {
            if url.contains("function=OVERVIEW") {
                Ok(TransportResponse {
                    status: 500,
                    body: String::new(),
                })
            } else {
                Ok(routed_ok(url))
            }
        });
        let gw = gateway(transport.clone());

        let bundle = gw.fetch_all("IBM").await;

        assert!(bundle.overview.is_none());
        assert!(bundle.daily_series.is_some());
        assert!(bundle.news.is_some());
        assert_eq!(bundle.requests[0], "OVERVIEW:IBM (failed)");
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_abandons_pending_calls() {
        let transport = FakeTransport::new(|url, _| Ok(routed_ok(url)));
        let gw = gateway(transport.clone());

        let deadline = Instant::now() + Duration::from_secs(5);
        let bundle = gw.fetch_all_before("IBM", Some(deadline)).await;

        assert!(bundle.overview.is_some());
        assert!(bundle.daily_series.is_none());
        assert!(bundle.news.is_none());
        assert_eq!(transport.call_count(), 1);
        assert_eq!(bundle.requests[1], "TIME_SERIES_DAILY_ADJUSTED:IBM (timed out)");
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_fetch_all_hits_cache() {
        let transport = FakeTransport::new(|url, _| Ok(routed_ok(url)));
        let gw = gateway(transport.clone());

        gw.fetch_all("IBM").await;
        let bundle = gw.fetch_all("IBM").await;

        assert_eq!(transport.call_count(), 3);
        assert!(bundle.requests.iter().all(|r| r.ends_with("(cache)")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_fetch_all_calls_each_endpoint_once() {
        let transport = FakeTransport::new(|url, _| Ok(routed_ok(url)));
        let gw = gateway(transport.clone());

        let (a, b) = tokio::join!(gw.fetch_all("IBM"), gw.fetch_all("IBM"));

        assert_eq!(transport.call_count(), 3);
        assert!(a.overview.is_some() && b.overview.is_some());
        assert_eq!(a.daily_series, b.daily_series);
        assert!(b.requests.iter().all(|r| r.ends_with("(cache)")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_cache_forces_refetch() {
        let transport = FakeTransport::new(|url, _| Ok(routed_ok(url)));
        let gw = gateway(transport.clone());
        let url = gw.endpoint_url(Endpoint::Overview, "IBM").unwrap();

        gw.fetch(&url).await;
        assert_eq!(gw.cached_entries(), 1);

        gw.clear_cache();
        assert_eq!(gw.cached_entries(), 0);

        gw.fetch(&url).await;
        assert_eq!(transport.call_count(), 2);
        assert_eq!(gw.cached_entries(), 1);
    }
}
