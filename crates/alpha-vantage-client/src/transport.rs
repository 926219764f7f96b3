use analysis_core::AnalysisError;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Raw HTTP response handed back to the gateway
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Issues a single GET. The gateway layers caching, rate limiting and retry on top.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str) -> Result<TransportResponse, AnalysisError>;
}

/// reqwest-backed transport used outside of tests
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<TransportResponse, AnalysisError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AnalysisError::ApiError(e.without_url().to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| AnalysisError::ApiError(e.without_url().to_string()))?;

        Ok(TransportResponse { status, body })
    }
}
