use analysis_core::AnalysisError;
use std::future::Future;
use std::time::Duration;

/// Fixed-backoff retry. The default is one retry after 2 seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    /// Run `op` until it succeeds or the attempts run out; returns the last error.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, AnalysisError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AnalysisError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:.1}s",
                        label,
                        attempt,
                        attempts,
                        e,
                        self.backoff.as_secs_f64()
                    );
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
