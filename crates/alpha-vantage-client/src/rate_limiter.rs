use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Minimum-spacing rate limiter: consecutive requests are at least `min_interval` apart.
///
/// The lock is held across the wait, so concurrent callers queue up behind each
/// other instead of all observing the same free slot.
pub(crate) struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    pub(crate) fn new(min_interval: Duration) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval,
        }
    }

    /// Wait for the next slot and claim it.
    pub(crate) async fn acquire(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(prev) = *last {
            let next_allowed = prev + self.min_interval;
            let now = Instant::now();
            if next_allowed > now {
                tracing::debug!(
                    "Rate limiter: waiting {:.1}s for provider slot",
                    (next_allowed - now).as_secs_f64()
                );
                tokio::time::sleep_until(next_allowed).await;
            }
        }

        *last = Some(Instant::now());
    }

    /// Push the last-request mark forward to now after a successful response.
    pub(crate) async fn record_response(&self) {
        let mut last = self.last_request.lock().await;
        let now = Instant::now();
        if last.map_or(true, |prev| prev < now) {
            *last = Some(now);
        }
    }
}
