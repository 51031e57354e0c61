use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Gate every summarizer call must pass through. Grants at most one slot per
/// `min_interval`; concurrent callers queue on the inner lock.
#[derive(Debug)]
pub struct RateLimitedDispatcher {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimitedDispatcher {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    /// Suspends until `min_interval` has elapsed since the previous granted slot.
    pub async fn await_slot(&self) {
        let mut last_call = self.last_call.lock().await;
        if let Some(previous) = *last_call {
            let ready_at = previous + self.min_interval;
            let now = Instant::now();
            if ready_at > now {
                tracing::debug!(
                    wait_ms = (ready_at - now).as_millis() as u64,
                    "rate limit: waiting for next slot"
                );
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last_call = Some(Instant::now());
    }
}
