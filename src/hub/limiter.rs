//! Token bucket in front of the cloud link.
//!
//! The bucket starts full (`burst` tokens) and refills at `qps` tokens per second.
//! All classes share the bucket; the priority queue decides who gets the next token.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Longest single wait for a token; tiny rates are re-checked at least this often.
const MAX_WAIT: Duration = Duration::from_secs(60);

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    qps: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// A `qps` of zero or less disables limiting, and so does a non-finite one.
    pub fn new(qps: f64, burst: u32) -> Self {
        let qps = if qps.is_finite() { qps } else { 0.0 };
        let burst = f64::from(burst.max(1));
        Self {
            qps,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.qps <= 0.0
    }

    /// Waits until a token is available for message `id`, then consumes it.
    pub async fn throttle(&self, id: &str) {
        if self.is_unlimited() {
            return;
        }
        loop {
            let wait = match self.try_take() {
                Ok(()) => return,
                Err(wait) => wait,
            };
            trace!(msg_id = id, ?wait, "throttled");
            tokio::time::sleep(wait).await;
        }
    }

    /// Takes a token now, or returns how long until one is available.
    fn try_take(&self) -> Result<(), Duration> {
        let mut bucket = self.bucket.lock();
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * self.qps).min(self.burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let secs = (1.0 - bucket.tokens) / self.qps;
            Err(Duration::try_from_secs_f64(secs)
                .unwrap_or(MAX_WAIT)
                .min(MAX_WAIT))
        }
    }

    /// Tokens currently available, rounded down.
    pub fn available(&self) -> u32 {
        let bucket = self.bucket.lock();
        bucket.tokens.floor() as u32
    }
}
