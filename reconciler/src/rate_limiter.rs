//! Token bucket that paces the reconciliation loop.
use crate::config::RateLimit;
use tokio::time::{Duration, Instant, sleep};

pub struct RateLimiter {
    qps: f64,
    burst: f64,
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// The bucket starts full, so the first `burst` acquisitions do not wait.
    pub fn new(limit: RateLimit) -> Self {
        let burst = f64::from(limit.burst.max(1));
        RateLimiter {
            qps: limit.qps,
            burst,
            tokens: burst,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.qps).min(self.burst);
        self.last_refill = now;
    }

    pub fn try_acquire(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Waits until a token is available and takes it.
    pub async fn acquire(&mut self) {
        while !self.try_acquire() {
            let missing = 1.0 - self.tokens;
            sleep(Duration::from_secs_f64(missing / self.qps)).await;
        }
    }
}
