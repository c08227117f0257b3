use async_trait::async_trait;
use marketdata_application::rate_limiter::{RateLimitError, RateLimiter};
use shaku::Component;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::warn;

/// In-process token bucket: capacity C refilled continuously at
/// C per refill period. Shared across both cadences so every outbound
/// provider call passes one point of flow control.
#[derive(Component)]
#[shaku(interface = RateLimiter)]
pub struct TokenBucketRateLimiter {
    #[shaku(default = Arc::new(Mutex::new(TokenBucket::new(5, Duration::from_secs(1)))))]
    bucket: Arc<Mutex<TokenBucket>>,
}

impl TokenBucketRateLimiter {
    pub fn new(capacity: u32, refill_period: Duration) -> Self {
        Self {
            bucket: Arc::new(Mutex::new(TokenBucket::new(capacity, refill_period))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TokenBucket> {
        self.bucket.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl RateLimiter for TokenBucketRateLimiter {
    async fn acquire(&self, timeout: Duration) -> Result<(), RateLimitError> {
        let deadline = Instant::now() + timeout;

        loop {
            let wait = match self.lock().try_acquire() {
                None => return Ok(()),
                Some(wait) => wait,
            };

            if Instant::now() + wait > deadline {
                warn!("Rate limit token not available within {:?}", timeout);
                return Err(RateLimitError::Exceeded(timeout));
            }

            tokio::time::sleep(wait).await;
        }
    }
}

/// Bucket state. Tokens are fractional so refill is continuous rather
/// than stepped.
pub struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_period: Duration) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            tokens: capacity,
            capacity,
            refill_rate: capacity / refill_period.as_secs_f64().max(f64::EPSILON),
            last_refill: Instant::now(),
        }
    }

    /// Take one token if available; otherwise the time until one
    /// refills.
    pub fn try_acquire(&mut self) -> Option<Duration> {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            None
        } else {
            let deficit = 1.0 - self.tokens;
            Some(Duration::from_secs_f64(deficit / self.refill_rate))
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }
}
