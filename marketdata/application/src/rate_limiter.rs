use async_trait::async_trait;
use shaku::Interface;
use std::time::Duration;

/// Flow control for outbound provider calls. Acquired once per call,
/// not once per batch; must be safe for concurrent acquisition.
#[async_trait]
pub trait RateLimiter: Interface {
    /// Block until a token is available or `timeout` elapses.
    async fn acquire(&self, timeout: Duration) -> Result<(), RateLimitError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("Rate limit token not acquired within {0:?}")]
    Exceeded(Duration),
}
