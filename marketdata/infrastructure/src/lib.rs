pub mod alerting;
pub mod gateways;
pub mod rate_limiting;
pub mod repositories;

pub use alerting::LogAlertSink;
pub use gateways::MockMarketDataProvider;
pub use rate_limiting::TokenBucketRateLimiter;
pub use repositories::ParquetBarRepository;
