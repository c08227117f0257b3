pub mod config;
pub mod failure_tracker;
pub mod ingest;
pub mod ports;
pub mod rate_limiter;
pub mod retry;
pub mod scheduler;
pub mod shutdown;

pub use config::{AlertPolicy, CadenceConfig, IngestionConfig, RateLimitSettings};
pub use failure_tracker::{FailureState, FailureTracker};
pub use ingest::{BatchError, BatchOutcome, IngestionService, IngestionServiceImpl};
pub use ports::{
    Alert, AlertSink, BarRepository, MarketDataProvider, ProviderError, RepositoryError, Severity,
};
pub use rate_limiter::{RateLimitError, RateLimiter};
pub use retry::{RetryOutcome, RetryRunner};
pub use scheduler::Scheduler;
pub use shutdown::{Shutdown, ShutdownHandle};
