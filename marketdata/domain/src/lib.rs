pub mod bar;
pub mod cadence;
pub mod date_range;
pub mod retry_policy;
pub mod schedule;

pub use bar::{BarValidationError, MarketBar, Ohlcv};
pub use cadence::Cadence;
pub use date_range::{DateRange, DateRangeError};
pub use retry_policy::{RetryPolicy, RetryPolicyError};
pub use schedule::{Schedule, ScheduleError};
