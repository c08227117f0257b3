use async_trait::async_trait;
use chrono::NaiveDate;
use marketdata_domain::{Cadence, DateRange, MarketBar, Ohlcv};
use serde::Serialize;
use shaku::Interface;

/// Upstream market-data provider. One rate-limiter token is consumed
/// per call to either method.
#[async_trait]
pub trait MarketDataProvider: Interface {
    /// Daily history for `symbol` over the given window, oldest first.
    async fn fetch_history(
        &self,
        symbol: &str,
        range: DateRange,
    ) -> Result<Vec<Ohlcv>, ProviderError>;

    /// Most recent quote for `symbol`.
    async fn fetch_quote(&self, symbol: &str) -> Result<Ohlcv, ProviderError>;
}

/// Analytical store for validated bars. Writes are idempotent by
/// `(symbol, date)`.
#[async_trait]
pub trait BarRepository: Interface {
    /// Persist a batch, returning the number of rows the store
    /// accepted. Individual malformed records are dropped by the
    /// implementation rather than failing the batch.
    async fn write_batch(&self, bars: Vec<MarketBar>) -> Result<usize, RepositoryError>;

    /// Whether a row already exists for the dedup key.
    async fn exists(&self, symbol: &str, date: NaiveDate) -> Result<bool, RepositoryError>;

    /// Stored bars for a symbol over a window, ascending by date.
    /// Serves ancillary read paths, not the ingestion loop.
    async fn query_range(
        &self,
        symbol: &str,
        range: DateRange,
    ) -> Result<Vec<MarketBar>, RepositoryError>;
}

/// Escalation channel for operators. Fire-and-forget: implementations
/// must never let a delivery problem surface into the ingestion run.
pub trait AlertSink: Interface {
    fn notify(&self, alert: &Alert);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

/// Structured alert payload.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub cadence: Cadence,
    pub severity: Severity,
    pub consecutive_failures: Option<u32>,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Transient provider failure: {0}")]
    Transient(String),

    #[error("No data available for symbol {0}")]
    SymbolUnavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}
