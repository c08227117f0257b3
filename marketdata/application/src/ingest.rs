use async_trait::async_trait;
use chrono::Utc;
use marketdata_domain::{BarValidationError, DateRange, MarketBar, Ohlcv};
use shaku::{Component, Interface};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::ports::{BarRepository, MarketDataProvider, ProviderError, RepositoryError};
use crate::rate_limiter::{RateLimitError, RateLimiter};
use crate::shutdown::Shutdown;

/// Iterates a symbol set, fetching and persisting each symbol through
/// the rate limiter. One bad symbol never aborts the batch; only
/// batch-wide conditions (rate budget exhausted, store unreachable,
/// shutdown) do.
#[async_trait]
pub trait IngestionService: Interface {
    /// Daily-cadence operation: history over a lookback window,
    /// skipping `(symbol, date)` keys the store already has.
    async fn ingest_history_batch(
        &self,
        symbols: &[String],
        lookback_days: u32,
        pacing: Duration,
        shutdown: &Shutdown,
    ) -> Result<BatchOutcome, BatchError>;

    /// Intraday-cadence operation: one current quote per symbol,
    /// rewriting the current day's row.
    async fn ingest_quote_batch(
        &self,
        symbols: &[String],
        pacing: Duration,
        shutdown: &Shutdown,
    ) -> Result<BatchOutcome, BatchError>;
}

/// Roll-up of one batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub symbols_attempted: usize,
    pub symbols_succeeded: usize,
    pub symbols_failed: usize,
    pub records_written: usize,
}

impl BatchOutcome {
    /// More than half of the attempted symbols failed. The run still
    /// counts as a success for the failure counter, but is escalated
    /// as a warning.
    pub fn is_degraded(&self) -> bool {
        self.symbols_failed * 2 > self.symbols_attempted
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("Rate limiter: {0}")]
    RateLimit(#[from] RateLimitError),

    #[error("Storage failure: {0}")]
    Storage(#[from] RepositoryError),

    #[error("Ingestion interrupted by shutdown")]
    Interrupted,
}

/// Per-symbol failure, isolated inside the batch loop.
#[derive(Debug, thiserror::Error)]
enum IngestFailure {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Invalid record from provider: {0}")]
    Invalid(#[from] BarValidationError),
}

enum SymbolResult {
    Written(usize),
    Failed(IngestFailure),
}

#[derive(Component)]
#[shaku(interface = IngestionService)]
pub struct IngestionServiceImpl {
    #[shaku(inject)]
    provider: Arc<dyn MarketDataProvider>,

    #[shaku(inject)]
    repository: Arc<dyn BarRepository>,

    #[shaku(inject)]
    rate_limiter: Arc<dyn RateLimiter>,

    acquire_timeout: Duration,
}

impl IngestionServiceImpl {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        repository: Arc<dyn BarRepository>,
        rate_limiter: Arc<dyn RateLimiter>,
        acquire_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            repository,
            rate_limiter,
            acquire_timeout,
        }
    }

    /// One token per outbound call, raced against shutdown so a long
    /// token wait never blocks process exit.
    async fn acquire_token(&self, shutdown: &Shutdown) -> Result<(), BatchError> {
        tokio::select! {
            result = self.rate_limiter.acquire(self.acquire_timeout) => Ok(result?),
            _ = shutdown.triggered() => Err(BatchError::Interrupted),
        }
    }

    async fn ingest_symbol_history(
        &self,
        symbol: &str,
        range: &DateRange,
        shutdown: &Shutdown,
    ) -> Result<SymbolResult, BatchError> {
        self.acquire_token(shutdown).await?;

        let quotes = match self.provider.fetch_history(symbol, range.clone()).await {
            Ok(quotes) => quotes,
            Err(e) => return Ok(SymbolResult::Failed(e.into())),
        };

        let bars = self.map_history(symbol, quotes);
        let fresh = self.drop_existing(symbol, bars, range).await;
        let written = self.repository.write_batch(fresh).await?;

        Ok(SymbolResult::Written(written))
    }

    async fn ingest_symbol_quote(
        &self,
        symbol: &str,
        shutdown: &Shutdown,
    ) -> Result<SymbolResult, BatchError> {
        self.acquire_token(shutdown).await?;

        let quote = match self.provider.fetch_quote(symbol).await {
            Ok(quote) => quote,
            Err(e) => return Ok(SymbolResult::Failed(e.into())),
        };

        let bar = match MarketBar::from_provider(symbol, quote) {
            Ok(bar) => bar,
            Err(e) => return Ok(SymbolResult::Failed(e.into())),
        };

        let written = self.repository.write_batch(vec![bar]).await?;
        Ok(SymbolResult::Written(written))
    }

    /// Map provider rows into validated bars, preserving fetch order.
    /// Rows the provider got wrong are dropped, not fatal.
    fn map_history(&self, symbol: &str, quotes: Vec<Ohlcv>) -> Vec<MarketBar> {
        let mut bars = Vec::with_capacity(quotes.len());
        for quote in quotes {
            match MarketBar::from_provider(symbol, quote) {
                Ok(bar) => bars.push(bar),
                Err(e) => warn!("Dropping invalid {} row from provider: {}", symbol, e),
            }
        }
        bars
    }

    /// Self-heal dedup for overlapping lookback windows: keys already
    /// stored are skipped, except the window's final day which is
    /// always rewritten so a partial intraday row gets replaced by the
    /// settled close.
    async fn drop_existing(
        &self,
        symbol: &str,
        bars: Vec<MarketBar>,
        range: &DateRange,
    ) -> Vec<MarketBar> {
        let mut fresh = Vec::with_capacity(bars.len());
        for bar in bars {
            if bar.date() < range.end() {
                match self.repository.exists(symbol, bar.date()).await {
                    Ok(true) => {
                        debug!("Skipping {} {}: already stored", symbol, bar.date());
                        continue;
                    }
                    Ok(false) => {}
                    // Unknown is treated as missing; the write is
                    // idempotent by key either way.
                    Err(e) => warn!("Existence check failed for {} {}: {}", symbol, bar.date(), e),
                }
            }
            fresh.push(bar);
        }
        fresh
    }

    async fn run_batch(
        &self,
        kind: BatchKind<'_>,
        symbols: &[String],
        pacing: Duration,
        shutdown: &Shutdown,
    ) -> Result<BatchOutcome, BatchError> {
        info!("Starting {} batch for {} symbols", kind.label(), symbols.len());
        let mut outcome = BatchOutcome::default();

        for (index, symbol) in symbols.iter().enumerate() {
            // Deliberate pacing between symbols so the batch does not
            // burst the provider even within the limiter's allowance.
            if index > 0 && !shutdown.sleep(pacing).await {
                return Err(BatchError::Interrupted);
            }

            let result = match kind {
                BatchKind::History(range) => {
                    self.ingest_symbol_history(symbol, range, shutdown).await?
                }
                BatchKind::Quote => self.ingest_symbol_quote(symbol, shutdown).await?,
            };

            outcome.symbols_attempted += 1;
            match result {
                SymbolResult::Written(count) => {
                    outcome.symbols_succeeded += 1;
                    outcome.records_written += count;
                    debug!("Ingested {} records for {}", count, symbol);
                }
                SymbolResult::Failed(e) => {
                    outcome.symbols_failed += 1;
                    warn!("Ingestion failed for {}: {}", symbol, e);
                }
            }
        }

        info!(
            "Completed {} batch: {}/{} symbols succeeded, {} records written",
            kind.label(),
            outcome.symbols_succeeded,
            outcome.symbols_attempted,
            outcome.records_written
        );
        Ok(outcome)
    }
}

#[derive(Clone, Copy)]
enum BatchKind<'a> {
    History(&'a DateRange),
    Quote,
}

impl BatchKind<'_> {
    fn label(&self) -> &'static str {
        match self {
            BatchKind::History(_) => "history",
            BatchKind::Quote => "quote",
        }
    }
}

#[async_trait]
impl IngestionService for IngestionServiceImpl {
    async fn ingest_history_batch(
        &self,
        symbols: &[String],
        lookback_days: u32,
        pacing: Duration,
        shutdown: &Shutdown,
    ) -> Result<BatchOutcome, BatchError> {
        let range = DateRange::lookback(Utc::now().date_naive(), lookback_days);
        self.run_batch(BatchKind::History(&range), symbols, pacing, shutdown)
            .await
    }

    async fn ingest_quote_batch(
        &self,
        symbols: &[String],
        pacing: Duration,
        shutdown: &Shutdown,
    ) -> Result<BatchOutcome, BatchError> {
        self.run_batch(BatchKind::Quote, symbols, pacing, shutdown)
            .await
    }
}
