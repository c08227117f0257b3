use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use marketdata_application::ingest::{BatchError, IngestionService, IngestionServiceImpl};
use marketdata_application::ports::{
    BarRepository, MarketDataProvider, ProviderError, RepositoryError,
};
use marketdata_application::rate_limiter::{RateLimitError, RateLimiter};
use marketdata_application::shutdown::{self, ShutdownHandle};
use marketdata_domain::{DateRange, MarketBar, Ohlcv};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[tokio::test]
async fn one_bad_symbol_does_not_abort_the_batch() {
    let symbols = symbols(&["AAPL", "GOOGL", "MSFT"]);
    let provider = Arc::new(ScriptedProvider::new(3).with_unavailable("GOOGL"));
    let repository = Arc::new(RecordingRepository::default());
    let service = build_service(provider, repository.clone());
    let (_handle, shutdown) = shutdown::channel();

    let outcome = service
        .ingest_history_batch(&symbols, 2, Duration::ZERO, &shutdown)
        .await
        .expect("batch should complete");

    assert_eq!(outcome.symbols_attempted, 3);
    assert_eq!(outcome.symbols_succeeded, 2);
    assert_eq!(outcome.symbols_failed, 1);
    // Three bars per healthy symbol (lookback of 2 days plus today)
    assert_eq!(outcome.records_written, 6);
    assert!(!outcome.is_degraded());

    let written = repository.written_symbols().await;
    assert!(written.contains("AAPL"));
    assert!(written.contains("MSFT"));
    assert!(!written.contains("GOOGL"));
}

#[tokio::test]
async fn majority_failures_mark_the_outcome_degraded() {
    let symbols = symbols(&["AAPL", "GOOGL", "MSFT"]);
    let provider = Arc::new(
        ScriptedProvider::new(1)
            .with_unavailable("GOOGL")
            .with_unavailable("MSFT"),
    );
    let service = build_service(provider, Arc::new(RecordingRepository::default()));
    let (_handle, shutdown) = shutdown::channel();

    let outcome = service
        .ingest_history_batch(&symbols, 0, Duration::ZERO, &shutdown)
        .await
        .expect("batch should complete");

    assert_eq!(outcome.symbols_failed, 2);
    assert!(outcome.is_degraded());
}

#[tokio::test]
async fn lookback_overlap_skips_already_stored_dates() {
    let symbols = symbols(&["AAPL"]);
    let provider = Arc::new(ScriptedProvider::new(3));
    let repository = Arc::new(RecordingRepository::default());

    let today = Utc::now().date_naive();
    // Yesterday's bar is already stored from the previous run
    repository.seed_existing("AAPL", today.pred_opt().unwrap()).await;

    let service = build_service(provider, repository.clone());
    let (_handle, shutdown) = shutdown::channel();

    let outcome = service
        .ingest_history_batch(&symbols, 2, Duration::ZERO, &shutdown)
        .await
        .expect("batch should complete");

    // Two days ago and today written; yesterday deduplicated
    assert_eq!(outcome.records_written, 2);
    let dates = repository.written_dates("AAPL").await;
    assert!(!dates.contains(&today.pred_opt().unwrap()));
    assert!(dates.contains(&today));
}

#[tokio::test]
async fn window_end_is_always_rewritten() {
    let symbols = symbols(&["AAPL"]);
    let provider = Arc::new(ScriptedProvider::new(1));
    let repository = Arc::new(RecordingRepository::default());

    // Even with today's row present, the settled close replaces it
    repository.seed_existing("AAPL", Utc::now().date_naive()).await;

    let service = build_service(provider, repository.clone());
    let (_handle, shutdown) = shutdown::channel();

    let outcome = service
        .ingest_history_batch(&symbols, 0, Duration::ZERO, &shutdown)
        .await
        .expect("batch should complete");

    assert_eq!(outcome.records_written, 1);
}

#[tokio::test]
async fn unreachable_store_fails_the_whole_batch() {
    let symbols = symbols(&["AAPL", "MSFT"]);
    let provider = Arc::new(ScriptedProvider::new(1));
    let repository = Arc::new(RecordingRepository::default());
    repository.set_unavailable(true).await;

    let service = build_service(provider, repository);
    let (_handle, shutdown) = shutdown::channel();

    let result = service
        .ingest_history_batch(&symbols, 0, Duration::ZERO, &shutdown)
        .await;

    assert!(matches!(result, Err(BatchError::Storage(_))));
}

#[tokio::test]
async fn rate_limit_timeout_fails_the_whole_batch() {
    let symbols = symbols(&["AAPL", "MSFT"]);
    let provider = Arc::new(ScriptedProvider::new(1));
    let service = Arc::new(IngestionServiceImpl::new(
        provider,
        Arc::new(RecordingRepository::default()),
        Arc::new(ExhaustedRateLimiter),
        Duration::from_millis(10),
    ));
    let (_handle, shutdown) = shutdown::channel();

    let result = service
        .ingest_history_batch(&symbols, 0, Duration::ZERO, &shutdown)
        .await;

    assert!(matches!(result, Err(BatchError::RateLimit(_))));
}

#[tokio::test]
async fn shutdown_interrupts_inter_symbol_pacing() {
    let symbols = symbols(&["AAPL", "MSFT", "GOOGL"]);
    let (handle, shutdown) = shutdown::channel();
    // The provider pulls the plug as soon as the first symbol lands
    let provider = Arc::new(ScriptedProvider::new(1).trigger_after_first_fetch(handle));
    let service = build_service(provider, Arc::new(RecordingRepository::default()));

    let result = service
        .ingest_history_batch(&symbols, 0, Duration::from_secs(30), &shutdown)
        .await;

    assert!(matches!(result, Err(BatchError::Interrupted)));
}

#[tokio::test]
async fn quote_batch_counts_invalid_quotes_as_symbol_failures() {
    let symbols = symbols(&["AAPL", "MSFT"]);
    let provider = Arc::new(ScriptedProvider::new(1).with_garbage_quote("MSFT"));
    let repository = Arc::new(RecordingRepository::default());
    let service = build_service(provider, repository.clone());
    let (_handle, shutdown) = shutdown::channel();

    let outcome = service
        .ingest_quote_batch(&symbols, Duration::ZERO, &shutdown)
        .await
        .expect("batch should complete");

    assert_eq!(outcome.symbols_succeeded, 1);
    assert_eq!(outcome.symbols_failed, 1);
    assert_eq!(outcome.records_written, 1);
    assert!(repository.written_symbols().await.contains("AAPL"));
}

fn symbols(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn build_service(
    provider: Arc<ScriptedProvider>,
    repository: Arc<RecordingRepository>,
) -> Arc<dyn IngestionService> {
    Arc::new(IngestionServiceImpl::new(
        provider,
        repository,
        Arc::new(OpenRateLimiter),
        Duration::from_secs(1),
    ))
}

fn bar_quote(date: NaiveDate) -> Ohlcv {
    let timestamp = Utc.from_utc_datetime(&date.and_hms_opt(20, 0, 0).unwrap());
    Ohlcv {
        timestamp,
        open: dec!(100.0),
        high: dec!(102.0),
        low: dec!(99.0),
        close: dec!(101.0),
        volume: 1_000_000,
        adjusted_close: Some(dec!(101.0)),
    }
}

struct ScriptedProvider {
    bars_per_symbol: usize,
    unavailable: HashSet<String>,
    garbage_quote: HashSet<String>,
    trigger: Mutex<Option<ShutdownHandle>>,
}

impl ScriptedProvider {
    fn new(bars_per_symbol: usize) -> Self {
        Self {
            bars_per_symbol,
            unavailable: HashSet::new(),
            garbage_quote: HashSet::new(),
            trigger: Mutex::new(None),
        }
    }

    fn with_unavailable(mut self, symbol: &str) -> Self {
        self.unavailable.insert(symbol.to_string());
        self
    }

    fn with_garbage_quote(mut self, symbol: &str) -> Self {
        self.garbage_quote.insert(symbol.to_string());
        self
    }

    fn trigger_after_first_fetch(self, handle: ShutdownHandle) -> Self {
        Self {
            trigger: Mutex::new(Some(handle)),
            ..self
        }
    }

    async fn fire_trigger(&self) {
        if let Some(handle) = self.trigger.lock().await.take() {
            handle.trigger();
        }
    }
}

#[async_trait]
impl MarketDataProvider for ScriptedProvider {
    async fn fetch_history(
        &self,
        symbol: &str,
        range: DateRange,
    ) -> Result<Vec<Ohlcv>, ProviderError> {
        let result = if self.unavailable.contains(symbol) {
            Err(ProviderError::SymbolUnavailable(symbol.to_string()))
        } else {
            let dates = range.dates();
            let quotes = dates
                .iter()
                .rev()
                .take(self.bars_per_symbol)
                .rev()
                .map(|d| bar_quote(*d))
                .collect();
            Ok(quotes)
        };
        self.fire_trigger().await;
        result
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<Ohlcv, ProviderError> {
        let result = if self.unavailable.contains(symbol) {
            Err(ProviderError::SymbolUnavailable(symbol.to_string()))
        } else {
            let mut quote = bar_quote(Utc::now().date_naive());
            if self.garbage_quote.contains(symbol) {
                // High below close: fails bar validation
                quote.high = dec!(50.0);
            }
            Ok(quote)
        };
        self.fire_trigger().await;
        result
    }
}

#[derive(Default)]
struct RecordingRepository {
    rows: Mutex<HashMap<(String, NaiveDate), Decimal>>,
    unavailable: Mutex<bool>,
}

impl RecordingRepository {
    async fn seed_existing(&self, symbol: &str, date: NaiveDate) {
        self.rows
            .lock()
            .await
            .insert((symbol.to_string(), date), dec!(1.0));
    }

    async fn set_unavailable(&self, value: bool) {
        *self.unavailable.lock().await = value;
    }

    async fn written_symbols(&self) -> HashSet<String> {
        self.rows
            .lock()
            .await
            .keys()
            .map(|(s, _)| s.clone())
            .collect()
    }

    async fn written_dates(&self, symbol: &str) -> HashSet<NaiveDate> {
        self.rows
            .lock()
            .await
            .keys()
            .filter(|(s, _)| s == symbol)
            .map(|(_, d)| *d)
            .collect()
    }
}

#[async_trait]
impl BarRepository for RecordingRepository {
    async fn write_batch(&self, bars: Vec<MarketBar>) -> Result<usize, RepositoryError> {
        if *self.unavailable.lock().await {
            return Err(RepositoryError::Unavailable("connection refused".into()));
        }
        let mut rows = self.rows.lock().await;
        let count = bars.len();
        for bar in bars {
            rows.insert((bar.symbol().to_string(), bar.date()), bar.close());
        }
        Ok(count)
    }

    async fn exists(&self, symbol: &str, date: NaiveDate) -> Result<bool, RepositoryError> {
        Ok(self
            .rows
            .lock()
            .await
            .contains_key(&(symbol.to_string(), date)))
    }

    async fn query_range(
        &self,
        _symbol: &str,
        _range: DateRange,
    ) -> Result<Vec<MarketBar>, RepositoryError> {
        Ok(Vec::new())
    }
}

struct OpenRateLimiter;

#[async_trait]
impl RateLimiter for OpenRateLimiter {
    async fn acquire(&self, _timeout: Duration) -> Result<(), RateLimitError> {
        Ok(())
    }
}

struct ExhaustedRateLimiter;

#[async_trait]
impl RateLimiter for ExhaustedRateLimiter {
    async fn acquire(&self, timeout: Duration) -> Result<(), RateLimitError> {
        Err(RateLimitError::Exceeded(timeout))
    }
}
