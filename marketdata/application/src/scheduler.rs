use chrono::Utc;
use futures::future::join_all;
use marketdata_domain::{Cadence, Schedule, ScheduleError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::IngestionConfig;
use crate::failure_tracker::FailureTracker;
use crate::ingest::{BatchError, IngestionService};
use crate::retry::{RetryOutcome, RetryRunner};
use crate::shutdown::Shutdown;

/// Single scheduling authority: one sequential execution line per
/// enabled cadence. A line never has two runs in flight, so
/// overlapping firings of the same cadence are structurally
/// impossible; firings that come due while a run is in progress are
/// skipped, not queued. Distinct cadences run independently and may
/// overlap each other.
pub struct Scheduler {
    lines: Vec<CadenceLine>,
}

impl Scheduler {
    pub fn new(
        config: &IngestionConfig,
        service: Arc<dyn IngestionService>,
        tracker: Arc<FailureTracker>,
        shutdown: Shutdown,
    ) -> Result<Self, ScheduleError> {
        let mut lines = Vec::new();

        for cadence in [Cadence::Daily, Cadence::Intraday] {
            let cadence_config = config.cadence(cadence);
            if !cadence_config.enabled {
                info!("{} cadence is disabled", cadence);
                continue;
            }

            let schedule = Schedule::parse(&cadence_config.cron)?;
            info!(
                "Registered {} cadence with schedule '{}'",
                cadence, cadence_config.cron
            );

            lines.push(CadenceLine {
                cadence,
                schedule,
                symbols: config.symbols_for(cadence),
                lookback_days: cadence_config.lookback_days,
                pacing: cadence_config.pacing(),
                retry: RetryRunner::new(config.retry.clone()),
                service: Arc::clone(&service),
                tracker: Arc::clone(&tracker),
                shutdown: shutdown.clone(),
            });
        }

        Ok(Self { lines })
    }

    /// Drive all cadence lines until shutdown.
    pub async fn run(self) {
        join_all(self.lines.into_iter().map(CadenceLine::run)).await;
        info!("Scheduler stopped");
    }
}

struct CadenceLine {
    cadence: Cadence,
    schedule: Schedule,
    symbols: Vec<String>,
    lookback_days: u32,
    pacing: Duration,
    retry: RetryRunner,
    service: Arc<dyn IngestionService>,
    tracker: Arc<FailureTracker>,
    shutdown: Shutdown,
}

impl CadenceLine {
    async fn run(self) {
        loop {
            let now = Utc::now();
            let Some(fire_at) = self.schedule.next_after(now) else {
                warn!(
                    "{} schedule can never fire again; stopping its line",
                    self.cadence
                );
                break;
            };

            let wait = (fire_at - now).to_std().unwrap_or(Duration::ZERO);
            debug!("{} cadence sleeping until {}", self.cadence, fire_at);
            if !self.shutdown.sleep(wait).await {
                break;
            }

            self.run_once().await;

            // Firings that came due during the run are skipped.
            if let Some(missed) = self.schedule.next_after(fire_at) {
                if missed <= Utc::now() {
                    info!(
                        "{} run overran its interval; skipping firings before {}",
                        self.cadence,
                        Utc::now()
                    );
                }
            }
        }
        info!("{} cadence line stopped", self.cadence);
    }

    /// One scheduled run: the batch operation wrapped in retry, with
    /// the terminal outcome reported to the failure tracker. Always
    /// ends cleanly; exhaustion is recovered here, never propagated.
    async fn run_once(&self) {
        let run_id = Uuid::new_v4();
        info!("[{}] Starting {} ingestion run", run_id, self.cadence);

        let outcome = self
            .retry
            .run(&self.shutdown, |attempt| {
                let service = Arc::clone(&self.service);
                let symbols = self.symbols.clone();
                let shutdown = self.shutdown.clone();
                let cadence = self.cadence;
                let lookback_days = self.lookback_days;
                let pacing = self.pacing;
                async move {
                    debug!("{} ingestion attempt {}", cadence, attempt);
                    match cadence {
                        Cadence::Daily => {
                            service
                                .ingest_history_batch(&symbols, lookback_days, pacing, &shutdown)
                                .await
                        }
                        Cadence::Intraday => {
                            service.ingest_quote_batch(&symbols, pacing, &shutdown).await
                        }
                    }
                }
            })
            .await;

        match outcome {
            RetryOutcome::Succeeded { value: batch, attempts } => {
                info!(
                    "[{}] {} run succeeded on attempt {}: {} records written",
                    run_id, self.cadence, attempts, batch.records_written
                );
                self.tracker.record_success(self.cadence);
                if batch.is_degraded() {
                    warn!(
                        "[{}] {} run degraded: {}/{} symbols failed",
                        run_id, self.cadence, batch.symbols_failed, batch.symbols_attempted
                    );
                    self.tracker.record_degraded(self.cadence, &batch);
                }
            }
            RetryOutcome::Interrupted
            | RetryOutcome::Exhausted {
                last_error: BatchError::Interrupted,
                ..
            } => {
                info!(
                    "[{}] {} run interrupted by shutdown; no outcome recorded",
                    run_id, self.cadence
                );
            }
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                error!(
                    "[{}] {} run exhausted all {} attempts: {}",
                    run_id, self.cadence, attempts, last_error
                );
                self.tracker
                    .record_failure(self.cadence, &last_error.to_string());
            }
        }
    }
}
