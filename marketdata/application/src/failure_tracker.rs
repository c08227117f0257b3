use chrono::{DateTime, Utc};
use marketdata_domain::Cadence;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info};

use crate::config::AlertPolicy;
use crate::ingest::BatchOutcome;
use crate::ports::{Alert, AlertSink, Severity};

/// Per-cadence failure state. The only data that outlives a
/// scheduling tick.
#[derive(Debug, Clone, Default)]
pub struct FailureState {
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_success: Option<DateTime<Utc>>,
}

/// Tracks consecutive cadence failures and escalates to the alert
/// sink once the configured threshold is crossed.
///
/// All state sits behind one mutex so health-check reads and resets
/// cannot race an in-flight run's update. Also the health/ops
/// interface: [`consecutive_failures`](Self::consecutive_failures),
/// [`reset`](Self::reset), [`state`](Self::state).
pub struct FailureTracker {
    policy: AlertPolicy,
    sink: Arc<dyn AlertSink>,
    states: Mutex<HashMap<Cadence, FailureState>>,
}

impl FailureTracker {
    pub fn new(policy: AlertPolicy, sink: Arc<dyn AlertSink>) -> Self {
        Self {
            policy,
            sink,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// A cadence run completed. Resets the counter from any prior
    /// value, logging the recovery when there was one.
    pub fn record_success(&self, cadence: Cadence) {
        let mut states = self.lock();
        let state = states.entry(cadence).or_default();

        if state.consecutive_failures > 0 {
            info!(
                "{} ingestion recovered after {} consecutive failures",
                cadence, state.consecutive_failures
            );
        }
        state.consecutive_failures = 0;
        state.last_error = None;
        state.last_success = Some(Utc::now());
    }

    /// A cadence run failed terminally (retries exhausted). Increments
    /// the counter by exactly one and fires the sink on the run where
    /// the count first reaches the threshold. The alert does not
    /// re-fire on later failures; a reset re-arms the crossing.
    pub fn record_failure(&self, cadence: Cadence, error: &str) -> u32 {
        let count = {
            let mut states = self.lock();
            let state = states.entry(cadence).or_default();
            state.consecutive_failures += 1;
            state.last_error = Some(error.to_string());
            state.consecutive_failures
        };

        error!(
            "{} ingestion failed ({} consecutive): {}",
            cadence, count, error
        );

        if self.policy.enabled && count == self.policy.threshold {
            self.sink.notify(&Alert {
                cadence,
                severity: Severity::Critical,
                consecutive_failures: Some(count),
                message: format!(
                    "{} ingestion has failed {} consecutive times. Last error: {}",
                    cadence, count, error
                ),
            });
        }

        count
    }

    /// A run succeeded overall but more than half of its symbols
    /// failed. Reported straight to the sink as a warning, independent
    /// of the consecutive-failure counter.
    pub fn record_degraded(&self, cadence: Cadence, outcome: &BatchOutcome) {
        self.sink.notify(&Alert {
            cadence,
            severity: Severity::Warning,
            consecutive_failures: None,
            message: format!(
                "{} ingestion degraded: {}/{} symbols failed",
                cadence, outcome.symbols_failed, outcome.symbols_attempted
            ),
        });
    }

    pub fn consecutive_failures(&self, cadence: Cadence) -> u32 {
        self.lock()
            .get(&cadence)
            .map(|s| s.consecutive_failures)
            .unwrap_or(0)
    }

    /// Manual-intervention hook: zero the counter and re-arm the
    /// alert threshold.
    pub fn reset(&self, cadence: Cadence) {
        let mut states = self.lock();
        let state = states.entry(cadence).or_default();
        info!(
            "Resetting {} consecutive failures counter from {}",
            cadence, state.consecutive_failures
        );
        state.consecutive_failures = 0;
    }

    /// Snapshot for health-check callers.
    pub fn state(&self, cadence: Cadence) -> FailureState {
        self.lock().get(&cadence).cloned().unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Cadence, FailureState>> {
        // A poisoned lock only means a panic elsewhere; the counter
        // itself is always in a consistent state.
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }
}
