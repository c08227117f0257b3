use marketdata_application::config::AlertPolicy;
use marketdata_application::failure_tracker::FailureTracker;
use marketdata_application::ingest::BatchOutcome;
use marketdata_application::ports::{Alert, AlertSink, Severity};
use marketdata_application::retry::{RetryOutcome, RetryRunner};
use marketdata_application::shutdown;
use marketdata_domain::{Cadence, RetryPolicy};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

fn fast_policy() -> RetryPolicy {
    RetryPolicy::new(3, 5, 20, 2.0).unwrap()
}

#[tokio::test]
async fn first_attempt_success_needs_no_backoff() {
    let runner = RetryRunner::new(fast_policy());
    let (_handle, shutdown) = shutdown::channel();

    let outcome: RetryOutcome<u32, String> = runner.run(&shutdown, |_| async { Ok(42) }).await;

    match outcome {
        RetryOutcome::Succeeded { value, attempts } => {
            assert_eq!(value, 42);
            assert_eq!(attempts, 1);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn transient_failures_are_retried_with_backoff() {
    let runner = RetryRunner::new(fast_policy());
    let (_handle, shutdown) = shutdown::channel();
    let calls = AtomicU32::new(0);

    let started = Instant::now();
    let outcome: RetryOutcome<&str, String> = runner
        .run(&shutdown, |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("transient".to_string())
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

    match outcome {
        RetryOutcome::Succeeded { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("unexpected outcome: {other:?}"),
    }
    // Two backoff sleeps: 5ms then 10ms
    assert!(started.elapsed().as_millis() >= 15);
}

#[tokio::test]
async fn persistent_failure_exhausts_after_max_attempts() {
    let runner = RetryRunner::new(fast_policy());
    let (_handle, shutdown) = shutdown::channel();
    let calls = AtomicU32::new(0);

    let outcome: RetryOutcome<(), String> = runner
        .run(&shutdown, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("still broken".to_string()) }
        })
        .await;

    match outcome {
        RetryOutcome::Exhausted {
            attempts,
            last_error,
        } => {
            assert_eq!(attempts, 3);
            assert_eq!(last_error, "still broken");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn shutdown_during_backoff_interrupts_the_run() {
    let policy = RetryPolicy::new(3, 10_000, 20_000, 2.0).unwrap();
    let runner = RetryRunner::new(policy);
    let (handle, shutdown) = shutdown::channel();

    let started = Instant::now();
    let outcome = runner
        .run(&shutdown, |_| {
            handle.trigger();
            async { Err::<(), _>("boom".to_string()) }
        })
        .await;

    assert!(matches!(outcome, RetryOutcome::Interrupted));
    assert!(started.elapsed().as_secs() < 5);
}

#[tokio::test]
async fn documented_production_policy_delays() {
    // max=3, initial=2000ms, multiplier=2.0, cap=10000ms
    let policy = RetryPolicy::default();

    assert_eq!(policy.delay_for_attempt(1).as_millis(), 2000);
    assert_eq!(policy.delay_for_attempt(2).as_millis(), 4000);
}

#[test]
fn exhausted_run_increments_counter_by_exactly_one() {
    let (tracker, _alerts) = tracker(AlertPolicy::default());

    assert_eq!(tracker.consecutive_failures(Cadence::Daily), 0);
    tracker.record_failure(Cadence::Daily, "provider down");
    assert_eq!(tracker.consecutive_failures(Cadence::Daily), 1);
}

#[test]
fn success_resets_counter_from_any_value() {
    let (tracker, _alerts) = tracker(AlertPolicy {
        enabled: true,
        threshold: 10,
    });

    for _ in 0..4 {
        tracker.record_failure(Cadence::Intraday, "boom");
    }
    assert_eq!(tracker.consecutive_failures(Cadence::Intraday), 4);

    tracker.record_success(Cadence::Intraday);
    assert_eq!(tracker.consecutive_failures(Cadence::Intraday), 0);
    assert!(tracker.state(Cadence::Intraday).last_success.is_some());
    assert!(tracker.state(Cadence::Intraday).last_error.is_none());
}

#[test]
fn alert_fires_once_on_the_crossing_run_only() {
    // Deliberate behavior choice: the alert fires when the counter
    // first reaches the threshold and stays silent on later
    // consecutive failures until a reset re-arms it.
    let (tracker, alerts) = tracker(AlertPolicy {
        enabled: true,
        threshold: 3,
    });

    tracker.record_failure(Cadence::Daily, "e1");
    tracker.record_failure(Cadence::Daily, "e2");
    assert_eq!(alerts.count(), 0);

    tracker.record_failure(Cadence::Daily, "e3");
    assert_eq!(alerts.count(), 1);

    tracker.record_failure(Cadence::Daily, "e4");
    assert_eq!(alerts.count(), 1);

    let alert = alerts.last().unwrap();
    assert_eq!(alert.severity, Severity::Critical);
    assert_eq!(alert.consecutive_failures, Some(3));
    assert!(alert.message.contains("e3"));
}

#[test]
fn reset_rearms_the_threshold() {
    let (tracker, alerts) = tracker(AlertPolicy {
        enabled: true,
        threshold: 2,
    });

    tracker.record_failure(Cadence::Daily, "a");
    tracker.record_failure(Cadence::Daily, "b");
    assert_eq!(alerts.count(), 1);

    tracker.reset(Cadence::Daily);
    assert_eq!(tracker.consecutive_failures(Cadence::Daily), 0);

    tracker.record_failure(Cadence::Daily, "c");
    tracker.record_failure(Cadence::Daily, "d");
    assert_eq!(alerts.count(), 2);
}

#[test]
fn disabled_alerts_never_reach_the_sink() {
    let (tracker, alerts) = tracker(AlertPolicy {
        enabled: false,
        threshold: 1,
    });

    tracker.record_failure(Cadence::Daily, "quiet failure");
    tracker.record_failure(Cadence::Daily, "another");

    assert_eq!(alerts.count(), 0);
    assert_eq!(tracker.consecutive_failures(Cadence::Daily), 2);
}

#[test]
fn degraded_batch_raises_a_warning_without_touching_the_counter() {
    let (tracker, alerts) = tracker(AlertPolicy::default());

    let outcome = BatchOutcome {
        symbols_attempted: 5,
        symbols_succeeded: 2,
        symbols_failed: 3,
        records_written: 12,
    };
    tracker.record_degraded(Cadence::Intraday, &outcome);

    assert_eq!(alerts.count(), 1);
    let alert = alerts.last().unwrap();
    assert_eq!(alert.severity, Severity::Warning);
    assert_eq!(alert.consecutive_failures, None);
    assert_eq!(tracker.consecutive_failures(Cadence::Intraday), 0);
}

#[test]
fn cadence_counters_are_independent() {
    let (tracker, _alerts) = tracker(AlertPolicy::default());

    tracker.record_failure(Cadence::Daily, "daily broke");

    assert_eq!(tracker.consecutive_failures(Cadence::Daily), 1);
    assert_eq!(tracker.consecutive_failures(Cadence::Intraday), 0);
}

fn tracker(policy: AlertPolicy) -> (FailureTracker, Arc<RecordingAlertSink>) {
    let alerts = Arc::new(RecordingAlertSink::default());
    (FailureTracker::new(policy, alerts.clone()), alerts)
}

#[derive(Default)]
struct RecordingAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlertSink {
    fn count(&self) -> usize {
        self.alerts.lock().unwrap().len()
    }

    fn last(&self) -> Option<Alert> {
        self.alerts.lock().unwrap().last().cloned()
    }
}

impl AlertSink for RecordingAlertSink {
    fn notify(&self, alert: &Alert) {
        self.alerts.lock().unwrap().push(alert.clone());
    }
}
