use marketdata_application::ports::{Alert, AlertSink, Severity};
use shaku::Component;
use tracing::{error, warn};

/// Alert sink that emits structured payloads on the dedicated `alert`
/// log target, where operators route them to their paging pipeline.
/// Logging cannot fail, so delivery never affects an ingestion run.
#[derive(Component)]
#[shaku(interface = AlertSink)]
pub struct LogAlertSink {}

impl AlertSink for LogAlertSink {
    fn notify(&self, alert: &Alert) {
        let payload = serde_json::to_string(alert)
            .unwrap_or_else(|_| format!("{} {}", alert.cadence, alert.message));

        match alert.severity {
            Severity::Warning => warn!(target: "alert", "{}", payload),
            Severity::Critical => error!(target: "alert", "{}", payload),
        }
    }
}
