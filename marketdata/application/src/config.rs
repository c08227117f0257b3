use marketdata_domain::{Cadence, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Process-level ingestion configuration, supplied once at startup.
/// Defaults mirror the production deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Global symbol set; cadences may override with their own list.
    pub symbols: Vec<String>,
    pub daily: CadenceConfig,
    pub intraday: CadenceConfig,
    pub retry: RetryPolicy,
    pub alert: AlertPolicy,
    pub rate_limit: RateLimitSettings,
    /// Root directory of the analytical store.
    pub data_dir: PathBuf,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            symbols: ["AAPL", "GOOGL", "MSFT", "AMZN", "TSLA"]
                .map(String::from)
                .to_vec(),
            daily: CadenceConfig {
                enabled: true,
                // 6 PM, after market close
                cron: "0 0 18 * * *".to_string(),
                lookback_days: 7,
                pacing_ms: 1000,
                symbols: Vec::new(),
            },
            intraday: CadenceConfig {
                enabled: true,
                // Every 15 minutes during market hours, weekdays
                cron: "0 */15 9-16 * * MON-FRI".to_string(),
                lookback_days: 0,
                pacing_ms: 200,
                symbols: Vec::new(),
            },
            retry: RetryPolicy::default(),
            alert: AlertPolicy::default(),
            rate_limit: RateLimitSettings::default(),
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl IngestionConfig {
    pub fn cadence(&self, cadence: Cadence) -> &CadenceConfig {
        match cadence {
            Cadence::Daily => &self.daily,
            Cadence::Intraday => &self.intraday,
        }
    }

    /// Effective symbol list for a cadence: its own list when set,
    /// otherwise the global one, trimmed and upper-cased.
    pub fn symbols_for(&self, cadence: Cadence) -> Vec<String> {
        let source = match &self.cadence(cadence).symbols {
            list if list.is_empty() => &self.symbols,
            list => list,
        };
        source
            .iter()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Per-cadence trigger and batch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CadenceConfig {
    pub enabled: bool,
    pub cron: String,
    /// Days of history to (re-)fetch, self-healing missed daily runs.
    pub lookback_days: u32,
    /// Deliberate delay between symbols within one batch.
    pub pacing_ms: u64,
    /// Overrides the global symbol set when non-empty.
    pub symbols: Vec<String>,
}

impl CadenceConfig {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }
}

/// Consecutive-failure escalation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertPolicy {
    pub enabled: bool,
    pub threshold: u32,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 3,
        }
    }
}

/// Token-bucket parameters for the upstream provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    pub capacity: u32,
    pub refill_period_ms: u64,
    pub acquire_timeout_ms: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        // 5 requests per second, wait up to 10 seconds for a token
        Self {
            capacity: 5,
            refill_period_ms: 1000,
            acquire_timeout_ms: 10_000,
        }
    }
}

impl RateLimitSettings {
    pub fn refill_period(&self) -> Duration {
        Duration::from_millis(self.refill_period_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}
