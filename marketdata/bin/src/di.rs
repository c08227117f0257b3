use anyhow::Context;
use marketdata_application::config::IngestionConfig;
use marketdata_application::ingest::{IngestionServiceImpl, IngestionServiceImplParameters};
use marketdata_infrastructure::alerting::log::{LogAlertSink, LogAlertSinkParameters};
use marketdata_infrastructure::gateways::mock::{
    MockMarketDataProvider, MockMarketDataProviderParameters,
};
use marketdata_infrastructure::rate_limiting::token_bucket::{
    TokenBucket, TokenBucketRateLimiter, TokenBucketRateLimiterParameters,
};
use marketdata_infrastructure::repositories::parquet::{
    ParquetBarRepository, ParquetBarRepositoryParameters,
};
use shaku::module;
use std::path::Path;
use std::sync::{Arc, Mutex};

module! {
    pub AppModule {
        components = [
            MockMarketDataProvider,
            ParquetBarRepository,
            TokenBucketRateLimiter,
            LogAlertSink,
            IngestionServiceImpl
        ],
        providers = []
    }
}

pub fn create_app_module(config: &IngestionConfig) -> AppModule {
    AppModule::builder()
        .with_component_parameters::<MockMarketDataProvider>(MockMarketDataProviderParameters {
            history_limit_days: 365,
        })
        .with_component_parameters::<ParquetBarRepository>(ParquetBarRepositoryParameters {
            data_dir: config.data_dir.clone(),
        })
        .with_component_parameters::<TokenBucketRateLimiter>(TokenBucketRateLimiterParameters {
            bucket: Arc::new(Mutex::new(TokenBucket::new(
                config.rate_limit.capacity,
                config.rate_limit.refill_period(),
            ))),
        })
        .with_component_parameters::<LogAlertSink>(LogAlertSinkParameters {})
        .with_component_parameters::<IngestionServiceImpl>(IngestionServiceImplParameters {
            acquire_timeout: config.rate_limit.acquire_timeout(),
        })
        .build()
}

/// Configuration comes from a TOML file when given, otherwise the
/// built-in defaults. No hot reload; the process reads it once.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<IngestionConfig> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            toml::from_str(&raw)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        }
        None => Ok(IngestionConfig::default()),
    }
}
