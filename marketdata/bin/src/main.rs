mod di;

use clap::Parser;
use marketdata_application::failure_tracker::FailureTracker;
use marketdata_application::ingest::IngestionService;
use marketdata_application::ports::AlertSink;
use marketdata_application::scheduler::Scheduler;
use marketdata_application::shutdown;
use marketdata_domain::Cadence;
use shaku::HasComponent;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "scheduler")]
#[command(about = "Scheduled market-data ingestion daemon", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = di::load_config(cli.config.as_deref())?;

    info!("Starting market-data ingestion scheduler");

    let module = di::create_app_module(&config);
    let service: Arc<dyn IngestionService> = module.resolve();
    let sink: Arc<dyn AlertSink> = module.resolve();

    let tracker = Arc::new(FailureTracker::new(config.alert.clone(), sink));
    let (handle, shutdown) = shutdown::channel();
    let scheduler = Scheduler::new(&config, service, Arc::clone(&tracker), shutdown)?;

    let mut running = tokio::spawn(scheduler.run());
    tokio::select! {
        result = &mut running => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, stopping gracefully...");
            handle.trigger();
            running.await?;
        }
    }

    for cadence in [Cadence::Daily, Cadence::Intraday] {
        let state = tracker.state(cadence);
        info!(
            "{} failure state at exit: {} consecutive failures",
            cadence, state.consecutive_failures
        );
    }
    info!("Shutdown complete");

    Ok(())
}
