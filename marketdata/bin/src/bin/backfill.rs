use clap::Parser;
use marketdata_application::ingest::IngestionService;
use marketdata_application::shutdown;
use shaku::HasComponent;
use std::path::PathBuf;
use std::sync::Arc;

mod di {
    include!("../di.rs");
}

#[derive(Parser)]
#[command(name = "backfill")]
#[command(about = "One-shot historical bar ingestion", long_about = None)]
struct Cli {
    /// Symbols to fetch, comma separated
    #[arg(short, long, value_delimiter = ',', required = true)]
    symbols: Vec<String>,

    /// Days of history to fetch
    #[arg(short, long, default_value_t = 30)]
    days: u32,

    /// TOML configuration file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = di::load_config(cli.config.as_deref())?;

    let symbols: Vec<String> = cli
        .symbols
        .iter()
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();

    println!(
        "Starting backfill of {} days for {} symbols",
        cli.days,
        symbols.len()
    );

    let module = di::create_app_module(&config);
    let service: Arc<dyn IngestionService> = module.resolve();
    let (_handle, shutdown) = shutdown::channel();

    let outcome = service
        .ingest_history_batch(&symbols, cli.days, config.daily.pacing(), &shutdown)
        .await?;

    println!("\nBackfill completed:");
    println!("  Symbols attempted: {}", outcome.symbols_attempted);
    println!("  Symbols succeeded: {}", outcome.symbols_succeeded);
    println!("  Symbols failed:    {}", outcome.symbols_failed);
    println!("  Records written:   {}", outcome.records_written);

    if outcome.is_degraded() {
        println!("\n  Warning: more than half of the symbols failed");
    }

    Ok(())
}
