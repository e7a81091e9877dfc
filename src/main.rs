use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use worldlines::config::{Config, LogFormat};
use worldlines::ingest::AdapterRegistry;
use worldlines::llm::LlmClient;
use worldlines::notify::Notifier;
use worldlines::pipeline::{self, PipelineCtx};
use worldlines::storage::SqliteStorage;

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match config.logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config);

    info!(
        database = %config.database.path.display(),
        interval_minutes = config.pipeline.fetch_interval_minutes,
        "Starting worldlines pipeline"
    );

    let storage = SqliteStorage::new(&config.database).await?;
    let llm = LlmClient::new(&config.llm, config.request.clone())?;
    let notifier = Notifier::new(&config.notify);
    let registry = AdapterRegistry::with_builtins();

    let ctx = PipelineCtx {
        config: config.clone(),
        storage,
        llm,
        notifier,
    };

    let mut cycle_timer =
        tokio::time::interval(Duration::from_secs(config.pipeline.fetch_interval_minutes * 60));
    let mut backup_timer =
        tokio::time::interval(Duration::from_secs(config.backup.interval_hours * 3600));
    // The first tick of each interval fires immediately; let the backup timer
    // consume its initial tick so startup runs one pipeline cycle only.
    backup_timer.tick().await;

    loop {
        tokio::select! {
            _ = cycle_timer.tick() => {
                pipeline::run_cycle(&ctx, &registry).await;
            }
            _ = backup_timer.tick() => {
                pipeline::run_backup(&ctx).await;
            }
            result = tokio::signal::ctrl_c() => {
                match result {
                    Ok(()) => info!("Shutdown signal received, stopping scheduler"),
                    Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
                }
                break;
            }
        }
    }

    Ok(())
}
