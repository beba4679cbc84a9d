use stonescriptdb_modelsync::config::Config;
use stonescriptdb_modelsync::converge_from_config;
use stonescriptdb_modelsync::error::ErrorReport;
use stonescriptdb_modelsync::schema::ConvergeOutcome;

use tracing::{debug, error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Setup log directory
    let log_dir = std::env::var("LOG_DIR").unwrap_or_else(|_| "./logs".to_string());

    // Create log directory if it doesn't exist
    std::fs::create_dir_all(&log_dir).unwrap_or_else(|e| {
        eprintln!("Warning: Could not create log directory {}: {}", log_dir, e);
    });

    // Create file appender with daily rotation
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "stonescriptdb-modelsync.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Initialize logging - both stdout and file
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,stonescriptdb_modelsync=debug")),
        )
        // Console output
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        // File output with JSON format for easy parsing
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .json()
                .with_writer(non_blocking),
        )
        .init();

    debug!("Logging initialized - log directory: {}", log_dir);

    // Load environment from .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file found or error loading it: {}", e);
    }

    let config = Config::from_env()?;

    info!("Starting model sync with strategy {}", config.migrate);
    info!("Smart migrate: {}, dry run: {}", config.smart_migrate, config.dry_run);
    info!("Default connection: {}", config.default_connection);
    info!("Max connections per pool: {}", config.max_connections_per_pool);

    match converge_from_config(&config).await {
        Ok(ConvergeOutcome::Skipped) => {
            info!("Nothing to do");
        }
        Ok(ConvergeOutcome::DryRun(reports)) => {
            println!("{}", serde_json::to_string_pretty(&reports)?);
            info!("Dry run complete for {} connections", reports.len());
        }
        Ok(ConvergeOutcome::Completed(summary)) => {
            info!(
                "Schema convergence complete on {} connections",
                summary.connections.len()
            );
        }
        Err(e) => {
            error!("Schema convergence failed: {}", e);
            eprintln!("{}", serde_json::to_string_pretty(&ErrorReport::from(&e))?);
            // Flush buffered log lines before exiting
            drop(guard);
            std::process::exit(1);
        }
    }

    Ok(())
}
