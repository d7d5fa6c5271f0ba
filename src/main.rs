use anyhow::Result;
use clap::Parser;
use wagate::{cli, logging};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file before anything else (silently ignore if missing)
    dotenvy::dotenv().ok();

    let cli_args = cli::Cli::parse();

    // Configuration decides the log level, so it is read before logging starts.
    let config = cli::load_config(cli_args.config.as_deref())?;

    let mut log_config = logging::LogConfig::new()
        .with_level(config.logging.level.clone())
        .with_debug_mode(cli_args.debug)
        .with_json(config.logging.json);
    if let Some(dir) = &config.logging.file_dir {
        log_config = log_config.with_log_dir(dir.clone());
    }

    let _guard = logging::init_logging(log_config.clone())
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    // Clean up old log files (keep last 7 days)
    if let Ok(removed) = logging::cleanup_old_logs(&log_config, 7)
        && removed > 0
    {
        tracing::info!("Cleaned up {} old log file(s)", removed);
    }

    cli::run(cli_args, config).await
}
