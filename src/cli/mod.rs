//! CLI Module
//!
//! Command-line interface for wagate using Clap v4.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::Config;

/// wagate - HTTP gateway for a WhatsApp Web session
#[derive(Parser, Debug)]
#[command(name = "wagate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable debug mode (debug level, log files in ./logs)
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Configuration file path
    #[arg(short, long, global = true, env = "WAGATE_CONFIG")]
    pub config: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Run the WhatsApp session and the HTTP server (default)
    Serve,

    /// Delete stored credentials; the next start pairs with a fresh QR code
    Reset,

    /// Show whether a paired device is stored
    Status,

    /// Print the effective configuration (token redacted)
    Config,
}

/// Load configuration from file or defaults
pub fn load_config(config_path: Option<&str>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
}

/// Main CLI entry point
pub async fn run(cli: Cli, config: Config) -> Result<()> {
    if cli.debug {
        tracing::info!("Debug mode enabled");
    }

    config.validate()?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => commands::cmd_serve(config).await,
        Commands::Reset => commands::cmd_reset(&config).await,
        Commands::Status => commands::cmd_status(&config).await,
        Commands::Config => commands::cmd_config(&config),
    }
}
