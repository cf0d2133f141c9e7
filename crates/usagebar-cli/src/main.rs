//! usagebar CLI - Usage quota pacing in the terminal
//!
//! A command-line surface for the polling engine: one-shot status, a
//! live-updating watch mode, an offline pacing calculator and config
//! management.

mod commands;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use usagebar_core::{EnvFallback, UsageConfig};

#[derive(Parser)]
#[command(name = "usagebar")]
#[command(author, version, about = "Usage quota pacing in the terminal", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format: table (default) or json
    #[arg(long, global = true, default_value = "table")]
    format: output::OutputFormat,

    /// Suppress progress messages
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Override config file path (or set USAGEBAR_CONFIG env var)
    #[arg(long, env = "USAGEBAR_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Override the usage API origin (or set USAGEBAR_BASE_URL env var)
    #[arg(long, env = "USAGEBAR_BASE_URL", global = true, hide = true)]
    base_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch usage once and show pacing for every metric
    Status,

    /// Keep polling and print the title whenever it changes
    Watch(commands::watch::WatchArgs),

    /// Compute pacing for a reading without fetching anything
    Pace(commands::pace::PaceArgs),

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn init_logging(verbose: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if verbose {
        builder.filter_module("usagebar_core", log::LevelFilter::Debug);
        builder.filter_module("usagebar", log::LevelFilter::Debug);
    }
    builder.init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = match cli.config {
        Some(path) => path,
        None => UsageConfig::default_path()?,
    };
    let config = UsageConfig::load_from(&config_path)?;

    // Create context for commands
    let ctx = commands::Context {
        format: cli.format,
        quiet: cli.quiet,
        config_path,
        config,
        env: EnvFallback::from_process(),
        base_url: cli.base_url,
    };

    // Execute command
    match cli.command {
        Commands::Status => commands::status::execute(&ctx).await,
        Commands::Watch(args) => commands::watch::execute(&ctx, args).await,
        Commands::Pace(args) => commands::pace::execute(&ctx, args).await,
        Commands::Config { action } => commands::config::execute(&ctx, action).await,
    }
}
