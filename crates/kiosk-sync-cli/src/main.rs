//! Kiosk Sync CLI
//!
//! Operator interface for the kiosk networking layer: inspect status,
//! queue operations, drain the queue and watch push updates.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kiosk_sync_core::{Config, OperationKind};

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "kiosk-sync")]
#[command(about = "Kiosk Sync - offline-tolerant networking for ordering kiosks")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show connectivity, queue and configuration status
    Status,
    /// Queue an operation for delivery
    Enqueue {
        /// Operation kind (order or feedback)
        kind: OperationKind,
        /// JSON payload, sent as-is
        payload: String,
    },
    /// Run one drain pass now
    Drain,
    /// Connect the push channel and print incoming messages
    Listen {
        /// Stop after this many seconds (default: until Ctrl-C)
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (base_url, realtime_enabled, max_tokens, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.unwrap_or_else(Config::config_file_path);

    match cli.command {
        Commands::Status => commands::status::show(&config_path, &output).await,
        Commands::Enqueue { kind, payload } => {
            commands::enqueue::enqueue(&config_path, kind, &payload, &output)
        }
        Commands::Drain => commands::drain::drain(&config_path, &output).await,
        Commands::Listen { seconds } => {
            commands::listen::listen(&config_path, seconds, &output).await
        }
        Commands::Config { command } => handle_config_command(command, &config_path, &output),
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: &Path,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
    }
}

/// Log to stderr so `--json` output on stdout stays parseable
fn init_logging(verbose: bool, quiet: bool) {
    let env_filter = if verbose {
        EnvFilter::new("kiosk_sync_core=debug,kiosk_sync_cli=debug")
    } else if quiet {
        EnvFilter::new("kiosk_sync_core=warn,kiosk_sync_cli=warn")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("kiosk_sync_core=info,kiosk_sync_cli=info"))
    };

    // Ignore error if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
