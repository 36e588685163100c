//! Rock - native build caching for React Native
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use rock::cli::{Cli, Commands};
use rock::config::{Config, ConfigManager};
use rock::error::{RockError, RockResult};
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Conventional exit status after SIGINT
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(RockError::Cancelled) => {
            eprintln!("{} Operation cancelled", style("Error:").red().bold());
            ExitCode::from(EXIT_INTERRUPTED)
        }
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> RockResult<()> {
    let cli = Cli::parse();
    rock::ui::init_theme();

    // Load configuration
    let config_manager = if let Some(ref path) = cli.config {
        ConfigManager::with_path(path.clone())
    } else {
        ConfigManager::new()
    };

    // Find local config unless --no-local is set
    let local_config_path = if cli.no_local {
        None
    } else {
        let cwd = std::env::current_dir().map_err(|e| RockError::io("getting current directory", e))?;
        ConfigManager::find_local_config(&cwd)
    };

    let config = config_manager
        .load_merged(local_config_path.as_deref())
        .await?;

    init_logging(cli.verbose, &config);
    if let Some(ref path) = local_config_path {
        debug!("Loaded local config: {}", path.display());
    }

    // Dispatch to command
    match cli.command {
        Commands::Fingerprint(args) => rock::cli::commands::fingerprint(args, &config).await,
        Commands::RemoteCache(args) => rock::cli::commands::remote_cache(args, &config).await,
        Commands::ResolveBinary(args) => rock::cli::commands::resolve_binary(args, &config).await,
        Commands::Cache(args) => rock::cli::commands::cache(args, &config).await,
        Commands::Config(args) => {
            rock::cli::commands::config(args, &config, &config_manager).await
        }
    }
}

/// 0 = warn (steps and spinners only), 1 = info, 2+ = debug.
/// Logs go to stderr so stdout stays parseable.
fn init_logging(verbose: u8, config: &Config) {
    let filter = match verbose {
        0 => EnvFilter::new("rock=warn"),
        1 => EnvFilter::new("rock=info"),
        _ => EnvFilter::new("rock=debug"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();

    if config.general.log_format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}
