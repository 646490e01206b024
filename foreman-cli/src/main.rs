//! Foreman CLI - Command line interface for Foreman
//!
//! Drives remote Jules coding sessions from the terminal.

mod commands;

use std::time::Duration;

use clap::{Parser, Subcommand};
use foreman_core::config::parse_duration;
use foreman_core::secrets::KeySource;
use foreman_core::{CliOverrides, Config, Secrets};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::RunArgs;

/// Foreman: orchestrate remote coding worker sessions
#[derive(Parser, Debug)]
#[command(name = "foreman")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// API base URL (overrides config and env)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Polling interval, e.g. "5s" (overrides config and env)
    #[arg(long, global = true, value_parser = parse_interval)]
    poll_interval: Option<Duration>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show version information
    Version,

    /// Create a session and follow it until it finishes
    #[command(visible_alias = "r")]
    Run(RunArgs),

    /// Show current configuration
    Config,

    /// Manage the secrets file
    Secrets {
        #[command(subcommand)]
        command: SecretsCommand,
    },
}

#[derive(Subcommand, Debug)]
enum SecretsCommand {
    /// Write a secrets template with secure permissions
    Init,
}

fn parse_interval(value: &str) -> Result<Duration, String> {
    match parse_duration(value) {
        Some(d) if !d.is_zero() => Ok(d),
        Some(_) => Err("interval must be non-zero".to_string()),
        None => Err(format!("invalid duration: {}", value)),
    }
}

fn print_config(config: &Config) {
    println!("Foreman Configuration");
    println!("=====================");
    println!();
    println!("API:");
    println!("  base_url: {}", config.api.base_url);
    println!("  api_version: {}", config.api.api_version);
    println!("  timeout: {:?}", config.api.timeout);
    println!();
    println!("Retry:");
    println!("  max_attempts: {}", config.retry.max_attempts);
    println!("  base_delay: {:?}", config.retry.base_delay);
    println!("  max_delay: {:?}", config.retry.max_delay);
    println!();
    println!("Polling:");
    println!("  interval: {:?}", config.polling.interval);
    println!("  max_duration: {:?}", config.polling.max_duration);
    println!("  stuck_timeout: {:?}", config.polling.stuck_timeout);
    println!("  auto_approve: {}", config.polling.auto_approve);
    println!();
    println!("Rate limit:");
    println!("  window: {:?}", config.rate_limit.window);
    println!("  max_calls: {}", config.rate_limit.max_calls);
    println!();
    if let Some(path) = Config::default_config_path() {
        println!("Config file: {}", path.display());
        if path.exists() {
            println!("  (exists)");
        } else {
            println!("  (not found - using defaults)");
        }
    }
    if let Some(path) = Secrets::default_secrets_path() {
        println!("Secrets file: {}", path.display());
    }
    match Secrets::load().map(|s| s.key_source()) {
        Ok(Some(KeySource::Env)) => println!("API key: set (JULES_API_KEY)"),
        Ok(Some(KeySource::File)) => println!("API key: set (secrets file)"),
        Ok(None) => println!("API key: not set"),
        Err(e) => println!("API key: unreadable ({})", e),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.verbose {
        tracing::info!("Verbose mode enabled");
    }

    let config = Config::load_with_overrides(CliOverrides {
        base_url: cli.base_url.clone(),
        poll_interval: cli.poll_interval,
        auto_approve: None,
    })?;

    if cli.verbose {
        tracing::info!(
            base_url = %config.api.base_url,
            interval = ?config.polling.interval,
            "Configuration loaded"
        );
    }

    match cli.command {
        Some(Commands::Version) => {
            println!("foreman {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Run(args)) => {
            args.execute(cli.verbose, config).await?;
        }
        Some(Commands::Config) => print_config(&config),
        Some(Commands::Secrets {
            command: SecretsCommand::Init,
        }) => {
            let path = Secrets::create_template()?;
            println!("Created secrets template at {}", path.display());
            println!("Add your Jules API key to it, or set JULES_API_KEY.");
        }
        None => {
            println!("Foreman - orchestrate remote coding worker sessions");
            println!();
            println!("Use --help for usage information");
        }
    }

    Ok(())
}
