//! Binary entry point for hookcord.
//!
//! Runs the relay server and a few store maintenance commands.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::Context;
use clap::{Parser, Subcommand};
use hookcord::config::RelayConfig;
use hookcord::observability;
use hookcord::registry::DiscordConnector;
use hookcord::security::EncryptionKey;
use hookcord::server::{self, AppState};
use hookcord::{ConnectionRegistry, CredentialStore, SetupId, SqliteCredentialStore};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// Hookcord - relay GitHub and GitLab webhooks to per-tenant Discord bots.
#[derive(Parser)]
#[command(name = "hookcord")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, global = true, env = "HOOKCORD_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP relay (default).
    Serve,

    /// Print a fresh 64-hex-character encryption key.
    GenerateKey,

    /// List active setups (non-secret fields only).
    ListSetups,

    /// Soft-delete a setup.
    DisableSetup {
        /// Setup id (`setup_...`).
        id: String,
    },
}

/// Main entry point.
#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Serve);

    if matches!(command, Commands::GenerateKey) {
        println!("{}", EncryptionKey::generate_hex());
        return ExitCode::SUCCESS;
    }

    let config = match RelayConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    let _observability = match observability::init(&config) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialize observability: {e}");
            return ExitCode::FAILURE;
        },
    };

    match run_command(command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Command failed");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
async fn run_command(command: Commands, config: RelayConfig) -> anyhow::Result<()> {
    match command {
        Commands::Serve => cmd_serve(config).await,
        Commands::ListSetups => cmd_list_setups(&config),
        Commands::DisableSetup { id } => cmd_disable_setup(&config, &id),
        Commands::GenerateKey => Ok(()),
    }
}

/// Opens the credential store, failing fast on a missing or malformed key.
fn open_store(config: &RelayConfig) -> anyhow::Result<SqliteCredentialStore> {
    let encryptor = config
        .encryptor()
        .context("encryption key rejected at startup")?;
    SqliteCredentialStore::open(&config.database_url, encryptor)
        .with_context(|| format!("cannot open credential store at {}", config.database_url))
}

async fn cmd_serve(config: RelayConfig) -> anyhow::Result<()> {
    let store: Arc<dyn CredentialStore> = Arc::new(open_store(&config)?);
    let connector = DiscordConnector::new(&config.discord.api_base, config.timeouts.send)?;
    let registry = Arc::new(ConnectionRegistry::new(
        Arc::new(connector),
        config.timeouts.connect,
    ));

    if config.preload {
        let registry = Arc::clone(&registry);
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            if let Err(e) = registry.preload_all(&store).await {
                tracing::error!(error = %e, "Preload could not list tenants");
            }
        });
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        database = %config.database_url,
        "Starting hookcord"
    );
    let state = AppState::new(store, registry, Arc::new(config));
    server::serve(state).await?;
    Ok(())
}

fn cmd_list_setups(config: &RelayConfig) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let setups = store.list_active()?;

    if setups.is_empty() {
        println!("No active setups.");
        return Ok(());
    }

    println!("{:<44} {:<36} {:<30} CHANNEL", "ID", "DELIVERY TOKEN", "REPO");
    for setup in &setups {
        println!(
            "{:<44} {:<36} {:<30} {}",
            setup.id.as_str(),
            setup.delivery_token.as_str(),
            setup.repo,
            setup.discord_channel_id
        );
    }
    println!("\n{} active setup(s)", setups.len());
    Ok(())
}

fn cmd_disable_setup(config: &RelayConfig, id: &str) -> anyhow::Result<()> {
    let store = open_store(config)?;
    if store.disable(&SetupId::new(id))? {
        println!("Disabled {id}");
    } else {
        println!("No active setup with id {id}");
    }
    Ok(())
}
