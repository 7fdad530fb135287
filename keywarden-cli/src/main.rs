//! Keywarden CLI
//!
//! Command-line interface for running keywarden reconciliation cycles with
//! the bundled provider, store and state backend implementations.
//!
//! # Usage
//!
//! ```bash
//! # Run a single Load -> Process -> Save cycle
//! keywarden run --config manifest.yml --state-path state.json
//!
//! # Check a manifest without touching any state
//! keywarden validate --config manifest.yml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use keywarden_core::{
    Config, FileBackend, InprocessStore, Keywarden, Provider, RandomProvider, SecretStore,
    StateBackend,
};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "keywarden")]
#[command(about = "Declarative provisioning of short-lived credentials")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single reconciliation cycle
    Run {
        /// Path to the manifest file
        #[arg(short, long)]
        config: PathBuf,

        /// Path used by the file state backend
        #[arg(long, default_value = "state.json")]
        state_path: String,

        /// Rotation window applied to requests without an override
        #[arg(long, default_value = "10m", value_parser = parse_duration)]
        rotation_window: chrono::Duration,

        /// Rotation interval for secrets generated by the random provider
        #[arg(long, default_value = "720h", value_parser = parse_duration)]
        random_rotation_interval: chrono::Duration,

        /// Path template used by the inprocess store
        #[arg(long, default_value = "{{ .Namespace }}.{{ .Name }}")]
        inprocess_store_template: String,
    },

    /// Parse and validate a manifest without reconciling
    Validate {
        /// Path to the manifest file
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            config,
            state_path,
            rotation_window,
            random_rotation_interval,
            inprocess_store_template,
        } => {
            run(
                &config,
                &state_path,
                rotation_window,
                random_rotation_interval,
                inprocess_store_template,
            )
            .await
        }
        Commands::Validate { config } => validate(&config),
    }
}

async fn run(
    config_path: &PathBuf,
    state_path: &str,
    rotation_window: chrono::Duration,
    random_rotation_interval: chrono::Duration,
    inprocess_store_template: String,
) -> Result<()> {
    let config = load_config(config_path)?;

    let providers: Vec<Arc<dyn Provider>> = vec![Arc::new(
        RandomProvider::new().with_rotation_interval(random_rotation_interval),
    )];
    let stores: Vec<Arc<dyn SecretStore>> = vec![Arc::new(
        InprocessStore::new().with_secret_template(inprocess_store_template),
    )];
    let engine = Keywarden::new(providers, stores, rotation_window);

    let backend = FileBackend::new();
    let mut state = backend
        .load(state_path)
        .await
        .with_context(|| format!("load state from {state_path}"))?;

    engine.process(&config, &mut state).await?;

    backend
        .save(state_path, &state)
        .await
        .with_context(|| format!("save state to {state_path}"))?;

    info!(state_path, "reconciliation complete");
    Ok(())
}

fn validate(config_path: &PathBuf) -> Result<()> {
    let config = load_config(config_path)?;
    config.validate().context("invalid config")?;
    println!("{} is valid", config_path.display());
    Ok(())
}

fn load_config(path: &PathBuf) -> Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("read config from {}", path.display()))?;
    Config::parse(&contents).context("parse config")
}

fn parse_duration(input: &str) -> Result<chrono::Duration, String> {
    let duration = humantime::parse_duration(input).map_err(|e| e.to_string())?;
    chrono::Duration::from_std(duration).map_err(|e| e.to_string())
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt().with_env_filter(filter).init();
}
