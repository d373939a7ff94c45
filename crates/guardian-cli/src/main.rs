//! Guardian CLI - command-line interface for the security gateway.

use anyhow::Context;
use clap::Parser;
use guardian_core::{Guardian, GuardianConfig};
use guardian_immune::NoopSandboxDriver;
use guardian_model::{HttpLanguageModel, LanguageModel, NullModel};
use guardian_store::{write_atomic, PatternStore};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

const DEFAULT_CONFIG_PATH: &str = "config/guardian.json";

#[derive(Parser)]
#[command(name = "guardian")]
#[command(about = "Guardian Mesh - shared immunity gateway for AI agent fleets")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run the gateway node
    Start {
        /// Configuration file path
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: String,
    },
    /// Enable validation
    On {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: String,
    },
    /// Disable validation
    #[command(alias = "disable")]
    Off {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: String,
    },
    /// Show gateway status
    Status {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: String,
    },
}

/// Runtime toggle state shared between a running node and the CLI.
#[derive(Debug, Serialize, Deserialize)]
struct RuntimeState {
    enabled: bool,
}

fn load_config(path: &str) -> GuardianConfig {
    match std::fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(config) => config,
            Err(e) => {
                warn!("malformed config at {path}: {e} - using defaults");
                GuardianConfig::default()
            }
        },
        Err(_) => GuardianConfig::default(),
    }
}

fn state_path(config: &GuardianConfig) -> std::path::PathBuf {
    config.data_dir.join("runtime-state.json")
}

fn read_state(path: &Path, fallback: bool) -> bool {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<RuntimeState>(&raw).ok())
        .map(|state| state.enabled)
        .unwrap_or(fallback)
}

fn write_state(path: &Path, enabled: bool) -> anyhow::Result<()> {
    let bytes = serde_json::to_vec_pretty(&RuntimeState { enabled })?;
    write_atomic(path, &bytes, false).context("writing runtime state")?;
    Ok(())
}

fn build_model(config: &mut GuardianConfig) -> Arc<dyn LanguageModel> {
    let mut settings = config.guardian_ai.clone();
    if settings.api_key.is_empty() {
        if let Ok(key) = std::env::var("GUARDIAN_API_KEY") {
            settings.api_key = key;
        }
    }
    match HttpLanguageModel::new(settings) {
        Ok(model) => Arc::new(model),
        Err(e) => {
            warn!("validator model unavailable ({e}); disabling model stages");
            config.stages.guardian_ai = false;
            config.stages.json_parser = false;
            Arc::new(NullModel)
        }
    }
}

async fn run_node(config_path: &str) -> anyhow::Result<()> {
    let mut config = load_config(config_path);
    config.enabled = read_state(&state_path(&config), config.enabled);
    let model = build_model(&mut config);

    let guardian = Guardian::new(config, model, Arc::new(NoopSandboxDriver));
    guardian.start().await?;
    println!(
        "guardian running ({}) - ctrl-c to stop",
        if guardian.is_enabled() { "enabled" } else { "disabled" }
    );

    tokio::signal::ctrl_c().await?;
    guardian.shutdown().await;
    Ok(())
}

fn print_status(config_path: &str) {
    let config = load_config(config_path);
    let enabled = read_state(&state_path(&config), config.enabled);
    let store = PatternStore::load(config.data_dir.join("patterns.json"));

    println!("guardian: {}", if enabled { "ENABLED" } else { "DISABLED" });
    println!(
        "patterns: {} in {} categories (store version {})",
        store.total_patterns(),
        store.categories().len(),
        store.version()
    );
    println!(
        "stages: regex={} patternDb={} guardianAi={} jsonParser={}",
        config.stages.regex,
        config.stages.pattern_db,
        config.stages.guardian_ai,
        config.stages.json_parser
    );
    println!("replication: {}", if config.distributed_ledger.enabled { "on" } else { "off" });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Start { config }) => run_node(&config).await?,
        Some(Commands::On { config }) => {
            let loaded = load_config(&config);
            write_state(&state_path(&loaded), true)?;
            println!("guardian enabled");
        }
        Some(Commands::Off { config }) => {
            let loaded = load_config(&config);
            write_state(&state_path(&loaded), false)?;
            println!("guardian disabled");
        }
        Some(Commands::Status { config }) => print_status(&config),
        None => print_status(DEFAULT_CONFIG_PATH),
    }
    Ok(())
}
