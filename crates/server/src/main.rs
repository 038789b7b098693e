//! Fleetmux Server
//!
//! Multiplexes remote shell sessions over one control connection per console.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use server::channel::{ChannelListener, ChannelSettings};
use server::config::{Config, InventorySource};
use server::inventory::{FileInventory, HttpInventory, InventoryBackend, TargetResolver};
use server::session::SshConnector;

/// Fleetmux server - multiplexed remote shells for cloud fleets.
#[derive(Parser, Debug)]
#[command(name = "fleetmux-server")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the server.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the server
    Serve,

    /// Load and validate the configuration, then print the effective TOML
    CheckConfig,

    /// List the targets an account can open sessions against
    Targets {
        /// Account to list targets for
        #[arg(long)]
        account: String,

        /// Only list hosts reported running
        #[arg(long)]
        running: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        tracing::info!("Using config file: {:?}", config_path);
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };

    config.apply_env_overrides();
    config.validate()?;

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::CheckConfig => {
            println!("{}", config.to_toml()?);
            println!("# configuration OK");
            Ok(())
        }
        Commands::Targets { account, running } => {
            let resolver = build_resolver(&config)?;
            let targets = resolver
                .list_targets(&account, running)
                .await
                .map_err(|e| anyhow::anyhow!("failed to list targets: {}", e))?;

            if targets.is_empty() {
                println!("no targets for account {}", account);
                return Ok(());
            }

            for target in targets {
                println!(
                    "{:<16} {:<24} {}@{}:{} [{}] {}",
                    target.target_id,
                    target.display_name,
                    target.login,
                    target.host,
                    target.port,
                    target.region,
                    if target.running { "running" } else { "stopped" },
                );
            }
            Ok(())
        }
    }
}

/// Run the control-connection listener until interrupted.
async fn serve(config: Config) -> anyhow::Result<()> {
    tracing::info!("Fleetmux server starting...");

    let resolver = Arc::new(build_resolver(&config)?);
    let connector = Arc::new(SshConnector::new());
    let settings = ChannelSettings::from(&config.session);

    let listener = ChannelListener::bind(&config.server.listen_addr).await?;

    tokio::select! {
        result = listener.serve(resolver, connector, settings) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}

/// Construct the inventory backend the configuration names.
fn build_resolver(config: &Config) -> anyhow::Result<InventoryBackend> {
    match config.inventory.source {
        InventorySource::File => {
            let path = config
                .inventory
                .path
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("inventory source \"file\" requires a path"))?;
            tracing::info!(path = %path.display(), "Loading file inventory");
            let inventory = FileInventory::load(path)
                .map_err(|e| anyhow::anyhow!("failed to load inventory: {}", e))?;
            tracing::info!(targets = inventory.target_count(), "Inventory loaded");
            Ok(InventoryBackend::File(inventory))
        }
        InventorySource::Http => {
            let url = config
                .inventory
                .url
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("inventory source \"http\" requires a url"))?;
            tracing::info!(url = %url, "Using HTTP inventory");
            let inventory = HttpInventory::new(url)
                .map_err(|e| anyhow::anyhow!("failed to configure inventory client: {}", e))?;
            Ok(InventoryBackend::Http(inventory))
        }
    }
}
