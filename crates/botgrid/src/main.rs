//! botgridd — runs one BotGrid process.
//!
//! # Usage
//!
//! ```text
//! botgridd run --config /etc/botgrid/botgrid.toml
//! botgridd config > botgrid.toml
//! ```

use std::path::PathBuf;

use botgrid::{Grid, GridConfig, telemetry};
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(name = "botgridd", about = "BotGrid workload process")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Mount enabled workloads and publish health until interrupted.
    Run {
        /// Path to botgrid.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the effective configuration as TOML.
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<GridConfig> {
    match path {
        Some(path) => GridConfig::from_file(path),
        None => Ok(GridConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.json_logs);

    match cli.command {
        Command::Run { config } => run(load_config(config.as_ref())?).await,
        Command::Config { config } => {
            print!("{}", load_config(config.as_ref())?.to_toml_string()?);
            Ok(())
        }
    }
}

async fn run(config: GridConfig) -> anyhow::Result<()> {
    let grid = Grid::open(config)?;
    grid.start();
    grid.mount_enabled_local().await?;
    info!(server_id = %grid.server_id(), "botgridd running");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    grid.shutdown().await;
    Ok(())
}
