//! Operator CLI for the admin operations exposed over REST (§6): starts a
//! master-data process or manually overrides a group's scheduled execution,
//! without going through the HTTP surface.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use marketcore::composition;
use marketcore::config::Config;
use tracing::{info, Level};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "marketcore-admin", about = "Operator CLI for the master-data pipeline and group scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start (or resume) the master-data pipeline for a trading day.
    StartMasterData {
        /// Trading days back from today; 0 resolves to the previous trading day.
        #[arg(long, default_value_t = 0)]
        number_of_past_days: u32,
    },
    /// Look up a master-data process by id.
    MasterDataStatus {
        #[arg(long)]
        id: i64,
    },
    /// Manually execute a stock group, bypassing the wall-clock trigger.
    ExecuteGroup {
        #[arg(long)]
        id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("failed to load configuration")?;
    let ctx = composition::build(&config).await?;

    match cli.command {
        Command::StartMasterData { number_of_past_days } => {
            let result = ctx.orchestrator.start_process(number_of_past_days).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::MasterDataStatus { id } => {
            let process = ctx.orchestrator.find_by_id(id).await?.context("process not found")?;
            println!("{}", serde_json::to_string_pretty(&process)?);
        }
        Command::ExecuteGroup { id } => {
            ctx.scheduler.execute_group(id).await?;
            info!(group_id = id, "group execution dispatched");
        }
    }

    Ok(())
}
