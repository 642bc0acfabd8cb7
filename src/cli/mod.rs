mod client;
mod serve;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::core::config::AppConfig;
use client::{ApiClient, TriggerArgs};

#[derive(Debug, Parser)]
#[command(name = "loadrun", version, about = "Orchestrates k6 load-test runs on Kubernetes")]
pub(crate) struct Cli {
    /// Path to loadrun.toml
    #[arg(long, global = true, env = "LOADRUN_CONFIG")]
    config: Option<PathBuf>,

    /// Base URL of a running `loadrun serve`
    #[arg(
        long,
        global = true,
        env = "LOADRUN_API_URL",
        default_value = "http://127.0.0.1:8080"
    )]
    api_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Start the HTTP API and the periodic status sync
    Serve,
    /// Reconcile every outstanding step once against the cluster
    Sync,
    /// Start a run of a scenario for a team
    Trigger {
        #[arg(long)]
        team: String,
        #[arg(long)]
        scenario: String,
        #[arg(long)]
        comment: Option<String>,
        #[arg(long)]
        parallelism: Option<u32>,
        /// Trigger as a participant; runs are capped lower
        #[arg(long)]
        creator: Option<String>,
    },
    /// Show a run and its steps
    Run { run_id: String },
    /// Print the logs collected for a run step
    Logs {
        step_id: String,
        #[arg(long)]
        tail_lines: Option<u32>,
    },
    /// Delete the cluster executions of a run
    Cleanup { run_id: String },
}

pub async fn run_main() -> Result<()> {
    let cli = Cli::parse();
    let api = ApiClient::new(&cli.api_url);

    match cli.command {
        Command::Serve => {
            let config = AppConfig::load(cli.config.as_deref()).await?;
            serve::run_serve(config).await
        }
        Command::Sync => {
            let config = AppConfig::load(cli.config.as_deref()).await?;
            serve::run_sync_once(config).await
        }
        Command::Trigger {
            team,
            scenario,
            comment,
            parallelism,
            creator,
        } => {
            client::trigger(
                &api,
                TriggerArgs {
                    team_id: team,
                    scenario_id: scenario,
                    comment,
                    parallelism,
                    creator_id: creator,
                },
            )
            .await
        }
        Command::Run { run_id } => client::show_run(&api, &run_id).await,
        Command::Logs {
            step_id,
            tail_lines,
        } => client::step_logs(&api, &step_id, tail_lines).await,
        Command::Cleanup { run_id } => client::cleanup(&api, &run_id).await,
    }
}
