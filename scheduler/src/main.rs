//! Scheduler binary: fleet-facing half of the sandbox.

mod assign;
mod baseline;
mod capture;
mod config;
mod fleet;
mod submit;
mod triage;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

use shared::store::Store;
use shared::telemetry;

use assign::Scheduler;
use config::Config;

#[derive(Parser)]
#[command(name = "scheduler", about = "Detonation scheduler and triage runner")]
struct Cli {
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run the polling loop (the default)
    Run,
    /// Upload a sample and queue a detonation job
    Submit {
        /// Sample file to detonate
        file: PathBuf,
        /// Detonation time in seconds
        #[arg(long, default_value_t = 120)]
        timeout: u64,
        /// Free-form tag recorded on the job
        #[arg(long)]
        tag: Option<String>,
    },
    /// Fold a finished clean run into the goodlists
    Baseline {
        /// Job id of the clean run
        job_id: Uuid,
    },
    /// Drop jobs, machines, run logs, and blobs
    Clean {
        /// Also drop the goodlists
        #[arg(long)]
        goodlists: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init("scheduler");

    let cli = Cli::parse();
    let config = Config::load()?;
    let store = Store::connect(&config.store_uri).await?;

    match cli.command.unwrap_or(CliCommand::Run) {
        CliCommand::Run => {
            Scheduler::new(store, config).run().await?;
        }
        CliCommand::Submit { file, timeout, tag } => {
            let job = submit::submit(&store, &file, timeout, tag).await?;
            println!("{}", job.id);
        }
        CliCommand::Baseline { job_id } => {
            let summary = baseline::absorb(&store, &job_id).await?;
            println!(
                "events: {}/{} new, messages: {}/{} new",
                summary.events_added,
                summary.events_seen,
                summary.messages_added,
                summary.messages_seen
            );
        }
        CliCommand::Clean { goodlists } => {
            store.cleanup(goodlists).await?;
            println!("store cleaned{}", if goodlists { " including goodlists" } else { "" });
        }
    }

    Ok(())
}
