//! Agent binary: runs on each sandbox machine.

mod config;
mod detonate;
mod monitors;
mod run;

use clap::Parser;

use shared::store::Store;
use shared::telemetry;

use config::Config;
use run::Agent;

#[derive(Parser)]
#[command(name = "agent", about = "Sandbox machine detonation agent")]
struct Cli {
    /// Override the machine name from the environment
    #[arg(long)]
    machine_name: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init("agent");

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(name) = cli.machine_name {
        config.machine_name = name;
    }

    let store = Store::connect(&config.store_uri).await?;
    Agent::new(store, config).run().await?;
    Ok(())
}
