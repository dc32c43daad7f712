//! Fleet registration and machine lifecycle probes.

use std::process::Stdio;

use tokio::process::Command;
use tracing::{info, warn};

use shared::store::Store;
use shared::types::{Machine, MachineKind};
use shared::Result;

use crate::config::MachineEntry;

impl From<&MachineEntry> for Machine {
    fn from(entry: &MachineEntry) -> Self {
        Machine {
            name: entry.name.clone(),
            address: entry.address.clone(),
            kind: entry.kind,
            proxy_port: entry.proxy_port,
            assigned_job: None,
        }
    }
}

/// Writes every fleet entry into the machine collection, resetting any
/// assignment left over from a previous scheduler run.
pub async fn register(store: &Store, fleet: &[MachineEntry]) -> Result<()> {
    for entry in fleet {
        store.register_machine(&Machine::from(entry)).await?;
        info!(machine = %entry.name, kind = ?entry.kind, "registered fleet machine");
    }
    Ok(())
}

/// Single-packet liveness probe. Physical machines that fail it are skipped
/// for the current tick rather than errored.
pub async fn ping(address: &str) -> bool {
    let status = Command::new("ping")
        .arg("-c")
        .arg("1")
        .arg(address)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    matches!(status, Ok(s) if s.success())
}

/// Boots a virtual machine via its configured start command. Physical
/// machines have nothing to start.
pub async fn start(entry: &MachineEntry) -> Result<()> {
    if entry.kind != MachineKind::Virtual {
        return Ok(());
    }
    let Some(command) = entry.start_command.as_deref() else {
        warn!(machine = %entry.name, "virtual machine has no start command");
        return Ok(());
    };
    let (program, args) = command
        .split_first()
        .ok_or_else(|| shared::CoreError::Subprocess("empty start command".to_string()))?;
    let status = Command::new(program)
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;
    if !status.success() {
        return Err(shared::CoreError::Subprocess(format!(
            "start command for {} exited with {}",
            entry.name, status
        )));
    }
    Ok(())
}
