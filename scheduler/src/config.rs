//! Scheduler configuration: environment variables for the moving parts,
//! a TOML file for the fleet inventory.

use std::env;
use std::path::PathBuf;

use serde::Deserialize;

use shared::types::MachineKind;

pub const DEFAULT_TICK_SECS: u64 = 5;
pub const DEFAULT_REPORT_GRACE_SECS: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read fleet file {path}: {source}")]
    FleetRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse fleet file: {0}")]
    FleetParse(#[from] toml::de::Error),
    #[error("fleet file declares no machines")]
    EmptyFleet,
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// One fleet member as declared in the fleet file. Virtual machines carry
/// the command that boots them; physical ones are probed instead.
#[derive(Debug, Clone, Deserialize)]
pub struct MachineEntry {
    pub name: String,
    pub address: String,
    pub kind: MachineKind,
    pub proxy_port: u16,
    #[serde(default)]
    pub start_command: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
struct FleetFile {
    machine: Vec<MachineEntry>,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Document store connection string
    pub store_uri: String,
    /// Polling cadence for every scheduler phase
    pub tick_secs: u64,
    /// Wait between marking a job analyzed and reading its collections, so
    /// in-flight capture inserts land first
    pub report_grace_secs: u64,
    /// Intercepting proxy binary
    pub mitmdump_path: PathBuf,
    /// Optional override for the bundled flow replay addon
    pub replay_script: Option<PathBuf>,
    /// Where per-job flow files are written while a capture runs
    pub flows_dir: PathBuf,
    /// Loopback port used when replaying flows for header extraction
    pub replay_port: u16,
    pub fleet: Vec<MachineEntry>,
}

impl Config {
    /// Reads environment variables and the fleet file named by `FLEET_FILE`
    /// (default `fleet.toml`).
    pub fn load() -> Result<Self, ConfigError> {
        let fleet_path =
            PathBuf::from(env::var("FLEET_FILE").unwrap_or_else(|_| "fleet.toml".to_string()));
        let raw = std::fs::read_to_string(&fleet_path).map_err(|source| ConfigError::FleetRead {
            path: fleet_path,
            source,
        })?;
        let fleet = parse_fleet(&raw)?;

        Ok(Self {
            store_uri: env::var("STORE_URI")
                .unwrap_or_else(|_| "mongodb://127.0.0.1:27017".to_string()),
            tick_secs: env_u64("TICK_SECS", DEFAULT_TICK_SECS)?,
            report_grace_secs: env_u64("REPORT_GRACE_SECS", DEFAULT_REPORT_GRACE_SECS)?,
            mitmdump_path: PathBuf::from(
                env::var("MITMDUMP_PATH").unwrap_or_else(|_| "/usr/local/bin/mitmdump".to_string()),
            ),
            replay_script: env::var("REPLAY_SCRIPT").ok().map(PathBuf::from),
            flows_dir: PathBuf::from(env::var("FLOWS_DIR").unwrap_or_else(|_| "flows".to_string())),
            replay_port: env::var("REPLAY_PORT")
                .unwrap_or_else(|_| "8091".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue {
                    name: "REPLAY_PORT",
                    value: env::var("REPLAY_PORT").unwrap_or_default(),
                })?,
            fleet,
        })
    }
}

fn env_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
    }
}

/// Parses the fleet inventory, rejecting an empty one.
pub fn parse_fleet(raw: &str) -> Result<Vec<MachineEntry>, ConfigError> {
    let file: FleetFile = toml::from_str(raw)?;
    if file.machine.is_empty() {
        return Err(ConfigError::EmptyFleet);
    }
    Ok(file.machine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_fleet_both_kinds() {
        let fleet = parse_fleet(
            r#"
            [[machine]]
            name = "macos13-1"
            address = "192.168.1.198"
            kind = "physical"
            proxy_port = 8080

            [[machine]]
            name = "vm-ventura"
            address = "192.168.64.5"
            kind = "virtual"
            proxy_port = 8081
            start_command = ["/usr/local/bin/utmctl", "start", "ventura"]
            "#,
        )
        .unwrap();

        assert_eq!(fleet.len(), 2);
        assert_eq!(fleet[0].name, "macos13-1");
        assert_eq!(fleet[0].kind, MachineKind::Physical);
        assert!(fleet[0].start_command.is_none());
        assert_eq!(fleet[1].kind, MachineKind::Virtual);
        assert_eq!(
            fleet[1].start_command.as_deref().unwrap(),
            ["/usr/local/bin/utmctl", "start", "ventura"]
        );
    }

    #[test]
    fn test_parse_fleet_rejects_empty() {
        assert!(matches!(
            parse_fleet("machine = []"),
            Err(ConfigError::EmptyFleet)
        ));
    }
}
