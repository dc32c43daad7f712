//! Agent configuration, read entirely from the environment so the machine
//! image stays a single binary plus a `.env` file.

use std::env;
use std::path::PathBuf;

pub const DEFAULT_TICK_SECS: u64 = 5;

/// Seconds between starting the monitors and launching the sample, so the
/// scheduler has time to arm the capture proxy.
pub const SETTLE_SECS: u64 = 5;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    /// This machine's name, matching its fleet registration
    pub machine_name: String,
    pub store_uri: String,
    /// Address of the orchestration host, excluded from packet capture
    pub server_address: String,
    pub tick_secs: u64,
    /// Where samples, transcripts, and captures live during a run
    pub scratch_dir: PathBuf,
    pub eslogger_path: PathBuf,
    pub tcpdump_path: PathBuf,
    pub p7zip_path: PathBuf,
    pub file_path: PathBuf,
    /// Disabled only on development machines
    pub reboot_after_run: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            machine_name: env::var("MACHINE_NAME")
                .map_err(|_| ConfigError::Missing("MACHINE_NAME"))?,
            store_uri: env::var("STORE_URI")
                .map_err(|_| ConfigError::Missing("STORE_URI"))?,
            server_address: env::var("SERVER_ADDRESS")
                .map_err(|_| ConfigError::Missing("SERVER_ADDRESS"))?,
            tick_secs: env_u64("TICK_SECS", DEFAULT_TICK_SECS)?,
            scratch_dir: env_path("SCRATCH_DIR", "/tmp/squib"),
            eslogger_path: env_path("ESLOGGER_PATH", "/usr/bin/eslogger"),
            tcpdump_path: env_path("TCPDUMP_PATH", "/usr/sbin/tcpdump"),
            p7zip_path: env_path("P7ZIP_PATH", "/opt/homebrew/bin/7z"),
            file_path: env_path("FILE_PATH", "/usr/bin/file"),
            reboot_after_run: env::var("REBOOT_AFTER_RUN")
                .map(|v| v != "0" && v.to_lowercase() != "false")
                .unwrap_or(true),
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

fn env_path(name: &str, default: &str) -> PathBuf {
    PathBuf::from(env::var(name).unwrap_or_else(|_| default.to_string()))
}
