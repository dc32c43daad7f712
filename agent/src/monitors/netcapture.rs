//! Packet capture monitor: tcpdump writing to a file for the length of the
//! run, with the orchestration host's own traffic excluded.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::warn;

use shared::Result;

use crate::config::Config;

pub const CAPTURE_FILE: &str = "capture.pcap";

/// Traffic to and from the orchestration host is the sandbox's own store and
/// blob plumbing, never the sample's.
fn exclusion_filter(server_address: &str) -> String {
    format!("src not {0} and dst not {0}", server_address)
}

pub struct NetCapture {
    child: Child,
    path: PathBuf,
}

impl NetCapture {
    pub fn start(config: &Config) -> Result<Self> {
        let path = config.scratch_dir.join(CAPTURE_FILE);
        let child = Command::new("/usr/bin/sudo")
            .arg(&config.tcpdump_path)
            .arg("-w")
            .arg(&path)
            .arg(exclusion_filter(&config.server_address))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(Self { child, path })
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Kills tcpdump and reaps it before handing back the capture path, so
    /// the file is fully flushed when the caller uploads it.
    pub async fn stop(mut self) -> PathBuf {
        if let Err(err) = self.child.start_kill() {
            warn!(%err, "tcpdump already exited");
        }
        let _ = self.child.wait().await;
        self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusion_filter_names_server_twice() {
        assert_eq!(
            exclusion_filter("192.168.1.62"),
            "src not 192.168.1.62 and dst not 192.168.1.62"
        );
    }
}
