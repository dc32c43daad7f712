//! Request-header extraction from a recorded flow file.
//!
//! The flow file is replayed through the proxy with an addon script that
//! writes the raw request heads of every non-platform host to
//! `request_headers.txt`. Header extraction failing never fails triage; the
//! report simply carries no headers.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::warn;

use shared::Result;

use crate::config::Config;

const HEADERS_FILE: &str = "request_headers.txt";
const ADDON_FILE: &str = "save_headers.py";

/// Bundled addon, written next to the flow files before each replay.
/// `REPLAY_SCRIPT` points at an external script instead when set.
const REPLAY_ADDON: &str = include_str!("../../assets/save_headers.py");

/// Line breaks become `<br>` so the report can be dropped straight into a
/// results page.
pub fn format_headers(raw: &str) -> String {
    raw.replace('\n', "<br>")
}

/// Replays the flow file and returns the formatted request headers, or None
/// when no flows were recorded. Consumes both the flow file and the scratch
/// headers file.
pub async fn extract(config: &Config, flows: &Path) -> Result<Option<String>> {
    if !flows.exists() {
        return Ok(None);
    }

    let script = match &config.replay_script {
        Some(path) => path.clone(),
        None => materialize_addon(&config.flows_dir).await?,
    };

    let status = Command::new(&config.mitmdump_path)
        .arg("-s")
        .arg(&script)
        .arg("-r")
        .arg(flows)
        .arg("-p")
        .arg(config.replay_port.to_string())
        .current_dir(&config.flows_dir)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;
    if !status.success() {
        warn!(%status, "flow replay exited abnormally");
    }

    let headers_path = config.flows_dir.join(HEADERS_FILE);
    let raw = tokio::fs::read_to_string(&headers_path).await?;

    tokio::fs::remove_file(&headers_path).await.ok();
    tokio::fs::remove_file(flows).await.ok();

    Ok(Some(format_headers(&raw)))
}

async fn materialize_addon(flows_dir: &Path) -> Result<PathBuf> {
    let path = flows_dir.join(ADDON_FILE);
    tokio::fs::write(&path, REPLAY_ADDON).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_headers_uses_html_breaks() {
        let raw = "GET /payload HTTP/1.1\nHost: example.test\n\n";
        assert_eq!(
            format_headers(raw),
            "GET /payload HTTP/1.1<br>Host: example.test<br><br>"
        );
    }

    #[test]
    fn test_format_headers_empty_is_empty() {
        assert_eq!(format_headers(""), "");
    }

    #[tokio::test]
    async fn test_bundled_addon_is_written_for_replay() {
        let flows_dir = tempfile::tempdir().unwrap();
        let script = materialize_addon(flows_dir.path()).await.unwrap();

        assert_eq!(script, flows_dir.path().join(ADDON_FILE));
        let body = tokio::fs::read_to_string(&script).await.unwrap();
        assert!(body.contains("request_headers.txt"));
        assert!(body.contains("apple.com"));
    }
}
