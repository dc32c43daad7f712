//! File-drop watcher: a dedicated close-event stream that captures every
//! file the sample finishes writing.
//!
//! Each qualifying close triggers a micro-pipeline: checksum, type
//! identification, blob upload, and a record in the job's file collection.
//! A failing pipeline still leaves a degraded record so the drop is never
//! silently lost. The close event itself also lands in the event collection
//! like any other event.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use bson::{doc, Document};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use shared::events::{KEY_PARENT_COMMAND, KEY_RESPONSIBLE_COMMAND};
use shared::hash;
use shared::store::Store;
use shared::{CoreError, Result};

use super::enrich::{self, PsCache};
use crate::config::Config;

/// Writes under these directories churn constantly and carry nothing about
/// the sample.
const EXCLUDED_DIRS: &[&str] = &["/private/var/log/com.apple.xpc.launchd"];

fn dir_excluded(path: &str) -> bool {
    let parent = Path::new(path)
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    EXCLUDED_DIRS.iter().any(|dir| parent == *dir)
}

/// Only modified, non-empty files are worth capturing.
fn should_capture(modified: bool, size: i64) -> bool {
    modified && size > 0
}

/// Target path and size of a close event, when present.
fn close_target(event: &Document) -> Option<(String, i64, bool)> {
    let close = event.get_document("event").ok()?.get_document("close").ok()?;
    let target = close.get_document("target").ok()?;
    let path = target.get_str("path").ok()?.to_string();
    let size = target
        .get_document("stat")
        .ok()
        .and_then(|s| s.get_i64("st_size").ok().or_else(|| s.get_i32("st_size").ok().map(i64::from)))
        .unwrap_or(0);
    let modified = close.get_bool("modified").unwrap_or(false);
    Some((path, size, modified))
}

pub struct FileWatch {
    child: Child,
    reader: JoinHandle<()>,
}

impl FileWatch {
    pub fn start(store: Store, config: &Config, job_id: Uuid) -> Result<Self> {
        let mut child = Command::new("/usr/bin/sudo")
            .arg(&config.eslogger_path)
            .arg("close")
            .stdout(Stdio::piped())
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CoreError::Subprocess("close stream has no stdout".to_string()))?;
        let file_tool = config.file_path.clone();

        let reader = tokio::spawn(async move {
            let events = store.job_events(&job_id);
            let files = store.job_files(&job_id);
            let mut cache = PsCache::new();
            let mut lines = BufReader::new(stdout).lines();

            while let Ok(Some(line)) = lines.next_line().await {
                if line.is_empty() {
                    continue;
                }
                let mut event: Document = match serde_json::from_str(&line) {
                    Ok(event) => event,
                    Err(err) => {
                        warn!(%err, "unparseable close line");
                        continue;
                    }
                };
                let Some((path, size, modified)) = close_target(&event) else {
                    continue;
                };
                if dir_excluded(&path) {
                    continue;
                }
                let Some(meta) = enrich::flatten(&mut event) else {
                    continue;
                };
                enrich::resolve_commands(&mut event, &meta, &mut cache).await;

                if should_capture(modified, size) {
                    let record =
                        capture_file(&store, &file_tool, &event, &path, size).await;
                    if let Err(err) = files.insert_one(record, None).await {
                        warn!(%err, path, "failed to store file-drop record");
                    }
                }
                if let Err(err) = events.insert_one(event, None).await {
                    warn!(%err, "failed to store close event");
                }
            }
        });

        Ok(Self { child, reader })
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    pub async fn stop(mut self) {
        if let Err(err) = self.child.start_kill() {
            warn!(%err, "close stream already exited");
        }
        let _ = self.child.wait().await;
        let _ = self.reader.await;
    }
}

/// Runs the drop pipeline and builds the record. Any failure downgrades to a
/// record with an error field instead of dropping the observation.
async fn capture_file(
    store: &Store,
    file_tool: &Path,
    event: &Document,
    path: &str,
    size: i64,
) -> Document {
    let parent_command = event.get_str(KEY_PARENT_COMMAND).unwrap_or("None");
    let responsible_command = event.get_str(KEY_RESPONSIBLE_COMMAND).unwrap_or("None");

    match upload_file(store, file_tool, path).await {
        Ok((sha256, file_type, blob_id)) => {
            info!(path, size, "captured dropped file");
            doc! {
                "file_sha256": sha256,
                "file_type": file_type,
                "file_path": path,
                "file_size": size,
                "parent_command": parent_command,
                "responsible_command": responsible_command,
                "file_id": blob_id,
                "upload_success": true,
            }
        }
        Err(err) => {
            warn!(path, %err, "file drop pipeline failed");
            doc! {
                "file_path": path,
                "file_size": size,
                "parent_command": parent_command,
                "responsible_command": responsible_command,
                "error": err.to_string(),
                "upload_success": false,
            }
        }
    }
}

async fn upload_file(
    store: &Store,
    file_tool: &Path,
    path: &str,
) -> Result<(String, String, bson::oid::ObjectId)> {
    let sha256 = hash::sha256_file(Path::new(path)).await?;
    let file_type = identify(file_tool, path).await?;
    let name = Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string());
    let blob_id = store.blobs().put_file(&name, Path::new(path)).await?;
    Ok((sha256, file_type, blob_id))
}

/// `file -b` one-liner describing the content.
async fn identify(file_tool: &Path, path: &str) -> Result<String> {
    let output = Command::new(file_tool).arg("-b").arg(path).output().await?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_should_capture_requires_modified_and_nonempty() {
        assert!(should_capture(true, 10));
        assert!(!should_capture(true, 0));
        assert!(!should_capture(false, 10));
    }

    #[test]
    fn test_launchd_log_dir_is_excluded() {
        assert!(dir_excluded(
            "/private/var/log/com.apple.xpc.launchd/launchd.log"
        ));
        assert!(!dir_excluded("/tmp/payload.bin"));
    }

    #[test]
    fn test_close_target_reads_path_size_modified() {
        let event = doc! {
            "event": { "close": {
                "target": { "path": "/tmp/drop.bin", "stat": { "st_size": 2048i64 } },
                "modified": true,
            } },
        };
        let (path, size, modified) = close_target(&event).unwrap();
        assert_eq!(path, "/tmp/drop.bin");
        assert_eq!(size, 2048);
        assert!(modified);
    }
}
