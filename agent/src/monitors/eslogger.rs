//! Security-event monitor: wraps the endpoint-security logger and streams
//! every subscribed event into the job's event collection.

use std::process::Stdio;

use bson::Document;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use shared::events::EventPayload;
use shared::store::Store;
use shared::Result;

use super::enrich::{self, PsCache};
use crate::config::Config;

/// Close events are owned by the file watcher, which needs their file sizes.
fn subscribed_kinds() -> Vec<&'static str> {
    EventPayload::ALL_KINDS
        .iter()
        .copied()
        .filter(|kind| *kind != "close")
        .collect()
}

pub struct EsloggerMonitor {
    child: Child,
    reader: JoinHandle<()>,
}

impl EsloggerMonitor {
    pub fn start(store: Store, config: &Config, job_id: Uuid) -> Result<Self> {
        let mut child = Command::new("/usr/bin/sudo")
            .arg(&config.eslogger_path)
            .args(subscribed_kinds())
            .stdout(Stdio::piped())
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| shared::CoreError::Subprocess("eslogger has no stdout".to_string()))?;

        let reader = tokio::spawn(async move {
            let events = store.job_events(&job_id);
            let mut cache = PsCache::new();
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.is_empty() {
                    continue;
                }
                let mut event: Document = match serde_json::from_str(&line) {
                    Ok(event) => event,
                    Err(err) => {
                        warn!(%err, "unparseable event line");
                        debug!(line = %line, "dropped event");
                        continue;
                    }
                };
                let Some(meta) = enrich::flatten(&mut event) else {
                    continue;
                };
                enrich::resolve_commands(&mut event, &meta, &mut cache).await;
                if let Err(err) = events.insert_one(event, None).await {
                    warn!(%err, kind = %meta.kind, "failed to store event");
                }
            }
        });

        Ok(Self { child, reader })
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Kills the logger and drains the pipe to its end so no tail events are
    /// lost.
    pub async fn stop(mut self) {
        if let Err(err) = self.child.start_kill() {
            warn!(%err, "event logger already exited");
        }
        let _ = self.child.wait().await;
        let _ = self.reader.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_events_are_not_subscribed() {
        let kinds = subscribed_kinds();
        assert!(!kinds.contains(&"close"));
        assert_eq!(kinds.len(), EventPayload::ALL_KINDS.len() - 1);
        assert!(kinds.contains(&"exec"));
        assert!(kinds.contains(&"open"));
    }
}
