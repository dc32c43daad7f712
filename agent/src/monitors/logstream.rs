//! Unified-log monitor: streams `log stream` ndjson into the job's syslog
//! collection.

use std::process::Stdio;

use bson::{Bson, Document};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use shared::store::Store;
use shared::Result;

pub struct LogStreamMonitor {
    child: Child,
    reader: JoinHandle<()>,
}

/// Store-side fixups: trace ids overflow the document integer range so they
/// are stringified, and an empty subsystem is stored as "None" so it can be
/// filtered on.
fn normalize(message: &mut Document) {
    if let Some(trace_id) = message.get("traceID") {
        let text = match trace_id {
            Bson::String(s) => s.clone(),
            other => other.to_string(),
        };
        message.insert("traceID", text);
    }
    if message.get_str("subsystem").map(str::is_empty).unwrap_or(false) {
        message.insert("subsystem", "None");
    }
}

impl LogStreamMonitor {
    pub fn start(store: Store, job_id: Uuid) -> Result<Self> {
        let mut child = Command::new("/usr/bin/log")
            .arg("stream")
            .arg("--style")
            .arg("ndjson")
            .arg("--debug")
            .stdout(Stdio::piped())
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| shared::CoreError::Subprocess("log stream has no stdout".to_string()))?;

        let reader = tokio::spawn(async move {
            let syslog = store.job_syslog(&job_id);
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.is_empty() {
                    continue;
                }
                let mut message: Document = match serde_json::from_str(&line) {
                    Ok(message) => message,
                    Err(err) => {
                        warn!(%err, "unparseable log line");
                        continue;
                    }
                };
                normalize(&mut message);
                if let Err(err) = syslog.insert_one(message, None).await {
                    warn!(%err, "failed to store log message");
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
            warn!(%err, "log stream already exited");
        }
        let _ = self.child.wait().await;
        let _ = self.reader.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_normalize_stringifies_trace_id() {
        let mut message = doc! { "traceID": 846930886198338i64, "subsystem": "com.apple.tcc" };
        normalize(&mut message);
        assert_eq!(message.get_str("traceID").unwrap(), "846930886198338");
        assert_eq!(message.get_str("subsystem").unwrap(), "com.apple.tcc");
    }

    #[test]
    fn test_normalize_keeps_text_under_event_message() {
        let line = r#"{"traceID":846930886198338,"eventMessage":"Service exited due to SIGKILL","subsystem":""}"#;
        let mut message: Document = serde_json::from_str(line).unwrap();
        normalize(&mut message);
        assert_eq!(
            message.get_str("eventMessage").unwrap(),
            "Service exited due to SIGKILL"
        );
        assert_eq!(message.get_str("traceID").unwrap(), "846930886198338");
        assert_eq!(message.get_str("subsystem").unwrap(), "None");
    }

    #[test]
    fn test_normalize_fills_empty_subsystem() {
        let mut message = doc! { "subsystem": "" };
        normalize(&mut message);
        assert_eq!(message.get_str("subsystem").unwrap(), "None");
    }
}
