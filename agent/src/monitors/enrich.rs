//! Capture-time enrichment of raw event documents.
//!
//! The logger emits the emitting process as nested structures and volatile
//! pids. Signatures and the ancestry tree need command lines, so the agent
//! flattens the useful identifiers onto the document and resolves pids to
//! commands while those pids are still alive. Resolution is cached per run;
//! pid reuse inside one short detonation window is acceptable noise.

use std::collections::HashMap;
use std::path::PathBuf;

use bson::{Bson, Document};
use tokio::process::Command;

use shared::events::{
    KEY_COMMAND, KEY_EVENT_KIND, KEY_PARENT_COMMAND, KEY_PID, KEY_PROCESS_PATH,
    KEY_RESPONSIBLE_COMMAND,
};

/// Identifiers lifted out of a raw event's process block.
#[derive(Debug, Clone, PartialEq)]
pub struct EventMeta {
    pub pid: i64,
    pub ppid: Option<i64>,
    pub responsible_pid: Option<i64>,
    pub process_path: String,
    pub kind: String,
}

/// Flattens the process block onto the document and returns the identifiers
/// needed for command resolution. Returns None for events emitted by other
/// endpoint-security clients, which are never recorded.
pub fn flatten(event: &mut Document) -> Option<EventMeta> {
    let process = event.get_document("process").ok()?;
    if process.get_bool("is_es_client").unwrap_or(false) {
        return None;
    }

    let pid = get_int(process.get_document("audit_token").ok()?, "pid")?;
    let process_path = process
        .get_document("executable")
        .ok()?
        .get_str("path")
        .ok()?
        .to_string();
    let kind = event.get_document("event").ok()?.keys().next()?.to_string();

    let ppid = get_int(process, "ppid");
    let responsible_pid = process
        .get_document("responsible_audit_token")
        .ok()
        .and_then(|t| get_int(t, "pid"));

    event.insert(KEY_PID, pid);
    event.insert(KEY_PROCESS_PATH, process_path.clone());
    event.insert(KEY_EVENT_KIND, kind.clone());

    Some(EventMeta {
        pid,
        ppid,
        responsible_pid,
        process_path,
        kind,
    })
}

fn get_int(doc: &Document, key: &str) -> Option<i64> {
    match doc.get(key) {
        Some(Bson::Int64(v)) => Some(*v),
        Some(Bson::Int32(v)) => Some(i64::from(*v)),
        Some(Bson::Double(v)) => Some(*v as i64),
        _ => None,
    }
}

/// Resolves pids to command lines via `ps`, caching per run.
pub struct PsCache {
    ps_path: PathBuf,
    commands: HashMap<i64, String>,
}

impl PsCache {
    pub fn new() -> Self {
        Self {
            ps_path: PathBuf::from("/bin/ps"),
            commands: HashMap::new(),
        }
    }

    /// Command line for a pid, or "None" when the process is already gone.
    /// Pid 1 is always launchd and never worth a subprocess.
    pub async fn command(&mut self, pid: i64) -> String {
        if pid == 1 {
            return "/sbin/launchd".to_string();
        }
        if let Some(cached) = self.commands.get(&pid) {
            return cached.clone();
        }
        let resolved = self.lookup(pid).await.unwrap_or_else(|| "None".to_string());
        self.commands.insert(pid, resolved.clone());
        resolved
    }

    async fn lookup(&self, pid: i64) -> Option<String> {
        let output = Command::new(&self.ps_path)
            .arg("-p")
            .arg(pid.to_string())
            .arg("-o")
            .arg("command=")
            .output()
            .await
            .ok()?;
        let command = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if command.is_empty() {
            None
        } else {
            Some(command)
        }
    }
}

/// Fills in the command enrichment fields. Exec events take their own
/// command line from the exec arguments; everything else asks `ps`.
pub async fn resolve_commands(event: &mut Document, meta: &EventMeta, cache: &mut PsCache) {
    if let Some(ppid) = meta.ppid {
        let parent = cache.command(ppid).await;
        event.insert(KEY_PARENT_COMMAND, parent);
    }
    if let Some(rpid) = meta.responsible_pid {
        let responsible = cache.command(rpid).await;
        event.insert(KEY_RESPONSIBLE_COMMAND, responsible);
    }

    let exec_command = exec_command_line(event);
    let command = match exec_command {
        Some(command) => command,
        None => cache.command(meta.pid).await,
    };
    event.insert(KEY_COMMAND, command);
}

fn exec_command_line(event: &Document) -> Option<String> {
    let args = event
        .get_document("event")
        .ok()?
        .get_document("exec")
        .ok()?
        .get_array("args")
        .ok()?;
    let parts: Vec<&str> = args.iter().filter_map(|a| a.as_str()).collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use pretty_assertions::assert_eq;

    fn raw_event(is_es_client: bool) -> Document {
        doc! {
            "process": {
                "is_es_client": is_es_client,
                "ppid": 321i64,
                "original_ppid": 321i64,
                "audit_token": { "pid": 742i64 },
                "responsible_audit_token": { "pid": 1i64 },
                "executable": { "path": "/usr/bin/curl" },
            },
            "event": { "open": { "file": { "path": "/etc/hosts" }, "fflag": 1i64 } },
        }
    }

    #[test]
    fn test_flatten_lifts_identifiers() {
        let mut event = raw_event(false);
        let meta = flatten(&mut event).unwrap();

        assert_eq!(
            meta,
            EventMeta {
                pid: 742,
                ppid: Some(321),
                responsible_pid: Some(1),
                process_path: "/usr/bin/curl".to_string(),
                kind: "open".to_string(),
            }
        );
        assert_eq!(event.get_i64(KEY_PID).unwrap(), 742);
        assert_eq!(event.get_str(KEY_PROCESS_PATH).unwrap(), "/usr/bin/curl");
        assert_eq!(event.get_str(KEY_EVENT_KIND).unwrap(), "open");
    }

    #[test]
    fn test_flatten_drops_es_client_events() {
        let mut event = raw_event(true);
        assert!(flatten(&mut event).is_none());
    }

    #[test]
    fn test_flatten_handles_int32_pids() {
        let mut event = doc! {
            "process": {
                "is_es_client": false,
                "ppid": 1i32,
                "audit_token": { "pid": 55i32 },
                "executable": { "path": "/bin/ls" },
            },
            "event": { "exit": { "stat": 0i64 } },
        };
        let meta = flatten(&mut event).unwrap();
        assert_eq!(meta.pid, 55);
        assert_eq!(meta.ppid, Some(1));
        assert_eq!(meta.responsible_pid, None);
    }

    #[test]
    fn test_exec_command_line_joins_args() {
        let event = doc! {
            "event": { "exec": { "args": ["/bin/sh", "-c", "whoami"] } },
        };
        assert_eq!(
            exec_command_line(&event).unwrap(),
            "/bin/sh -c whoami"
        );
    }
}
