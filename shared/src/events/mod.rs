//! Typed view over captured security events.
//!
//! The capture subprocesses emit line-delimited JSON with a deeply nested,
//! kind-variant payload. The agent stores those lines verbatim (as raw
//! documents) so no forensic data is ever lost; triage re-reads them through
//! the typed [`CapturedEvent`] view to derive canonical signatures. Missing
//! or misshapen fields surface as typed errors instead of aborting the batch.

mod payload;
mod signature;

pub use payload::*;
pub use signature::SignatureError;

use serde::{Deserialize, Serialize};

/// Enrichment keys the agent flattens onto every stored event document.
pub const KEY_PID: &str = "pid";
pub const KEY_PROCESS_PATH: &str = "process_path";
pub const KEY_EVENT_KIND: &str = "event_kind";
pub const KEY_PARENT_COMMAND: &str = "parent_command";
pub const KEY_RESPONSIBLE_COMMAND: &str = "responsible_command";
pub const KEY_COMMAND: &str = "command";
pub const KEY_GOODLIST: &str = "goodlist";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditToken {
    pub pid: i64,
}

/// The emitting process block attached to every event by the logger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    #[serde(default)]
    pub executable: Option<FileRef>,
    #[serde(default)]
    pub ppid: Option<i64>,
    #[serde(default)]
    pub original_ppid: Option<i64>,
    #[serde(default)]
    pub audit_token: Option<AuditToken>,
    #[serde(default)]
    pub responsible_audit_token: Option<AuditToken>,
    #[serde(default)]
    pub is_es_client: Option<bool>,
}

impl ProcessInfo {
    pub fn pid(&self) -> Option<i64> {
        self.audit_token.as_ref().map(|t| t.pid)
    }

    pub fn responsible_pid(&self) -> Option<i64> {
        self.responsible_audit_token.as_ref().map(|t| t.pid)
    }

    pub fn executable_path(&self) -> Option<&str> {
        self.executable.as_ref().map(|e| e.path.as_str())
    }
}

/// One captured event: the kind-variant payload plus the enrichment fields
/// the agent flattened in at capture time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedEvent {
    pub event: EventPayload,

    #[serde(default)]
    pub process: Option<ProcessInfo>,

    #[serde(default)]
    pub pid: Option<i64>,
    #[serde(default)]
    pub process_path: Option<String>,
    #[serde(default)]
    pub parent_command: Option<String>,
    #[serde(default)]
    pub responsible_command: Option<String>,
    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub goodlist: Option<bool>,
}

impl CapturedEvent {
    /// Canonical executable path of the emitting process, preferring the
    /// flattened enrichment field over the raw process block.
    pub fn process_path(&self) -> Option<&str> {
        self.process_path
            .as_deref()
            .or_else(|| self.process.as_ref().and_then(|p| p.executable_path()))
    }

    pub fn kind(&self) -> &'static str {
        self.event.kind()
    }

    /// Deterministic canonical signature: `"<kind>,<process-path>"` followed
    /// by the kind's semantically stable fields. Volatile identifiers (pids,
    /// inodes, timestamps, addresses) never participate.
    pub fn signature(&self) -> Result<String, SignatureError> {
        signature::build(self)
    }
}
