//! Post-collection triage.
//!
//! Triage runs once per job, after the agent has uploaded its artifacts. It
//! tags every captured event and log message against the goodlists, rebuilds
//! the process ancestry tree, extracts request headers from the recorded
//! flows, and attaches the assembled report to the job.

pub mod headers;
pub mod process_tree;

use std::collections::BTreeMap;

use bson::oid::ObjectId;
use bson::{doc, Document};
use futures::stream::TryStreamExt;
use mongodb::IndexModel;
use serde::Serialize;
use tracing::{info, warn};

use shared::events::{CapturedEvent, EventPayload, KEY_GOODLIST};
use shared::hash;
use shared::store::Store;
use shared::types::Job;
use shared::Result;

use crate::capture;
use crate::config::Config;
use process_tree::{ExecRecord, ProcessNode};

#[derive(Debug, Serialize)]
struct Report {
    output: String,
    request_headers: Option<String>,
    proc_list: BTreeMap<i64, ProcessNode>,
}

/// Runs full triage for a collected job and returns the stored report id.
pub async fn run(store: &Store, config: &Config, job: &Job) -> Result<ObjectId> {
    let event_goodlist = store.load_event_goodlist().await?;
    let log_goodlist = store.load_log_goodlist().await?;
    info!(
        job = %job.id,
        event_entries = event_goodlist.len(),
        log_entries = log_goodlist.len(),
        "triage started"
    );

    let exec_records = tag_events(store, job, &event_goodlist).await?;
    tag_log_messages(store, job, &log_goodlist).await?;

    let output = match job.transcript_id {
        Some(id) => String::from_utf8_lossy(&store.blobs().get(id).await?).into_owned(),
        None => String::new(),
    };

    let request_headers = match headers::extract(config, &capture::flows_path(config, job)).await {
        Ok(headers) => headers,
        Err(err) => {
            warn!(job = %job.id, %err, "header extraction failed");
            None
        }
    };

    let report = Report {
        output,
        request_headers,
        proc_list: process_tree::build(&exec_records),
    };
    let report_json = serde_json::to_string(&report)?;
    let report_id = store
        .blobs()
        .put_string(&format!("{}.report.json", job.id), &report_json)
        .await?;

    info!(job = %job.id, %report_id, "triage finished");
    Ok(report_id)
}

/// Tags every captured event with its goodlist verdict and collects the exec
/// rows for the ancestry tree. Events that cannot be canonicalized are kept
/// and tagged not-goodlisted.
async fn tag_events(
    store: &Store,
    job: &Job,
    goodlist: &shared::goodlist::GoodlistIndex,
) -> Result<Vec<ExecRecord>> {
    let events = store.job_events(&job.id);
    events
        .create_index(IndexModel::builder().keys(doc! { KEY_GOODLIST: 1 }).build(), None)
        .await?;

    let mut exec_records = Vec::new();
    let mut cursor = events.find(None, None).await?;
    while let Some(raw) = cursor.try_next().await? {
        let Ok(id) = raw.get_object_id("_id") else {
            continue;
        };

        let known_good = match bson::from_document::<CapturedEvent>(raw.clone()) {
            Ok(event) => {
                if let EventPayload::Exec(_) = event.event {
                    if let Some(record) = exec_record(&event) {
                        exec_records.push(record);
                    }
                }
                match event.signature() {
                    Ok(signature) => goodlist.contains_signature(&signature),
                    Err(err) => {
                        warn!(job = %job.id, %id, %err, "event not canonicalizable");
                        false
                    }
                }
            }
            Err(err) => {
                warn!(job = %job.id, %id, %err, "event shape not recognized");
                false
            }
        };

        events
            .update_one(
                doc! { "_id": id },
                doc! { "$set": { KEY_GOODLIST: known_good } },
                None,
            )
            .await?;
    }
    Ok(exec_records)
}

fn exec_record(event: &CapturedEvent) -> Option<ExecRecord> {
    let pid = event
        .pid
        .or_else(|| event.process.as_ref().and_then(|p| p.pid()))?;
    Some(ExecRecord {
        pid,
        ppid: event.process.as_ref().and_then(|p| p.ppid),
        command: event.command.clone(),
        parent_command: event.parent_command.clone(),
        responsible_command: event.responsible_command.clone(),
    })
}

/// Unified-log records carry their text under `eventMessage`; a missing or
/// non-string value reads as empty.
pub(crate) fn log_message_text(record: &Document) -> &str {
    record.get_str("eventMessage").unwrap_or_default()
}

/// Tags every unified-log message with its MD5 and goodlist verdict.
async fn tag_log_messages(
    store: &Store,
    job: &Job,
    goodlist: &shared::goodlist::GoodlistIndex,
) -> Result<()> {
    let syslog = store.job_syslog(&job.id);
    syslog
        .create_index(IndexModel::builder().keys(doc! { KEY_GOODLIST: 1 }).build(), None)
        .await?;

    let mut cursor = syslog.find(None, None).await?;
    while let Some(raw) = cursor.try_next().await? {
        let Ok(id) = raw.get_object_id("_id") else {
            continue;
        };
        let message = log_message_text(&raw);
        let message_md5 = hash::md5_hex(message.as_bytes());
        let known_good = goodlist.contains_hash(&message_md5);

        syslog
            .update_one(
                doc! { "_id": id },
                doc! { "$set": { "message_md5": message_md5, KEY_GOODLIST: known_good } },
                None,
            )
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_log_message_text_reads_event_message_key() {
        // A real `log stream --style ndjson` record, as the agent stores it.
        let line = r#"{"traceID":846930886198338,"eventMessage":"Service exited due to SIGKILL","subsystem":"com.apple.xpc.launchd","category":"process"}"#;
        let record: Document = serde_json::from_str(line).unwrap();
        assert_eq!(log_message_text(&record), "Service exited due to SIGKILL");
    }

    #[test]
    fn test_log_message_text_missing_reads_empty() {
        let record = doc! { "subsystem": "com.apple.tcc" };
        assert_eq!(log_message_text(&record), "");
    }
}
