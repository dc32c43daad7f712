//! Goodlist baselining.
//!
//! A baseline run detonates a known-clean workload like any other job; this
//! module then folds every canonicalizable event signature and every log
//! message from that run into the goodlists. Later triage runs treat those
//! fingerprints as background noise.

use futures::stream::TryStreamExt;
use tracing::{info, warn};
use uuid::Uuid;

use shared::events::CapturedEvent;
use shared::store::Store;
use shared::Result;

#[derive(Debug, Default)]
pub struct BaselineSummary {
    pub events_seen: u64,
    pub events_added: u64,
    pub messages_seen: u64,
    pub messages_added: u64,
}

/// Folds one finished run into the goodlists. Idempotent: replaying the same
/// run adds nothing.
pub async fn absorb(store: &Store, job_id: &Uuid) -> Result<BaselineSummary> {
    store.ensure_goodlist_indexes().await?;
    let mut summary = BaselineSummary::default();

    let mut events = store.job_events(job_id).find(None, None).await?;
    while let Some(raw) = events.try_next().await? {
        summary.events_seen += 1;
        let signature = match bson::from_document::<CapturedEvent>(raw) {
            Ok(event) => match event.signature() {
                Ok(signature) => signature,
                Err(err) => {
                    warn!(job = %job_id, %err, "skipping event without a signature");
                    continue;
                }
            },
            Err(err) => {
                warn!(job = %job_id, %err, "skipping unrecognized event shape");
                continue;
            }
        };
        if store.remember_event_signature(&signature).await? {
            summary.events_added += 1;
        }
    }

    let mut messages = store.job_syslog(job_id).find(None, None).await?;
    while let Some(raw) = messages.try_next().await? {
        summary.messages_seen += 1;
        let message = crate::triage::log_message_text(&raw);
        if message.is_empty() {
            continue;
        }
        if store.remember_log_message(message).await? {
            summary.messages_added += 1;
        }
    }

    info!(
        job = %job_id,
        events_seen = summary.events_seen,
        events_added = summary.events_added,
        messages_seen = summary.messages_seen,
        messages_added = summary.messages_added,
        "baseline absorbed"
    );
    Ok(summary)
}
