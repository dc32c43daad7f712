//! Document store access for both halves of the system.
//!
//! The store is the only coupling between the scheduler and the agent: jobs
//! and machines live in the control database, per-job capture collections
//! live in the run-log database, and blobs go through [`blobs::BlobStore`].
//! Every state transition goes through a compare-and-swap on the expected
//! `progress` value so a crashed peer can never be raced into a bad state.

pub mod blobs;

use bson::{doc, Bson, Document};
use futures::stream::TryStreamExt;
use mongodb::options::{IndexOptions, UpdateOptions};
use mongodb::{Client, Collection, Database, IndexModel};
use uuid::Uuid;

use crate::goodlist::{Fingerprint, GoodlistIndex};
use crate::types::{Job, Machine, Progress};
use crate::Result;

pub use blobs::BlobStore;

const CONTROL_DB: &str = "squib";
const RUN_LOG_DB: &str = "run_logs";
const BLOB_DB: &str = "squib_grid";

const JOBS: &str = "jobs";
const MACHINES: &str = "machines";
const EVENT_GOODLIST: &str = "event_goodlist";
const LOG_GOODLIST: &str = "log_goodlist";

/// Filter for a compare-and-swap against a job's current progress.
fn cas_filter(job: &Uuid, expected: Progress) -> Document {
    doc! { "_id": job.to_string(), "progress": expected.as_i32() }
}

#[derive(Clone)]
pub struct Store {
    control: Database,
    run_logs: Database,
    blobs: BlobStore,
}

impl Store {
    pub async fn connect(uri: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri).await?;
        Ok(Self {
            control: client.database(CONTROL_DB),
            run_logs: client.database(RUN_LOG_DB),
            blobs: BlobStore::new(&client, BLOB_DB),
        })
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn jobs(&self) -> Collection<Job> {
        self.control.collection(JOBS)
    }

    pub fn machines(&self) -> Collection<Machine> {
        self.control.collection(MACHINES)
    }

    fn event_goodlist(&self) -> Collection<Fingerprint> {
        self.control.collection(EVENT_GOODLIST)
    }

    fn log_goodlist(&self) -> Collection<Fingerprint> {
        self.control.collection(LOG_GOODLIST)
    }

    /// Raw event stream captured for one job.
    pub fn job_events(&self, job: &Uuid) -> Collection<Document> {
        self.run_logs.collection(&format!("{}_events", job))
    }

    /// Unified system log messages captured for one job.
    pub fn job_syslog(&self, job: &Uuid) -> Collection<Document> {
        self.run_logs.collection(&format!("{}_syslog", job))
    }

    /// Dropped-file records captured for one job.
    pub fn job_files(&self, job: &Uuid) -> Collection<Document> {
        self.run_logs.collection(&format!("{}_files", job))
    }

    // ---- jobs ----

    pub async fn insert_job(&self, job: &Job) -> Result<()> {
        self.jobs().insert_one(job, None).await?;
        Ok(())
    }

    pub async fn find_job(&self, id: &Uuid) -> Result<Option<Job>> {
        Ok(self
            .jobs()
            .find_one(doc! { "_id": id.to_string() }, None)
            .await?)
    }

    /// Oldest unerrored job still waiting for a machine.
    pub async fn pending_job(&self) -> Result<Option<Job>> {
        Ok(self
            .jobs()
            .find_one(
                doc! { "progress": Progress::Submitted.as_i32(), "error": Bson::Null },
                None,
            )
            .await?)
    }

    /// All unerrored jobs currently at the given progress.
    pub async fn jobs_at(&self, progress: Progress) -> Result<Vec<Job>> {
        let cursor = self
            .jobs()
            .find(doc! { "progress": progress.as_i32(), "error": Bson::Null }, None)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    /// Compare-and-swap progress transition. Returns false when another
    /// writer got there first (or the job is not where the caller thinks).
    pub async fn advance_job(&self, id: &Uuid, from: Progress, to: Progress) -> Result<bool> {
        let result = self
            .jobs()
            .update_one(
                cas_filter(id, from),
                doc! { "$set": { "progress": to.as_i32() } },
                None,
            )
            .await?;
        Ok(result.matched_count == 1)
    }

    /// Marks a job collected from either of the two states the agent may
    /// observe at teardown time. The scheduler arms the capture concurrently,
    /// so the job may still read as detonating here.
    pub async fn collect_job(&self, id: &Uuid) -> Result<bool> {
        let result = self
            .jobs()
            .update_one(
                doc! {
                    "_id": id.to_string(),
                    "progress": { "$in": [
                        Progress::Detonating.as_i32(),
                        Progress::CaptureArmed.as_i32(),
                    ] },
                },
                doc! { "$set": { "progress": Progress::Collected.as_i32() } },
                None,
            )
            .await?;
        Ok(result.matched_count == 1)
    }

    /// Binds a pending job to a machine: CAS the job forward, then mark the
    /// machine busy. A lost race leaves the machine untouched.
    pub async fn assign_job(&self, id: &Uuid, machine: &str) -> Result<bool> {
        let result = self
            .jobs()
            .update_one(
                cas_filter(id, Progress::Submitted),
                doc! { "$set": {
                    "progress": Progress::Assigned.as_i32(),
                    "assigned_machine": machine,
                } },
                None,
            )
            .await?;
        if result.matched_count != 1 {
            return Ok(false);
        }
        self.machines()
            .update_one(
                doc! { "_id": machine },
                doc! { "$set": { "assigned_job": id.to_string() } },
                None,
            )
            .await?;
        Ok(true)
    }

    pub async fn set_job_error(&self, id: &Uuid, message: &str) -> Result<()> {
        self.jobs()
            .update_one(
                doc! { "_id": id.to_string() },
                doc! { "$set": { "error": message } },
                None,
            )
            .await?;
        Ok(())
    }

    /// Attaches an uploaded artifact reference (transcript, capture, flows,
    /// or report) to a job.
    pub async fn set_job_artifact(
        &self,
        id: &Uuid,
        field: &str,
        blob_id: bson::oid::ObjectId,
    ) -> Result<()> {
        self.jobs()
            .update_one(
                doc! { "_id": id.to_string() },
                doc! { "$set": { field: blob_id } },
                None,
            )
            .await?;
        Ok(())
    }

    /// Records the agent-side monitor pids on the job, for post-mortem
    /// forensics on the machine image.
    pub async fn record_monitor_pids(&self, id: &Uuid, pids: Document) -> Result<()> {
        self.jobs()
            .update_one(
                doc! { "_id": id.to_string() },
                doc! { "$set": { "monitor_pids": pids } },
                None,
            )
            .await?;
        Ok(())
    }

    // ---- machines ----

    pub async fn machine(&self, name: &str) -> Result<Option<Machine>> {
        Ok(self.machines().find_one(doc! { "_id": name }, None).await?)
    }

    pub async fn idle_machine(&self) -> Result<Option<Machine>> {
        Ok(self
            .machines()
            .find_one(doc! { "assigned_job": Bson::Null }, None)
            .await?)
    }

    /// Registers or refreshes a fleet member, preserving nothing from any
    /// previous registration.
    pub async fn register_machine(&self, machine: &Machine) -> Result<()> {
        self.machines()
            .replace_one(
                doc! { "_id": &machine.name },
                machine,
                mongodb::options::ReplaceOptions::builder()
                    .upsert(true)
                    .build(),
            )
            .await?;
        Ok(())
    }

    pub async fn release_machine(&self, name: &str) -> Result<()> {
        self.machines()
            .update_one(
                doc! { "_id": name },
                doc! { "$set": { "assigned_job": Bson::Null } },
                None,
            )
            .await?;
        Ok(())
    }

    // ---- goodlists ----

    /// Unique indexes on the fingerprint hash so concurrent baseline runs
    /// cannot duplicate entries.
    pub async fn ensure_goodlist_indexes(&self) -> Result<()> {
        let index = IndexModel::builder()
            .keys(doc! { "md5": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.event_goodlist().create_index(index.clone(), None).await?;
        self.log_goodlist().create_index(index, None).await?;
        Ok(())
    }

    /// Inserts a signature fingerprint if absent. Returns true on first
    /// sight, false when it was already goodlisted.
    pub async fn remember_event_signature(&self, canonical: &str) -> Result<bool> {
        Self::remember(&self.event_goodlist(), canonical).await
    }

    /// Same as [`Self::remember_event_signature`], for log messages.
    pub async fn remember_log_message(&self, message: &str) -> Result<bool> {
        Self::remember(&self.log_goodlist(), message).await
    }

    async fn remember(collection: &Collection<Fingerprint>, canonical: &str) -> Result<bool> {
        let fingerprint = Fingerprint::of(canonical);
        let result = collection
            .update_one(
                doc! { "md5": &fingerprint.md5 },
                doc! { "$setOnInsert": {
                    "md5": &fingerprint.md5,
                    "fuzzy": &fingerprint.fuzzy,
                    "canonical": &fingerprint.canonical,
                } },
                UpdateOptions::builder().upsert(true).build(),
            )
            .await?;
        Ok(result.upserted_id.is_some())
    }

    pub async fn load_event_goodlist(&self) -> Result<GoodlistIndex> {
        Self::load_goodlist(&self.event_goodlist()).await
    }

    pub async fn load_log_goodlist(&self) -> Result<GoodlistIndex> {
        Self::load_goodlist(&self.log_goodlist()).await
    }

    async fn load_goodlist(collection: &Collection<Fingerprint>) -> Result<GoodlistIndex> {
        let cursor = collection.find(None, None).await?;
        let entries: Vec<Fingerprint> = cursor.try_collect().await?;
        Ok(GoodlistIndex::from_hashes(
            entries.into_iter().map(|f| f.md5),
        ))
    }

    // ---- maintenance ----

    /// Drops jobs, machines, run logs, and blobs. Goodlists survive unless
    /// explicitly included.
    pub async fn cleanup(&self, include_goodlists: bool) -> Result<()> {
        self.run_logs.drop(None).await?;
        self.jobs().drop(None).await?;
        self.machines().drop(None).await?;
        self.blobs.drop_all().await?;
        if include_goodlists {
            self.event_goodlist().drop(None).await?;
            self.log_goodlist().drop(None).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cas_filter_pins_both_id_and_progress() {
        let id = Uuid::new_v4();
        let filter = cas_filter(&id, Progress::Detonating);
        assert_eq!(filter.get_str("_id").unwrap(), id.to_string());
        assert_eq!(filter.get_i32("progress").unwrap(), 2);
    }
}
