//! The agent's polling loop.
//!
//! The agent watches its own machine record. When a job appears it claims it
//! with a compare-and-swap, detonates the sample under full monitoring, and
//! tears everything down when the run timeout elapses. A job found in any
//! state other than freshly assigned is the residue of a crashed run; it is
//! abandoned in place and never re-detonated.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{error, info, warn};
use uuid::Uuid;

use shared::store::Store;
use shared::types::{Job, Progress};
use shared::Result;

use crate::config::{Config, SETTLE_SECS};
use crate::detonate::{self, TRANSCRIPT_FILE};
use crate::monitors::MonitorSet;

pub const STALE_JOB_ERROR: &str = "expected job progress 1 - run aborted";

/// What to do with a job found on this machine's record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimDecision {
    /// Freshly assigned; claim and detonate
    Claim,
    /// Left over from a crashed run; unassign and error it
    Abandon,
}

pub fn claim_decision(progress: Progress) -> ClaimDecision {
    match progress {
        Progress::Assigned => ClaimDecision::Claim,
        _ => ClaimDecision::Abandon,
    }
}

/// Strict comparison: a run with timeout T gets the full T seconds.
pub fn should_teardown(elapsed_secs: u64, timeout_secs: u64) -> bool {
    elapsed_secs > timeout_secs
}

struct ActiveRun {
    job: Job,
    monitors: MonitorSet,
    started: Instant,
}

pub struct Agent {
    store: Store,
    config: Config,
    active: Option<ActiveRun>,
}

impl Agent {
    pub fn new(store: Store, config: Config) -> Self {
        Self {
            store,
            config,
            active: None,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        info!(machine = %self.config.machine_name, "agent loop started");
        loop {
            if let Err(err) = self.tick().await {
                error!(%err, "agent tick failed");
            }
            tokio::time::sleep(Duration::from_secs(self.config.tick_secs)).await;
        }
    }

    async fn tick(&mut self) -> Result<()> {
        if self.active.is_some() {
            self.check_timeout().await?;
        } else {
            self.poll_for_job().await?;
        }
        Ok(())
    }

    async fn poll_for_job(&mut self) -> Result<()> {
        // The machine record may not exist yet (store cleaned or scheduler
        // not started); just wait.
        let Some(machine) = self.store.machine(&self.config.machine_name).await? else {
            return Ok(());
        };
        let Some(job_id) = machine.assigned_job else {
            return Ok(());
        };
        let Some(job) = self.store.find_job(&job_id).await? else {
            warn!(job = %job_id, "assigned job record is missing");
            self.store
                .release_machine(&self.config.machine_name)
                .await?;
            return Ok(());
        };

        match claim_decision(job.progress) {
            ClaimDecision::Abandon => self.abandon(&job_id).await,
            ClaimDecision::Claim => {
                if !self
                    .store
                    .advance_job(&job_id, Progress::Assigned, Progress::Detonating)
                    .await?
                {
                    // Someone moved it between our read and the swap.
                    return self.abandon(&job_id).await;
                }
                self.start_run(job).await
            }
        }
    }

    /// A job that is not freshly assigned was orphaned by a crash. Free the
    /// machine and mark the job; its partial capture data stays readable.
    async fn abandon(&self, job_id: &Uuid) -> Result<()> {
        warn!(job = %job_id, "abandoning stale job");
        self.store
            .release_machine(&self.config.machine_name)
            .await?;
        self.store.set_job_error(job_id, STALE_JOB_ERROR).await?;
        Ok(())
    }

    async fn start_run(&mut self, job: Job) -> Result<()> {
        info!(job = %job.id, file = %job.file_name, timeout = job.timeout, "run claimed");
        tokio::fs::create_dir_all(&self.config.scratch_dir).await?;

        let sample_path = self.config.scratch_dir.join(&job.file_name);
        self.store
            .blobs()
            .download_to_file(job.sample_id, &sample_path)
            .await?;

        let monitors = MonitorSet::start(&self.store, &self.config, job.id)?;
        self.store
            .record_monitor_pids(&job.id, monitors.pids())
            .await?;

        // Give the scheduler's capture proxy time to come up before any
        // sample traffic exists.
        tokio::time::sleep(Duration::from_secs(SETTLE_SECS)).await;

        let started = Instant::now();
        detonate::launch(&self.config, &sample_path, &job.file_name).await?;

        self.active = Some(ActiveRun {
            job,
            monitors,
            started,
        });
        Ok(())
    }

    async fn check_timeout(&mut self) -> Result<()> {
        let due = match &self.active {
            Some(run) => should_teardown(run.started.elapsed().as_secs(), run.job.timeout),
            None => false,
        };
        if !due {
            return Ok(());
        }
        if let Some(run) = self.active.take() {
            self.teardown(run).await?;
        }
        Ok(())
    }

    /// Ordered teardown: stop monitors, upload artifacts, release the
    /// machine, mark the job collected, then reboot to a clean state.
    async fn teardown(&mut self, run: ActiveRun) -> Result<()> {
        let job_id = run.job.id;
        info!(job = %job_id, "run timeout reached, collecting");

        let capture_path = run.monitors.shutdown().await;

        self.upload_transcript(&job_id).await?;
        self.upload_capture(&job_id, &capture_path).await?;

        self.store
            .release_machine(&self.config.machine_name)
            .await?;
        if !self.store.collect_job(&job_id).await? {
            warn!(job = %job_id, "job was not in a collectable state");
        }

        tokio::fs::remove_dir_all(&self.config.scratch_dir).await.ok();

        info!(job = %job_id, "collection finished");
        self.reboot().await;
        Ok(())
    }

    async fn upload_transcript(&self, job_id: &Uuid) -> Result<()> {
        let transcript_path = self.config.scratch_dir.join(TRANSCRIPT_FILE);
        if !transcript_path.exists() {
            return Ok(());
        }
        let blob_id = self
            .store
            .blobs()
            .put_file(&format!("{}.output.txt", job_id), &transcript_path)
            .await?;
        self.store
            .set_job_artifact(job_id, "transcript_id", blob_id)
            .await
    }

    async fn upload_capture(&self, job_id: &Uuid, capture_path: &Path) -> Result<()> {
        if !capture_path.exists() {
            warn!(job = %job_id, "no capture file produced");
            return Ok(());
        }
        let blob_id = self
            .store
            .blobs()
            .put_file(&format!("{}.pcap", job_id), capture_path)
            .await?;
        self.store
            .set_job_artifact(job_id, "capture_id", blob_id)
            .await
    }

    /// The machine image is restored on boot, so a reboot is the reset
    /// mechanism. Skippable only for development.
    async fn reboot(&self) {
        if !self.config.reboot_after_run {
            warn!("reboot disabled, machine state is now dirty");
            return;
        }
        if let Err(err) = Command::new("/usr/bin/sudo")
            .arg("/sbin/reboot")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            error!(%err, "reboot failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_freshly_assigned_jobs_are_claimed() {
        assert_eq!(claim_decision(Progress::Assigned), ClaimDecision::Claim);
        for progress in [
            Progress::Submitted,
            Progress::Detonating,
            Progress::CaptureArmed,
            Progress::Collected,
            Progress::Analyzed,
        ] {
            assert_eq!(claim_decision(progress), ClaimDecision::Abandon);
        }
    }

    #[test]
    fn test_teardown_is_strictly_after_timeout() {
        assert!(!should_teardown(59, 60));
        assert!(!should_teardown(60, 60));
        assert!(should_teardown(61, 60));
    }
}
