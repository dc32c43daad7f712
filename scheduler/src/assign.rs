//! The scheduler's polling loop.
//!
//! Every tick runs three phases against the document store, in an order that
//! drains late-stage work before admitting new work: arm captures for jobs
//! that started detonating, finish jobs the agent has collected, then bind
//! one pending job to one idle machine. A failed phase is logged and retried
//! on the next tick; nothing in the loop holds state across ticks, so a
//! scheduler restart resumes wherever the records say things stand.

use std::time::Duration;

use tokio::time::interval;
use tracing::{error, info, warn};

use shared::store::Store;
use shared::types::{Job, MachineKind, Progress};
use shared::Result;

use crate::capture;
use crate::config::{Config, MachineEntry};
use crate::fleet;
use crate::triage;

pub struct Scheduler {
    store: Store,
    config: Config,
}

impl Scheduler {
    pub fn new(store: Store, config: Config) -> Self {
        Self { store, config }
    }

    /// Registers the fleet and polls forever.
    pub async fn run(&self) -> Result<()> {
        fleet::register(&self.store, &self.config.fleet).await?;
        self.store.ensure_goodlist_indexes().await?;

        let mut ticker = interval(Duration::from_secs(self.config.tick_secs));
        info!(tick_secs = self.config.tick_secs, "scheduler loop started");
        loop {
            ticker.tick().await;
            if let Err(err) = self.arm_captures().await {
                error!(%err, "capture arming phase failed");
            }
            if let Err(err) = self.finish_collected().await {
                error!(%err, "triage phase failed");
            }
            if let Err(err) = self.assign_pending().await {
                error!(%err, "assignment phase failed");
            }
        }
    }

    /// Jobs the agent moved to detonating get a capture proxy, then advance
    /// to capture-armed.
    async fn arm_captures(&self) -> Result<()> {
        for job in self.store.jobs_at(Progress::Detonating).await? {
            let Some(machine_name) = job.assigned_machine.as_deref() else {
                self.store
                    .set_job_error(&job.id, "detonating job has no machine")
                    .await?;
                continue;
            };
            let Some(machine) = self.store.machine(machine_name).await? else {
                self.store
                    .set_job_error(&job.id, "assigned machine is not registered")
                    .await?;
                continue;
            };

            capture::arm(self.store.clone(), &self.config, &job, &machine).await?;
            if !self
                .store
                .advance_job(&job.id, Progress::Detonating, Progress::CaptureArmed)
                .await?
            {
                // The agent can finish a very short run before we get here.
                warn!(job = %job.id, "job left detonating before capture was recorded");
            }
        }
        Ok(())
    }

    /// Collected jobs advance to analyzed first, then triage runs. Marking
    /// before analyzing means a triage crash never wedges the job where a
    /// restarted scheduler would re-collect it.
    async fn finish_collected(&self) -> Result<()> {
        for job in self.store.jobs_at(Progress::Collected).await? {
            if !self
                .store
                .advance_job(&job.id, Progress::Collected, Progress::Analyzed)
                .await?
            {
                continue;
            }

            // Give in-flight capture inserts and the flow upload time to land.
            tokio::time::sleep(Duration::from_secs(self.config.report_grace_secs)).await;

            match triage::run(&self.store, &self.config, &job).await {
                Ok(report_id) => {
                    self.store
                        .set_job_artifact(&job.id, "report_id", report_id)
                        .await?;
                }
                Err(err) => {
                    error!(job = %job.id, %err, "triage failed");
                    self.store
                        .set_job_error(&job.id, &format!("triage failed: {}", err))
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Binds the oldest pending job to an idle machine, if both exist and
    /// the machine is actually reachable.
    async fn assign_pending(&self) -> Result<()> {
        let Some(job) = self.store.pending_job().await? else {
            return Ok(());
        };
        let Some(machine) = self.store.idle_machine().await? else {
            return Ok(());
        };
        let Some(entry) = self.fleet_entry(&machine.name) else {
            warn!(machine = %machine.name, "registered machine missing from fleet file");
            return Ok(());
        };

        match machine.kind {
            MachineKind::Physical => {
                if !fleet::ping(&machine.address).await {
                    warn!(machine = %machine.name, "machine unreachable, retrying next tick");
                    return Ok(());
                }
            }
            MachineKind::Virtual => fleet::start(entry).await?,
        }

        if self.store.assign_job(&job.id, &machine.name).await? {
            log_assignment(&job, &machine.name);
        }
        Ok(())
    }

    fn fleet_entry(&self, name: &str) -> Option<&MachineEntry> {
        self.config.fleet.iter().find(|entry| entry.name == name)
    }
}

fn log_assignment(job: &Job, machine: &str) {
    info!(
        job = %job.id,
        file = %job.file_name,
        timeout = job.timeout,
        machine,
        "job assigned"
    );
}
