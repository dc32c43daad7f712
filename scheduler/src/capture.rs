//! Scheduler-side network capture.
//!
//! When a job reaches the detonating state, the scheduler arms an
//! intercepting proxy in front of the job's machine. The proxy records every
//! flow to a per-job file, outlives the detonation by the capture margin,
//! and uploads the flow file when it is killed. The local file is kept on
//! disk so triage can replay it for header extraction.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{error, info, warn};

use shared::store::Store;
use shared::types::{Job, Machine};
use shared::Result;

use crate::config::Config;

pub fn flows_path(config: &Config, job: &Job) -> PathBuf {
    config.flows_dir.join(format!("{}.flows", job.id))
}

/// Spawns the capture proxy and a watchdog that kills it at the job's
/// capture deadline, then uploads the flow file. Returns as soon as the
/// proxy is running; the watchdog owns the rest.
pub async fn arm(store: Store, config: &Config, job: &Job, machine: &Machine) -> Result<()> {
    tokio::fs::create_dir_all(&config.flows_dir).await?;
    let path = flows_path(config, job);

    let mut child = Command::new(&config.mitmdump_path)
        .arg("-q")
        .arg("-p")
        .arg(machine.proxy_port.to_string())
        .arg("-w")
        .arg(&path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;

    let deadline = Duration::from_secs(job.capture_deadline_secs());
    let job_id = job.id;
    info!(job = %job_id, proxy_port = machine.proxy_port, ?deadline, "capture armed");

    tokio::spawn(async move {
        tokio::time::sleep(deadline).await;
        if let Err(err) = child.start_kill() {
            warn!(job = %job_id, %err, "capture proxy already gone");
        }
        // Reap before touching the flow file so its tail is flushed.
        let _ = child.wait().await;

        match store
            .blobs()
            .put_file(&format!("{}.flows", job_id), &path)
            .await
        {
            Ok(blob_id) => {
                if let Err(err) = store.set_job_artifact(&job_id, "flows_id", blob_id).await {
                    error!(job = %job_id, %err, "failed to record flows artifact");
                }
            }
            Err(err) => error!(job = %job_id, %err, "failed to upload flow file"),
        }
    });

    Ok(())
}
