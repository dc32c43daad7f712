//! Monitor supervision.
//!
//! A run is watched by four subprocesses: the security-event logger, the
//! unified-log stream, the packet capture, and the close-event file watcher.
//! All four start before the sample launches and stop together at teardown.
//! Teardown order matters: the capture and the file watcher stop first so
//! their files are final, then the two loggers drain their pipes.

mod enrich;
mod eslogger;
mod filewatch;
mod logstream;
mod netcapture;

use std::path::PathBuf;

use bson::{doc, Document};
use tracing::info;
use uuid::Uuid;

use shared::store::Store;
use shared::Result;

use crate::config::Config;
use eslogger::EsloggerMonitor;
use filewatch::FileWatch;
use logstream::LogStreamMonitor;
use netcapture::NetCapture;

pub struct MonitorSet {
    eslogger: EsloggerMonitor,
    logstream: LogStreamMonitor,
    filewatch: FileWatch,
    netcapture: NetCapture,
}

impl MonitorSet {
    pub fn start(store: &Store, config: &Config, job_id: Uuid) -> Result<Self> {
        let netcapture = NetCapture::start(config)?;
        let filewatch = FileWatch::start(store.clone(), config, job_id)?;
        let eslogger = EsloggerMonitor::start(store.clone(), config, job_id)?;
        let logstream = LogStreamMonitor::start(store.clone(), job_id)?;
        info!(job = %job_id, "monitors started");
        Ok(Self {
            eslogger,
            logstream,
            filewatch,
            netcapture,
        })
    }

    /// OS pids of the four monitor children, recorded on the job so a crashed
    /// run can be untangled on the machine image.
    pub fn pids(&self) -> Document {
        fn pid(id: Option<u32>) -> i64 {
            id.map(i64::from).unwrap_or(-1)
        }
        doc! {
            "eslogger": pid(self.eslogger.pid()),
            "logstream": pid(self.logstream.pid()),
            "filewatch": pid(self.filewatch.pid()),
            "netcapture": pid(self.netcapture.pid()),
        }
    }

    /// Stops everything and returns the finished capture file.
    pub async fn shutdown(self) -> PathBuf {
        let capture_path = self.netcapture.stop().await;
        self.filewatch.stop().await;
        self.eslogger.stop().await;
        self.logstream.stop().await;
        capture_path
    }
}
