use bson::oid::ObjectId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Extra seconds the scheduler-side network capture runs beyond the job's own
/// detonation timeout, so the capture always outlives the detonation.
pub const CAPTURE_MARGIN_SECS: u64 = 10;

/// Position of a job in its lifecycle, stored as a plain integer so both
/// loops can filter and compare-and-swap on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum Progress {
    /// Job record written, waiting for a machine
    Submitted = 0,
    /// Bound to a machine, waiting for the agent to notice
    Assigned = 1,
    /// Agent claimed the job and is detonating the sample
    Detonating = 2,
    /// Scheduler armed the network capture subprocess
    CaptureArmed = 3,
    /// Agent tore down monitors and uploaded artifacts
    Collected = 4,
    /// Scheduler ran triage; the report reference follows shortly
    Analyzed = 5,
}

impl Progress {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// The single legal successor state, if any.
    pub fn next(self) -> Option<Progress> {
        match self {
            Progress::Submitted => Some(Progress::Assigned),
            Progress::Assigned => Some(Progress::Detonating),
            Progress::Detonating => Some(Progress::CaptureArmed),
            Progress::CaptureArmed => Some(Progress::Collected),
            Progress::Collected => Some(Progress::Analyzed),
            Progress::Analyzed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Progress::Analyzed
    }
}

impl From<Progress> for i32 {
    fn from(p: Progress) -> i32 {
        p as i32
    }
}

impl TryFrom<i32> for Progress {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Progress::Submitted),
            1 => Ok(Progress::Assigned),
            2 => Ok(Progress::Detonating),
            3 => Ok(Progress::CaptureArmed),
            4 => Ok(Progress::Collected),
            5 => Ok(Progress::Analyzed),
            other => Err(format!("invalid job progress value: {}", other)),
        }
    }
}

/// One submitted sample and its full detonation/analysis lifecycle record.
///
/// Owned by the scheduler, mutated by both the scheduler and the agent under
/// the state machine's rules. The `error` field is a side channel, not a
/// state: an errored job keeps its last `progress` and is abandoned in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    #[serde(rename = "_id")]
    pub id: Uuid,

    /// Blob reference for the submitted sample
    pub sample_id: ObjectId,

    pub file_name: String,

    /// SHA-256 of the sample content
    pub sha256: String,

    /// Requested detonation time in seconds
    pub timeout: u64,

    pub progress: Progress,

    #[serde(default)]
    pub assigned_machine: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,

    #[serde(default)]
    pub error: Option<String>,

    /// Detonation stdout/stderr transcript, uploaded by the agent at teardown
    #[serde(default)]
    pub transcript_id: Option<ObjectId>,

    /// Packet capture file, uploaded by the agent at teardown
    #[serde(default)]
    pub capture_id: Option<ObjectId>,

    /// Proxy flows file, uploaded by the scheduler when the capture ends
    #[serde(default)]
    pub flows_id: Option<ObjectId>,

    /// Triage report, attached after analysis completes. `Analyzed` progress
    /// does not imply this is set yet; readers must check for presence.
    #[serde(default)]
    pub report_id: Option<ObjectId>,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        sample_id: ObjectId,
        file_name: String,
        sha256: String,
        timeout: u64,
        tags: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sample_id,
            file_name,
            sha256,
            timeout,
            progress: Progress::Submitted,
            assigned_machine: None,
            tags,
            error: None,
            transcript_id: None,
            capture_id: None,
            flows_id: None,
            report_id: None,
            created_at: Utc::now(),
        }
    }

    /// Deadline for the scheduler-side capture subprocess.
    pub fn capture_deadline_secs(&self) -> u64 {
        self.timeout + CAPTURE_MARGIN_SECS
    }

    pub fn is_errored(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_roundtrip() {
        for value in 0..=5 {
            let progress = Progress::try_from(value).unwrap();
            assert_eq!(progress.as_i32(), value);
        }
        assert!(Progress::try_from(6).is_err());
        assert!(Progress::try_from(-1).is_err());
    }

    #[test]
    fn test_progress_only_increases() {
        let mut state = Progress::Submitted;
        let mut seen = vec![state];
        while let Some(next) = state.next() {
            assert!(next > state, "progress must be strictly increasing");
            state = next;
            seen.push(state);
        }
        assert_eq!(seen.len(), 6);
        assert!(state.is_terminal());
    }

    #[test]
    fn test_capture_deadline_margin() {
        let job = Job::new(
            ObjectId::new(),
            "sample.sh".to_string(),
            "deadbeef".to_string(),
            60,
            None,
        );
        assert_eq!(job.capture_deadline_secs(), 70);
    }

    #[test]
    fn test_new_job_starts_submitted() {
        let job = Job::new(ObjectId::new(), "a.dmg".to_string(), "00".to_string(), 120, None);
        assert_eq!(job.progress, Progress::Submitted);
        assert!(job.assigned_machine.is_none());
        assert!(!job.is_errored());
    }
}
