//! DerivationJob type for background artifact computation.
//!
//! A DerivationJob tracks one waveform or transcode run for a track from
//! the moment the upload schedules it until it completes or gives up.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Which artifact a job derives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Peak-amplitude document for visualization.
    Waveform,
    /// Multi-bitrate HLS package.
    Transcode,
}

impl JobKind {
    /// Returns the string representation of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Waveform => "waveform",
            JobKind::Transcode => "transcode",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of a derivation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting in the queue.
    #[default]
    Queued,
    /// Picked up by a worker.
    Running,
    /// Artifact produced and published.
    Complete,
    /// Gave up after the last attempt.
    Failed,
}

/// A scheduled derivation for one track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivationJob {
    /// Process-unique job identifier.
    pub job_id: String,

    /// Track the artifact belongs to.
    pub track_id: String,

    /// Artifact to derive.
    pub kind: JobKind,

    /// Attempts made so far.
    pub attempts: u32,

    /// Current job state.
    pub status: JobStatus,

    /// When the job was scheduled.
    #[serde(skip, default = "SystemTime::now")]
    pub created_at: SystemTime,
}

impl DerivationJob {
    /// Creates a queued job for the given track.
    pub fn new(track_id: impl Into<String>, kind: JobKind) -> Self {
        Self {
            job_id: next_job_id(kind),
            track_id: track_id.into(),
            kind,
            attempts: 0,
            status: JobStatus::Queued,
            created_at: SystemTime::now(),
        }
    }

    /// Marks the job as running and counts the attempt.
    pub fn set_running(&mut self) {
        self.status = JobStatus::Running;
        self.attempts += 1;
    }

    /// Marks the job as complete.
    pub fn set_complete(&mut self) {
        self.status = JobStatus::Complete;
    }

    /// Marks the job as failed.
    pub fn set_failed(&mut self) {
        self.status = JobStatus::Failed;
    }
}

fn next_job_id(kind: JobKind) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{:06}", kind.as_str(), n)
}
