//! Core types for the audiohub daemon.
//!
//! - [`Track`]: An uploaded track and its derived-artifact flags
//! - [`DerivationJob`]: A scheduled waveform or transcode run

mod job;
mod track;

pub use job::{DerivationJob, JobKind, JobStatus};
pub use track::{compute_track_id, Track};
