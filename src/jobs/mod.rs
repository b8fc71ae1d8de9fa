//! Background derivation jobs.
//!
//! Uploads hand their track id to a [`JobQueue`]; the [`JobRunner`]'s
//! workers run the waveform and transcode derivations off the request path.
//! Dropping the runner without calling [`JobRunner::shutdown`] also stops
//! the workers.

pub mod queue;
pub mod retry;

pub use queue::{JobQueue, JobResult, JobRunner, RunnerConfig};
pub use retry::RetryPolicy;
