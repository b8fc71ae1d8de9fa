//! audiohub-daemon: audio ingestion and delivery pipeline.
//!
//! Accepts uploaded tracks, derives waveform peaks and adaptive HLS
//! packages from them in the background or on first request, and streams
//! source bytes with HTTP range support.
//!
//! # Modules
//!
//! - [`types`]: Core data types (Track, DerivationJob)
//! - [`config`]: Runtime configuration (DaemonConfig, ManifestPolicy)
//! - [`error`]: Error types and codes (DaemonError, ErrorCode)
//! - [`store`]: Track records and play history
//! - [`resolve`]: Self-healing source lookup
//! - [`derive`]: Waveform and HLS derivation behind a single-flight cache
//! - [`jobs`]: Bounded background worker pool with retries
//! - [`http`]: Routes, range streaming and uploads
//!
//! # Example
//!
//! ```rust,ignore
//! use audiohub_daemon::{
//!     config::DaemonConfig,
//!     derive::Toolchain,
//!     http::{run_server, AppState},
//!     pipeline::Pipeline,
//! };
//!
//! let config = DaemonConfig::from_env();
//! let tools = Toolchain::probe(&config).await;
//! let pipeline = Pipeline::open(config, &tools).await?;
//! let runner = pipeline.start_jobs();
//! run_server(AppState::new(pipeline, runner.queue()), shutdown).await?;
//! runner.shutdown().await;
//! ```

pub mod cli;
pub mod config;
pub mod derive;
pub mod error;
pub mod http;
pub mod jobs;
pub mod logging;
pub mod pipeline;
pub mod resolve;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export commonly used types at crate root for convenience
pub use config::{DaemonConfig, ManifestPolicy};
pub use error::{DaemonError, ErrorCode, Result};
pub use pipeline::Pipeline;
pub use types::{compute_track_id, DerivationJob, JobKind, JobStatus, Track};
