//! Daemon configuration module.
//!
//! Contains the runtime configuration for the audiohub daemon: where media
//! lives, how the HTTP listener binds, how many derivation workers run and
//! how the external encoders are invoked.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which renditions the master manifest lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ManifestPolicy {
    /// Only renditions whose encode succeeded.
    #[default]
    Successful,

    /// Every configured rendition, even if its encode failed.
    /// Matches older deployments that always advertised the full ladder.
    All,
}

impl ManifestPolicy {
    /// Returns the string representation of the policy.
    pub fn as_str(&self) -> &'static str {
        match self {
            ManifestPolicy::Successful => "successful",
            ManifestPolicy::All => "all",
        }
    }

    /// Parses a policy from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "successful" | "filtered" => Some(ManifestPolicy::Successful),
            "all" | "unconditional" => Some(ManifestPolicy::All),
            _ => None,
        }
    }
}

impl std::fmt::Display for ManifestPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Runtime configuration for the daemon.
///
/// Loaded from environment variables at startup, then overridden by
/// command-line flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Root directory holding uploads, covers and HLS packages.
    /// If None, uses the platform-specific data location.
    pub media_root: Option<PathBuf>,

    /// Directory for the track snapshot and play history.
    /// If None, uses the platform-specific data location.
    pub data_dir: Option<PathBuf>,

    /// Socket address the HTTP server binds to.
    pub bind_addr: String,

    /// Number of background derivation workers.
    pub workers: usize,

    /// Maximum number of queued derivation jobs.
    pub queue_capacity: usize,

    /// How many times a retryable job failure is retried.
    pub max_retries: u32,

    /// Base delay for exponential retry backoff, in milliseconds.
    pub retry_base_ms: u64,

    /// ffmpeg binary used for HLS encoding and loudness diagnostics.
    pub ffmpeg_bin: String,

    /// audiowaveform binary used for peak extraction.
    pub audiowaveform_bin: String,

    /// Rendition ladder in kbps.
    pub bitrates_kbps: Vec<u32>,

    /// Target HLS segment duration in seconds.
    pub hls_segment_sec: u32,

    /// Which renditions the master manifest advertises.
    pub manifest_policy: ManifestPolicy,

    /// Bucket count for placeholder waveforms and cap for extracted ones.
    pub waveform_buckets: usize,

    /// Extraction resolution passed to audiowaveform.
    pub pixels_per_second: u32,

    /// Maximum directory depth scanned when self-healing track paths.
    pub scan_depth: usize,

    /// Maximum accepted upload body, in bytes.
    pub max_upload_bytes: usize,

    /// Request header carrying the authenticated listener id.
    pub listener_header: String,
}

impl DaemonConfig {
    /// Creates a new DaemonConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a DaemonConfig from environment variables.
    ///
    /// Reads the following environment variables:
    /// - `AUDIOHUB_MEDIA_ROOT` - Root directory for media files
    /// - `AUDIOHUB_DATA_DIR` - Directory for track records and play history
    /// - `AUDIOHUB_BIND` - HTTP bind address
    /// - `AUDIOHUB_WORKERS` - Number of derivation workers
    /// - `AUDIOHUB_QUEUE_CAPACITY` - Maximum pending derivation jobs
    /// - `AUDIOHUB_MAX_RETRIES` - Retries for retryable job failures
    /// - `AUDIOHUB_FFMPEG` - ffmpeg binary
    /// - `AUDIOHUB_AUDIOWAVEFORM` - audiowaveform binary
    /// - `AUDIOHUB_HLS_SEGMENT_SEC` - HLS segment duration
    /// - `AUDIOHUB_MANIFEST_POLICY` - successful | all
    ///
    /// Falls back to defaults for unset or unparseable variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("AUDIOHUB_MEDIA_ROOT") {
            config.media_root = Some(PathBuf::from(path));
        }

        if let Ok(path) = std::env::var("AUDIOHUB_DATA_DIR") {
            config.data_dir = Some(PathBuf::from(path));
        }

        if let Ok(bind) = std::env::var("AUDIOHUB_BIND") {
            if !bind.trim().is_empty() {
                config.bind_addr = bind;
            }
        }

        if let Ok(workers) = std::env::var("AUDIOHUB_WORKERS") {
            if let Ok(workers) = workers.parse::<usize>() {
                if workers > 0 {
                    config.workers = workers;
                }
            }
        }

        if let Ok(capacity) = std::env::var("AUDIOHUB_QUEUE_CAPACITY") {
            if let Ok(capacity) = capacity.parse::<usize>() {
                if capacity > 0 {
                    config.queue_capacity = capacity;
                }
            }
        }

        if let Ok(retries) = std::env::var("AUDIOHUB_MAX_RETRIES") {
            if let Ok(retries) = retries.parse::<u32>() {
                config.max_retries = retries.min(10);
            }
        }

        if let Ok(bin) = std::env::var("AUDIOHUB_FFMPEG") {
            config.ffmpeg_bin = bin;
        }

        if let Ok(bin) = std::env::var("AUDIOHUB_AUDIOWAVEFORM") {
            config.audiowaveform_bin = bin;
        }

        if let Ok(segment) = std::env::var("AUDIOHUB_HLS_SEGMENT_SEC") {
            if let Ok(segment) = segment.parse::<u32>() {
                if (1..=60).contains(&segment) {
                    config.hls_segment_sec = segment;
                }
            }
        }

        if let Ok(policy) = std::env::var("AUDIOHUB_MANIFEST_POLICY") {
            if let Some(policy) = ManifestPolicy::parse(&policy) {
                config.manifest_policy = policy;
            }
        }

        config
    }

    /// Returns the effective media root, using platform defaults if not specified.
    pub fn effective_media_root(&self) -> PathBuf {
        if let Some(ref path) = self.media_root {
            path.clone()
        } else {
            default_data_dir().join("media")
        }
    }

    /// Returns the effective data directory, using platform defaults if not specified.
    pub fn effective_data_dir(&self) -> PathBuf {
        if let Some(ref path) = self.data_dir {
            path.clone()
        } else {
            default_data_dir()
        }
    }

    /// Directory uploads are written to.
    pub fn uploads_dir(&self) -> PathBuf {
        self.effective_media_root().join("uploads")
    }

    /// Directory cover images are written to.
    pub fn covers_dir(&self) -> PathBuf {
        self.effective_media_root().join("covers")
    }

    /// Directory holding one HLS package per track.
    pub fn hls_root(&self) -> PathBuf {
        self.effective_media_root().join("hls")
    }

    /// Path of the JSON track snapshot.
    pub fn track_store_path(&self) -> PathBuf {
        self.effective_data_dir().join("tracks.json")
    }

    /// Path of the play history log.
    pub fn play_history_path(&self) -> PathBuf {
        self.effective_data_dir().join("play_history.jsonl")
    }

    /// Validates the configuration.
    ///
    /// Returns an error message if validation fails, None otherwise.
    pub fn validate(&self) -> Option<String> {
        if self.workers == 0 {
            return Some("workers must be > 0".to_string());
        }

        if self.queue_capacity == 0 {
            return Some("queue_capacity must be > 0".to_string());
        }

        if self.bitrates_kbps.is_empty() {
            return Some("bitrates_kbps must not be empty".to_string());
        }

        if self.bitrates_kbps.iter().any(|&kbps| kbps == 0) {
            return Some("bitrates_kbps must all be > 0".to_string());
        }

        if self.hls_segment_sec == 0 {
            return Some("hls_segment_sec must be > 0".to_string());
        }

        if self.waveform_buckets == 0 {
            return Some("waveform_buckets must be > 0".to_string());
        }

        if self.bind_addr.parse::<std::net::SocketAddr>().is_err() {
            return Some(format!("bind_addr is not a socket address: {}", self.bind_addr));
        }

        None
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            media_root: None,
            data_dir: None,
            bind_addr: "127.0.0.1:8080".to_string(),
            workers: 2,
            queue_capacity: 64,
            max_retries: 2,
            retry_base_ms: 500,
            ffmpeg_bin: "ffmpeg".to_string(),
            audiowaveform_bin: "audiowaveform".to_string(),
            bitrates_kbps: vec![64, 128, 256],
            hls_segment_sec: 6,
            manifest_policy: ManifestPolicy::default(),
            waveform_buckets: 1000,
            pixels_per_second: 20,
            scan_depth: 4,
            max_upload_bytes: 200 * 1024 * 1024,
            listener_header: "x-listener-id".to_string(),
        }
    }
}

/// Returns the platform-specific default data path.
///
/// Uses the `directories` crate to find appropriate locations:
/// - macOS: ~/Library/Application Support/audiohub
/// - Linux: ~/.local/share/audiohub
/// - Windows: C:\Users\<user>\AppData\Roaming\audiohub\data
fn default_data_dir() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "audiohub") {
        proj_dirs.data_dir().to_path_buf()
    } else {
        PathBuf::from("./audiohub-data")
    }
}
