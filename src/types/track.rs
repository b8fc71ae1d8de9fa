//! Track record as seen by the pipeline.
//!
//! The record store owns tracks; this crate reads them and mutates a small
//! set of fields: the stored path, the two readiness flag/path pairs and the
//! play counter.

use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// An uploaded audio track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Stable identifier, 16 hex characters.
    pub id: String,

    /// Last known location of the source bytes. May be stale.
    pub stored_path: PathBuf,

    /// Display name. Also used as a last-resort hint when relocating the file.
    pub title: String,

    /// Optional artist name from the upload form.
    #[serde(default)]
    pub artist: Option<String>,

    /// Content type reported at upload time.
    pub mime_type: String,

    /// Source size in bytes at upload time.
    pub size: u64,

    /// Optional cover image written next to the media root.
    #[serde(default)]
    pub cover_path: Option<PathBuf>,

    /// True once `waveform_path` points at a finished peak document.
    #[serde(default)]
    pub waveform_ready: bool,

    #[serde(default)]
    pub waveform_path: Option<PathBuf>,

    /// True once `hls_dir` holds a finished streaming package.
    #[serde(default)]
    pub hls_ready: bool,

    #[serde(default)]
    pub hls_dir: Option<PathBuf>,

    /// Number of counted plays.
    #[serde(default)]
    pub plays: u64,

    /// When the track was created (Unix seconds).
    #[serde(with = "system_time_serde")]
    pub created_at: SystemTime,
}

impl Track {
    /// Creates a freshly uploaded track with both readiness flags cleared.
    pub fn new(
        id: String,
        stored_path: PathBuf,
        title: String,
        mime_type: String,
        size: u64,
    ) -> Self {
        Self {
            id,
            stored_path,
            title,
            artist: None,
            mime_type,
            size,
            cover_path: None,
            waveform_ready: false,
            waveform_path: None,
            hls_ready: false,
            hls_dir: None,
            plays: 0,
            created_at: SystemTime::now(),
        }
    }

    /// Returns the waveform document path if the flag and path agree.
    ///
    /// A set flag with an empty path (or the reverse) counts as not ready.
    pub fn waveform_artifact(&self) -> Option<&Path> {
        published(self.waveform_ready, self.waveform_path.as_deref())
    }

    /// Returns the HLS package directory if the flag and path agree.
    pub fn hls_artifact(&self) -> Option<&Path> {
        published(self.hls_ready, self.hls_dir.as_deref())
    }

    /// Last six characters of the id, lowercased.
    ///
    /// Upload file names embed the id, so this suffix survives most renames.
    pub fn id_suffix(&self) -> String {
        let start = self.id.len().saturating_sub(6);
        self.id.get(start..).unwrap_or(&self.id).to_lowercase()
    }
}

fn published(ready: bool, path: Option<&Path>) -> Option<&Path> {
    match path {
        Some(path) if ready && !path.as_os_str().is_empty() => Some(path),
        _ => None,
    }
}

/// Computes a new track id.
///
/// The id is the first 16 hex characters of the SHA256 hash of
/// `{file_name}:{title}:{nanos}:{salt}`, so two uploads of the same file
/// never collide.
pub fn compute_track_id(file_name: &str, title: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let salt: u64 = rand::thread_rng().gen();
    let input = format!("{}:{}:{}:{}", file_name, title, nanos, salt);
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}

/// Serde helpers storing SystemTime as Unix seconds.
mod system_time_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let duration = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_track() -> Track {
        Track::new(
            "0123456789abcdef".to_string(),
            PathBuf::from("/media/uploads/song-0123456789abcdef.mp3"),
            "Song".to_string(),
            "audio/mpeg".to_string(),
            1024,
        )
    }

    #[test]
    fn track_id_format() {
        let id = compute_track_id("song.mp3", "Song");
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn track_ids_are_unique_per_upload() {
        let a = compute_track_id("song.mp3", "Song");
        let b = compute_track_id("song.mp3", "Song");
        assert_ne!(a, b);
    }

    #[test]
    fn new_track_is_not_ready() {
        let track = make_track();
        assert!(track.waveform_artifact().is_none());
        assert!(track.hls_artifact().is_none());
        assert_eq!(track.plays, 0);
    }

    #[test]
    fn partial_states_are_not_ready() {
        let mut track = make_track();
        track.waveform_ready = true;
        assert!(track.waveform_artifact().is_none());

        track.waveform_path = Some(PathBuf::new());
        assert!(track.waveform_artifact().is_none());

        track.waveform_ready = false;
        track.waveform_path = Some(PathBuf::from("/w.json"));
        assert!(track.waveform_artifact().is_none());

        track.waveform_ready = true;
        assert_eq!(track.waveform_artifact(), Some(Path::new("/w.json")));
    }

    #[test]
    fn id_suffix_is_last_six() {
        let track = make_track();
        assert_eq!(track.id_suffix(), "abcdef");
    }

    #[test]
    fn serde_defaults_for_missing_flags() {
        let json = r#"{
            "id": "00000000000000aa",
            "stored_path": "/tmp/a.mp3",
            "title": "A",
            "mime_type": "audio/mpeg",
            "size": 10,
            "created_at": 0
        }"#;
        let track: Track = serde_json::from_str(json).unwrap();
        assert!(!track.waveform_ready);
        assert!(!track.hls_ready);
        assert!(track.hls_dir.is_none());
    }
}
