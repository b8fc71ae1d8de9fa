//! Track record store.
//!
//! Keeps track records in memory and, when opened from a file, mirrors every
//! mutation to a JSON snapshot. Snapshot writes go through a temp file and a
//! rename so a crash never leaves a truncated store behind.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::error::{DaemonError, ErrorCode, Result};
use crate::types::Track;

/// Shared handle to the track records.
#[derive(Clone)]
pub struct TrackStore {
    /// Tracks indexed by id.
    tracks: Arc<RwLock<HashMap<String, Track>>>,
    /// Snapshot file, if persistent.
    file: Option<PathBuf>,
    /// Serializes snapshot writes.
    write_lock: Arc<Mutex<()>>,
}

impl TrackStore {
    /// Creates a store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            tracks: Arc::new(RwLock::new(HashMap::new())),
            file: None,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Opens a store backed by `path`, loading the snapshot if it exists.
    pub async fn open(path: &Path) -> Result<Self> {
        let tracks = match tokio::fs::read(path).await {
            Ok(bytes) => {
                let list: Vec<Track> = serde_json::from_slice(&bytes).map_err(|e| {
                    DaemonError::with_source(
                        ErrorCode::Internal,
                        format!("Corrupt track store {}", path.display()),
                        e,
                    )
                })?;
                list.into_iter().map(|t| (t.id.clone(), t)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(DaemonError::io(
                    format!("Failed to read track store {}", path.display()),
                    e,
                ))
            }
        };

        tracing::info!(path = %path.display(), tracks = tracks.len(), "track store opened");

        Ok(Self {
            tracks: Arc::new(RwLock::new(tracks)),
            file: Some(path.to_path_buf()),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Inserts or replaces a track and persists the snapshot.
    pub async fn insert(&self, track: Track) -> Result<()> {
        self.tracks.write().await.insert(track.id.clone(), track);
        self.flush().await
    }

    /// Returns a copy of the track with the given id.
    pub async fn get(&self, track_id: &str) -> Option<Track> {
        self.tracks.read().await.get(track_id).cloned()
    }

    /// Returns all tracks, oldest first.
    pub async fn list(&self) -> Vec<Track> {
        let mut tracks: Vec<Track> = self.tracks.read().await.values().cloned().collect();
        tracks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        tracks
    }

    /// Returns the number of tracks.
    pub async fn len(&self) -> usize {
        self.tracks.read().await.len()
    }

    /// Returns true if the store holds no tracks.
    pub async fn is_empty(&self) -> bool {
        self.tracks.read().await.is_empty()
    }

    /// Applies `mutate` to a track and persists the snapshot.
    ///
    /// The in-memory record is always updated. `Ok(None)` means the track is
    /// unknown; `Err` means only the snapshot write failed, which callers
    /// treat as best-effort.
    pub async fn update<F>(&self, track_id: &str, mutate: F) -> Result<Option<Track>>
    where
        F: FnOnce(&mut Track),
    {
        let updated = {
            let mut tracks = self.tracks.write().await;
            match tracks.get_mut(track_id) {
                Some(track) => {
                    mutate(track);
                    track.clone()
                }
                None => return Ok(None),
            }
        };
        self.flush().await?;
        Ok(Some(updated))
    }

    /// Writes the snapshot file, if any.
    async fn flush(&self) -> Result<()> {
        let Some(ref path) = self.file else {
            return Ok(());
        };

        let _guard = self.write_lock.lock().await;
        let json = {
            let tracks = self.tracks.read().await;
            let mut list: Vec<&Track> = tracks.values().collect();
            list.sort_by(|a, b| a.id.cmp(&b.id));
            serde_json::to_vec_pretty(&list).map_err(|e| {
                DaemonError::with_source(
                    ErrorCode::Internal,
                    "Failed to serialize track store",
                    e,
                )
            })?
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                DaemonError::io(format!("Failed to create {}", parent.display()), e)
            })?;
        }

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| DaemonError::io(format!("Failed to write {}", tmp.display()), e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| DaemonError::io(format!("Failed to replace {}", path.display()), e))?;

        Ok(())
    }
}

impl Default for TrackStore {
    fn default() -> Self {
        Self::in_memory()
    }
}
