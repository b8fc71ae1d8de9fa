//! Path resolution for track source files.
//!
//! Stored paths go stale when upload directories move or records are copied
//! between environments. The resolver tries an ordered list of
//! [`ResolveStrategy`] implementations and, when anything other than the
//! exact stored path wins, writes the corrected path back to the store.

pub mod strategies;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{DaemonError, Result};
use crate::store::TrackStore;
use crate::types::Track;

pub use strategies::{
    default_strategies, has_audio_extension, BasenameInRoot, ExactPath, FuzzyMatch,
    ResolveStrategy, AUDIO_EXTENSIONS,
};

/// Where a track's bytes were found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Regular file holding the audio.
    pub path: PathBuf,
    /// Name of the strategy that found it.
    pub strategy: &'static str,
    /// True if the stored path was corrected.
    pub healed: bool,
}

/// Locates readable audio for tracks, self-healing stale paths.
#[derive(Clone)]
pub struct PathResolver {
    store: TrackStore,
    media_root: PathBuf,
    strategies: Arc<Vec<Box<dyn ResolveStrategy>>>,
}

impl PathResolver {
    /// Creates a resolver with the default strategy order.
    pub fn new(store: TrackStore, media_root: impl Into<PathBuf>, scan_depth: usize) -> Self {
        Self::with_strategies(store, media_root, default_strategies(scan_depth))
    }

    /// Creates a resolver with a custom strategy order.
    pub fn with_strategies(
        store: TrackStore,
        media_root: impl Into<PathBuf>,
        strategies: Vec<Box<dyn ResolveStrategy>>,
    ) -> Self {
        Self {
            store,
            media_root: media_root.into(),
            strategies: Arc::new(strategies),
        }
    }

    /// Returns the media root scanned by the fallback strategies.
    pub fn media_root(&self) -> &Path {
        &self.media_root
    }

    /// Resolves the source file for the track with the given id.
    ///
    /// Returns a NOT_FOUND error when the track is unknown or no strategy
    /// finds its bytes; callers treat that as "no content", not a fault.
    pub async fn resolve(&self, track_id: &str) -> Result<Resolved> {
        let track = self
            .store
            .get(track_id)
            .await
            .ok_or_else(|| DaemonError::track_not_found(track_id))?;
        self.resolve_track(&track).await
    }

    /// Resolves the source file for an already loaded track.
    pub async fn resolve_track(&self, track: &Track) -> Result<Resolved> {
        let strategies = Arc::clone(&self.strategies);
        let media_root = self.media_root.clone();
        let lookup = track.clone();

        let found = tokio::task::spawn_blocking(move || {
            strategies.iter().find_map(|strategy| {
                strategy
                    .resolve(&lookup, &media_root)
                    .map(|path| (path, strategy.name()))
            })
        })
        .await
        .map_err(|e| DaemonError::internal(format!("Path resolution task failed: {}", e)))?;

        let Some((path, strategy)) = found else {
            tracing::info!(track_id = %track.id, stored = %track.stored_path.display(), "no readable source");
            return Err(DaemonError::source_not_found(&track.id));
        };

        let healed = path != track.stored_path;
        if healed {
            tracing::info!(
                track_id = %track.id,
                strategy,
                from = %track.stored_path.display(),
                to = %path.display(),
                "self-healing stored path"
            );
            let corrected = path.clone();
            if let Err(e) = self
                .store
                .update(&track.id, move |t| t.stored_path = corrected)
                .await
            {
                tracing::warn!(track_id = %track.id, error = %e, "failed to persist corrected path");
            }
        }

        Ok(Resolved {
            path,
            strategy,
            healed,
        })
    }
}
