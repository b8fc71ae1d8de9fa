//! Waveform peak documents.
//!
//! A track's document lives in a `waveforms/` sidecar directory next to its
//! source file. Computation goes through the [`ArtifactCache`], so
//! concurrent requests for the same track extract peaks once.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::DaemonConfig;
use crate::error::{DaemonError, Result};
use crate::resolve::PathResolver;
use crate::store::TrackStore;

use super::cache::ArtifactCache;
use super::peaks::{
    AudiowaveformExtractor, FallbackSynthesizer, LoudnessProbe, PeakExtractor, WaveformDoc,
};
use super::tools::Toolchain;

/// Name of the sidecar directory created beside source files.
pub const SIDECAR_DIR: &str = "waveforms";

/// Returns the sidecar path for a track's waveform document.
pub fn sidecar_path(source: &Path, track_id: &str) -> PathBuf {
    source
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(SIDECAR_DIR)
        .join(format!("{}.json", track_id))
}

struct Inner {
    store: TrackStore,
    resolver: PathResolver,
    cache: ArtifactCache,
    primary: Option<Arc<dyn PeakExtractor>>,
    fallback: FallbackSynthesizer,
    loudness: Option<LoudnessProbe>,
}

/// Computes and caches waveform documents.
#[derive(Clone)]
pub struct WaveformDeriver {
    inner: Arc<Inner>,
}

impl WaveformDeriver {
    /// Creates a deriver with an explicit primary extractor.
    ///
    /// With no primary, every document comes from the placeholder
    /// synthesizer.
    pub fn new(
        store: TrackStore,
        resolver: PathResolver,
        primary: Option<Arc<dyn PeakExtractor>>,
        buckets: usize,
        loudness: Option<LoudnessProbe>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                resolver,
                cache: ArtifactCache::new(),
                primary,
                fallback: FallbackSynthesizer { buckets },
                loudness,
            }),
        }
    }

    /// Picks the extraction strategy from the startup tool probe.
    pub fn from_toolchain(
        config: &DaemonConfig,
        tools: &Toolchain,
        store: TrackStore,
        resolver: PathResolver,
    ) -> Self {
        let primary = tools.audiowaveform.as_ref().map(|bin| {
            Arc::new(AudiowaveformExtractor {
                bin: bin.clone(),
                pixels_per_second: config.pixels_per_second,
                max_buckets: config.waveform_buckets,
            }) as Arc<dyn PeakExtractor>
        });
        let loudness = tools.ffmpeg.as_ref().map(|bin| LoudnessProbe {
            ffmpeg_bin: bin.clone(),
        });

        tracing::info!(
            strategy = primary.as_ref().map_or("placeholder", |p| p.name()),
            loudness = loudness.is_some(),
            "waveform strategy selected"
        );

        Self::new(store, resolver, primary, config.waveform_buckets, loudness)
    }

    /// Returns the path of the track's waveform document, computing it if needed.
    ///
    /// Fails with NOT_FOUND when the track or its source cannot be located.
    pub async fn ensure(&self, track_id: &str) -> Result<PathBuf> {
        let track = self
            .inner
            .store
            .get(track_id)
            .await
            .ok_or_else(|| DaemonError::track_not_found(track_id))?;

        if let Some(path) = track.waveform_artifact() {
            if tokio::fs::try_exists(path).await.unwrap_or(false) {
                return Ok(path.to_path_buf());
            }
        }

        let inner = Arc::clone(&self.inner);
        let id = track_id.to_string();
        self.inner
            .cache
            .get_or_compute(track_id, move || compute(inner, id))
            .await
    }

    /// Returns the track's waveform document, or the empty document if it
    /// cannot be produced.
    pub async fn load(&self, track_id: &str) -> WaveformDoc {
        let path = match self.ensure(track_id).await {
            Ok(path) => path,
            Err(e) => {
                tracing::info!(track_id, error = %e.message, "serving empty waveform");
                return WaveformDoc::empty();
            }
        };

        let parsed = tokio::fs::read(&path)
            .await
            .ok()
            .and_then(|bytes| serde_json::from_slice::<WaveformDoc>(&bytes).ok());
        match parsed {
            Some(doc) if doc.is_well_formed() => doc,
            _ => {
                tracing::warn!(track_id, path = %path.display(), "unreadable waveform document");
                WaveformDoc::empty()
            }
        }
    }
}

async fn compute(inner: Arc<Inner>, track_id: String) -> Result<PathBuf> {
    let track = inner
        .store
        .get(&track_id)
        .await
        .ok_or_else(|| DaemonError::track_not_found(&track_id))?;

    // Another run may have published between the caller's check and now.
    if let Some(path) = track.waveform_artifact() {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(path.to_path_buf());
        }
    }

    let resolved = inner.resolver.resolve_track(&track).await?;
    let doc = extract(&inner, &track_id, &resolved.path).await;

    let path = sidecar_path(&resolved.path, &track_id);
    write_doc(&path, &doc).await?;

    tracing::info!(
        track_id = %track_id,
        buckets = doc.buckets,
        path = %path.display(),
        "waveform written"
    );

    let published = path.clone();
    if let Err(e) = inner
        .store
        .update(&track_id, move |t| {
            t.waveform_path = Some(published);
            t.waveform_ready = true;
        })
        .await
    {
        tracing::warn!(track_id = %track_id, error = %e, "failed to persist waveform flag");
    }

    Ok(path)
}

/// Runs the primary extractor, falling back to the placeholder.
async fn extract(inner: &Inner, track_id: &str, source: &Path) -> WaveformDoc {
    if let Some(primary) = &inner.primary {
        match primary.extract(source).await {
            Ok(doc) if doc.buckets > 0 && doc.is_well_formed() => return doc,
            Ok(_) => tracing::warn!(
                track_id,
                extractor = primary.name(),
                "extractor returned no peaks"
            ),
            Err(e) => tracing::warn!(
                track_id,
                extractor = primary.name(),
                error = %e.message,
                "peak extraction failed"
            ),
        }
    }

    if let Some(probe) = &inner.loudness {
        match probe.measure(source).await {
            Ok(loudness) => tracing::info!(
                track_id,
                mean_db = loudness.mean_db,
                max_db = loudness.max_db,
                "loudness diagnostics"
            ),
            Err(e) => tracing::debug!(track_id, error = %e.message, "loudness pass failed"),
        }
    }

    inner.fallback.synthesize()
}

async fn write_doc(path: &Path, doc: &WaveformDoc) -> Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| DaemonError::io(format!("Failed to create {}", dir.display()), e))?;
    }
    let json = serde_json::to_vec(doc)
        .map_err(|e| DaemonError::internal(format!("Failed to encode waveform: {}", e)))?;

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &json)
        .await
        .map_err(|e| DaemonError::io(format!("Failed to write {}", tmp.display()), e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| DaemonError::io(format!("Failed to publish {}", path.display()), e))
}
