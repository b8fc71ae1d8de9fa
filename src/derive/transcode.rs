//! Adaptive HLS packages.
//!
//! A package is `<hls_root>/<track id>/` holding `master.m3u8` and one
//! `<k>k/` directory per rendition. Renditions encode concurrently and fail
//! independently; the manifest policy decides whether failed renditions are
//! still listed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;

use crate::config::{DaemonConfig, ManifestPolicy};
use crate::error::{DaemonError, ErrorCode, Result};
use crate::resolve::PathResolver;
use crate::store::TrackStore;

use super::cache::ArtifactCache;
use super::encoder::{FfmpegEncoder, RenditionEncoder};
use super::tools::Toolchain;

/// Top-level playlist file name.
pub const MASTER_MANIFEST: &str = "master.m3u8";

/// Per-rendition playlist file name.
pub const RENDITION_PLAYLIST: &str = "index.m3u8";

/// Codec string advertised for every rendition (AAC-LC).
pub const AUDIO_CODEC: &str = "mp4a.40.2";

/// One fixed-bitrate variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rendition {
    pub bitrate_kbps: u32,
}

impl Rendition {
    /// Directory name, e.g. `128k`.
    pub fn name(&self) -> String {
        format!("{}k", self.bitrate_kbps)
    }

    /// Advertised bandwidth in bits per second.
    pub fn bandwidth(&self) -> u64 {
        u64::from(self.bitrate_kbps) * 1000
    }

    /// URI of the rendition playlist, relative to the master manifest.
    pub fn playlist_uri(&self) -> String {
        format!("{}/{}", self.name(), RENDITION_PLAYLIST)
    }

    /// Builds an ascending, de-duplicated ladder from bitrates.
    pub fn ladder(bitrates_kbps: &[u32]) -> Vec<Rendition> {
        let mut ladder: Vec<Rendition> = bitrates_kbps
            .iter()
            .filter(|&&k| k > 0)
            .map(|&bitrate_kbps| Rendition { bitrate_kbps })
            .collect();
        ladder.sort();
        ladder.dedup();
        ladder
    }
}

/// Renders a master manifest listing `renditions` in ascending bandwidth.
pub fn build_master_manifest(renditions: &[Rendition]) -> String {
    let mut sorted = renditions.to_vec();
    sorted.sort();
    sorted.dedup();

    let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
    for rendition in sorted {
        out.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},CODECS=\"{}\"\n{}\n",
            rendition.bandwidth(),
            AUDIO_CODEC,
            rendition.playlist_uri()
        ));
    }
    out
}

/// Returns true if `component` is safe to join onto a package directory.
pub fn is_safe_component(component: &str) -> bool {
    !component.is_empty()
        && component != "."
        && !component.contains("..")
        && component
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

struct Inner {
    store: TrackStore,
    resolver: PathResolver,
    cache: ArtifactCache,
    encoder: Option<Arc<dyn RenditionEncoder>>,
    hls_root: PathBuf,
    ladder: Vec<Rendition>,
    policy: ManifestPolicy,
}

/// Builds and caches HLS packages.
#[derive(Clone)]
pub struct Transcoder {
    inner: Arc<Inner>,
}

impl Transcoder {
    /// Creates a transcoder. Without an encoder every run fails with
    /// TOOL_UNAVAILABLE.
    pub fn new(
        store: TrackStore,
        resolver: PathResolver,
        encoder: Option<Arc<dyn RenditionEncoder>>,
        hls_root: impl Into<PathBuf>,
        bitrates_kbps: &[u32],
        policy: ManifestPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                resolver,
                cache: ArtifactCache::new(),
                encoder,
                hls_root: hls_root.into(),
                ladder: Rendition::ladder(bitrates_kbps),
                policy,
            }),
        }
    }

    /// Uses ffmpeg when the startup probe found it.
    pub fn from_toolchain(
        config: &DaemonConfig,
        tools: &Toolchain,
        store: TrackStore,
        resolver: PathResolver,
    ) -> Self {
        let encoder = tools.ffmpeg.as_ref().map(|bin| {
            Arc::new(FfmpegEncoder {
                bin: bin.clone(),
                segment_sec: config.hls_segment_sec,
            }) as Arc<dyn RenditionEncoder>
        });

        tracing::info!(
            encoder = encoder.as_ref().map_or("none", |e| e.name()),
            policy = config.manifest_policy.as_str(),
            "transcoder configured"
        );

        Self::new(
            store,
            resolver,
            encoder,
            config.hls_root(),
            &config.bitrates_kbps,
            config.manifest_policy,
        )
    }

    /// Returns the track's package directory, building it if needed.
    ///
    /// A published package is reused only while its master manifest exists;
    /// otherwise the directory is cleared and rebuilt.
    pub async fn ensure(&self, track_id: &str) -> Result<PathBuf> {
        let track = self
            .inner
            .store
            .get(track_id)
            .await
            .ok_or_else(|| DaemonError::track_not_found(track_id))?;

        if let Some(dir) = track.hls_artifact() {
            if tokio::fs::try_exists(dir.join(MASTER_MANIFEST)).await.unwrap_or(false) {
                return Ok(dir.to_path_buf());
            }
        }

        let inner = Arc::clone(&self.inner);
        let id = track_id.to_string();
        let ready = self
            .inner
            .cache
            .get_or_compute(track_id, move || compute(inner, id))
            .await?;
        Ok(ready.parent().map(Path::to_path_buf).unwrap_or(ready))
    }

    /// Returns the master manifest text, building the package if needed.
    pub async fn read_master(&self, track_id: &str) -> Result<String> {
        let dir = self.ensure(track_id).await?;
        let path = dir.join(MASTER_MANIFEST);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| DaemonError::io(format!("Failed to read {}", path.display()), e))
    }

    /// Locates a file inside a published rendition directory.
    ///
    /// Never builds the package; returns NOT_FOUND until it is ready.
    pub async fn rendition_file(
        &self,
        track_id: &str,
        rendition: &str,
        file: &str,
    ) -> Result<PathBuf> {
        if !is_safe_component(rendition) || !is_safe_component(file) {
            return Err(DaemonError::new(
                ErrorCode::NotFound,
                format!("Invalid package path {}/{}", rendition, file),
            ));
        }

        let track = self
            .inner
            .store
            .get(track_id)
            .await
            .ok_or_else(|| DaemonError::track_not_found(track_id))?;
        let dir = track.hls_artifact().ok_or_else(|| {
            DaemonError::new(
                ErrorCode::NotFound,
                format!("No HLS package for track {}", track_id),
            )
        })?;

        let path = dir.join(rendition).join(file);
        if tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
        {
            Ok(path)
        } else {
            Err(DaemonError::new(
                ErrorCode::NotFound,
                format!("No such package file {}", path.display()),
            ))
        }
    }
}

/// Builds the package and returns the path of its master manifest.
///
/// The cache tracks the manifest file rather than the directory so a
/// package whose manifest was deleted is rebuilt.
async fn compute(inner: Arc<Inner>, track_id: String) -> Result<PathBuf> {
    let track = inner
        .store
        .get(&track_id)
        .await
        .ok_or_else(|| DaemonError::track_not_found(&track_id))?;

    if let Some(dir) = track.hls_artifact() {
        let master = dir.join(MASTER_MANIFEST);
        if tokio::fs::try_exists(&master).await.unwrap_or(false) {
            return Ok(master);
        }
    }

    let resolved = inner.resolver.resolve_track(&track).await?;
    let Some(encoder) = inner.encoder.clone() else {
        return Err(DaemonError::tool_unavailable("ffmpeg", "no encoder installed"));
    };

    let dir = inner.hls_root.join(&track_id);
    if tokio::fs::try_exists(&dir).await.unwrap_or(false) {
        tracing::info!(track_id = %track_id, dir = %dir.display(), "removing stale package");
        tokio::fs::remove_dir_all(&dir)
            .await
            .map_err(|e| DaemonError::io(format!("Failed to clear {}", dir.display()), e))?;
    }

    let mut encoded = Vec::new();
    let source = resolved.path.as_path();
    let runs = inner.ladder.iter().map(|&rendition| {
        let encoder = Arc::clone(&encoder);
        let out_dir = dir.join(rendition.name());
        let track_id = track_id.as_str();
        async move {
            let result = match tokio::fs::create_dir_all(&out_dir).await {
                Ok(()) => encoder.encode(source, rendition, &out_dir).await,
                Err(e) => Err(DaemonError::io(
                    format!("Failed to create {}", out_dir.display()),
                    e,
                )),
            };
            match &result {
                Ok(()) => tracing::info!(
                    track_id,
                    bitrate_kbps = rendition.bitrate_kbps,
                    "rendition encoded"
                ),
                Err(e) => tracing::warn!(
                    track_id,
                    bitrate_kbps = rendition.bitrate_kbps,
                    error = %e.message,
                    "rendition failed"
                ),
            }
            (rendition, result.is_ok())
        }
    });
    for (rendition, ok) in join_all(runs).await {
        if ok {
            encoded.push(rendition);
        }
    }

    if encoded.is_empty() {
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            tracing::warn!(track_id = %track_id, error = %e, "failed to remove empty package");
        }
        return Err(DaemonError::tool_unavailable(
            encoder.name(),
            format!("no rendition encoded for track {}", track_id),
        ));
    }

    let listed = match inner.policy {
        ManifestPolicy::Successful => encoded.clone(),
        ManifestPolicy::All => inner.ladder.clone(),
    };
    let master = dir.join(MASTER_MANIFEST);
    write_manifest(&master, &build_master_manifest(&listed)).await?;

    tracing::info!(
        track_id = %track_id,
        encoded = encoded.len(),
        listed = listed.len(),
        dir = %dir.display(),
        "HLS package written"
    );

    let published = dir.clone();
    if let Err(e) = inner
        .store
        .update(&track_id, move |t| {
            t.hls_dir = Some(published);
            t.hls_ready = true;
        })
        .await
    {
        tracing::warn!(track_id = %track_id, error = %e, "failed to persist HLS flag");
    }

    Ok(master)
}

async fn write_manifest(path: &Path, text: &str) -> Result<()> {
    let tmp = path.with_extension("m3u8.tmp");
    tokio::fs::write(&tmp, text)
        .await
        .map_err(|e| DaemonError::io(format!("Failed to write {}", tmp.display()), e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| DaemonError::io(format!("Failed to publish {}", path.display()), e))
}
