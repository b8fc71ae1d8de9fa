//! Fixtures shared by unit tests.

use std::f32::consts::PI;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use hound::{SampleFormat, WavSpec, WavWriter};

use crate::derive::encoder::RenditionEncoder;
use crate::derive::transcode::{Rendition, RENDITION_PLAYLIST};
use crate::error::{DaemonError, Result};
use crate::store::TrackStore;
use crate::types::Track;

/// Sample rate of generated fixtures.
pub const SAMPLE_RATE: u32 = 8000;

/// Writes a mono 16-bit sine tone of `seconds` length to `path`.
pub fn write_tone_wav(path: &Path, seconds: f32) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let spec = WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec).unwrap();
    let total = (seconds * SAMPLE_RATE as f32) as usize;
    for i in 0..total {
        let t = i as f32 / SAMPLE_RATE as f32;
        let sample = (2.0 * PI * 440.0 * t).sin() * 0.5;
        writer.write_sample((sample * i16::MAX as f32) as i16).unwrap();
    }
    writer.finalize().unwrap();
}

/// Writes a tone fixture and registers it as a track.
pub async fn insert_wav_track(store: &TrackStore, id: &str, path: &Path, title: &str) -> Track {
    write_tone_wav(path, 1.0);
    let size = std::fs::metadata(path).unwrap().len();
    let track = Track::new(
        id.to_string(),
        path.to_path_buf(),
        title.to_string(),
        "audio/wav".to_string(),
        size,
    );
    store.insert(track.clone()).await.unwrap();
    track
}

/// Rendition encoder that writes a one-segment playlist and counts calls.
///
/// Renditions whose bitrate is listed in `failing` return an error.
pub struct FakeEncoder {
    pub calls: Arc<AtomicUsize>,
    pub failing: Vec<u32>,
}

impl FakeEncoder {
    pub fn new(failing: Vec<u32>) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let encoder = Self {
            calls: Arc::clone(&calls),
            failing,
        };
        (encoder, calls)
    }
}

impl RenditionEncoder for FakeEncoder {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn encode<'a>(
        &'a self,
        _source: &'a Path,
        rendition: Rendition,
        out_dir: &'a Path,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.failing.contains(&rendition.bitrate_kbps) {
                return Err(DaemonError::tool_unavailable("fake", "exit 1"));
            }
            tokio::fs::write(out_dir.join("seg_000.ts"), b"segment")
                .await
                .unwrap();
            tokio::fs::write(
                out_dir.join(RENDITION_PLAYLIST),
                "#EXTM3U\n#EXTINF:6.0,\nseg_000.ts\n#EXT-X-ENDLIST\n",
            )
            .await
            .unwrap();
            Ok(())
        }
        .boxed()
    }
}
