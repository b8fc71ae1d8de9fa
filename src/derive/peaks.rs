//! Peak-amplitude extraction strategies.
//!
//! [`AudiowaveformExtractor`] shells out to `audiowaveform`;
//! [`FallbackSynthesizer`] produces a fixed, smooth envelope when no real
//! peaks can be computed. Which one is primary is decided once at startup.

use std::f32::consts::PI;
use std::ffi::OsStr;
use std::path::Path;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::error::{DaemonError, ErrorCode, Result};

use super::tools::run_tool;

/// Version written into every computed waveform document.
pub const WAVEFORM_VERSION: u32 = 2;

/// Peak-amplitude document served to clients.
///
/// The empty document serializes as `{"buckets":0,"peaks":[]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveformDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    pub buckets: usize,
    pub peaks: Vec<f32>,
}

impl WaveformDoc {
    /// Wraps peaks in a versioned document.
    pub fn from_peaks(peaks: Vec<f32>) -> Self {
        Self {
            version: Some(WAVEFORM_VERSION),
            buckets: peaks.len(),
            peaks,
        }
    }

    /// The document returned when nothing can be derived.
    pub fn empty() -> Self {
        Self {
            version: None,
            buckets: 0,
            peaks: Vec::new(),
        }
    }

    /// True if bucket count matches the peaks and every value is in [0, 1].
    pub fn is_well_formed(&self) -> bool {
        self.buckets == self.peaks.len()
            && self.peaks.iter().all(|p| p.is_finite() && (0.0..=1.0).contains(p))
    }
}

/// Produces a waveform document from a source file.
pub trait PeakExtractor: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Computes peaks for the audio at `source`.
    fn extract<'a>(&'a self, source: &'a Path) -> BoxFuture<'a, Result<WaveformDoc>>;
}

/// Extracts real peaks with the `audiowaveform` tool.
pub struct AudiowaveformExtractor {
    pub bin: String,
    pub pixels_per_second: u32,
    pub max_buckets: usize,
}

impl PeakExtractor for AudiowaveformExtractor {
    fn name(&self) -> &'static str {
        "audiowaveform"
    }

    fn extract<'a>(&'a self, source: &'a Path) -> BoxFuture<'a, Result<WaveformDoc>> {
        async move {
            let pps = self.pixels_per_second.to_string();
            let args: [&OsStr; 10] = [
                "-i".as_ref(),
                source.as_os_str(),
                "--output-format".as_ref(),
                "json".as_ref(),
                "-o".as_ref(),
                "-".as_ref(),
                "--pixels-per-second".as_ref(),
                pps.as_ref(),
                "-b".as_ref(),
                "8".as_ref(),
            ];
            let output = run_tool(&self.bin, args).await?;
            let raw: RawWaveform = serde_json::from_slice(&output.stdout).map_err(|e| {
                DaemonError::with_source(
                    ErrorCode::ToolUnavailable,
                    "audiowaveform produced unreadable JSON",
                    e,
                )
            })?;
            Ok(WaveformDoc::from_peaks(peaks_from_raw(&raw, self.max_buckets)))
        }
        .boxed()
    }
}

/// The subset of audiowaveform's JSON output used here.
#[derive(Debug, Deserialize)]
pub struct RawWaveform {
    #[serde(default = "default_channels")]
    pub channels: usize,
    pub bits: u32,
    pub data: Vec<i32>,
}

fn default_channels() -> usize {
    1
}

/// Converts interleaved min/max pairs into normalized peaks.
///
/// Each pixel holds `channels` min/max pairs; the peak is the largest
/// magnitude across them, scaled by the sample bit depth. Long inputs are
/// max-pooled down to `max_buckets`.
pub fn peaks_from_raw(raw: &RawWaveform, max_buckets: usize) -> Vec<f32> {
    let stride = raw.channels.max(1) * 2;
    let scale = match raw.bits {
        16 => 32768.0,
        _ => 128.0,
    };

    let peaks: Vec<f32> = raw
        .data
        .chunks(stride)
        .filter(|chunk| chunk.len() == stride)
        .map(|chunk| {
            let magnitude = chunk.iter().map(|v| v.unsigned_abs()).max().unwrap_or(0);
            (magnitude as f32 / scale).clamp(0.0, 1.0)
        })
        .collect();

    downsample_max(&peaks, max_buckets)
}

/// Max-pools `peaks` into at most `max_buckets` values.
pub fn downsample_max(peaks: &[f32], max_buckets: usize) -> Vec<f32> {
    if max_buckets == 0 || peaks.len() <= max_buckets {
        return peaks.to_vec();
    }
    (0..max_buckets)
        .map(|i| {
            let start = i * peaks.len() / max_buckets;
            let end = ((i + 1) * peaks.len() / max_buckets).max(start + 1);
            peaks[start..end].iter().copied().fold(0.0, f32::max)
        })
        .collect()
}

/// Deterministic placeholder waveform.
///
/// A raised-cosine envelope modulated by a slow ripple; every value lies in
/// [0.1, 0.9]. Not derived from the audio.
pub struct FallbackSynthesizer {
    pub buckets: usize,
}

impl FallbackSynthesizer {
    /// Builds the placeholder document.
    pub fn synthesize(&self) -> WaveformDoc {
        let n = self.buckets.max(1);
        let peaks = (0..n)
            .map(|i| {
                let t = if n == 1 { 0.5 } else { i as f32 / (n - 1) as f32 };
                let envelope = 0.5 - 0.5 * (2.0 * PI * t).cos();
                let ripple = 0.75 + 0.25 * (2.0 * PI * 7.0 * t).sin();
                (0.1 + 0.8 * envelope * ripple).clamp(0.0, 1.0)
            })
            .collect();
        WaveformDoc::from_peaks(peaks)
    }
}

impl PeakExtractor for FallbackSynthesizer {
    fn name(&self) -> &'static str {
        "placeholder"
    }

    fn extract<'a>(&'a self, _source: &'a Path) -> BoxFuture<'a, Result<WaveformDoc>> {
        let doc = self.synthesize();
        async move { Ok(doc) }.boxed()
    }
}

/// Loudness statistics gathered for diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Loudness {
    pub mean_db: f32,
    pub max_db: f32,
}

/// Runs ffmpeg's `volumedetect` filter over a source file.
pub struct LoudnessProbe {
    pub ffmpeg_bin: String,
}

impl LoudnessProbe {
    /// Measures mean and max volume. Callers ignore failures.
    pub async fn measure(&self, source: &Path) -> Result<Loudness> {
        let args: [&OsStr; 9] = [
            "-hide_banner".as_ref(),
            "-nostats".as_ref(),
            "-i".as_ref(),
            source.as_os_str(),
            "-af".as_ref(),
            "volumedetect".as_ref(),
            "-f".as_ref(),
            "null".as_ref(),
            "-".as_ref(),
        ];
        let output = run_tool(&self.ffmpeg_bin, args).await?;
        parse_volumedetect(&output.stderr)
            .ok_or_else(|| DaemonError::tool_unavailable("ffmpeg", "no volumedetect summary"))
    }
}

/// Parses `mean_volume: -20.1 dB` / `max_volume: -1.2 dB` lines.
pub fn parse_volumedetect(stderr: &str) -> Option<Loudness> {
    let read = |key: &str| -> Option<f32> {
        stderr.lines().find_map(|line| {
            let rest = line.split(key).nth(1)?;
            rest.trim().trim_end_matches("dB").trim().parse().ok()
        })
    };
    Some(Loudness {
        mean_db: read("mean_volume:")?,
        max_db: read("max_volume:")?,
    })
}
