//! Derived artifacts: waveform documents and HLS packages.
//!
//! Both derivers check the persisted ready flag first, then go through a
//! per-key single-flight [`ArtifactCache`]. External tools are probed once
//! at startup and the resulting [`Toolchain`] picks each deriver's strategy.

pub mod cache;
pub mod encoder;
pub mod peaks;
pub mod tools;
pub mod transcode;
pub mod waveform;

pub use cache::{ArtifactCache, CacheState};
pub use encoder::{FfmpegEncoder, RenditionEncoder};
pub use peaks::{
    AudiowaveformExtractor, FallbackSynthesizer, LoudnessProbe, PeakExtractor, WaveformDoc,
};
pub use tools::Toolchain;
pub use transcode::{build_master_manifest, Rendition, Transcoder, MASTER_MANIFEST};
pub use waveform::WaveformDeriver;
