//! Rendition encoders.

use std::ffi::{OsStr, OsString};
use std::path::Path;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::Result;

use super::tools::run_tool;
use super::transcode::{Rendition, RENDITION_PLAYLIST};

/// Encodes one fixed-bitrate rendition of a source file.
pub trait RenditionEncoder: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Writes the rendition's playlist and segments into `out_dir`, which
    /// already exists.
    fn encode<'a>(
        &'a self,
        source: &'a Path,
        rendition: Rendition,
        out_dir: &'a Path,
    ) -> BoxFuture<'a, Result<()>>;
}

/// Encodes AAC HLS renditions with ffmpeg.
pub struct FfmpegEncoder {
    pub bin: String,
    pub segment_sec: u32,
}

impl FfmpegEncoder {
    /// Arguments for one rendition run.
    pub fn args(&self, source: &Path, rendition: Rendition, out_dir: &Path) -> Vec<OsString> {
        let bitrate = format!("{}k", rendition.bitrate_kbps);
        let segment_sec = self.segment_sec.to_string();
        let segments = out_dir.join("seg_%03d.ts");
        let playlist = out_dir.join(RENDITION_PLAYLIST);

        let parts: [&OsStr; 26] = [
            "-hide_banner".as_ref(),
            "-loglevel".as_ref(),
            "error".as_ref(),
            "-y".as_ref(),
            "-i".as_ref(),
            source.as_os_str(),
            "-vn".as_ref(),
            "-c:a".as_ref(),
            "aac".as_ref(),
            "-b:a".as_ref(),
            bitrate.as_ref(),
            "-ar".as_ref(),
            "44100".as_ref(),
            "-ac".as_ref(),
            "2".as_ref(),
            "-f".as_ref(),
            "hls".as_ref(),
            "-hls_time".as_ref(),
            segment_sec.as_ref(),
            "-hls_playlist_type".as_ref(),
            "vod".as_ref(),
            "-hls_list_size".as_ref(),
            "0".as_ref(),
            "-hls_segment_filename".as_ref(),
            segments.as_os_str(),
            playlist.as_os_str(),
        ];
        parts.iter().map(|p| p.to_os_string()).collect()
    }
}

impl RenditionEncoder for FfmpegEncoder {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn encode<'a>(
        &'a self,
        source: &'a Path,
        rendition: Rendition,
        out_dir: &'a Path,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            run_tool(&self.bin, self.args(source, rendition, out_dir)).await?;
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ffmpeg_args_target_rendition_dir() {
        let encoder = FfmpegEncoder {
            bin: "ffmpeg".to_string(),
            segment_sec: 6,
        };
        let args = encoder.args(
            Path::new("/media/a.mp3"),
            Rendition { bitrate_kbps: 128 },
            Path::new("/media/hls/abc/128k"),
        );
        let args: Vec<String> = args
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        let after = |flag: &str| {
            let i = args.iter().position(|a| a == flag).unwrap();
            args[i + 1].clone()
        };
        assert_eq!(after("-i"), "/media/a.mp3");
        assert_eq!(after("-b:a"), "128k");
        assert_eq!(after("-hls_time"), "6");
        assert_eq!(after("-hls_segment_filename"), "/media/hls/abc/128k/seg_%03d.ts");
        assert!(args.contains(&"/media/hls/abc/128k/index.m3u8".to_string()));
    }
}
