//! Byte-range streaming of source audio.

use std::io::SeekFrom;
use std::path::Path;

use axum::body::Body;
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::Response;
use mime_guess::MimeGuess;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::error::{DaemonError, Result};
use crate::types::Track;

use super::server::AppState;

/// Content type used when neither the record nor the extension tells.
pub const FALLBACK_AUDIO_TYPE: &str = "audio/mpeg";

/// Inclusive byte range within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered.
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Parses a single `bytes=` range against a file of `size` bytes.
///
/// Accepts `A-B`, `A-` and the suffix form `-N`. Returns `None` for other
/// units, multiple ranges, malformed values and anything outside
/// `0 <= A <= B < size`. An end past the last byte is not clamped.
pub fn parse_range(header: &str, size: u64) -> Option<ByteRange> {
    let header = header.trim();
    let (unit, spec) = header.split_once('=')?;
    if !unit.trim().eq_ignore_ascii_case("bytes") || spec.contains(',') {
        return None;
    }
    let (a, b) = spec.split_once('-')?;
    let (a, b) = (a.trim(), b.trim());
    if size == 0 {
        return None;
    }

    if a.is_empty() {
        let suffix = parse_offset(b)?;
        if suffix == 0 {
            return None;
        }
        return Some(ByteRange {
            start: size.saturating_sub(suffix),
            end: size - 1,
        });
    }

    let start = parse_offset(a)?;
    let end = if b.is_empty() { size - 1 } else { parse_offset(b)? };
    (start <= end && end < size).then_some(ByteRange { start, end })
}

/// Plain decimal byte offset. Signs and other characters are rejected.
fn parse_offset(value: &str) -> Option<u64> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

/// Replaces characters outside `[A-Za-z0-9 ._-]` with `_`.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, ' ' | '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "track".to_string()
    } else {
        cleaned
    }
}

/// Attachment file name: sanitized title plus the source extension.
pub fn download_name(track: &Track, source: &Path) -> String {
    let title = sanitize_filename(&track.title);
    match source.extension().and_then(|e| e.to_str()) {
        Some(ext) => sanitize_filename(&format!("{}.{}", title, ext.to_lowercase())),
        None => title,
    }
}

/// Content type for a source file.
pub fn content_type(track: &Track, source: &Path) -> String {
    let stored = track.mime_type.trim();
    if !stored.is_empty() && stored != "application/octet-stream" {
        return stored.to_string();
    }
    MimeGuess::from_path(source)
        .first_raw()
        .unwrap_or(FALLBACK_AUDIO_TYPE)
        .to_string()
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamParams {
    download: Option<String>,
}

impl StreamParams {
    fn wants_download(&self) -> bool {
        matches!(
            self.download.as_deref().map(str::to_ascii_lowercase).as_deref(),
            Some("1" | "true" | "yes")
        )
    }
}

/// `GET /api/tracks/{id}/stream`
pub async fn stream_track(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
    Query(params): Query<StreamParams>,
    method: Method,
    headers: HeaderMap,
) -> Result<Response> {
    let resolved = state.pipeline.resolver.resolve(&id).await?;
    let track = state
        .pipeline
        .store
        .get(&id)
        .await
        .ok_or_else(|| DaemonError::track_not_found(&id))?;

    let size = tokio::fs::metadata(&resolved.path)
        .await
        .map_err(|_| DaemonError::source_not_found(&id))?
        .len();

    let range_header = headers.get(header::RANGE).map(|v| v.to_str().unwrap_or(""));
    let range = match range_header {
        Some(raw) => match parse_range(raw, size) {
            Some(range) => Some(range),
            None => return Err(DaemonError::range_not_satisfiable(raw, size)),
        },
        None => None,
    };

    let (status, start, length) = match range {
        Some(r) => (StatusCode::PARTIAL_CONTENT, r.start, r.length()),
        None => (StatusCode::OK, 0, size),
    };

    let mut response = axum::http::Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type(&track, &resolved.path))
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_LENGTH, length);
    if let Some(r) = range {
        response = response.header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", r.start, r.end, size),
        );
    }
    if params.wants_download() {
        response = response.header(
            header::CONTENT_DISPOSITION,
            format!(
                "attachment; filename=\"{}\"",
                download_name(&track, &resolved.path)
            ),
        );
    }

    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        let mut file = tokio::fs::File::open(&resolved.path)
            .await
            .map_err(|_| DaemonError::source_not_found(&id))?;
        if start > 0 {
            file.seek(SeekFrom::Start(start))
                .await
                .map_err(|e| DaemonError::io("Failed to seek source", e))?;
        }
        Body::from_stream(ReaderStream::new(file.take(length)))
    };

    // Seeks and resumed chunks do not count as new plays.
    if start == 0 && method != Method::HEAD {
        let pipeline = state.pipeline.clone();
        let listener = headers
            .get(pipeline.config.listener_header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let track_id = id.clone();
        tokio::spawn(async move {
            pipeline.record_play(&track_id, listener.as_deref()).await;
        });
    }

    tracing::debug!(
        track_id = %id,
        status = status.as_u16(),
        start,
        length,
        healed = resolved.healed,
        "streaming source"
    );

    response
        .body(body)
        .map_err(|e| DaemonError::internal(format!("Failed to build response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn closed_range() {
        assert_eq!(parse_range("bytes=0-99", 1000), Some(ByteRange { start: 0, end: 99 }));
        assert_eq!(parse_range("bytes=999-999", 1000).unwrap().length(), 1);
    }

    #[test]
    fn open_and_suffix_ranges() {
        assert_eq!(
            parse_range("bytes=500-", 1000),
            Some(ByteRange { start: 500, end: 999 })
        );
        assert_eq!(
            parse_range("bytes=-100", 1000),
            Some(ByteRange { start: 900, end: 999 })
        );
        assert_eq!(
            parse_range("bytes=-5000", 1000),
            Some(ByteRange { start: 0, end: 999 })
        );
    }

    #[test]
    fn unsatisfiable_ranges() {
        assert_eq!(parse_range("bytes=1000-1010", 1000), None);
        assert_eq!(parse_range("bytes=10-5", 1000), None);
        assert_eq!(parse_range("bytes=0-1000", 1000), None);
        assert_eq!(parse_range("bytes=0-1,5-6", 1000), None);
        assert_eq!(parse_range("items=0-5", 1000), None);
        assert_eq!(parse_range("bytes=abc", 1000), None);
        assert_eq!(parse_range("bytes=-0", 1000), None);
        assert_eq!(parse_range("bytes=0-", 0), None);
    }

    #[test]
    fn signed_offsets_are_rejected() {
        assert_eq!(parse_range("bytes=+0-+99", 1000), None);
        assert_eq!(parse_range("bytes=+0-99", 1000), None);
        assert_eq!(parse_range("bytes=0-+99", 1000), None);
        assert_eq!(parse_range("bytes=-+100", 1000), None);
        assert_eq!(parse_range("bytes=0x0-10", 1000), None);
    }

    #[test]
    fn filenames_are_sanitized() {
        assert_eq!(sanitize_filename("Night Drive (v2)"), "Night Drive _v2_");
        assert_eq!(sanitize_filename("a/b\\c\"d"), "a_b_c_d");
        assert_eq!(sanitize_filename("   "), "track");

        let track = Track::new(
            "1".into(),
            PathBuf::from("/m/x.MP3"),
            "Café Beats".into(),
            String::new(),
            1,
        );
        assert_eq!(download_name(&track, Path::new("/m/x.MP3")), "Caf_ Beats.mp3");
    }

    #[test]
    fn content_type_fallbacks() {
        let mut track = Track::new(
            "1".into(),
            PathBuf::from("/m/x.flac"),
            "x".into(),
            "audio/wav".into(),
            1,
        );
        assert_eq!(content_type(&track, Path::new("/m/x.flac")), "audio/wav");
        track.mime_type = String::new();
        assert_eq!(content_type(&track, Path::new("/m/x.flac")), "audio/flac");
        assert_eq!(content_type(&track, Path::new("/m/x.zzz9")), FALLBACK_AUDIO_TYPE);
    }

    #[test]
    fn download_flag_values() {
        let on = StreamParams {
            download: Some("1".into()),
        };
        let off = StreamParams {
            download: Some("0".into()),
        };
        assert!(on.wants_download());
        assert!(!off.wants_download());
        assert!(!StreamParams::default().wants_download());
    }
}
