//! Upload, metadata and derived-artifact handlers.

use std::path::{Path, PathBuf};

use axum::body::{Body, Bytes};
use axum::extract::{Multipart, Path as UrlPath, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use mime_guess::MimeGuess;
use serde_json::{json, Value};
use tokio_util::io::ReaderStream;

use crate::derive::WaveformDoc;
use crate::error::{DaemonError, Result};
use crate::resolve::has_audio_extension;
use crate::types::{compute_track_id, Track};

use super::server::AppState;

/// Content type of HLS playlists.
pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// `GET /healthz`
pub async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// `GET /api/tracks/{id}`
pub async fn get_track(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> Result<Json<Track>> {
    state
        .pipeline
        .store
        .get(&id)
        .await
        .map(Json)
        .ok_or_else(|| DaemonError::track_not_found(&id))
}

/// `GET /api/tracks/{id}/waveform`
///
/// Always 200; an underivable waveform is served as the empty document.
pub async fn get_waveform(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> Json<WaveformDoc> {
    Json(state.pipeline.waveforms.load(&id).await)
}

/// `GET /api/tracks/{id}/hls/master.m3u8`
pub async fn get_master(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> Result<Response> {
    let manifest = state.pipeline.transcoder.read_master(&id).await?;
    Ok(([(header::CONTENT_TYPE, PLAYLIST_CONTENT_TYPE)], manifest).into_response())
}

/// `GET /api/tracks/{id}/hls/{rendition}/{file}`
pub async fn get_rendition_file(
    State(state): State<AppState>,
    UrlPath((id, rendition, file)): UrlPath<(String, String, String)>,
) -> Result<Response> {
    let path = state
        .pipeline
        .transcoder
        .rendition_file(&id, &rendition, &file)
        .await?;
    let handle = tokio::fs::File::open(&path)
        .await
        .map_err(|e| DaemonError::io(format!("Failed to open {}", path.display()), e))?;
    let body = Body::from_stream(ReaderStream::new(handle));
    Ok(([(header::CONTENT_TYPE, package_content_type(&path))], body).into_response())
}

/// Content type for a file inside an HLS package.
pub fn package_content_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("m3u8") => PLAYLIST_CONTENT_TYPE,
        Some("ts") => "video/mp2t",
        Some("aac") => "audio/aac",
        Some("m4s") | Some("mp4") => "audio/mp4",
        _ => "application/octet-stream",
    }
}

/// One file part of an upload.
struct FilePart {
    file_name: String,
    content_type: Option<String>,
    data: Bytes,
}

/// Parsed multipart upload.
#[derive(Default)]
struct UploadForm {
    audio: Option<FilePart>,
    cover: Option<FilePart>,
    title: Option<String>,
    artist: Option<String>,
}

async fn read_form(mut multipart: Multipart) -> Result<UploadForm> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| DaemonError::invalid_upload(format!("Malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "audio" | "cover" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(|e| {
                    DaemonError::invalid_upload(format!("Failed to read {} part: {}", name, e))
                })?;
                let part = FilePart {
                    file_name,
                    content_type,
                    data,
                };
                if name == "audio" {
                    form.audio = Some(part);
                } else {
                    form.cover = Some(part);
                }
            }
            "title" | "artist" => {
                let text = field.text().await.map_err(|e| {
                    DaemonError::invalid_upload(format!("Failed to read {} field: {}", name, e))
                })?;
                let text = text.trim().to_string();
                if text.is_empty() {
                    continue;
                }
                if name == "title" {
                    form.title = Some(text);
                } else {
                    form.artist = Some(text);
                }
            }
            other => tracing::debug!(field = other, "ignoring upload field"),
        }
    }
    Ok(form)
}

/// Lowercase ASCII slug of a title, for upload file names.
pub fn slugify(title: &str) -> String {
    let mut slug = String::new();
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
        if slug.len() >= 40 {
            break;
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "track".to_string()
    } else {
        slug.to_string()
    }
}

fn file_extension(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
}

fn is_audio_part(part: &FilePart) -> bool {
    match part.content_type.as_deref() {
        Some(ct) if ct.starts_with("audio/") => true,
        Some("application/octet-stream") | None => has_audio_extension(Path::new(&part.file_name)),
        Some(_) => false,
    }
}

async fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| DaemonError::io(format!("Failed to create {}", dir.display()), e))?;
    }
    tokio::fs::write(path, data)
        .await
        .map_err(|e| DaemonError::io(format!("Failed to write {}", path.display()), e))
}

/// `POST /api/tracks`
///
/// Stores the audio (and optional cover), records the track and schedules
/// its derivations. Scheduling problems are logged; they never fail the
/// upload.
pub async fn upload_track(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Track>)> {
    let form = read_form(multipart).await?;
    let audio = form
        .audio
        .ok_or_else(|| DaemonError::invalid_upload("Missing `audio` file part"))?;
    if audio.data.is_empty() {
        return Err(DaemonError::invalid_upload("Empty `audio` file part"));
    }
    if !is_audio_part(&audio) {
        return Err(DaemonError::invalid_upload(format!(
            "`audio` part is not audio ({})",
            audio.content_type.as_deref().unwrap_or("unknown type")
        )));
    }

    let title = form.title.unwrap_or_else(|| {
        Path::new(&audio.file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "Untitled".to_string())
    });

    let id = compute_track_id(&audio.file_name, &title);
    let config = &state.pipeline.config;

    let mime_type = match audio.content_type.as_deref() {
        Some(ct) if ct.starts_with("audio/") => ct.to_string(),
        _ => MimeGuess::from_path(&audio.file_name)
            .first_raw()
            .unwrap_or(super::stream::FALLBACK_AUDIO_TYPE)
            .to_string(),
    };
    let ext = file_extension(&audio.file_name)
        .or_else(|| {
            mime_guess::get_mime_extensions_str(&mime_type)
                .and_then(|exts| exts.first())
                .map(|e| e.to_string())
        })
        .unwrap_or_else(|| "bin".to_string());

    let stored_path = config
        .uploads_dir()
        .join(format!("{}-{}.{}", slugify(&title), id, ext));
    write_file(&stored_path, &audio.data).await?;

    let mut track = Track::new(
        id.clone(),
        stored_path,
        title,
        mime_type,
        audio.data.len() as u64,
    );
    track.artist = form.artist;

    if let Some(cover) = form.cover.filter(|c| !c.data.is_empty()) {
        match cover.content_type.as_deref() {
            Some(ct) if !ct.starts_with("image/") && ct != "application/octet-stream" => {
                return Err(DaemonError::invalid_upload(format!(
                    "`cover` part is not an image ({})",
                    ct
                )));
            }
            _ => {}
        }
        let ext = file_extension(&cover.file_name).unwrap_or_else(|| "jpg".to_string());
        let cover_path: PathBuf = config.covers_dir().join(format!("{}.{}", id, ext));
        write_file(&cover_path, &cover.data).await?;
        track.cover_path = Some(cover_path);
    }

    state.pipeline.store.insert(track.clone()).await?;
    tracing::info!(
        track_id = %track.id,
        title = %track.title,
        size = track.size,
        path = %track.stored_path.display(),
        "track uploaded"
    );

    match state.jobs.submit_track(&track.id) {
        Ok(job_ids) => tracing::debug!(track_id = %track.id, ?job_ids, "derivations scheduled"),
        Err(e) => tracing::warn!(
            track_id = %track.id,
            error = %e.message,
            "derivations not scheduled; artifacts will be built on demand"
        ),
    }

    Ok((StatusCode::CREATED, Json(track)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs() {
        assert_eq!(slugify("Night Drive (v2)"), "night-drive-v2");
        assert_eq!(slugify("  --  "), "track");
        assert_eq!(slugify("Ünïcode"), "n-code");
        assert!(slugify(&"a".repeat(100)).len() <= 40);
    }

    #[test]
    fn package_types() {
        assert_eq!(package_content_type(Path::new("x/index.m3u8")), PLAYLIST_CONTENT_TYPE);
        assert_eq!(package_content_type(Path::new("x/seg_000.ts")), "video/mp2t");
        assert_eq!(package_content_type(Path::new("x/seg.aac")), "audio/aac");
        assert_eq!(package_content_type(Path::new("x/seg.m4s")), "audio/mp4");
    }

    #[test]
    fn extensions_are_plain() {
        assert_eq!(file_extension("a.MP3"), Some("mp3".to_string()));
        assert_eq!(file_extension("noext"), None);
        assert_eq!(file_extension("a.m p3"), None);
    }

    #[test]
    fn audio_part_detection() {
        let part = |name: &str, ct: Option<&str>| FilePart {
            file_name: name.to_string(),
            content_type: ct.map(str::to_string),
            data: Bytes::from_static(b"x"),
        };
        assert!(is_audio_part(&part("a.bin", Some("audio/mpeg"))));
        assert!(is_audio_part(&part("a.wav", None)));
        assert!(is_audio_part(&part("a.flac", Some("application/octet-stream"))));
        assert!(!is_audio_part(&part("a.txt", None)));
        assert!(!is_audio_part(&part("a.mp3", Some("text/plain"))));
    }
}
