//! HTTP server: shared state, routes and error mapping.

use std::future::Future;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::error::{DaemonError, ErrorCode, Result};
use crate::jobs::JobQueue;
use crate::pipeline::Pipeline;

use super::{handlers, stream};

/// State shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Store, resolver and derivers.
    pub pipeline: Pipeline,
    /// Where uploads schedule their derivations.
    pub jobs: JobQueue,
}

impl AppState {
    /// Creates new server state.
    pub fn new(pipeline: Pipeline, jobs: JobQueue) -> Self {
        Self { pipeline, jobs }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: &'a str,
}

impl IntoResponse for DaemonError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if self.code == ErrorCode::NotFound {
            tracing::debug!(error = %self.message, "not found");
            return status.into_response();
        }
        if let Some(size) = self.range_size {
            tracing::debug!(error = %self.message, "range rejected");
            let content_range = format!("bytes */{}", size);
            return (status, [(header::CONTENT_RANGE, content_range)]).into_response();
        }
        if status.is_server_error() {
            tracing::error!(code = %self.code, error = %self.message, "request failed");
        } else {
            tracing::info!(code = %self.code, error = %self.message, "request rejected");
        }

        let body = ErrorBody {
            code: self.code.as_str(),
            message: &self.message,
        };
        (status, Json(body)).into_response()
    }
}

/// Builds the router for `state`.
pub fn router(state: AppState) -> Router {
    let body_limit = state.pipeline.config.max_upload_bytes;
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/api/tracks", post(handlers::upload_track))
        .route("/api/tracks/{id}", get(handlers::get_track))
        .route("/api/tracks/{id}/waveform", get(handlers::get_waveform))
        .route("/api/tracks/{id}/stream", get(stream::stream_track))
        .route("/api/tracks/{id}/hls/master.m3u8", get(handlers::get_master))
        .route(
            "/api/tracks/{id}/hls/{rendition}/{file}",
            get(handlers::get_rendition_file),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves `state` on the configured bind address until `shutdown` resolves.
pub async fn run_server<F>(state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = state.pipeline.config.bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| DaemonError::io(format!("Failed to bind {}", addr), e))?;

    match listener.local_addr() {
        Ok(local) => tracing::info!(addr = %local, "HTTP server listening"),
        Err(_) => tracing::info!(addr = %addr, "HTTP server listening"),
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| DaemonError::io("HTTP server failed", e))?;

    tracing::info!("HTTP server stopped");
    Ok(())
}
