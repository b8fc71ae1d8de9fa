//! HTTP surface of the daemon.
//!
//! Routes:
//! - `POST /api/tracks`: multipart upload (`audio`, optional `cover`, `title`, `artist`)
//! - `GET /api/tracks/{id}`: track record
//! - `GET /api/tracks/{id}/stream`: source bytes with range support
//! - `GET /api/tracks/{id}/waveform`: peak document, built on demand
//! - `GET /api/tracks/{id}/hls/master.m3u8`: master manifest, built on demand
//! - `GET /api/tracks/{id}/hls/{rendition}/{file}`: published package files

pub mod handlers;
pub mod server;
pub mod stream;


pub use server::{router, run_server, AppState};
