//! Record storage.
//!
//! Provides the track record store and the play history log.

pub mod history;
pub mod tracks;

pub use history::{PlayHistory, PlayRecord};
pub use tracks::TrackStore;
