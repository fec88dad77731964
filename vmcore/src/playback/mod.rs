pub mod arbiter;
pub mod controller;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

use std::sync::Arc;

use bytes::Bytes;

use crate::error::PlaybackError;

pub use arbiter::{ListenerId, PlaybackArbiter};
pub use controller::{PlaybackController, PlaybackEvents, PlaybackSnapshot, PlaybackState};

/// A platform audio output for one clip. Methods take `&self`, so
/// implementations synchronize internally.
///
/// `play`, `pause` and `set_current_time` may fire [`PlaybackEvents`]
/// synchronously. The query methods (`is_paused`, `current_time`,
/// `duration`) must not.
pub trait AudioHandle: Send + Sync {
    fn play(&self) -> Result<(), PlaybackError>;
    fn pause(&self) -> Result<(), PlaybackError>;
    fn is_paused(&self) -> bool;
    fn current_time(&self) -> f64;
    fn set_current_time(&self, time: f64);
    /// Media duration in seconds; may be NaN or infinite until known.
    fn duration(&self) -> f64;
    /// Releases the underlying media resource.
    fn clear_source(&self);
}

/// Creates audio handles for playback sources.
pub trait AudioBackend: Send + Sync {
    fn open(
        &self,
        source: &PlaybackSource,
        events: PlaybackEvents,
    ) -> Result<Arc<dyn AudioHandle>, PlaybackError>;
}

/// What a handle should play: the remote URL itself, or cached bytes held
/// in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackSource {
    Remote(String),
    Local { bytes: Bytes, mime_type: String },
}

impl PlaybackSource {
    pub fn is_local(&self) -> bool {
        matches!(self, PlaybackSource::Local { .. })
    }
}
