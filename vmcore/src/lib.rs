//! Runtime-agnostic core of the voice-message subsystem.

pub mod attachment;
pub mod clamp;
pub mod compress;
pub mod decode;
pub mod drag;
pub mod error;
pub mod net;
pub mod playback;
pub mod render;
pub mod throttle;
pub mod waveform;

pub use attachment::{FileMeta, FileMetaService, UrlFileMetaService, VoiceAttachment};
pub use compress::{AudioInfo, CompressionConfig};
pub use decode::{CanPlay, CodecSupport, DecodedAudio, DecoderCodecSupport};
pub use error::{PlaybackError, Result, VoiceError};
pub use playback::{
    AudioBackend, AudioHandle, PlaybackArbiter, PlaybackController, PlaybackSource, PlaybackState,
};
