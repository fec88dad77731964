pub mod cache;
pub mod compress;
pub mod config;
pub mod player;
pub mod voice_message;

#[cfg(test)]
pub mod test_utils;

pub use cache::{AttachmentCache, AudioFileStatus, LocalAudioFile};
pub use config::{CacheLayout, Platform, VoiceConfig};
pub use voice_message::VoiceMessage;
