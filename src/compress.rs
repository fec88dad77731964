//! Async entry points for the compression pipeline.
//!
//! Decoding and encoding are CPU-bound, so they run on the blocking pool.

use bytes::Bytes;
use vmcore::compress::{self, AudioInfo, CompressionConfig};
use vmcore::error::{Result, VoiceError};

/// Compresses a recorded clip to MP3 before upload.
pub async fn compress_audio_to_mp3(input: Bytes, config: CompressionConfig) -> Result<Bytes> {
    tokio::task::spawn_blocking(move || compress::compress_to_mp3(&input, &config))
        .await
        .map_err(|e| VoiceError::Encode(format!("compression task failed: {e}")))?
        .map(Bytes::from)
}

pub async fn get_audio_info(input: Bytes) -> Result<AudioInfo> {
    tokio::task::spawn_blocking(move || compress::get_audio_info(&input))
        .await
        .map_err(|e| VoiceError::Decode(format!("probe task failed: {e}")))?
}

pub use vmcore::compress::calculate_compression_ratio;
