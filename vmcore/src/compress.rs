//! Client-side compression of recorded voice clips to MP3.
//!
//! Pipeline: decode -> linear resample -> mono mixdown -> amplified i16
//! quantization -> 1152-sample block encoding.

use log::{debug, info};
use mp3lame_encoder::{Bitrate, DualPcm, FlushNoGap, MonoPcm};
use serde::{Deserialize, Serialize};

use crate::decode::{DecodedAudio, decode_audio};
use crate::error::{Result, VoiceError};

/// Samples per channel handed to the encoder at a time (one MPEG-1 frame).
pub const SAMPLE_BLOCK_SIZE: usize = 1152;

/// Loudness boost applied before clamping. Recorded voice tends to sit far
/// below full scale.
pub const AMPLIFY: f32 = 10.0;

/// Worst-case size of the data produced by a final flush.
const FLUSH_BUFFER_SIZE: usize = 7200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompressionConfig {
    /// 1 for mono, 2 for stereo.
    pub channels: u16,
    /// Target sample rate in Hz.
    pub sample_rate: u32,
    /// Target bit rate in kbps.
    pub bit_rate: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            channels: 1,
            sample_rate: 22050,
            bit_rate: 64,
        }
    }
}

impl CompressionConfig {
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.channels, 1 | 2) {
            return Err(VoiceError::Encode(format!(
                "unsupported channel count {}",
                self.channels
            )));
        }
        if self.sample_rate == 0 {
            return Err(VoiceError::Encode("sample rate must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// A block-based perceptual encoder fed with i16 PCM.
pub trait FrameEncoder {
    fn encode_mono(&mut self, block: &[i16]) -> Result<Vec<u8>>;
    fn encode_stereo(&mut self, left: &[i16], right: &[i16]) -> Result<Vec<u8>>;
    /// Drains any buffered frames. Called once after the last block.
    fn flush(&mut self) -> Result<Vec<u8>>;
}

/// LAME-backed MP3 encoder.
pub struct LameFrameEncoder {
    inner: mp3lame_encoder::Encoder,
}

impl LameFrameEncoder {
    pub fn new(config: &CompressionConfig) -> Result<Self> {
        config.validate()?;
        let mut builder = mp3lame_encoder::Builder::new()
            .ok_or_else(|| VoiceError::Encode("failed to allocate LAME encoder".to_string()))?;
        builder
            .set_num_channels(config.channels as u8)
            .map_err(|e| VoiceError::Encode(format!("channels: {e:?}")))?;
        builder
            .set_sample_rate(config.sample_rate)
            .map_err(|e| VoiceError::Encode(format!("sample rate: {e:?}")))?;
        builder
            .set_brate(bitrate_for_kbps(config.bit_rate)?)
            .map_err(|e| VoiceError::Encode(format!("bit rate: {e:?}")))?;
        let inner = builder
            .build()
            .map_err(|e| VoiceError::Encode(format!("init: {e:?}")))?;
        Ok(Self { inner })
    }
}

impl FrameEncoder for LameFrameEncoder {
    fn encode_mono(&mut self, block: &[i16]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(mp3lame_encoder::max_required_buffer_size(block.len()));
        self.inner
            .encode_to_vec(MonoPcm(block), &mut out)
            .map_err(|e| VoiceError::Encode(format!("{e:?}")))?;
        Ok(out)
    }

    fn encode_stereo(&mut self, left: &[i16], right: &[i16]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(mp3lame_encoder::max_required_buffer_size(left.len()));
        self.inner
            .encode_to_vec(DualPcm { left, right }, &mut out)
            .map_err(|e| VoiceError::Encode(format!("{e:?}")))?;
        Ok(out)
    }

    fn flush(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(FLUSH_BUFFER_SIZE);
        self.inner
            .flush_to_vec::<FlushNoGap>(&mut out)
            .map_err(|e| VoiceError::Encode(format!("flush: {e:?}")))?;
        Ok(out)
    }
}

fn bitrate_for_kbps(kbps: u32) -> Result<Bitrate> {
    Ok(match kbps {
        8 => Bitrate::Kbps8,
        16 => Bitrate::Kbps16,
        24 => Bitrate::Kbps24,
        32 => Bitrate::Kbps32,
        40 => Bitrate::Kbps40,
        48 => Bitrate::Kbps48,
        64 => Bitrate::Kbps64,
        80 => Bitrate::Kbps80,
        96 => Bitrate::Kbps96,
        112 => Bitrate::Kbps112,
        128 => Bitrate::Kbps128,
        160 => Bitrate::Kbps160,
        192 => Bitrate::Kbps192,
        224 => Bitrate::Kbps224,
        256 => Bitrate::Kbps256,
        320 => Bitrate::Kbps320,
        other => {
            return Err(VoiceError::Encode(format!(
                "unsupported bit rate {other} kbps"
            )));
        }
    })
}

/// Compresses arbitrary decodable audio into MP3 bytes.
pub fn compress_to_mp3(input: &[u8], config: &CompressionConfig) -> Result<Vec<u8>> {
    let mut encoder = LameFrameEncoder::new(config)?;
    compress_with_encoder(input, config, &mut encoder)
}

/// Runs the pipeline with a caller-supplied encoder.
pub fn compress_with_encoder(
    input: &[u8],
    config: &CompressionConfig,
    encoder: &mut dyn FrameEncoder,
) -> Result<Vec<u8>> {
    config.validate()?;
    let decoded = decode_audio(input, None)?;
    let resampled = resample(&decoded, config.sample_rate);
    let samples = convert_to_int16(&resampled, config.channels);
    let output = encode_blocks(&samples, config.channels, encoder)?;

    info!(
        "Compressed {} bytes to {} bytes ({}%)",
        input.len(),
        output.len(),
        calculate_compression_ratio(input.len() as u64, output.len() as u64)
    );
    Ok(output)
}

/// Resamples every channel to `target_rate`. Returns a copy when the rate
/// already matches.
pub fn resample(audio: &DecodedAudio, target_rate: u32) -> DecodedAudio {
    if audio.sample_rate == target_rate || audio.sample_rate == 0 {
        return audio.clone();
    }
    let output_len =
        (audio.len() as u64 * target_rate as u64 / audio.sample_rate as u64) as usize;
    let channels = audio
        .channels
        .iter()
        .map(|channel| resample_linear(channel, output_len))
        .collect();
    DecodedAudio::new(channels, target_rate)
}

/// Linear interpolation of `input` onto `output_len` points.
pub fn resample_linear(input: &[f32], output_len: usize) -> Vec<f32> {
    if input.is_empty() || output_len == 0 {
        return Vec::new();
    }
    let ratio = input.len() as f64 / output_len as f64;
    let last = input.len() - 1;

    (0..output_len)
        .map(|i| {
            let index = i as f64 * ratio;
            let floor = (index.floor() as usize).min(last);
            let ceil = (floor + 1).min(last);
            let fraction = (index - floor as f64) as f32;
            input[floor] * (1.0 - fraction) + input[ceil] * fraction
        })
        .collect()
}

/// Averages all channels per sample index.
pub fn mix_to_mono(audio: &DecodedAudio) -> Vec<f32> {
    let count = audio.num_channels();
    if count == 0 {
        return Vec::new();
    }
    (0..audio.len())
        .map(|i| audio.channels.iter().map(|c| c[i]).sum::<f32>() / count as f32)
        .collect()
}

/// Applies the loudness boost and scales into the i16 range.
pub fn quantize_sample(sample: f32) -> i16 {
    ((sample * AMPLIFY).clamp(-1.0, 1.0) * 0x7fff as f32) as i16
}

/// Quantizes to interleaved i16 with `target_channels` channels.
pub fn convert_to_int16(audio: &DecodedAudio, target_channels: u16) -> Vec<i16> {
    if target_channels == 1 {
        let mono = if audio.num_channels() > 1 {
            mix_to_mono(audio)
        } else {
            audio.channel(0).to_vec()
        };
        return mono.into_iter().map(quantize_sample).collect();
    }

    let left = audio.channel(0);
    let right = if audio.num_channels() > 1 {
        audio.channel(1)
    } else {
        left
    };
    left.iter()
        .zip(right)
        .flat_map(|(l, r)| [quantize_sample(*l), quantize_sample(*r)])
        .collect()
}

/// Feeds interleaved samples to the encoder in blocks of
/// [`SAMPLE_BLOCK_SIZE`] per channel and concatenates every emitted chunk
/// followed by the flush chunk.
pub fn encode_blocks(
    samples: &[i16],
    channels: u16,
    encoder: &mut dyn FrameEncoder,
) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    let mut blocks = 0usize;

    if channels == 1 {
        for block in samples.chunks(SAMPLE_BLOCK_SIZE) {
            output.extend(encoder.encode_mono(block)?);
            blocks += 1;
        }
    } else {
        let mut left = Vec::with_capacity(SAMPLE_BLOCK_SIZE);
        let mut right = Vec::with_capacity(SAMPLE_BLOCK_SIZE);
        for block in samples.chunks(SAMPLE_BLOCK_SIZE * 2) {
            left.clear();
            right.clear();
            for pair in block.chunks_exact(2) {
                left.push(pair[0]);
                right.push(pair[1]);
            }
            output.extend(encoder.encode_stereo(&left, &right)?);
            blocks += 1;
        }
    }

    output.extend(encoder.flush()?);
    debug!("Encoded {blocks} block(s) into {} bytes", output.len());
    Ok(output)
}

/// Basic facts about an audio file, obtained without re-encoding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioInfo {
    pub duration: f64,
    pub sample_rate: u32,
    pub channels: usize,
    pub size: usize,
}

pub fn get_audio_info(bytes: &[u8]) -> Result<AudioInfo> {
    let decoded = decode_audio(bytes, None)?;
    Ok(AudioInfo {
        duration: decoded.duration(),
        sample_rate: decoded.sample_rate,
        channels: decoded.num_channels(),
        size: bytes.len(),
    })
}

/// Percentage of the original size saved by compression, rounded.
pub fn calculate_compression_ratio(original_size: u64, compressed_size: u64) -> i64 {
    if original_size == 0 {
        return 0;
    }
    ((1.0 - compressed_size as f64 / original_size as f64) * 100.0).round() as i64
}
