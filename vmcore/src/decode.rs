//! Audio decoding into planar f32 PCM.

use std::io::{Cursor, ErrorKind};

use log::{debug, warn};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{Result, VoiceError};

/// Decoded PCM, one vector of samples per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
        }
    }

    /// Number of frames (samples per channel).
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        self.channels.get(index).map_or(&[], Vec::as_slice)
    }

    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.len() as f64 / self.sample_rate as f64
    }
}

/// Decodes an in-memory audio file. `mime_type` is only a probing hint.
pub fn decode_audio(bytes: &[u8], mime_type: Option<&str>) -> Result<DecodedAudio> {
    if bytes.is_empty() {
        return Err(VoiceError::Decode("empty input".to_string()));
    }

    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());
    let mut hint = Hint::new();
    if let Some(mime) = mime_type {
        hint.mime_type(mime);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| VoiceError::Decode(format!("unrecognised container: {e}")))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| VoiceError::Decode("no audio track".to_string()))?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| VoiceError::Decode(format!("unsupported codec: {e}")))?;

    let mut channels: Vec<Vec<f32>> = Vec::new();
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(VoiceError::Decode(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("Skipping undecodable packet: {e}");
                continue;
            }
            Err(SymphoniaError::IoError(ref e)) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(VoiceError::Decode(e.to_string())),
        };

        let spec = *decoded.spec();
        let channel_count = spec.channels.count();
        if channel_count == 0 {
            continue;
        }
        if channels.is_empty() {
            channels = vec![Vec::new(); channel_count];
            sample_rate = spec.rate;
        }

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        for frame in sample_buf.samples().chunks(channel_count) {
            for (channel, sample) in channels.iter_mut().zip(frame) {
                channel.push(*sample);
            }
        }
    }

    let audio = DecodedAudio::new(channels, sample_rate);
    if audio.is_empty() || audio.sample_rate == 0 {
        return Err(VoiceError::Decode("no audio frames decoded".to_string()));
    }

    debug!(
        "Decoded {} frames, {} channel(s) at {} Hz",
        audio.len(),
        audio.num_channels(),
        audio.sample_rate
    );
    Ok(audio)
}

/// Answer to a "can this be played" probe, mirroring the three-level answer
/// media elements give.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanPlay {
    No,
    Maybe,
    Probably,
}

/// Probes whether the playback platform handles a mime type.
pub trait CodecSupport: Send + Sync {
    fn can_play_type(&self, mime_type: &str) -> CanPlay;

    fn supports(&self, mime_type: &str) -> bool {
        self.can_play_type(mime_type) != CanPlay::No
    }
}

/// Codec support of the bundled decoder.
#[derive(Debug, Clone, Default)]
pub struct DecoderCodecSupport;

impl CodecSupport for DecoderCodecSupport {
    fn can_play_type(&self, mime_type: &str) -> CanPlay {
        let mut parts = mime_type.split(';');
        let essence = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
        let codecs = parts
            .find_map(|p| p.trim().strip_prefix("codecs="))
            .map(|c| c.trim_matches('"').to_ascii_lowercase());

        match (essence.as_str(), codecs.as_deref()) {
            ("audio/ogg", Some("opus")) | ("audio/webm", _) | ("audio/amr", _) => CanPlay::No,
            ("audio/ogg", _) => CanPlay::Maybe,
            (
                "audio/mpeg" | "audio/mp3" | "audio/wav" | "audio/wave" | "audio/x-wav"
                | "audio/flac" | "audio/aac" | "audio/mp4" | "audio/x-m4a",
                _,
            ) => CanPlay::Probably,
            _ => CanPlay::No,
        }
    }
}
