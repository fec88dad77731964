//! Waveform intensity extraction for voice-message bubbles.

use log::warn;

use crate::decode::decode_audio;

const BASE_WIDTH: f64 = 10.0;
const MAX_WIDTH: f64 = 100.0;
const PIXELS_PER_SECOND: f64 = 4.0;
/// One bar every two pixels.
const PIXELS_PER_BAR: u32 = 2;

/// Fallback bars cycle through low, mid, high, mid.
const FALLBACK_PATTERN: [f32; 4] = [0.35, 0.65, 0.95, 0.65];
const FALLBACK_JITTER: f32 = 0.3;

/// Pixel width of the waveform for a clip of `duration` seconds, between
/// 10 and 100 px.
pub fn waveform_width(duration: f64) -> u32 {
    let duration = if duration.is_finite() { duration } else { 0.0 };
    (BASE_WIDTH + duration * PIXELS_PER_SECOND).clamp(BASE_WIDTH, MAX_WIDTH) as u32
}

/// Number of bars drawn for a clip of `duration` seconds.
pub fn waveform_samples(duration: f64) -> usize {
    (waveform_width(duration) / PIXELS_PER_BAR) as usize
}

/// Decodes `bytes` and summarises channel 0 into one intensity per bar.
///
/// Undecodable input never fails: it yields [`fallback_waveform`] seeded by
/// `seed_id` so the bubble still renders.
pub fn generate_waveform_data(bytes: &[u8], duration: f64, seed_id: &str) -> Vec<f32> {
    let buckets = waveform_samples(duration);
    match decode_audio(bytes, None) {
        Ok(audio) => bucket_intensities(audio.channel(0), buckets),
        Err(e) => {
            warn!("Falling back to synthetic waveform for {seed_id}: {e}");
            fallback_waveform(seed_id, buckets)
        }
    }
}

/// Splits `samples` into `buckets` contiguous ranges and scores each as
/// `min(1, (rms + peak) / 2)`. Empty ranges score 0.
pub fn bucket_intensities(samples: &[f32], buckets: usize) -> Vec<f32> {
    let len = samples.len();
    (0..buckets)
        .map(|i| {
            let start = i * len / buckets;
            let end = (i + 1) * len / buckets;
            let bucket = &samples[start..end];
            if bucket.is_empty() {
                return 0.0;
            }
            let (sum_squares, peak) = bucket.iter().fold((0.0f32, 0.0f32), |(sum, peak), s| {
                (sum + s * s, peak.max(s.abs()))
            });
            let rms = (sum_squares / bucket.len() as f32).sqrt();
            ((rms + peak) / 2.0).min(1.0)
        })
        .collect()
}

/// Deterministic stand-in waveform with values in `[0.2, 1.0]`.
///
/// The same id always produces the same bars; different ids differ.
pub fn fallback_waveform(seed_id: &str, buckets: usize) -> Vec<f32> {
    let digest: [u8; 16] = md5::compute(seed_id.as_bytes()).into();
    (0..buckets)
        .map(|i| {
            let jitter = (digest[i % digest.len()] as f32 / 255.0 - 0.5) * FALLBACK_JITTER;
            (FALLBACK_PATTERN[i % FALLBACK_PATTERN.len()] + jitter).clamp(0.2, 1.0)
        })
        .collect()
}
