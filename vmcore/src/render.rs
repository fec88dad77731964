//! Waveform rasterization with a cached static layer.
//!
//! The unplayed bars are drawn once into an off-screen buffer keyed by
//! [`CacheKey`]. Each redraw copies that buffer and overlays the played bars
//! up to the current progress position.

use std::time::Instant;

use image::{Rgba, RgbaImage};

use crate::throttle::MinIntervalGate;
use crate::waveform::{generate_waveform_data, waveform_samples, waveform_width};

/// Share of the canvas height the tallest bar may occupy.
const BAR_HEIGHT_RATIO: f32 = 0.8;
const MIN_BAR_HEIGHT: f32 = 2.0;

/// Parses `#rrggbb` or `#rrggbbaa`.
pub fn parse_hex_color(value: &str) -> Option<Rgba<u8>> {
    let hex = value.trim().strip_prefix('#')?;
    let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
    match hex.len() {
        6 => Some(Rgba([channel(0)?, channel(2)?, channel(4)?, 0xff])),
        8 => Some(Rgba([channel(0)?, channel(2)?, channel(4)?, channel(6)?])),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveformColors {
    pub played: Rgba<u8>,
    pub unplayed: Rgba<u8>,
}

impl Default for WaveformColors {
    fn default() -> Self {
        Self {
            played: Rgba([0x13, 0x98, 0x7f, 0xff]),
            unplayed: Rgba([0x9c, 0xa3, 0xaf, 0xff]),
        }
    }
}

/// Everything the static layer depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheKey {
    pub played: Rgba<u8>,
    pub unplayed: Rgba<u8>,
    pub dragging: bool,
    pub width: u32,
    pub height: u32,
    pub sample_count: usize,
}

impl CacheKey {
    pub fn for_config(
        colors: &WaveformColors,
        dragging: bool,
        width: u32,
        height: u32,
        sample_count: usize,
    ) -> Self {
        Self {
            played: colors.played,
            unplayed: colors.unplayed,
            dragging,
            width,
            height,
            sample_count,
        }
    }
}

#[derive(Debug, Default)]
pub struct RasterCache {
    key: Option<CacheKey>,
    pixels: Option<RgbaImage>,
}

impl RasterCache {
    pub fn is_valid_for(&self, key: &CacheKey) -> bool {
        self.pixels.is_some() && self.key.as_ref() == Some(key)
    }

    pub fn store(&mut self, key: CacheKey, pixels: RgbaImage) {
        self.key = Some(key);
        self.pixels = Some(pixels);
    }

    pub fn invalidate(&mut self) {
        self.pixels = None;
    }

    pub fn pixels(&self) -> Option<&RgbaImage> {
        self.pixels.as_ref()
    }
}

/// Renders one clip's waveform into an RGBA frame.
#[derive(Debug)]
pub struct WaveformRenderer {
    data: Vec<f32>,
    duration: f64,
    height: u32,
    colors: WaveformColors,
    is_dragging: bool,
    preview_time: f64,
    playback_progress: f64,
    cache: RasterCache,
    cache_rebuilds: usize,
    frame: RgbaImage,
    gate: MinIntervalGate,
}

impl WaveformRenderer {
    pub fn new(duration: f64, height: u32, colors: WaveformColors) -> Self {
        Self {
            data: Vec::new(),
            duration,
            height,
            colors,
            is_dragging: false,
            preview_time: 0.0,
            playback_progress: 0.0,
            cache: RasterCache::default(),
            cache_rebuilds: 0,
            frame: RgbaImage::new(waveform_width(duration), height),
            gate: MinIntervalGate::default(),
        }
    }

    pub fn width(&self) -> u32 {
        waveform_width(self.duration)
    }

    /// Bar count for the current duration.
    pub fn samples(&self) -> usize {
        waveform_samples(self.duration)
    }

    pub fn waveform_data(&self) -> &[f32] {
        &self.data
    }

    pub fn frame(&self) -> &RgbaImage {
        &self.frame
    }

    /// How many times the static layer has been rasterized.
    pub fn cache_rebuilds(&self) -> usize {
        self.cache_rebuilds
    }

    pub fn is_dragging(&self) -> bool {
        self.is_dragging
    }

    /// Decodes `bytes` into bar intensities and redraws.
    pub fn generate_waveform_data(&mut self, bytes: &[u8], seed_id: &str) {
        let data = generate_waveform_data(bytes, self.duration, seed_id);
        self.set_waveform_data(data);
    }

    pub fn set_waveform_data(&mut self, data: Vec<f32>) {
        self.data = data;
        self.cache.invalidate();
        self.draw_waveform();
    }

    pub fn update_colors(&mut self, colors: WaveformColors) {
        self.colors = colors;
        self.cache.invalidate();
        self.draw_waveform();
    }

    pub fn set_dimensions(&mut self, duration: f64, height: u32) {
        self.duration = duration;
        self.height = height;
        self.cache.invalidate();
        self.draw_waveform();
    }

    pub fn set_dragging(&mut self, dragging: bool) {
        if self.is_dragging != dragging {
            self.is_dragging = dragging;
            self.cache.invalidate();
            self.draw_waveform();
        }
    }

    pub fn set_preview_time(&mut self, time: f64) {
        self.preview_time = time;
    }

    /// Records playback progress (0..=100) without redrawing.
    pub fn set_progress(&mut self, percent: f64) {
        self.playback_progress = percent;
    }

    /// Records playback progress (0..=100) and redraws through the throttle.
    pub fn update_progress(&mut self, percent: f64, now: Instant) -> bool {
        self.playback_progress = percent;
        self.draw_waveform_throttled(now)
    }

    /// Fraction of the clip shown as played, in `[0, 1]`.
    fn progress_fraction(&self) -> f64 {
        let fraction = if self.is_dragging {
            let duration = if self.duration > 0.0 { self.duration } else { 1.0 };
            self.preview_time / duration
        } else {
            self.playback_progress / 100.0
        };
        if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Pixel x of the progress line.
    pub fn scan_line_position(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.progress_fraction() * self.width() as f64
    }

    /// Redraws unless a redraw happened within the frame budget or a drag is
    /// in progress. Returns whether a redraw happened.
    pub fn draw_waveform_throttled(&mut self, now: Instant) -> bool {
        if self.is_dragging || !self.gate.try_pass(now) {
            return false;
        }
        self.draw_waveform().is_some()
    }

    /// Redraws right away, for drag previews.
    pub fn draw_waveform_immediate(&mut self) -> Option<&RgbaImage> {
        self.draw_waveform()
    }

    pub fn draw_waveform(&mut self) -> Option<&RgbaImage> {
        if self.data.is_empty() {
            return None;
        }

        let width = self.width();
        let height = self.height;
        let key = CacheKey::for_config(
            &self.colors,
            self.is_dragging,
            width,
            height,
            self.data.len(),
        );

        if !self.cache.is_valid_for(&key) {
            let mut layer = RgbaImage::new(width, height);
            let bar_width = width as f32 / self.data.len() as f32;
            for (index, intensity) in self.data.iter().enumerate() {
                let x = index as f32 * bar_width;
                fill_bar(
                    &mut layer,
                    x,
                    (bar_width - 1.0).max(1.0),
                    *intensity,
                    self.colors.unplayed,
                );
            }
            self.cache.store(key, layer);
            self.cache_rebuilds += 1;
        }

        let cached = self.cache.pixels()?;
        self.frame = cached.clone();

        let progress_x = (self.progress_fraction() * width as f64) as f32;
        if progress_x > 0.0 {
            let bar_width = width as f32 / self.data.len() as f32;
            let end = ((progress_x / bar_width).ceil() as usize).min(self.data.len());
            for index in 0..end {
                let intensity = self.data[index];
                let x = index as f32 * bar_width;
                let drawn = (bar_width - 1.0).max(1.0);
                if x + drawn <= progress_x {
                    fill_bar(&mut self.frame, x, drawn, intensity, self.colors.played);
                } else if x < progress_x {
                    fill_bar(
                        &mut self.frame,
                        x,
                        progress_x - x,
                        intensity,
                        self.colors.played,
                    );
                }
            }
        }

        Some(&self.frame)
    }
}

/// Fills one vertically centred bar. Partially covered columns are blended
/// by their horizontal coverage.
fn fill_bar(image: &mut RgbaImage, x: f32, width: f32, intensity: f32, color: Rgba<u8>) {
    let canvas_height = image.height() as f32;
    let bar_height = (intensity * canvas_height * BAR_HEIGHT_RATIO).max(MIN_BAR_HEIGHT);
    let top = ((canvas_height - bar_height) / 2.0).round().max(0.0) as u32;
    let bottom = (((canvas_height + bar_height) / 2.0).round() as u32).min(image.height());

    let right = x + width;
    let first_col = x.floor().max(0.0) as u32;
    let last_col = (right.ceil() as u32).min(image.width());
    for col in first_col..last_col {
        let coverage = (right.min(col as f32 + 1.0) - x.max(col as f32)).clamp(0.0, 1.0);
        if coverage <= 0.0 {
            continue;
        }
        for row in top..bottom {
            blend_over(image.get_pixel_mut(col, row), color, coverage);
        }
    }
}

/// Source-over compositing of `src` scaled by `coverage`.
fn blend_over(dst: &mut Rgba<u8>, src: Rgba<u8>, coverage: f32) {
    let sa = src[3] as f32 / 255.0 * coverage;
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        *dst = Rgba([0, 0, 0, 0]);
        return;
    }
    let mix = |s: u8, d: u8| {
        ((s as f32 * sa + d as f32 * da * (1.0 - sa)) / out_a)
            .round()
            .clamp(0.0, 255.0) as u8
    };
    *dst = Rgba([
        mix(src[0], dst[0]),
        mix(src[1], dst[1]),
        mix(src[2], dst[2]),
        (out_a * 255.0).round() as u8,
    ]);
}
