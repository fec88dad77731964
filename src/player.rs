//! Audio output for voice clips.
//!
//! Architecture: each clip's cpal stream runs on a dedicated thread since
//! cpal::Stream is !Send. The handle and the stream callback share a
//! [`PcmTrack`] through atomics, and the thread reports progress back to the
//! session on a fixed tick.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use vmcore::compress::resample;
use vmcore::decode::DecodedAudio;
use vmcore::error::PlaybackError;
use vmcore::playback::{AudioHandle, PlaybackEvents};

#[cfg(feature = "audio-output")]
pub use output::CpalBackend;

/// Interval between time updates sent from the output thread.
pub const TICK: Duration = Duration::from_millis(100);

/// Interleaved PCM at the output device's rate, with a play cursor.
pub struct PcmTrack {
    samples: Vec<f32>,
    channels: usize,
    sample_rate: u32,
    /// Cursor in frames.
    position: AtomicUsize,
    paused: AtomicBool,
    finished: AtomicBool,
}

impl PcmTrack {
    /// Resamples `audio` to `output_rate` and lays it out for a device with
    /// `output_channels` channels. Mono sources are duplicated to every
    /// output channel; extra source channels are dropped.
    pub fn new(audio: &DecodedAudio, output_rate: u32, output_channels: usize) -> Self {
        let channels = output_channels.max(1);
        let audio = resample(audio, output_rate);
        let last_source = audio.num_channels().max(1) - 1;
        let frames = audio.len();

        let mut samples = Vec::with_capacity(frames * channels);
        for frame in 0..frames {
            for c in 0..channels {
                let sample = audio.channel(c.min(last_source)).get(frame);
                samples.push(sample.copied().unwrap_or(0.0));
            }
        }

        Self {
            samples,
            channels,
            sample_rate: output_rate,
            position: AtomicUsize::new(0),
            paused: AtomicBool::new(true),
            finished: AtomicBool::new(false),
        }
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn current_time(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.position.load(Ordering::Relaxed) as f64 / self.sample_rate as f64
    }

    /// Moves the cursor to `time`, clamped into the track.
    pub fn seek(&self, time: f64) {
        let frame = if time.is_finite() && time > 0.0 {
            ((time * self.sample_rate as f64) as usize).min(self.frames())
        } else {
            0
        };
        self.position.store(frame, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    pub fn at_end(&self) -> bool {
        self.position.load(Ordering::Relaxed) >= self.frames()
    }

    /// Returns whether the track ran out since the last call.
    pub fn take_finished(&self) -> bool {
        self.finished.swap(false, Ordering::Relaxed)
    }

    /// Output callback body: copies frames from the cursor into `out`, or
    /// silence while paused. Running out pauses the track and flags it as
    /// finished.
    pub fn fill(&self, out: &mut [f32]) {
        if self.is_paused() {
            out.fill(0.0);
            return;
        }

        let frame = self.position.load(Ordering::Relaxed);
        let start = (frame * self.channels).min(self.samples.len());
        let available = self.samples.len() - start;
        let copied = available.min(out.len()) / self.channels * self.channels;
        out[..copied].copy_from_slice(&self.samples[start..start + copied]);
        out[copied..].fill(0.0);

        // A seek from another thread wins over the advance.
        let _ = self.position.compare_exchange(
            frame,
            frame + copied / self.channels,
            Ordering::Relaxed,
            Ordering::Relaxed,
        );

        if start + copied >= self.samples.len() {
            self.paused.store(true, Ordering::Relaxed);
            self.finished.store(true, Ordering::Relaxed);
        }
    }
}

/// Sends at most one event for the track's current state: `ended` once it
/// ran out, otherwise a time update while it plays.
pub fn pump_events(track: &PcmTrack, events: &PlaybackEvents) {
    if track.take_finished() {
        events.ended();
    } else if !track.is_paused() {
        events.time_update(track.current_time());
    }
}

/// [`AudioHandle`] over a [`PcmTrack`]. Dropping it stops the output thread.
pub struct TrackHandle {
    track: Arc<PcmTrack>,
    events: PlaybackEvents,
    stop_signal: Arc<AtomicBool>,
    _thread: Option<JoinHandle<()>>,
}

impl TrackHandle {
    /// A handle with no output thread; [`pump`](Self::pump) drives its events.
    pub fn detached(track: Arc<PcmTrack>, events: PlaybackEvents) -> Self {
        Self {
            track,
            events,
            stop_signal: Arc::new(AtomicBool::new(false)),
            _thread: None,
        }
    }

    pub fn track(&self) -> &PcmTrack {
        &self.track
    }

    pub fn pump(&self) {
        pump_events(&self.track, &self.events);
    }

    fn is_released(&self) -> bool {
        self.stop_signal.load(Ordering::Relaxed)
    }
}

impl AudioHandle for TrackHandle {
    fn play(&self) -> Result<(), PlaybackError> {
        if self.is_released() {
            return Err(PlaybackError::Detached);
        }
        if self.track.at_end() {
            self.track.seek(0.0);
        }
        self.track.set_paused(false);
        Ok(())
    }

    fn pause(&self) -> Result<(), PlaybackError> {
        if self.is_released() {
            return Err(PlaybackError::Detached);
        }
        self.track.set_paused(true);
        Ok(())
    }

    fn is_paused(&self) -> bool {
        self.track.is_paused()
    }

    fn current_time(&self) -> f64 {
        self.track.current_time()
    }

    fn set_current_time(&self, time: f64) {
        self.track.seek(time);
    }

    fn duration(&self) -> f64 {
        self.track.duration()
    }

    fn clear_source(&self) {
        self.track.set_paused(true);
        self.stop_signal.store(true, Ordering::Relaxed);
    }
}

impl Drop for TrackHandle {
    fn drop(&mut self) {
        self.stop_signal.store(true, Ordering::Relaxed);
    }
}

#[cfg(feature = "audio-output")]
mod output {
    use std::sync::mpsc;

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleRate, StreamConfig};
    use log::{error, info};
    use vmcore::decode::decode_audio;
    use vmcore::playback::{AudioBackend, PlaybackSource};

    use super::*;

    /// Preferred output rate; most devices run at it natively.
    const OUTPUT_SAMPLE_RATE: u32 = 48000;

    type Ready = mpsc::Sender<Result<Arc<PcmTrack>, PlaybackError>>;

    /// Plays cached clips on the default output device.
    #[derive(Debug, Clone, Default)]
    pub struct CpalBackend;

    impl AudioBackend for CpalBackend {
        fn open(
            &self,
            source: &PlaybackSource,
            events: PlaybackEvents,
        ) -> Result<Arc<dyn AudioHandle>, PlaybackError> {
            let PlaybackSource::Local { bytes, mime_type } = source else {
                return Err(PlaybackError::Refused(
                    "remote sources must be cached before playback".to_string(),
                ));
            };
            events.load_start();
            let hint = (!mime_type.is_empty()).then_some(mime_type.as_str());
            let audio =
                decode_audio(bytes, hint).map_err(|e| PlaybackError::Refused(e.to_string()))?;
            let handle = start_output(audio, events.clone())?;
            events.can_play();
            Ok(Arc::new(handle))
        }
    }

    fn start_output(
        audio: DecodedAudio,
        events: PlaybackEvents,
    ) -> Result<TrackHandle, PlaybackError> {
        let (ready_tx, ready_rx) = mpsc::channel();
        let stop_signal = Arc::new(AtomicBool::new(false));

        let thread = {
            let stop_signal = stop_signal.clone();
            let events = events.clone();
            std::thread::spawn(move || {
                if let Err(e) = run_output(&audio, &events, &stop_signal, &ready_tx) {
                    error!("Audio output thread error: {e}");
                    let _ = ready_tx.send(Err(e));
                }
            })
        };

        let track = ready_rx
            .recv()
            .map_err(|_| PlaybackError::Refused("audio output thread exited".to_string()))??;
        Ok(TrackHandle {
            track,
            events,
            stop_signal,
            _thread: Some(thread),
        })
    }

    fn run_output(
        audio: &DecodedAudio,
        events: &PlaybackEvents,
        stop_signal: &AtomicBool,
        ready: &Ready,
    ) -> Result<(), PlaybackError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlaybackError::Refused("no audio output device".to_string()))?;
        info!("Using output device: {}", device.name().unwrap_or_default());

        let supported: Vec<_> = device
            .supported_output_configs()
            .map_err(|e| PlaybackError::Refused(e.to_string()))?
            .collect();
        let config: StreamConfig = supported
            .iter()
            .find(|c| {
                c.min_sample_rate().0 <= OUTPUT_SAMPLE_RATE
                    && c.max_sample_rate().0 >= OUTPUT_SAMPLE_RATE
            })
            .map(|c| c.with_sample_rate(SampleRate(OUTPUT_SAMPLE_RATE)))
            .or_else(|| {
                supported
                    .first()
                    .map(|c| c.with_sample_rate(c.min_sample_rate()))
            })
            .ok_or_else(|| {
                PlaybackError::Refused("no supported output configuration".to_string())
            })?
            .into();
        info!(
            "Output config: {} Hz, {} channels",
            config.sample_rate.0, config.channels
        );

        let track = Arc::new(PcmTrack::new(
            audio,
            config.sample_rate.0,
            config.channels as usize,
        ));
        let callback_track = track.clone();
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| callback_track.fill(data),
                move |err| error!("Audio output error: {err}"),
                None,
            )
            .map_err(|e| PlaybackError::Refused(e.to_string()))?;
        stream
            .play()
            .map_err(|e| PlaybackError::Refused(e.to_string()))?;

        let _ = ready.send(Ok(track.clone()));
        while !stop_signal.load(Ordering::Relaxed) {
            pump_events(&track, events);
            std::thread::sleep(TICK);
        }

        drop(stream);
        info!("Audio output stopped");
        Ok(())
    }
}
