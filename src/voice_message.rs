//! One voice-message bubble: waveform, playback and scrubbing wired together.

use std::sync::Arc;
use std::time::Instant;

use image::RgbaImage;
use log::warn;
use vmcore::attachment::VoiceAttachment;
use vmcore::drag::{DragController, DragHost, PointerEvent};
use vmcore::error::Result;
use vmcore::playback::{
    AudioBackend, PlaybackArbiter, PlaybackController, PlaybackSnapshot, PlaybackSource,
    PlaybackState,
};
use vmcore::render::WaveformRenderer;
use vmcore::waveform::fallback_waveform;

use crate::cache::AttachmentCache;
use crate::config::{ConfigError, VoiceConfig};

pub struct VoiceMessage<H: DragHost> {
    attachment: VoiceAttachment,
    controller: PlaybackController,
    renderer: WaveformRenderer,
    drag: DragController<H>,
}

impl<H: DragHost> VoiceMessage<H> {
    pub fn new(
        attachment: VoiceAttachment,
        arbiter: Arc<PlaybackArbiter>,
        config: &VoiceConfig,
        host: H,
    ) -> Result<Self, ConfigError> {
        let renderer = WaveformRenderer::new(
            attachment.duration_seconds,
            config.waveform.height,
            config.waveform.colors()?,
        );
        Ok(Self {
            controller: PlaybackController::new(arbiter),
            drag: DragController::new(host, config.platform.is_mobile()),
            renderer,
            attachment,
        })
    }

    pub fn attachment(&self) -> &VoiceAttachment {
        &self.attachment
    }

    /// Builds the waveform and opens the audio handle.
    ///
    /// Waveform and cache failures degrade to the synthetic waveform and the
    /// remote URL. Only a failure to open audio is returned.
    pub async fn load(&mut self, cache: &AttachmentCache, backend: &dyn AudioBackend) -> Result<()> {
        let id = self.attachment.id().to_string();
        let url = self.attachment.remote_url.clone();

        match cache.load_audio_bytes(&url).await {
            Ok(bytes) => self.renderer.generate_waveform_data(&bytes, &id),
            Err(e) => {
                warn!("Could not load audio for waveform of {id}: {e}");
                let samples = self.renderer.samples();
                self.renderer.set_waveform_data(fallback_waveform(&id, samples));
            }
        }

        let source = cache.get_audio_url(&url).await.unwrap_or_else(|e| {
            warn!("Falling back to streaming {url}: {e}");
            PlaybackSource::Remote(url.clone())
        });
        self.controller.create_audio_element(
            &source,
            &id,
            self.attachment.duration_seconds,
            backend,
        )
    }

    pub fn toggle_playback(&mut self) -> Result<()> {
        let result = self.controller.toggle_playback();
        self.sync_progress();
        result
    }

    /// Redraws for the current playback position, at most once per frame.
    pub fn tick(&mut self, now: Instant) -> bool {
        let progress = self.controller.snapshot().progress;
        self.renderer.update_progress(progress, now)
    }

    pub fn pointer_down(&mut self, event: PointerEvent) -> bool {
        self.drag.handle_drag_start(event, &self.controller)
    }

    pub fn pointer_move(&mut self, event: PointerEvent, now: Instant) {
        let preview = self.drag.handle_drag_move(event, now, &mut self.controller);
        self.renderer.set_dragging(self.drag.is_dragging());
        if let Some(time) = preview {
            self.renderer.set_preview_time(time);
            self.renderer.draw_waveform_immediate();
        }
    }

    pub fn pointer_up(&mut self) -> Result<()> {
        let result = self.drag.handle_drag_end(&mut self.controller);
        self.renderer.set_dragging(false);
        self.sync_progress();
        result
    }

    fn sync_progress(&mut self) {
        self.renderer.set_progress(self.controller.snapshot().progress);
        self.renderer.draw_waveform_immediate();
    }

    /// Time shown next to the bubble: the scrub preview while dragging, the
    /// position once playback has started, otherwise the clip length.
    pub fn display_time(&self) -> f64 {
        if self.drag.show_time_preview() {
            return self.drag.preview_time();
        }
        let snapshot = self.controller.snapshot();
        match snapshot.state {
            PlaybackState::Playing | PlaybackState::Paused if snapshot.has_been_played => {
                snapshot.current_time
            }
            _ => self.attachment.duration_seconds,
        }
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.controller.snapshot()
    }

    pub fn frame(&self) -> &RgbaImage {
        self.renderer.frame()
    }

    pub fn waveform(&self) -> &[f32] {
        self.renderer.waveform_data()
    }

    pub fn scan_line_position(&self) -> f64 {
        self.renderer.scan_line_position()
    }

    pub fn drag(&self) -> &DragController<H> {
        &self.drag
    }

    pub fn cleanup(&mut self) {
        self.drag.cleanup();
        self.controller.cleanup();
    }
}
