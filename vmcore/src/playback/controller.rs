//! Play/pause/seek lifecycle of one rendered voice clip.

use std::sync::{Arc, Weak};

use log::{debug, warn};
use parking_lot::Mutex;

use super::arbiter::{ListenerId, PlaybackArbiter};
use super::{AudioBackend, AudioHandle, PlaybackSource};
use crate::clamp::{clamp_time, progress_percent};
use crate::drag::ScrubTarget;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
    Ended,
    Error,
}

#[derive(Default)]
struct SessionInner {
    audio_id: String,
    declared_duration: f64,
    state: PlaybackState,
    current_time: f64,
    progress: f64,
    last_position: f64,
    should_resume: bool,
    has_been_played: bool,
    handle: Option<Arc<dyn AudioHandle>>,
}

impl SessionInner {
    /// Upper bound for seeks: the media's own duration once known, otherwise
    /// the duration recorded with the attachment.
    fn max_time(&self) -> f64 {
        match self.handle.as_ref().map(|h| h.duration()) {
            Some(d) if d.is_finite() && d > 0.0 => d,
            _ => self.declared_duration,
        }
    }
}

/// Point-in-time view of a session, for rendering.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlaybackSnapshot {
    pub state: PlaybackState,
    pub current_time: f64,
    pub progress: f64,
    pub last_position: f64,
    pub should_resume: bool,
    pub has_been_played: bool,
    pub duration: f64,
}

/// Event sink handed to an [`AudioBackend`]. Events arriving after the
/// session is gone are dropped.
#[derive(Clone)]
pub struct PlaybackEvents {
    inner: Weak<Mutex<SessionInner>>,
}

impl PlaybackEvents {
    fn with_session<F: FnOnce(&mut SessionInner)>(&self, f: F) {
        if let Some(inner) = self.inner.upgrade() {
            f(&mut inner.lock());
        }
    }

    pub fn load_start(&self) {
        self.with_session(|s| s.state = PlaybackState::Loading);
    }

    /// Media is ready. Restores a pending resume position.
    pub fn can_play(&self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let resume = {
            let mut s = inner.lock();
            if s.state == PlaybackState::Loading {
                s.state = PlaybackState::Idle;
            }
            if s.should_resume && s.last_position > 0.0 {
                let target = clamp_time(s.last_position, s.max_time());
                s.current_time = target;
                s.should_resume = false;
                s.handle.clone().map(|handle| (handle, target))
            } else {
                None
            }
        };
        if let Some((handle, target)) = resume {
            handle.set_current_time(target);
        }
    }

    pub fn time_update(&self, time: f64) {
        self.with_session(|s| {
            s.current_time = time;
            s.progress = progress_percent(time, s.max_time());
            if s.state == PlaybackState::Playing {
                s.last_position = time;
            }
        });
    }

    pub fn ended(&self) {
        self.with_session(|s| {
            s.state = PlaybackState::Ended;
            s.current_time = 0.0;
            s.progress = 0.0;
            s.last_position = 0.0;
            s.should_resume = false;
        });
    }

    pub fn error(&self, message: &str) {
        self.with_session(|s| {
            warn!("Audio error for {}: {message}", s.audio_id);
            s.state = PlaybackState::Error;
        });
    }
}

/// Drives one clip through the shared [`PlaybackArbiter`].
///
/// Session state sits behind its own lock, which is never held while calling
/// the arbiter or seeking the handle: the arbiter notifies listeners
/// synchronously, and a handle may report a time update from inside a seek.
pub struct PlaybackController {
    arbiter: Arc<PlaybackArbiter>,
    inner: Arc<Mutex<SessionInner>>,
    listener: Option<ListenerId>,
}

impl PlaybackController {
    pub fn new(arbiter: Arc<PlaybackArbiter>) -> Self {
        Self {
            arbiter,
            inner: Arc::new(Mutex::new(SessionInner::default())),
            listener: None,
        }
    }

    /// Opens the audio handle for `source`. Does nothing if one is already
    /// open.
    pub fn create_audio_element(
        &mut self,
        source: &PlaybackSource,
        audio_id: &str,
        duration: f64,
        backend: &dyn AudioBackend,
    ) -> Result<()> {
        {
            let mut s = self.inner.lock();
            if s.handle.is_some() {
                return Ok(());
            }
            s.audio_id = audio_id.to_string();
            s.declared_duration = duration;
            s.state = PlaybackState::Loading;
        }

        let events = PlaybackEvents {
            inner: Arc::downgrade(&self.inner),
        };
        let handle = match backend.open(source, events) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Failed to open audio for {audio_id}: {e}");
                self.inner.lock().state = PlaybackState::Error;
                return Err(e.into());
            }
        };

        self.arbiter.track_mounted(&handle);
        self.inner.lock().handle = Some(handle);

        let inner = Arc::downgrade(&self.inner);
        let arbiter = Arc::downgrade(&self.arbiter);
        self.listener = Some(self.arbiter.add_listener(move || {
            if let (Some(inner), Some(arbiter)) = (inner.upgrade(), arbiter.upgrade()) {
                on_arbiter_change(&inner, &arbiter);
            }
        }));
        debug!("Opened audio for {audio_id}");
        Ok(())
    }

    pub fn toggle_playback(&self) -> Result<()> {
        let (handle, audio_id, playing) = {
            let s = self.inner.lock();
            if s.state == PlaybackState::Loading {
                return Ok(());
            }
            let Some(handle) = s.handle.clone() else {
                return Ok(());
            };
            (handle, s.audio_id.clone(), s.state == PlaybackState::Playing)
        };

        if playing {
            let position = handle.current_time();
            {
                let mut s = self.inner.lock();
                s.last_position = position;
                s.should_resume = true;
            }
            self.arbiter.pause();
            self.inner.lock().state = PlaybackState::Paused;
            return Ok(());
        }

        let resume_at = {
            let mut s = self.inner.lock();
            if s.should_resume {
                let target = clamp_time(s.last_position, s.max_time());
                s.current_time = target;
                Some(target)
            } else {
                None
            }
        };
        if let Some(target) = resume_at {
            handle.set_current_time(target);
        }

        let result = self.arbiter.play(&handle, &audio_id);
        let mut s = self.inner.lock();
        match result {
            Ok(()) => {
                // An aborted request leaves the handle paused.
                if handle.is_paused() {
                    s.state = PlaybackState::Paused;
                } else {
                    s.state = PlaybackState::Playing;
                    s.has_been_played = true;
                    s.should_resume = false;
                }
                Ok(())
            }
            Err(e) => {
                s.state = PlaybackState::Error;
                s.last_position = 0.0;
                s.should_resume = false;
                Err(e)
            }
        }
    }

    /// Seeks to `time` after clamping it into the clip and returns the
    /// applied position.
    pub fn seek_to_time(&self, time: f64) -> f64 {
        let (handle, target) = {
            let mut s = self.inner.lock();
            let max_time = s.max_time();
            let target = clamp_time(time, max_time);
            s.current_time = target;
            s.progress = progress_percent(target, max_time);
            s.last_position = target;
            (s.handle.clone(), target)
        };
        if let Some(handle) = handle {
            handle.set_current_time(target);
        }
        target
    }

    /// Toggles only when the requested state differs from the current one.
    pub fn set_playing(&self, playing: bool) -> Result<()> {
        if self.is_playing() == playing {
            return Ok(());
        }
        self.toggle_playback()
    }

    pub fn is_playing(&self) -> bool {
        self.inner.lock().state == PlaybackState::Playing
    }

    pub fn is_loading(&self) -> bool {
        self.inner.lock().state == PlaybackState::Loading
    }

    pub fn state(&self) -> PlaybackState {
        self.inner.lock().state
    }

    pub fn has_handle(&self) -> bool {
        self.inner.lock().handle.is_some()
    }

    pub fn duration(&self) -> f64 {
        self.inner.lock().max_time()
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        let s = self.inner.lock();
        PlaybackSnapshot {
            state: s.state,
            current_time: s.current_time,
            progress: s.progress,
            last_position: s.last_position,
            should_resume: s.should_resume,
            has_been_played: s.has_been_played,
            duration: s.max_time(),
        }
    }

    /// Releases the handle and resets the session. Safe to call repeatedly.
    pub fn cleanup(&mut self) {
        if let Some(listener) = self.listener.take() {
            self.arbiter.remove_listener(listener);
        }
        let handle = std::mem::take(&mut *self.inner.lock()).handle;
        if let Some(handle) = handle {
            if !handle.is_paused()
                && let Err(e) = handle.pause()
            {
                warn!("Failed to pause audio during cleanup: {e}");
            }
            handle.clear_source();
        }
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn on_arbiter_change(inner: &Mutex<SessionInner>, arbiter: &PlaybackArbiter) {
    let (audio_id, handle) = {
        let s = inner.lock();
        if s.state != PlaybackState::Playing {
            return;
        }
        (s.audio_id.clone(), s.handle.clone())
    };
    // Another session may hold the same id, so the arbiter's answer alone
    // does not mean this handle is the one still running.
    let own_running = handle.is_some_and(|h| !h.is_paused());
    if own_running && arbiter.is_playing(&audio_id) {
        return;
    }
    let mut s = inner.lock();
    if s.state == PlaybackState::Playing {
        debug!("{audio_id} was preempted at {:.2}s", s.last_position);
        s.state = PlaybackState::Paused;
        if s.last_position > 0.0 {
            s.should_resume = true;
        }
    }
}

impl ScrubTarget for PlaybackController {
    fn is_playing(&self) -> bool {
        PlaybackController::is_playing(self)
    }

    fn duration(&self) -> f64 {
        PlaybackController::duration(self)
    }

    fn seek(&mut self, time: f64) -> Result<()> {
        self.seek_to_time(time);
        Ok(())
    }

    fn set_playing(&mut self, playing: bool) -> Result<()> {
        PlaybackController::set_playing(self, playing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PlaybackError, VoiceError};
    use crate::playback::testing::FakeBackend;

    fn source() -> PlaybackSource {
        PlaybackSource::Remote("https://cdn.example.com/a.mp3".into())
    }

    fn ready_controller(
        arbiter: &Arc<PlaybackArbiter>,
        backend: &FakeBackend,
        id: &str,
    ) -> PlaybackController {
        let mut controller = PlaybackController::new(arbiter.clone());
        controller
            .create_audio_element(&source(), id, 10.0, backend)
            .unwrap();
        backend.last_handle().unwrap().ready();
        controller
    }

    #[test]
    fn test_create_is_idempotent() {
        let arbiter = PlaybackArbiter::new();
        let backend = FakeBackend::new(10.0);
        let mut controller = PlaybackController::new(arbiter);
        controller
            .create_audio_element(&source(), "a", 10.0, &backend)
            .unwrap();
        assert_eq!(controller.state(), PlaybackState::Loading);
        controller
            .create_audio_element(&source(), "a", 10.0, &backend)
            .unwrap();
        assert_eq!(backend.opened(), 1);
    }

    #[test]
    fn test_toggle_ignored_while_loading_or_without_handle() {
        let arbiter = PlaybackArbiter::new();
        let backend = FakeBackend::new(10.0);
        let mut controller = PlaybackController::new(arbiter.clone());
        controller.toggle_playback().unwrap();
        assert_eq!(controller.state(), PlaybackState::Idle);

        controller
            .create_audio_element(&source(), "a", 10.0, &backend)
            .unwrap();
        controller.toggle_playback().unwrap();
        assert!(controller.is_loading());
        assert_eq!(arbiter.current_audio_id(), None);
    }

    #[test]
    fn test_play_pause_resume() {
        let arbiter = PlaybackArbiter::new();
        let backend = FakeBackend::new(10.0);
        let controller = ready_controller(&arbiter, &backend, "a");
        let handle = backend.last_handle().unwrap();

        controller.toggle_playback().unwrap();
        assert!(controller.is_playing());
        assert!(arbiter.is_playing("a"));
        handle.advance_to(3.0);
        assert!((controller.snapshot().progress - 30.0).abs() < 1e-9);

        controller.toggle_playback().unwrap();
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.state, PlaybackState::Paused);
        assert_eq!(snapshot.last_position, 3.0);
        assert!(snapshot.should_resume);

        handle.set_current_time(0.0);
        controller.toggle_playback().unwrap();
        assert_eq!(handle.current_time(), 3.0);
        assert!(controller.snapshot().has_been_played);
        assert!(!controller.snapshot().should_resume);
    }

    #[test]
    fn test_resume_after_preemption() {
        let arbiter = PlaybackArbiter::new();
        let backend = FakeBackend::new(10.0);
        let a = ready_controller(&arbiter, &backend, "a");
        let handle_a = backend.last_handle().unwrap();
        let b = ready_controller(&arbiter, &backend, "b");

        a.toggle_playback().unwrap();
        handle_a.advance_to(4.2);
        b.toggle_playback().unwrap();

        assert!(!arbiter.is_playing("a"));
        assert!(arbiter.is_playing("b"));
        let snapshot = a.snapshot();
        assert_eq!(snapshot.state, PlaybackState::Paused);
        assert!((snapshot.last_position - 4.2).abs() < 1e-9);
        assert!(snapshot.should_resume);
        assert_eq!(handle_a.current_time(), 0.0);

        a.toggle_playback().unwrap();
        assert!((handle_a.current_time() - 4.2).abs() < 1e-9);
        assert!(a.is_playing());
        assert_eq!(b.state(), PlaybackState::Paused);
    }

    #[test]
    fn test_sessions_sharing_an_id_stay_exclusive() {
        let arbiter = PlaybackArbiter::new();
        let backend = FakeBackend::new(10.0);
        let first = ready_controller(&arbiter, &backend, "shared");
        let first_handle = backend.last_handle().unwrap();
        let second = ready_controller(&arbiter, &backend, "shared");
        let second_handle = backend.last_handle().unwrap();

        first.toggle_playback().unwrap();
        first_handle.advance_to(3.0);
        second.toggle_playback().unwrap();

        assert!(first_handle.is_paused());
        assert!(!second_handle.is_paused());
        assert_eq!(first.state(), PlaybackState::Paused);
        assert!(first.snapshot().should_resume);
        assert!(second.is_playing());
    }

    #[test]
    fn test_seek_tolerates_handle_reporting_time() {
        let arbiter = PlaybackArbiter::new();
        let backend = FakeBackend::new(10.0);
        let controller = ready_controller(&arbiter, &backend, "a");
        let handle = backend.last_handle().unwrap();
        handle.report_seeks();

        assert_eq!(controller.seek_to_time(4.0), 4.0);
        assert_eq!(controller.snapshot().current_time, 4.0);

        controller.toggle_playback().unwrap();
        handle.advance_to(6.0);
        controller.toggle_playback().unwrap();
        handle.set_current_time(0.0);
        handle.ready();
        assert_eq!(handle.current_time(), 6.0);

        controller.toggle_playback().unwrap();
        assert!(controller.is_playing());
    }

    #[test]
    fn test_can_play_restores_pending_resume() {
        let arbiter = PlaybackArbiter::new();
        let backend = FakeBackend::new(10.0);
        let controller = ready_controller(&arbiter, &backend, "a");
        let handle = backend.last_handle().unwrap();
        controller.toggle_playback().unwrap();
        handle.advance_to(6.5);
        controller.toggle_playback().unwrap();

        handle.set_current_time(0.0);
        handle.ready();
        assert_eq!(handle.current_time(), 6.5);
        assert!(!controller.snapshot().should_resume);
    }

    #[test]
    fn test_seek_clamps_to_media_duration() {
        let arbiter = PlaybackArbiter::new();
        let backend = FakeBackend::new(8.0);
        let controller = ready_controller(&arbiter, &backend, "a");
        assert_eq!(controller.seek_to_time(12.0), 8.0);
        assert_eq!(controller.seek_to_time(f64::NAN), 0.0);
        assert_eq!(controller.seek_to_time(-3.0), 0.0);
        assert_eq!(controller.seek_to_time(2.0), 2.0);
        assert_eq!(controller.snapshot().progress, 25.0);
    }

    #[test]
    fn test_unknown_media_duration_uses_declared() {
        let arbiter = PlaybackArbiter::new();
        let backend = FakeBackend::new(f64::INFINITY);
        let controller = ready_controller(&arbiter, &backend, "a");
        assert_eq!(controller.duration(), 10.0);
        assert_eq!(controller.seek_to_time(15.0), 10.0);
    }

    #[test]
    fn test_ended_resets_positions() {
        let arbiter = PlaybackArbiter::new();
        let backend = FakeBackend::new(10.0);
        let controller = ready_controller(&arbiter, &backend, "a");
        let handle = backend.last_handle().unwrap();
        controller.toggle_playback().unwrap();
        handle.advance_to(9.0);
        handle.finish();

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.state, PlaybackState::Ended);
        assert_eq!(snapshot.current_time, 0.0);
        assert_eq!(snapshot.last_position, 0.0);
        assert!(!snapshot.should_resume);
        assert!(!arbiter.is_playing("a"));

        controller.toggle_playback().unwrap();
        assert!(controller.is_playing());
    }

    #[test]
    fn test_play_failure_enters_error_state() {
        let arbiter = PlaybackArbiter::new();
        let backend = FakeBackend::new(10.0);
        let controller = ready_controller(&arbiter, &backend, "a");
        let handle = backend.last_handle().unwrap();
        handle.fail_next_play(PlaybackError::Refused("denied".into()));

        let err = controller.toggle_playback().unwrap_err();
        assert!(matches!(err, VoiceError::Playback(PlaybackError::Refused(_))));
        assert_eq!(controller.state(), PlaybackState::Error);
        assert_eq!(controller.snapshot().last_position, 0.0);
    }

    #[test]
    fn test_aborted_play_stays_paused() {
        let arbiter = PlaybackArbiter::new();
        let backend = FakeBackend::new(10.0);
        let controller = ready_controller(&arbiter, &backend, "a");
        backend
            .last_handle()
            .unwrap()
            .fail_next_play(PlaybackError::Aborted);
        controller.toggle_playback().unwrap();
        assert_eq!(controller.state(), PlaybackState::Paused);
    }

    #[test]
    fn test_platform_error_event() {
        let arbiter = PlaybackArbiter::new();
        let backend = FakeBackend::new(10.0);
        let controller = ready_controller(&arbiter, &backend, "a");
        backend.last_handle().unwrap().fail("MEDIA_ERR_DECODE");
        assert_eq!(controller.state(), PlaybackState::Error);
    }

    #[test]
    fn test_open_failure() {
        let arbiter = PlaybackArbiter::new();
        let backend = FakeBackend::new(10.0);
        backend.fail_next_open(PlaybackError::Refused("no output".into()));
        let mut controller = PlaybackController::new(arbiter);
        assert!(
            controller
                .create_audio_element(&source(), "a", 10.0, &backend)
                .is_err()
        );
        assert_eq!(controller.state(), PlaybackState::Error);
        assert!(!controller.has_handle());
    }

    #[test]
    fn test_set_playing_only_toggles_on_change() {
        let arbiter = PlaybackArbiter::new();
        let backend = FakeBackend::new(10.0);
        let controller = ready_controller(&arbiter, &backend, "a");
        let handle = backend.last_handle().unwrap();
        controller.set_playing(false).unwrap();
        assert_eq!(handle.play_calls(), 0);
        controller.set_playing(true).unwrap();
        controller.set_playing(true).unwrap();
        assert_eq!(handle.play_calls(), 1);
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let arbiter = PlaybackArbiter::new();
        let backend = FakeBackend::new(10.0);
        let mut controller = ready_controller(&arbiter, &backend, "a");
        let handle = backend.last_handle().unwrap();
        controller.toggle_playback().unwrap();

        controller.cleanup();
        assert!(handle.is_paused());
        assert!(handle.source_cleared());
        assert!(!controller.has_handle());
        assert_eq!(controller.snapshot(), PlaybackSnapshot::default());
        controller.cleanup();

        // The paused handle no longer counts as playing.
        assert!(!arbiter.is_playing("a"));
    }
}
