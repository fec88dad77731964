//! In-memory audio output for tests.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{AudioBackend, AudioHandle, PlaybackEvents, PlaybackSource};
use crate::error::PlaybackError;

#[derive(Default)]
struct FakeState {
    paused: bool,
    time: f64,
    duration: f64,
    play_calls: usize,
    source_cleared: bool,
    next_play_error: Option<PlaybackError>,
    next_pause_error: Option<PlaybackError>,
    report_seeks: bool,
    events: Option<PlaybackEvents>,
}

/// Audio handle whose clock only moves when the test says so.
pub struct FakeHandle {
    state: Mutex<FakeState>,
}

impl FakeHandle {
    pub fn new(duration: f64) -> Arc<Self> {
        Self::with_events(duration, None)
    }

    fn with_events(duration: f64, events: Option<PlaybackEvents>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState {
                paused: true,
                duration,
                events,
                ..Default::default()
            }),
        })
    }

    pub fn play_calls(&self) -> usize {
        self.state.lock().play_calls
    }

    pub fn source_cleared(&self) -> bool {
        self.state.lock().source_cleared
    }

    pub fn fail_next_play(&self, error: PlaybackError) {
        self.state.lock().next_play_error = Some(error);
    }

    pub fn fail_next_pause(&self, error: PlaybackError) {
        self.state.lock().next_pause_error = Some(error);
    }

    /// Makes every seek fire a time update before returning, the way some
    /// platform players do.
    pub fn report_seeks(&self) {
        self.state.lock().report_seeks = true;
    }

    pub fn set_duration(&self, duration: f64) {
        self.state.lock().duration = duration;
    }

    fn events(&self) -> Option<PlaybackEvents> {
        self.state.lock().events.clone()
    }

    /// Fires the "ready to play" event.
    pub fn ready(&self) {
        if let Some(events) = self.events() {
            events.can_play();
        }
    }

    /// Moves the clock and fires a time update.
    pub fn advance_to(&self, time: f64) {
        self.state.lock().time = time;
        if let Some(events) = self.events() {
            events.time_update(time);
        }
    }

    /// Plays through to the end.
    pub fn finish(&self) {
        {
            let mut state = self.state.lock();
            state.paused = true;
            state.time = state.duration;
        }
        if let Some(events) = self.events() {
            events.ended();
        }
    }

    pub fn fail(&self, message: &str) {
        if let Some(events) = self.events() {
            events.error(message);
        }
    }
}

impl AudioHandle for FakeHandle {
    fn play(&self) -> Result<(), PlaybackError> {
        let mut state = self.state.lock();
        state.play_calls += 1;
        if let Some(error) = state.next_play_error.take() {
            return Err(error);
        }
        state.paused = false;
        Ok(())
    }

    fn pause(&self) -> Result<(), PlaybackError> {
        let mut state = self.state.lock();
        if let Some(error) = state.next_pause_error.take() {
            return Err(error);
        }
        state.paused = true;
        Ok(())
    }

    fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    fn current_time(&self) -> f64 {
        self.state.lock().time
    }

    fn set_current_time(&self, time: f64) {
        let events = {
            let mut state = self.state.lock();
            state.time = time;
            state.report_seeks.then(|| state.events.clone()).flatten()
        };
        if let Some(events) = events {
            events.time_update(time);
        }
    }

    fn duration(&self) -> f64 {
        self.state.lock().duration
    }

    fn clear_source(&self) {
        let mut state = self.state.lock();
        state.source_cleared = true;
        state.paused = true;
    }
}

/// Opens [`FakeHandle`]s and remembers them for inspection.
pub struct FakeBackend {
    duration: f64,
    opened: Mutex<Vec<(PlaybackSource, Arc<FakeHandle>)>>,
    fail_open: Mutex<Option<PlaybackError>>,
}

impl FakeBackend {
    /// Every handle reports `duration` seconds of media.
    pub fn new(duration: f64) -> Self {
        Self {
            duration,
            opened: Mutex::new(Vec::new()),
            fail_open: Mutex::new(None),
        }
    }

    pub fn fail_next_open(&self, error: PlaybackError) {
        *self.fail_open.lock() = Some(error);
    }

    pub fn opened(&self) -> usize {
        self.opened.lock().len()
    }

    pub fn last_handle(&self) -> Option<Arc<FakeHandle>> {
        self.opened.lock().last().map(|(_, handle)| handle.clone())
    }

    pub fn last_source(&self) -> Option<PlaybackSource> {
        self.opened.lock().last().map(|(source, _)| source.clone())
    }
}

impl AudioBackend for FakeBackend {
    fn open(
        &self,
        source: &PlaybackSource,
        events: PlaybackEvents,
    ) -> Result<Arc<dyn AudioHandle>, PlaybackError> {
        if let Some(error) = self.fail_open.lock().take() {
            return Err(error);
        }
        events.load_start();
        let handle = FakeHandle::with_events(self.duration, Some(events));
        self.opened.lock().push((source.clone(), handle.clone()));
        Ok(handle)
    }
}
