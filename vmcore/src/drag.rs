//! Pointer and touch scrubbing over a waveform.

use std::time::Instant;

use log::{debug, warn};

use crate::clamp::clamp_time;
use crate::error::Result;
use crate::throttle::MinIntervalGate;

/// Horizontal travel needed before a press becomes a drag rather than a tap.
pub const DRAG_THRESHOLD_PX: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerKind {
    Mouse,
    Touch,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub kind: PointerKind,
    /// Horizontal position in viewport coordinates. Touch events that lost
    /// their touch point carry `None`.
    pub client_x: Option<f64>,
}

impl PointerEvent {
    pub fn mouse(client_x: f64) -> Self {
        Self {
            kind: PointerKind::Mouse,
            client_x: Some(client_x),
        }
    }

    pub fn touch(client_x: Option<f64>) -> Self {
        Self {
            kind: PointerKind::Touch,
            client_x,
        }
    }
}

/// Horizontal extent of the waveform surface in viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceRect {
    pub left: f64,
    pub width: f64,
}

/// The UI shell around the waveform.
pub trait DragHost {
    fn surface_rect(&self) -> Result<SurfaceRect>;
    /// Freezes page scrolling and returns the offset to restore later.
    fn lock_scroll(&mut self) -> f64;
    fn restore_scroll(&mut self, offset: f64);
    /// Starts delivering move/end events of `kind` to the controller.
    fn bind_move_end(&mut self, kind: PointerKind);
    fn unbind_move_end(&mut self);
}

/// What a scrub gesture drives.
pub trait ScrubTarget {
    fn is_playing(&self) -> bool;
    fn duration(&self) -> f64;
    fn seek(&mut self, time: f64) -> Result<()>;
    fn set_playing(&mut self, playing: bool) -> Result<()>;
}

/// Turns press/move/release sequences into previews and seeks.
pub struct DragController<H: DragHost> {
    host: H,
    is_mobile: bool,
    is_pointer_down: bool,
    is_dragging: bool,
    drag_start_x: f64,
    preview_time: f64,
    show_time_preview: bool,
    was_playing_before_drag: bool,
    scroll_lock: Option<f64>,
    listeners_bound: bool,
    move_gate: MinIntervalGate,
}

impl<H: DragHost> DragController<H> {
    pub fn new(host: H, is_mobile: bool) -> Self {
        Self {
            host,
            is_mobile,
            is_pointer_down: false,
            is_dragging: false,
            drag_start_x: 0.0,
            preview_time: 0.0,
            show_time_preview: false,
            was_playing_before_drag: false,
            scroll_lock: None,
            listeners_bound: false,
            move_gate: MinIntervalGate::default(),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn is_dragging(&self) -> bool {
        self.is_dragging
    }

    pub fn preview_time(&self) -> f64 {
        self.preview_time
    }

    pub fn show_time_preview(&self) -> bool {
        self.show_time_preview
    }

    pub fn was_playing_before_drag(&self) -> bool {
        self.was_playing_before_drag
    }

    /// Begins a gesture. Returns `false` when the event carries no position,
    /// in which case the page is restored and nothing is tracked.
    pub fn handle_drag_start(&mut self, event: PointerEvent, target: &dyn ScrubTarget) -> bool {
        if self.is_mobile && self.scroll_lock.is_none() {
            self.scroll_lock = Some(self.host.lock_scroll());
        }

        let Some(x) = event.client_x else {
            warn!("Drag start without a pointer position");
            self.restore_page();
            self.reset_state();
            return false;
        };

        self.is_pointer_down = true;
        self.drag_start_x = x;
        self.was_playing_before_drag = target.is_playing();
        self.move_gate.reset();
        self.host.bind_move_end(event.kind);
        self.listeners_bound = true;
        true
    }

    /// Maps a viewport x coordinate to a time within `duration`.
    pub fn calculate_time_from_position(&self, client_x: f64, duration: f64) -> f64 {
        match self.host.surface_rect() {
            Ok(rect) => time_at(rect, client_x, duration),
            Err(_) => 0.0,
        }
    }

    /// Tracks a move. Returns the new preview time when the preview changed.
    pub fn handle_drag_move(
        &mut self,
        event: PointerEvent,
        now: Instant,
        target: &mut dyn ScrubTarget,
    ) -> Option<f64> {
        if !self.is_pointer_down || !self.move_gate.try_pass(now) {
            return None;
        }

        let Some(x) = event.client_x else {
            warn!("Drag move without a pointer position");
            return None;
        };

        if !self.is_dragging {
            if (x - self.drag_start_x).abs() < DRAG_THRESHOLD_PX {
                return None;
            }
            self.is_dragging = true;
            if target.is_playing()
                && let Err(e) = target.set_playing(false)
            {
                warn!("Failed to pause playback for scrubbing: {e}");
            }
            self.show_time_preview = true;
        }

        let duration = target.duration();
        match self.host.surface_rect() {
            Ok(rect) => {
                self.preview_time = clamp_time(time_at(rect, x, duration), duration);
                Some(self.preview_time)
            }
            Err(e) => {
                warn!("Lost the waveform surface mid-drag, ending drag: {e}");
                if let Err(e) = self.handle_drag_end(target) {
                    warn!("Failed to commit scrub position: {e}");
                }
                None
            }
        }
    }

    /// Finishes a gesture: seeks to the preview and resumes if playback was
    /// running when the drag began. State is reset even if the seek fails.
    pub fn handle_drag_end(&mut self, target: &mut dyn ScrubTarget) -> Result<()> {
        let mut this = scopeguard::guard(self, |this| this.reset_state());
        this.restore_page();
        if !this.is_dragging {
            return Ok(());
        }

        let time = clamp_time(this.preview_time, target.duration());
        debug!("Scrubbed to {time:.2}s");
        target.seek(time)?;
        if this.was_playing_before_drag {
            target.set_playing(true)?;
        }
        Ok(())
    }

    pub fn cleanup(&mut self) {
        self.restore_page();
        self.reset_state();
    }

    fn restore_page(&mut self) {
        if let Some(offset) = self.scroll_lock.take() {
            self.host.restore_scroll(offset);
        }
        if self.listeners_bound {
            self.host.unbind_move_end();
            self.listeners_bound = false;
        }
    }

    fn reset_state(&mut self) {
        self.is_pointer_down = false;
        self.is_dragging = false;
        self.preview_time = 0.0;
        self.show_time_preview = false;
        self.was_playing_before_drag = false;
        self.drag_start_x = 0.0;
    }
}

fn time_at(rect: SurfaceRect, client_x: f64, duration: f64) -> f64 {
    if !client_x.is_finite() || rect.width <= 0.0 {
        return 0.0;
    }
    let ratio = ((client_x - rect.left) / rect.width).clamp(0.0, 1.0);
    clamp_time(ratio * duration, duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VoiceError;
    use std::time::Duration;

    /// Records every call the controller makes on the page.
    #[derive(Debug, Default)]
    struct RecordingHost {
        pub rect: Option<SurfaceRect>,
        pub scroll: f64,
        pub locked: bool,
        pub bound: Option<PointerKind>,
        pub unbinds: usize,
        pub restores: Vec<f64>,
    }

    impl RecordingHost {
        pub fn with_rect(left: f64, width: f64) -> Self {
            Self {
                rect: Some(SurfaceRect { left, width }),
                scroll: 240.0,
                ..Default::default()
            }
        }
    }

    impl DragHost for RecordingHost {
        fn surface_rect(&self) -> Result<SurfaceRect> {
            self.rect
                .ok_or_else(|| VoiceError::Gesture("surface detached".into()))
        }

        fn lock_scroll(&mut self) -> f64 {
            self.locked = true;
            self.scroll
        }

        fn restore_scroll(&mut self, offset: f64) {
            self.locked = false;
            self.restores.push(offset);
        }

        fn bind_move_end(&mut self, kind: PointerKind) {
            self.bound = Some(kind);
        }

        fn unbind_move_end(&mut self) {
            self.bound = None;
            self.unbinds += 1;
        }
    }

    #[derive(Debug, Default)]
    struct Target {
        playing: bool,
        duration: f64,
        seeks: Vec<f64>,
        fail_seek: bool,
    }

    impl ScrubTarget for Target {
        fn is_playing(&self) -> bool {
            self.playing
        }

        fn duration(&self) -> f64 {
            self.duration
        }

        fn seek(&mut self, time: f64) -> Result<()> {
            if self.fail_seek {
                return Err(VoiceError::Gesture("seek rejected".into()));
            }
            self.seeks.push(time);
            Ok(())
        }

        fn set_playing(&mut self, playing: bool) -> Result<()> {
            self.playing = playing;
            Ok(())
        }
    }

    fn target(playing: bool) -> Target {
        Target {
            playing,
            duration: 10.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_scrub_mapping() {
        let drag = DragController::new(RecordingHost::with_rect(0.0, 100.0), false);
        assert_eq!(drag.calculate_time_from_position(50.0, 10.0), 5.0);
        assert_eq!(drag.calculate_time_from_position(0.0, 10.0), 0.0);
        assert_eq!(drag.calculate_time_from_position(100.0, 10.0), 10.0);
        assert_eq!(drag.calculate_time_from_position(-20.0, 10.0), 0.0);
        assert_eq!(drag.calculate_time_from_position(140.0, 10.0), 10.0);

        let detached = DragController::new(RecordingHost::default(), false);
        assert_eq!(detached.calculate_time_from_position(50.0, 10.0), 0.0);
    }

    #[test]
    fn test_threshold_separates_tap_from_drag() {
        let mut drag = DragController::new(RecordingHost::with_rect(0.0, 100.0), false);
        let mut target = target(false);
        let t0 = Instant::now();
        assert!(drag.handle_drag_start(PointerEvent::mouse(100.0), &target));

        assert_eq!(drag.handle_drag_move(PointerEvent::mouse(103.0), t0, &mut target), None);
        assert!(!drag.is_dragging());

        let preview = drag.handle_drag_move(
            PointerEvent::mouse(106.0),
            t0 + Duration::from_millis(20),
            &mut target,
        );
        assert!(drag.is_dragging());
        assert!(drag.show_time_preview());
        assert_eq!(preview, Some(10.0));
    }

    #[test]
    fn test_moves_are_rate_limited() {
        let mut drag = DragController::new(RecordingHost::with_rect(0.0, 100.0), false);
        let mut target = target(false);
        let t0 = Instant::now();
        drag.handle_drag_start(PointerEvent::mouse(10.0), &target);
        assert!(drag.handle_drag_move(PointerEvent::mouse(50.0), t0, &mut target).is_some());
        assert!(
            drag.handle_drag_move(
                PointerEvent::mouse(70.0),
                t0 + Duration::from_millis(8),
                &mut target
            )
            .is_none()
        );
        assert_eq!(drag.preview_time(), 5.0);
    }

    #[test]
    fn test_drag_pauses_then_resumes_at_preview() {
        let mut drag = DragController::new(RecordingHost::with_rect(0.0, 100.0), false);
        let mut target = target(true);
        let t0 = Instant::now();
        drag.handle_drag_start(PointerEvent::mouse(20.0), &target);
        drag.handle_drag_move(PointerEvent::mouse(70.0), t0, &mut target);
        assert!(!target.playing);
        assert!(drag.was_playing_before_drag());

        drag.handle_drag_end(&mut target).unwrap();
        assert_eq!(target.seeks, vec![7.0]);
        assert!(target.playing);
        assert!(!drag.is_dragging());
        assert!(!drag.show_time_preview());
        assert_eq!(drag.host().bound, None);
    }

    #[test]
    fn test_tap_does_not_seek() {
        let mut drag = DragController::new(RecordingHost::with_rect(0.0, 100.0), false);
        let mut target = target(true);
        drag.handle_drag_start(PointerEvent::mouse(20.0), &target);
        drag.handle_drag_end(&mut target).unwrap();
        assert!(target.seeks.is_empty());
        assert!(target.playing);
        assert_eq!(drag.host().unbinds, 1);
    }

    #[test]
    fn test_mobile_locks_and_restores_scroll() {
        let mut drag = DragController::new(RecordingHost::with_rect(0.0, 100.0), true);
        let mut target = target(false);
        drag.handle_drag_start(PointerEvent::touch(Some(30.0)), &target);
        assert!(drag.host().locked);
        assert_eq!(drag.host().bound, Some(PointerKind::Touch));

        drag.handle_drag_end(&mut target).unwrap();
        assert!(!drag.host().locked);
        assert_eq!(drag.host().restores, vec![240.0]);
    }

    #[test]
    fn test_start_without_position_restores_page() {
        let mut drag = DragController::new(RecordingHost::with_rect(0.0, 100.0), true);
        let target = target(false);
        assert!(!drag.handle_drag_start(PointerEvent::touch(None), &target));
        assert!(!drag.host().locked);
        assert_eq!(drag.host().bound, None);
    }

    #[test]
    fn test_lost_surface_forces_end() {
        let mut drag = DragController::new(RecordingHost::with_rect(0.0, 100.0), true);
        let mut target = target(false);
        let t0 = Instant::now();
        drag.handle_drag_start(PointerEvent::touch(Some(10.0)), &target);
        drag.host_mut().rect = None;
        assert_eq!(drag.handle_drag_move(PointerEvent::touch(Some(60.0)), t0, &mut target), None);
        assert!(!drag.is_dragging());
        assert!(!drag.host().locked);
        assert_eq!(target.seeks, vec![0.0]);

        // Further moves are ignored until the next press.
        drag.host_mut().rect = Some(SurfaceRect {
            left: 0.0,
            width: 100.0,
        });
        assert_eq!(
            drag.handle_drag_move(
                PointerEvent::touch(Some(80.0)),
                t0 + Duration::from_millis(50),
                &mut target
            ),
            None
        );
    }

    #[test]
    fn test_lost_surface_commits_preview_and_resumes() {
        let mut drag = DragController::new(RecordingHost::with_rect(0.0, 100.0), false);
        let mut target = target(true);
        let t0 = Instant::now();
        drag.handle_drag_start(PointerEvent::mouse(10.0), &target);
        assert_eq!(
            drag.handle_drag_move(PointerEvent::mouse(60.0), t0, &mut target),
            Some(6.0)
        );
        assert!(!target.playing);

        drag.host_mut().rect = None;
        assert_eq!(
            drag.handle_drag_move(
                PointerEvent::mouse(70.0),
                t0 + Duration::from_millis(20),
                &mut target
            ),
            None
        );
        assert_eq!(target.seeks, vec![6.0]);
        assert!(target.playing);
        assert!(!drag.is_dragging());
        assert_eq!(drag.host().bound, None);
    }

    #[test]
    fn test_move_without_position_keeps_dragging() {
        let mut drag = DragController::new(RecordingHost::with_rect(0.0, 100.0), true);
        let mut target = target(true);
        let t0 = Instant::now();
        drag.handle_drag_start(PointerEvent::touch(Some(10.0)), &target);
        drag.handle_drag_move(PointerEvent::touch(Some(50.0)), t0, &mut target);

        assert_eq!(
            drag.handle_drag_move(
                PointerEvent::touch(None),
                t0 + Duration::from_millis(20),
                &mut target
            ),
            None
        );
        assert!(drag.is_dragging());
        assert_eq!(drag.preview_time(), 5.0);
        assert!(drag.host().locked);

        drag.handle_drag_end(&mut target).unwrap();
        assert_eq!(target.seeks, vec![5.0]);
        assert!(target.playing);
    }

    #[test]
    fn test_non_finite_position_maps_to_start() {
        let mut drag = DragController::new(RecordingHost::with_rect(0.0, 100.0), false);
        assert_eq!(drag.calculate_time_from_position(f64::NAN, 10.0), 0.0);
        assert_eq!(drag.calculate_time_from_position(50.0, f64::NAN), 0.0);

        let mut target = target(false);
        drag.handle_drag_start(PointerEvent::mouse(10.0), &target);
        drag.handle_drag_move(PointerEvent::mouse(f64::NAN), Instant::now(), &mut target);
        drag.handle_drag_end(&mut target).unwrap();
        assert_eq!(target.seeks, vec![0.0]);
    }

    #[test]
    fn test_failed_seek_still_resets() {
        let mut drag = DragController::new(RecordingHost::with_rect(0.0, 100.0), false);
        let mut target = target(false);
        target.fail_seek = true;
        drag.handle_drag_start(PointerEvent::mouse(0.0), &target);
        drag.handle_drag_move(PointerEvent::mouse(40.0), Instant::now(), &mut target);
        assert!(drag.handle_drag_end(&mut target).is_err());
        assert!(!drag.is_dragging());
        assert_eq!(drag.preview_time(), 0.0);
        assert_eq!(drag.host().bound, None);
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let mut drag = DragController::new(RecordingHost::with_rect(0.0, 100.0), true);
        let target = target(false);
        drag.handle_drag_start(PointerEvent::touch(Some(10.0)), &target);
        drag.cleanup();
        drag.cleanup();
        assert_eq!(drag.host().restores.len(), 1);
        assert_eq!(drag.host().unbinds, 1);
    }
}
