//! Process-wide playback arbitration: at most one clip plays at a time.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use log::{debug, error, warn};
use parking_lot::Mutex;

use super::AudioHandle;
use crate::error::{PlaybackError, Result};

type Listener = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Current {
    id: String,
    handle: Weak<dyn AudioHandle>,
}

#[derive(Default)]
struct ArbiterState {
    current: Option<Current>,
    listeners: HashMap<ListenerId, Listener>,
    next_listener: u64,
    mounted: Vec<Weak<dyn AudioHandle>>,
}

/// Shared by every playback controller; hand it out as `Arc<PlaybackArbiter>`.
///
/// Handles are tracked weakly, so a dropped session never keeps its audio
/// output alive. Listeners run after the internal lock is released and may
/// call back into the arbiter.
#[derive(Default)]
pub struct PlaybackArbiter {
    state: Mutex<ArbiterState>,
}

impl fmt::Debug for PlaybackArbiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PlaybackArbiter")
            .field("current", &state.current.as_ref().map(|c| c.id.as_str()))
            .field("listeners", &state.listeners.len())
            .field("mounted", &state.mounted.len())
            .finish()
    }
}

fn same_handle(a: &Arc<dyn AudioHandle>, b: &Arc<dyn AudioHandle>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Pauses and rewinds a handle, logging instead of failing.
fn halt(handle: &dyn AudioHandle) {
    if let Err(e) = handle.pause() {
        warn!("Failed to pause audio while stopping it: {e}");
    }
    handle.set_current_time(0.0);
}

impl PlaybackArbiter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Starts `handle` as clip `id`, stopping whatever else is playing.
    ///
    /// Re-requesting the tracked clip with the same handle rewinds it only if
    /// it is still running, so a paused clip resumes where it was left. A
    /// different handle under the same id is stopped like any other clip.
    pub fn play(&self, handle: &Arc<dyn AudioHandle>, id: &str) -> Result<()> {
        let previous = self.state.lock().current.take();

        if let Some(previous) = previous {
            let tracked = previous.handle.upgrade();
            match tracked {
                Some(tracked) if previous.id != id || !same_handle(&tracked, handle) => {
                    debug!("Stopping {} to play {id}", previous.id);
                    halt(tracked.as_ref());
                    self.notify();
                }
                Some(_) if !handle.is_paused() => {
                    // Rapid re-trigger of the clip that is already running.
                    halt(handle.as_ref());
                }
                Some(_) => {}
                None if previous.id != id => self.notify(),
                None => {}
            }
        }

        self.state.lock().current = Some(Current {
            id: id.to_string(),
            handle: Arc::downgrade(handle),
        });

        match handle.play() {
            Ok(()) => Ok(()),
            Err(PlaybackError::Aborted) => {
                debug!("Play request for {id} was aborted");
                self.clear_if_current(id);
                Ok(())
            }
            Err(e) => {
                error!("Failed to play {id}: {e}");
                self.clear_if_current(id);
                Err(e.into())
            }
        }
    }

    /// Pauses the tracked clip without forgetting it.
    pub fn pause(&self) {
        let tracked = {
            let state = self.state.lock();
            state.current.as_ref().map(|c| (c.id.clone(), c.handle.upgrade()))
        };
        match tracked {
            None => {}
            Some((id, None)) => {
                warn!("Tracked audio {id} is gone, clearing");
                self.clear_if_current(&id);
            }
            Some((id, Some(handle))) => {
                if handle.is_paused() {
                    return;
                }
                if let Err(e) = handle.pause() {
                    warn!("Failed to pause {id}, clearing: {e}");
                    self.clear_if_current(&id);
                }
            }
        }
    }

    /// Pauses, rewinds and forgets the tracked clip, then notifies listeners.
    pub fn stop(&self) {
        let Some(current) = self.state.lock().current.take() else {
            return;
        };
        debug!("Stopping {}", current.id);
        if let Some(handle) = current.handle.upgrade() {
            halt(handle.as_ref());
        }
        self.notify();
    }

    /// Stops the tracked clip and every other mounted handle still playing.
    pub fn stop_all(&self) {
        self.stop();
        let mounted: Vec<Arc<dyn AudioHandle>> = {
            let mut state = self.state.lock();
            state.mounted.retain(|weak| weak.strong_count() > 0);
            state.mounted.iter().filter_map(Weak::upgrade).collect()
        };
        for handle in mounted.iter().filter(|h| !h.is_paused()) {
            halt(handle.as_ref());
        }
        self.notify();
    }

    pub fn is_playing(&self, id: &str) -> bool {
        let handle = {
            let state = self.state.lock();
            match &state.current {
                Some(current) if current.id == id => current.handle.clone(),
                _ => return false,
            }
        };
        handle.upgrade().is_some_and(|h| !h.is_paused())
    }

    pub fn current_audio_id(&self) -> Option<String> {
        self.state.lock().current.as_ref().map(|c| c.id.clone())
    }

    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut state = self.state.lock();
        let id = ListenerId(state.next_listener);
        state.next_listener += 1;
        state.listeners.insert(id, Arc::new(listener));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.state.lock().listeners.remove(&id).is_some()
    }

    /// Registers a handle for the [`stop_all`](Self::stop_all) sweep.
    pub fn track_mounted(&self, handle: &Arc<dyn AudioHandle>) {
        let mut state = self.state.lock();
        state.mounted.retain(|weak| weak.strong_count() > 0);
        state.mounted.push(Arc::downgrade(handle));
    }

    /// Stops all playback and drops every listener and mounted handle.
    pub fn shutdown(&self) {
        self.stop_all();
        let mut state = self.state.lock();
        state.listeners.clear();
        state.mounted.clear();
    }

    fn clear_if_current(&self, id: &str) {
        let mut state = self.state.lock();
        if state.current.as_ref().is_some_and(|c| c.id == id) {
            state.current = None;
        }
    }

    fn notify(&self) {
        let listeners: Vec<Listener> = self.state.lock().listeners.values().cloned().collect();
        for listener in listeners {
            listener();
        }
    }
}
