use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::engine::{EngineEvent, MediaEngine, PlaybackState, RepeatMode};
use crate::error::{Error, Result};
use crate::library::Track;

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Default)]
struct Inner {
    queue: Vec<Track>,
    index: Option<usize>,
    state: PlaybackState,
    repeat: RepeatMode,
    seeks: Vec<Duration>,
}

/// In-process engine model: a queue, a playback pointer, and native repeat
/// semantics, with events emitted the way a device engine would emit them.
/// The default backend for tests and headless builds; `finish_current`
/// stands in for a track reaching its end.
pub struct SimulatedEngine {
    inner: Mutex<Inner>,
    events: broadcast::Sender<EngineEvent>,
    fail_next_add: AtomicBool,
}

impl SimulatedEngine {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(Inner::default()),
            events,
            fail_next_add: AtomicBool::new(false),
        }
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn activate(&self, inner: &Inner) {
        if let Some(track) = inner.index.and_then(|i| inner.queue.get(i)) {
            self.emit(EngineEvent::ActiveTrackChanged(track.clone()));
        }
    }

    /// Reject the next `add` call, exercising queue-submission failures.
    pub fn fail_next_add(&self) {
        self.fail_next_add.store(true, Ordering::SeqCst);
    }

    /// Seek positions received so far, oldest first.
    pub fn recorded_seeks(&self) -> Vec<Duration> {
        self.inner.lock().unwrap().seeks.clone()
    }

    /// Simulate the active track playing to completion: advance per the
    /// native repeat mode, or end the queue.
    pub fn finish_current(&self) {
        let mut inner = self.inner.lock().unwrap();
        let Some(index) = inner.index else { return };

        match inner.repeat {
            RepeatMode::Track => self.activate(&inner),
            RepeatMode::Queue => {
                inner.index = Some((index + 1) % inner.queue.len());
                self.activate(&inner);
            }
            RepeatMode::Off => {
                if index + 1 < inner.queue.len() {
                    inner.index = Some(index + 1);
                    self.activate(&inner);
                } else {
                    inner.index = None;
                    inner.state = PlaybackState::Idle;
                    drop(inner);
                    self.emit(EngineEvent::QueueEnded);
                    self.emit(EngineEvent::StateChanged(PlaybackState::Idle));
                }
            }
        }
    }
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaEngine for SimulatedEngine {
    async fn reset(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.queue.clear();
        inner.index = None;
        inner.state = PlaybackState::Idle;
        Ok(())
    }

    async fn add(&self, tracks: Vec<Track>) -> Result<()> {
        if self.fail_next_add.swap(false, Ordering::SeqCst) {
            return Err(Error::playback("engine rejected queue submission"));
        }
        self.inner.lock().unwrap().queue.extend(tracks);
        Ok(())
    }

    async fn play(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.queue.is_empty() {
            return Err(Error::playback("cannot play an empty queue"));
        }
        let first_activation = inner.index.is_none();
        if first_activation {
            inner.index = Some(0);
        }
        inner.state = PlaybackState::Playing;
        if first_activation {
            self.activate(&inner);
        }
        drop(inner);
        self.emit(EngineEvent::StateChanged(PlaybackState::Playing));
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == PlaybackState::Playing {
            inner.state = PlaybackState::Paused;
            drop(inner);
            self.emit(EngineEvent::StateChanged(PlaybackState::Paused));
        }
        Ok(())
    }

    async fn seek(&self, position: Duration) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.index.is_none() {
            return Err(Error::playback("no active track to seek in"));
        }
        inner.seeks.push(position);
        Ok(())
    }

    async fn skip_next(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let Some(index) = inner.index else {
            return Err(Error::playback("no active track to skip from"));
        };

        match inner.repeat {
            // Native repeat-track restarts the same entry
            RepeatMode::Track => self.activate(&inner),
            RepeatMode::Queue => {
                inner.index = Some((index + 1) % inner.queue.len());
                self.activate(&inner);
            }
            RepeatMode::Off => {
                if index + 1 < inner.queue.len() {
                    inner.index = Some(index + 1);
                    self.activate(&inner);
                }
                // At the queue tail the pointer stays put
            }
        }
        Ok(())
    }

    async fn skip_previous(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let Some(index) = inner.index else {
            return Err(Error::playback("no active track to skip from"));
        };

        match inner.repeat {
            RepeatMode::Track => self.activate(&inner),
            RepeatMode::Queue => {
                let len = inner.queue.len();
                inner.index = Some(if index == 0 { len - 1 } else { index - 1 });
                self.activate(&inner);
            }
            RepeatMode::Off => {
                if index > 0 {
                    inner.index = Some(index - 1);
                    self.activate(&inner);
                }
            }
        }
        Ok(())
    }

    async fn skip_to(&self, index: usize) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if index >= inner.queue.len() {
            return Err(Error::playback(format!(
                "queue index {index} out of range ({} entries)",
                inner.queue.len()
            )));
        }
        inner.index = Some(index);
        self.activate(&inner);
        Ok(())
    }

    async fn set_repeat_mode(&self, mode: RepeatMode) -> Result<()> {
        self.inner.lock().unwrap().repeat = mode;
        Ok(())
    }

    async fn state(&self) -> PlaybackState {
        self.inner.lock().unwrap().state
    }

    async fn active_track(&self) -> Option<Track> {
        let inner = self.inner.lock().unwrap();
        inner.index.and_then(|i| inner.queue.get(i).cloned())
    }

    async fn queue(&self) -> Vec<Track> {
        self.inner.lock().unwrap().queue.clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}
