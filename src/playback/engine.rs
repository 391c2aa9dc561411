use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Result;
use crate::library::Track;

/// Engine-reported transport state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    /// No queue loaded, nothing to resume.
    #[default]
    Idle,
    Playing,
    Paused,
}

/// Repeat behavior applied when a track finishes or a skip crosses a
/// queue boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RepeatMode {
    #[default]
    Off,
    Track,
    Queue,
}

impl RepeatMode {
    /// The user-facing cycle: Off -> Queue -> Track -> Off.
    pub fn cycled(self) -> Self {
        match self {
            RepeatMode::Off => RepeatMode::Queue,
            RepeatMode::Queue => RepeatMode::Track,
            RepeatMode::Track => RepeatMode::Off,
        }
    }
}

/// Events the engine pushes back at its own pace. Delivery is asynchronous:
/// an `ActiveTrackChanged` may arrive before or after the coordinator's own
/// optimistic update for the same command.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    ActiveTrackChanged(Track),
    StateChanged(PlaybackState),
    /// The queue ran out with repeat off.
    QueueEnded,
    /// The engine could not load or decode the active track.
    Error(String),
}

/// Contract every media backend satisfies. The engine is a process-wide
/// singleton resource; only the playback coordinator issues transport
/// commands to it.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Clear the queue and stop playback. Must complete before a new
    /// queue is submitted so two loads never overlap.
    async fn reset(&self) -> Result<()>;

    /// Append tracks to the playback queue.
    async fn add(&self, tracks: Vec<Track>) -> Result<()>;

    async fn play(&self) -> Result<()>;
    async fn pause(&self) -> Result<()>;

    /// Seek within the active track.
    async fn seek(&self, position: Duration) -> Result<()>;

    async fn skip_next(&self) -> Result<()>;
    async fn skip_previous(&self) -> Result<()>;

    /// Reposition the playback pointer to a queue index.
    async fn skip_to(&self, index: usize) -> Result<()>;

    async fn set_repeat_mode(&self, mode: RepeatMode) -> Result<()>;

    async fn state(&self) -> PlaybackState;
    async fn active_track(&self) -> Option<Track>;
    async fn queue(&self) -> Vec<Track>;

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;
}
