// Playback - the queue-aware coordination layer between UI intents and
// whatever media engine is actually producing sound

pub mod controller;
pub mod engine;
#[cfg(feature = "audio")]
pub mod rodio;
pub mod sim;

pub use controller::{PlaybackPhase, PlayerController};
pub use engine::{EngineEvent, MediaEngine, PlaybackState, RepeatMode};
#[cfg(feature = "audio")]
pub use rodio::RodioEngine;
pub use sim::SimulatedEngine;
