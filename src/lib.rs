// Ocarina - music player core
// Library import, playlists, and queue-aware playback coordination;
// rendering and navigation live in whatever shell embeds this

pub mod app;       // application state object wiring everything together
pub mod config;    // settings and preferences
pub mod error;     // crate-wide error taxonomy
pub mod library;   // imported tracks + liked/downloaded/recent slices
pub mod playback;  // media engine contract and the playback coordinator
pub mod playlist;  // named track collections
pub mod storage;   // key-value persistence backends

// Export the stuff embedding shells actually use
pub use app::App;
pub use config::Config;
pub use error::{Error, Result};
pub use library::{AssetSource, FsAssetSource, LibraryStore, Track};
pub use playback::{
    EngineEvent, MediaEngine, PlaybackPhase, PlaybackState, PlayerController, RepeatMode,
    SimulatedEngine,
};
#[cfg(feature = "audio")]
pub use playback::RodioEngine;
pub use playlist::{Playlist, PlaylistStore};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
