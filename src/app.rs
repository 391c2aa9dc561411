// Application state - one explicit object bundling config, stores, and the
// playback coordinator. UI layers hold this by reference; there is no
// ambient global.

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::library::{AssetSource, LibraryStore, Track};
use crate::playback::{MediaEngine, PlayerController};
use crate::playlist::{Playlist, PlaylistStore};
use crate::storage::KeyValueStore;

pub struct App {
    pub config: Config,
    pub library: LibraryStore,
    pub playlists: PlaylistStore,
    pub player: Arc<PlayerController>,
}

impl App {
    /// Wire up the stores and coordinator over the given storage backend
    /// and media engine, and start applying engine events.
    pub fn new(
        config: Config,
        storage: Arc<dyn KeyValueStore>,
        engine: Arc<dyn MediaEngine>,
    ) -> Self {
        let library =
            LibraryStore::with_recently_played_cap(storage.clone(), config.recently_played_cap);
        let playlists = PlaylistStore::new(storage);
        let player = Arc::new(PlayerController::new(engine));
        // The listener task runs until the engine's event channel closes
        let _ = player.spawn_event_listener();

        Self {
            config,
            library,
            playlists,
            player,
        }
    }

    /// Load everything the UI needs at startup: local tracks, playlists,
    /// and the liked/downloaded/recently-played slices.
    pub async fn load_library_data(&self) -> Result<()> {
        self.library.load().await?;
        self.playlists.load().await?;
        self.library.load_library_data().await?;
        self.player.set_library_snapshot(self.library.tracks());
        info!(
            tracks = self.library.len(),
            playlists = self.playlists.playlists().len(),
            "library data loaded"
        );
        Ok(())
    }

    /// Play a track, in its playlist context when one is given and actually
    /// contains the track, otherwise against the local library.
    pub async fn play_track(&self, track: &Track, playlist: Option<&Playlist>) -> Result<()> {
        self.player.set_library_snapshot(self.library.tracks());

        match playlist {
            Some(playlist) if playlist.contains(&track.id) => {
                self.player.set_current_playlist(Some(playlist.clone()));
                self.player
                    .load_track(track, Some(&playlist.tracks))
                    .await?;
            }
            _ => {
                self.player.set_current_playlist(None);
                self.player.load_track(track, None).await?;
            }
        }

        self.library.record_played(track).await?;
        Ok(())
    }

    /// Delete a playlist and release it as the playback context if it was
    /// the current one.
    pub async fn delete_playlist(&self, playlist_id: &str) -> Result<bool> {
        let removed = self.playlists.delete(playlist_id).await?;
        if removed {
            self.player.on_playlist_deleted(playlist_id);
        }
        Ok(removed)
    }

    /// Import tracks from an asset source, skipping ids already present.
    /// Returns the number of tracks added.
    pub async fn import_local_tracks(
        &self,
        source: &dyn AssetSource,
        limit: Option<usize>,
    ) -> Result<usize> {
        let added = self.library.import_from_source(source, limit).await?;
        self.player.set_library_snapshot(self.library.tracks());
        Ok(added)
    }
}
