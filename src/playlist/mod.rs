// Playlist management - named ordered track collections, persisted as one
// collection blob under the `playlists` key

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::error::Result;
use crate::library::Track;
use crate::storage::{self, keys, KeyValueStore};

/// A named, ordered collection of tracks. A track appears at most once per
/// playlist (by id); deletion preserves the relative order of survivors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub tracks: Vec<Track>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub artwork: Option<String>,
}

impl Playlist {
    pub fn new(name: impl Into<String>, tracks: Vec<Track>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            tracks,
            created_at: Utc::now(),
            artwork: None,
        }
    }

    pub fn contains(&self, track_id: &str) -> bool {
        self.tracks.iter().any(|t| t.id == track_id)
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

/// Owns every playlist. Mutations persist the entire collection first and
/// only then commit to memory; the write lock serializes the
/// read-modify-write cycle so rapid intents cannot lose an update.
pub struct PlaylistStore {
    storage: Arc<dyn KeyValueStore>,
    playlists: RwLock<Vec<Playlist>>,
    write_lock: Mutex<()>,
}

impl PlaylistStore {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self {
            storage,
            playlists: RwLock::new(Vec::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Replace the in-memory collection from storage.
    pub async fn load(&self) -> Result<()> {
        let playlists: Vec<Playlist> =
            storage::load_records(self.storage.as_ref(), keys::PLAYLISTS).await?;
        info!(count = playlists.len(), "loaded playlists");
        *self.playlists.write().unwrap() = playlists;
        Ok(())
    }

    pub fn playlists(&self) -> Vec<Playlist> {
        self.playlists.read().unwrap().clone()
    }

    pub fn get(&self, id: &str) -> Option<Playlist> {
        self.playlists.read().unwrap().iter().find(|p| p.id == id).cloned()
    }

    /// Create a playlist with a fresh id and persist it.
    pub async fn create(&self, name: impl Into<String>, tracks: Vec<Track>) -> Result<Playlist> {
        let _guard = self.write_lock.lock().await;

        let playlist = Playlist::new(name, tracks);
        let mut updated = self.playlists.read().unwrap().clone();
        updated.push(playlist.clone());

        self.persist(&updated).await?;
        *self.playlists.write().unwrap() = updated;
        info!(name = %playlist.name, "created playlist");
        Ok(playlist)
    }

    /// Replace name and tracks of the playlist matching `id`.
    /// No-op if no playlist matches.
    pub async fn update(&self, id: &str, name: impl Into<String>, tracks: Vec<Track>) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut updated = self.playlists.read().unwrap().clone();
        let Some(playlist) = updated.iter_mut().find(|p| p.id == id) else {
            return Ok(());
        };
        playlist.name = name.into();
        playlist.tracks = tracks;

        self.persist(&updated).await?;
        *self.playlists.write().unwrap() = updated;
        Ok(())
    }

    /// Remove the playlist matching `id`. Returns whether anything was
    /// removed so the caller can release a now-dangling playback context.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        let mut updated = self.playlists.read().unwrap().clone();
        let before = updated.len();
        updated.retain(|p| p.id != id);
        if updated.len() == before {
            return Ok(false);
        }

        self.persist(&updated).await?;
        *self.playlists.write().unwrap() = updated;
        info!(id, "deleted playlist");
        Ok(true)
    }

    /// Append a track to a playlist. Idempotent: a second add of the same
    /// track id leaves the playlist unchanged. Missing playlist is a no-op.
    pub async fn add_track(&self, playlist_id: &str, track: Track) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut updated = self.playlists.read().unwrap().clone();
        let Some(playlist) = updated.iter_mut().find(|p| p.id == playlist_id) else {
            return Ok(());
        };
        if playlist.contains(&track.id) {
            return Ok(());
        }
        playlist.tracks.push(track);

        self.persist(&updated).await?;
        *self.playlists.write().unwrap() = updated;
        Ok(())
    }

    /// Remove a track by id from a playlist. No-op if either is missing.
    pub async fn remove_track(&self, playlist_id: &str, track_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut updated = self.playlists.read().unwrap().clone();
        let Some(playlist) = updated.iter_mut().find(|p| p.id == playlist_id) else {
            return Ok(());
        };
        let before = playlist.tracks.len();
        playlist.tracks.retain(|t| t.id != track_id);
        if playlist.tracks.len() == before {
            return Ok(());
        }

        self.persist(&updated).await?;
        *self.playlists.write().unwrap() = updated;
        Ok(())
    }

    async fn persist(&self, playlists: &[Playlist]) -> Result<()> {
        storage::save_records(self.storage.as_ref(), keys::PLAYLISTS, playlists).await
    }
}
