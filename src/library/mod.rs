// Local track library - imported tracks plus the liked/downloaded/recently
// played slices, mirrored to key-value storage on every mutation

pub mod import;

pub use import::{AssetSource, FsAssetSource};

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::storage::{self, keys, KeyValueStore};

/// A playable track. `id` is the stable identity: two tracks are the same
/// entity iff their ids match, and ids survive restarts so persisted
/// playlist membership stays valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Track {
    pub id: String,
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub artwork: Option<String>,
    /// Playable resource locator (file path or remote URI).
    pub url: String,
    /// Duration in milliseconds. All ingestion points convert to ms.
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub liked: bool,
    #[serde(default)]
    pub download_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_played_date: Option<DateTime<Utc>>,
}

impl Track {
    pub fn new(id: impl Into<String>, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: "Unknown Artist".to_string(),
            artwork: None,
            url: url.into(),
            duration_ms: 0,
            liked: false,
            download_date: None,
            last_played_date: None,
        }
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = artist.into();
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

/// How many entries the recently-played slice keeps by default.
pub const DEFAULT_RECENTLY_PLAYED_CAP: usize = 50;

/// Owns the imported track list. The in-memory copy is the source of truth
/// once loaded; persistence is a mirror updated on every mutation, and a
/// mutation only commits to memory after its write succeeded.
pub struct LibraryStore {
    storage: Arc<dyn KeyValueStore>,
    tracks: RwLock<Vec<Track>>,
    liked: RwLock<Vec<Track>>,
    downloaded: RwLock<Vec<Track>>,
    recently_played: RwLock<Vec<Track>>,
    recently_played_cap: usize,
    // Serializes every read-modify-write against the shared blobs.
    write_lock: Mutex<()>,
}

impl LibraryStore {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self::with_recently_played_cap(storage, DEFAULT_RECENTLY_PLAYED_CAP)
    }

    pub fn with_recently_played_cap(storage: Arc<dyn KeyValueStore>, cap: usize) -> Self {
        Self {
            storage,
            tracks: RwLock::new(Vec::new()),
            liked: RwLock::new(Vec::new()),
            downloaded: RwLock::new(Vec::new()),
            recently_played: RwLock::new(Vec::new()),
            recently_played_cap: cap,
            write_lock: Mutex::new(()),
        }
    }

    /// Replace the in-memory list from storage. Missing or malformed data
    /// loads as an empty library.
    pub async fn load(&self) -> Result<()> {
        let tracks: Vec<Track> = storage::load_records(self.storage.as_ref(), keys::LOCAL_TRACKS).await?;
        info!(count = tracks.len(), "loaded local tracks");
        *self.tracks.write().unwrap() = tracks;
        Ok(())
    }

    /// Load the liked/downloaded/recently-played slices in one go.
    pub async fn load_library_data(&self) -> Result<()> {
        let (liked, downloaded, recent) = tokio::join!(
            storage::load_records::<Track>(self.storage.as_ref(), keys::LIKED_TRACKS),
            storage::load_records::<Track>(self.storage.as_ref(), keys::DOWNLOADED_TRACKS),
            storage::load_records::<Track>(self.storage.as_ref(), keys::RECENTLY_PLAYED),
        );
        *self.liked.write().unwrap() = liked?;
        *self.downloaded.write().unwrap() = downloaded?;
        *self.recently_played.write().unwrap() = recent?;
        Ok(())
    }

    pub fn tracks(&self) -> Vec<Track> {
        self.tracks.read().unwrap().clone()
    }

    pub fn liked_tracks(&self) -> Vec<Track> {
        self.liked.read().unwrap().clone()
    }

    pub fn downloaded_tracks(&self) -> Vec<Track> {
        self.downloaded.read().unwrap().clone()
    }

    pub fn recently_played(&self) -> Vec<Track> {
        self.recently_played.read().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.tracks.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.read().unwrap().is_empty()
    }

    /// Append one track. Persists first, then commits to memory.
    pub async fn add(&self, track: Track) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut updated = self.tracks.read().unwrap().clone();
        updated.push(track.clone());

        storage::save_records(self.storage.as_ref(), keys::LOCAL_TRACKS, &updated).await?;
        *self.tracks.write().unwrap() = updated;
        info!(title = %track.title, "added track to library");
        Ok(())
    }

    /// Drop the whole library: removes the persisted key and empties memory.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        self.storage.remove(keys::LOCAL_TRACKS).await?;
        self.tracks.write().unwrap().clear();
        info!("cleared local track library");
        Ok(())
    }

    /// Import a batch of candidate tracks, skipping any id already in the
    /// library. Persists in chunks; a mid-import write failure aborts the
    /// rest of the batch and reports how many tracks landed before it.
    ///
    /// Returns the number of tracks added.
    pub async fn import(&self, candidates: Vec<Track>) -> Result<usize> {
        const CHUNK: usize = 25;

        let _guard = self.write_lock.lock().await;

        let fresh = import::filter_new_tracks(candidates, &self.tracks.read().unwrap());
        if fresh.is_empty() {
            return Ok(0);
        }

        let mut added = 0;
        for chunk in fresh.chunks(CHUNK) {
            let mut updated = self.tracks.read().unwrap().clone();
            updated.extend_from_slice(chunk);

            if let Err(e) =
                storage::save_records(self.storage.as_ref(), keys::LOCAL_TRACKS, &updated).await
            {
                warn!(added, error = %e, "import aborted mid-batch");
                return Err(Error::Import {
                    added,
                    reason: e.to_string(),
                });
            }

            *self.tracks.write().unwrap() = updated;
            added += chunk.len();
        }

        info!(added, "imported tracks into library");
        Ok(added)
    }

    /// Enumerate an asset source and import whatever it yields.
    pub async fn import_from_source(
        &self,
        source: &dyn AssetSource,
        limit: Option<usize>,
    ) -> Result<usize> {
        let candidates = source.fetch_assets(limit).await.map_err(|e| Error::Import {
            added: 0,
            reason: e.to_string(),
        })?;
        self.import(candidates).await
    }

    /// Add or remove a track from the liked slice.
    pub async fn set_liked(&self, track: &Track, liked: bool) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut updated = self.liked.read().unwrap().clone();
        updated.retain(|t| t.id != track.id);
        if liked {
            let mut entry = track.clone();
            entry.liked = true;
            updated.push(entry);
        }

        storage::save_records(self.storage.as_ref(), keys::LIKED_TRACKS, &updated).await?;
        *self.liked.write().unwrap() = updated;
        Ok(())
    }

    /// Record a completed download, stamping the download date.
    pub async fn mark_downloaded(&self, track: &Track) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut updated = self.downloaded.read().unwrap().clone();
        if updated.iter().any(|t| t.id == track.id) {
            return Ok(());
        }
        let mut entry = track.clone();
        entry.download_date = Some(Utc::now());
        updated.push(entry);

        storage::save_records(self.storage.as_ref(), keys::DOWNLOADED_TRACKS, &updated).await?;
        *self.downloaded.write().unwrap() = updated;
        Ok(())
    }

    /// Push a track onto the recently-played slice: most recent first,
    /// de-duplicated by id, capped.
    pub async fn record_played(&self, track: &Track) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut entry = track.clone();
        entry.last_played_date = Some(Utc::now());

        let mut updated = self.recently_played.read().unwrap().clone();
        updated.retain(|t| t.id != track.id);
        updated.insert(0, entry);
        updated.truncate(self.recently_played_cap);

        storage::save_records(self.storage.as_ref(), keys::RECENTLY_PLAYED, &updated).await?;
        *self.recently_played.write().unwrap() = updated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn track(id: &str, title: &str) -> Track {
        Track::new(id, title, format!("file:///music/{id}.mp3"))
    }

    /// Backend that starts failing writes after N successes.
    struct FlakyStore {
        inner: MemoryStore,
        writes_left: AtomicUsize,
    }

    impl FlakyStore {
        fn failing_after(writes: usize) -> Self {
            Self {
                inner: MemoryStore::new(),
                writes_left: AtomicUsize::new(writes),
            }
        }
    }

    #[async_trait]
    impl KeyValueStore for FlakyStore {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<()> {
            if self.writes_left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_err() {
                return Err(Error::persistence("disk full"));
            }
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> Result<()> {
            self.inner.remove(key).await
        }
    }

    #[tokio::test]
    async fn add_persists_and_survives_reload() {
        let storage = Arc::new(MemoryStore::new());
        let library = LibraryStore::new(storage.clone());

        library.add(track("a", "Alpha")).await.unwrap();
        library.add(track("b", "Beta")).await.unwrap();

        let reloaded = LibraryStore::new(storage);
        reloaded.load().await.unwrap();
        let titles: Vec<_> = reloaded.tracks().into_iter().map(|t| t.title).collect();
        assert_eq!(titles, vec!["Alpha", "Beta"]);
    }

    #[tokio::test]
    async fn failed_write_leaves_memory_unchanged() {
        let storage = Arc::new(FlakyStore::failing_after(0));
        let library = LibraryStore::new(storage);

        let err = library.add(track("a", "Alpha")).await.unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
        assert!(library.is_empty());
    }

    #[tokio::test]
    async fn malformed_blob_loads_as_empty() {
        let storage = Arc::new(MemoryStore::new());
        storage.set(keys::LOCAL_TRACKS, "not json at all").await.unwrap();

        let library = LibraryStore::new(storage);
        library.load().await.unwrap();
        assert!(library.is_empty());
    }

    #[tokio::test]
    async fn version_mismatch_loads_as_empty() {
        let storage = Arc::new(MemoryStore::new());
        storage
            .set(keys::LOCAL_TRACKS, r#"{"version":99,"records":[]}"#)
            .await
            .unwrap();

        let library = LibraryStore::new(storage);
        library.load().await.unwrap();
        assert!(library.is_empty());
    }

    #[tokio::test]
    async fn clear_removes_key_and_memory() {
        let storage = Arc::new(MemoryStore::new());
        let library = LibraryStore::new(storage.clone());
        library.add(track("a", "Alpha")).await.unwrap();

        library.clear().await.unwrap();
        assert!(library.is_empty());
        assert_eq!(storage.get(keys::LOCAL_TRACKS).await.unwrap(), None);
    }

    #[tokio::test]
    async fn import_skips_ids_already_present() {
        let library = LibraryStore::new(Arc::new(MemoryStore::new()));
        library.add(track("a", "Alpha")).await.unwrap();

        let added = library
            .import(vec![track("a", "Alpha again"), track("b", "Beta")])
            .await
            .unwrap();

        assert_eq!(added, 1);
        let ids: Vec<_> = library.tracks().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn aborted_import_reports_tracks_added_before_failure() {
        // 26 fresh tracks = two chunks; allow exactly one successful write.
        let storage = Arc::new(FlakyStore::failing_after(1));
        let library = LibraryStore::new(storage);

        let candidates: Vec<_> = (0..26)
            .map(|i| track(&format!("t{i}"), &format!("Track {i}")))
            .collect();

        let err = library.import(candidates).await.unwrap_err();
        match err {
            Error::Import { added, .. } => assert_eq!(added, 25),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(library.len(), 25);
    }

    #[tokio::test]
    async fn recently_played_dedups_caps_and_orders() {
        let storage = Arc::new(MemoryStore::new());
        let library = LibraryStore::with_recently_played_cap(storage, 3);

        for id in ["a", "b", "c", "a", "d"] {
            library.record_played(&track(id, id)).await.unwrap();
        }

        let ids: Vec<_> = library.recently_played().into_iter().map(|t| t.id).collect();
        // "a" replayed moves to the front; cap of 3 drops the oldest.
        assert_eq!(ids, vec!["d", "a", "c"]);
        assert!(library.recently_played()[0].last_played_date.is_some());
    }

    #[tokio::test]
    async fn liked_slice_toggles() {
        let library = LibraryStore::new(Arc::new(MemoryStore::new()));
        let t = track("a", "Alpha");

        library.set_liked(&t, true).await.unwrap();
        assert_eq!(library.liked_tracks().len(), 1);
        assert!(library.liked_tracks()[0].liked);

        library.set_liked(&t, false).await.unwrap();
        assert!(library.liked_tracks().is_empty());
    }

    #[tokio::test]
    async fn mark_downloaded_is_idempotent_and_stamps_date() {
        let library = LibraryStore::new(Arc::new(MemoryStore::new()));
        let t = track("a", "Alpha");

        library.mark_downloaded(&t).await.unwrap();
        library.mark_downloaded(&t).await.unwrap();

        let downloaded = library.downloaded_tracks();
        assert_eq!(downloaded.len(), 1);
        assert!(downloaded[0].download_date.is_some());
    }
}
