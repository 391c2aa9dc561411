// Key-value persistence - the durable side of the library and playlist stores
// One JSON blob per key, no cross-key transactions

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;

/// Storage keys shared with the rest of the crate.
///
/// The names are part of the on-disk contract; renaming one orphans the
/// data persisted under the old name.
pub mod keys {
    pub const LOCAL_TRACKS: &str = "localTracks";
    pub const PLAYLISTS: &str = "playlists";
    pub const LIKED_TRACKS: &str = "likedTracks";
    pub const DOWNLOADED_TRACKS: &str = "downloadedTracks";
    pub const RECENTLY_PLAYED: &str = "recentlyPlayed";
}

/// Async key-value backend. Callers must tolerate interleaving: two
/// mutations of the same key from concurrent intents race unless the
/// caller serializes them.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Current persisted-envelope version. Bump on any breaking record change.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    version: u32,
    records: Vec<T>,
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    version: u32,
    records: &'a [T],
}

/// Read a record collection from `key`.
///
/// A missing key, malformed JSON, or a version mismatch all load as an
/// empty collection; the store never refuses to start over bad data.
pub async fn load_records<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Vec<T>> {
    let Some(raw) = store.get(key).await? else {
        return Ok(Vec::new());
    };

    match serde_json::from_str::<Envelope<T>>(&raw) {
        Ok(envelope) if envelope.version == FORMAT_VERSION => Ok(envelope.records),
        Ok(envelope) => {
            warn!(
                key,
                version = envelope.version,
                "unsupported persisted format version, treating as empty"
            );
            Ok(Vec::new())
        }
        Err(e) => {
            warn!(key, error = %e, "failed to parse persisted records, treating as empty");
            Ok(Vec::new())
        }
    }
}

/// Write a record collection under `key`, wrapped in the versioned envelope.
pub async fn save_records<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    records: &[T],
) -> Result<()> {
    let envelope = serde_json::to_string(&EnvelopeRef {
        version: FORMAT_VERSION,
        records,
    })?;
    store.set(key, &envelope).await
}
