// Asset import - enumerating playable media from a source device/filesystem
// and converting what it finds into library tracks

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};
use walkdir::WalkDir;
use xxhash_rust::xxh64::xxh64;

use super::Track;
use crate::error::Result;

/// A source of importable media assets (device library, filesystem, ...).
/// Enumeration failures abort the whole batch.
#[async_trait]
pub trait AssetSource: Send + Sync {
    async fn fetch_assets(&self, limit: Option<usize>) -> Result<Vec<Track>>;
}

/// Drop candidates whose id already exists in the library, so re-importing
/// the same assets never creates duplicate entries.
pub fn filter_new_tracks(candidates: Vec<Track>, existing: &[Track]) -> Vec<Track> {
    let existing_ids: HashSet<&str> = existing.iter().map(|t| t.id.as_str()).collect();
    candidates
        .into_iter()
        .filter(|t| !existing_ids.contains(t.id.as_str()))
        .collect()
}

/// Stable track identity for a filesystem asset: hash of the canonical
/// path, so the same file yields the same id on every scan.
pub fn stable_track_id(path: &Path) -> String {
    let canonical = path
        .canonicalize()
        .unwrap_or_else(|_| path.to_path_buf());
    format!("{:016x}", xxh64(canonical.to_string_lossy().as_bytes(), 0))
}

/// Filesystem asset source: walks the configured roots and turns audio
/// files into tracks, reading tags where the format supports them.
#[derive(Clone)]
pub struct FsAssetSource {
    roots: Vec<PathBuf>,
    supported_extensions: Vec<String>,
}

impl FsAssetSource {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            supported_extensions: vec![
                "mp3".to_string(),
                "flac".to_string(),
                "ogg".to_string(),
                "oga".to_string(),
                "mp4".to_string(),
                "m4a".to_string(),
                "aac".to_string(),
                "wav".to_string(),
            ],
        }
    }

    fn is_supported_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let normalized = ext.to_ascii_lowercase();
                self.supported_extensions.contains(&normalized)
            })
            .unwrap_or(false)
    }

    fn track_from_file(&self, path: &Path) -> Track {
        let stem_title = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("Unknown Title")
            .to_string();

        let mut track = Track::new(
            stable_track_id(path),
            stem_title,
            path.to_string_lossy().to_string(),
        );

        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("mp3") => self.apply_id3_tags(path, &mut track),
            Some("mp4" | "m4a" | "aac") => self.apply_mp4_tags(path, &mut track),
            _ => {}
        }

        track
    }

    fn apply_id3_tags(&self, path: &Path, track: &mut Track) {
        use id3::TagLike;

        match id3::Tag::read_from_path(path) {
            Ok(tag) => {
                if let Some(title) = tag.title() {
                    track.title = title.to_string();
                }
                if let Some(artist) = tag.artist() {
                    track.artist = artist.to_string();
                }
                if let Some(duration_ms) = tag.duration() {
                    // TLEN frame is already milliseconds
                    track.duration_ms = u64::from(duration_ms);
                }
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "no readable id3 tag, using filename");
            }
        }
    }

    fn apply_mp4_tags(&self, path: &Path, track: &mut Track) {
        match mp4ameta::Tag::read_from_path(path) {
            Ok(tag) => {
                if let Some(title) = tag.title() {
                    track.title = title.to_string();
                }
                if let Some(artist) = tag.artist() {
                    track.artist = artist.to_string();
                }
                if let Some(duration) = tag.duration() {
                    track.duration_ms = duration.as_millis() as u64;
                }
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "no readable mp4 tag, using filename");
            }
        }
    }
}

#[async_trait]
impl AssetSource for FsAssetSource {
    async fn fetch_assets(&self, limit: Option<usize>) -> Result<Vec<Track>> {
        let mut tracks = Vec::new();
        let cap = limit.unwrap_or(usize::MAX);

        'roots: for root in &self.roots {
            if !root.exists() {
                warn!(root = %root.display(), "skipping missing import root");
                continue;
            }

            for entry in WalkDir::new(root)
                .follow_links(true)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let path = entry.path();
                if !entry.file_type().is_file() {
                    continue;
                }
                // Skip hidden files (dotfiles)
                if path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map_or(false, |n| n.starts_with('.'))
                {
                    continue;
                }
                // Skip empty files
                if entry.metadata().map(|m| m.len() == 0).unwrap_or(true) {
                    continue;
                }
                if !self.is_supported_file(path) {
                    continue;
                }

                tracks.push(self.track_from_file(path));
                if tracks.len() >= cap {
                    break 'roots;
                }

                // Yield periodically so a large scan doesn't hog the runtime
                if tracks.len() % 10 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        }

        Ok(tracks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn filter_new_tracks_drops_known_ids() {
        let existing = vec![Track::new("a", "Alpha", "file:///a")];
        let candidates = vec![
            Track::new("a", "Alpha", "file:///a"),
            Track::new("b", "Beta", "file:///b"),
        ];

        let fresh = filter_new_tracks(candidates, &existing);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].id, "b");
    }

    #[test]
    fn stable_id_is_deterministic_per_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.mp3");
        fs::write(&path, b"not really audio").unwrap();

        assert_eq!(stable_track_id(&path), stable_track_id(&path));
        let other = dir.path().join("other.mp3");
        fs::write(&other, b"different file").unwrap();
        assert_ne!(stable_track_id(&path), stable_track_id(&other));
    }

    #[tokio::test]
    async fn scan_picks_up_audio_files_and_falls_back_to_filename() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("First Song.mp3"), b"xx").unwrap();
        fs::write(dir.path().join("notes.txt"), b"xx").unwrap();
        fs::write(dir.path().join(".hidden.mp3"), b"xx").unwrap();
        fs::write(dir.path().join("empty.mp3"), b"").unwrap();

        let source = FsAssetSource::new(vec![dir.path().to_path_buf()]);
        let assets = source.fetch_assets(None).await.unwrap();

        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].title, "First Song");
        assert_eq!(assets[0].artist, "Unknown Artist");
    }

    #[tokio::test]
    async fn rescan_yields_identical_ids() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.mp3"), b"xx").unwrap();
        fs::write(dir.path().join("b.mp3"), b"xx").unwrap();

        let source = FsAssetSource::new(vec![dir.path().to_path_buf()]);
        let mut first: Vec<_> = source
            .fetch_assets(None)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        let mut second: Vec<_> = source
            .fetch_assets(None)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        first.sort();
        second.sort();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn limit_caps_enumeration() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            fs::write(dir.path().join(format!("t{i}.mp3")), b"xx").unwrap();
        }

        let source = FsAssetSource::new(vec![dir.path().to_path_buf()]);
        let assets = source.fetch_assets(Some(3)).await.unwrap();
        assert_eq!(assets.len(), 3);
    }
}
