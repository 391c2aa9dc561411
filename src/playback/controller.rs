use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::engine::{EngineEvent, MediaEngine, PlaybackState, RepeatMode};
use crate::error::Result;
use crate::library::Track;
use crate::playlist::Playlist;

/// Coordinator-level view of the session, combining engine-reported state
/// with the optimistic pending track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackPhase {
    Idle,
    /// A queue was submitted; the engine has not confirmed a track yet.
    Loading,
    Playing,
    Paused,
}

/// Playback session state. Ephemeral: lives for the process lifetime and
/// is never persisted.
#[derive(Default)]
struct Session {
    /// Set optimistically when a queue is submitted, before the engine
    /// confirms. An engine event always overrides it.
    pending: Option<Track>,
    /// The engine's last reported active track.
    confirmed: Option<Track>,
    current_playlist: Option<Playlist>,
    /// Value-copy of the local track list, the fallback queue context.
    library: Vec<Track>,
    shuffled: bool,
    repeat: RepeatMode,
}

/// The playback/queue state machine. Translates high-level intents into
/// engine commands and reconciles engine events back into its own state.
///
/// Session state lives behind a mutex that is never held across an await:
/// each operation snapshots what it needs, talks to the engine, then
/// commits.
pub struct PlayerController {
    engine: Arc<dyn MediaEngine>,
    session: Mutex<Session>,
}

/// The queue handed to the engine: the context list rotated so `track`
/// comes first and "next" walks the rest of the list in order, wrapping
/// the front of the list to the back.
fn rotated_queue(context: &[Track], track_id: &str) -> Option<Vec<Track>> {
    let index = context.iter().position(|t| t.id == track_id)?;
    let mut queue = Vec::with_capacity(context.len());
    queue.extend_from_slice(&context[index..]);
    queue.extend_from_slice(&context[..index]);
    Some(queue)
}

impl PlayerController {
    pub fn new(engine: Arc<dyn MediaEngine>) -> Self {
        Self {
            engine,
            session: Mutex::new(Session::default()),
        }
    }

    pub fn engine(&self) -> &Arc<dyn MediaEngine> {
        &self.engine
    }

    /// The track the UI should show as current: the engine's confirmed
    /// track once an event has arrived, the optimistic one until then.
    pub fn current_track(&self) -> Option<Track> {
        let session = self.session.lock().unwrap();
        session.confirmed.clone().or_else(|| session.pending.clone())
    }

    pub fn current_playlist(&self) -> Option<Playlist> {
        self.session.lock().unwrap().current_playlist.clone()
    }

    pub fn is_shuffled(&self) -> bool {
        self.session.lock().unwrap().shuffled
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.session.lock().unwrap().repeat
    }

    pub async fn phase(&self) -> PlaybackPhase {
        let (has_pending, has_confirmed) = {
            let session = self.session.lock().unwrap();
            (session.pending.is_some(), session.confirmed.is_some())
        };
        match self.engine.state().await {
            PlaybackState::Playing => PlaybackPhase::Playing,
            PlaybackState::Paused => PlaybackPhase::Paused,
            PlaybackState::Idle if has_pending && !has_confirmed => PlaybackPhase::Loading,
            PlaybackState::Idle => PlaybackPhase::Idle,
        }
    }

    /// Select the playlist used as queue context for next/previous.
    pub fn set_current_playlist(&self, playlist: Option<Playlist>) {
        self.session.lock().unwrap().current_playlist = playlist;
    }

    /// Push in a fresh copy of the local track list; used as queue context
    /// when no playlist context applies.
    pub fn set_library_snapshot(&self, tracks: Vec<Track>) {
        self.session.lock().unwrap().library = tracks;
    }

    /// Called after a playlist was deleted from the store: a deleted
    /// playlist must never remain the playback context.
    pub fn on_playlist_deleted(&self, playlist_id: &str) {
        let mut session = self.session.lock().unwrap();
        if session
            .current_playlist
            .as_ref()
            .is_some_and(|p| p.id == playlist_id)
        {
            session.current_playlist = None;
        }
    }

    /// Load a track and start playing it.
    ///
    /// The effective queue is the rotation of `context` starting at the
    /// track, falling back to the library snapshot, falling back to the
    /// singleton `[track]`. The engine is reset before the new queue goes
    /// in, so a rapid second load supersedes the first. On engine failure
    /// the previous session state stays untouched.
    pub async fn load_track(&self, track: &Track, context: Option<&[Track]>) -> Result<()> {
        let queue = {
            let session = self.session.lock().unwrap();
            context
                .and_then(|list| rotated_queue(list, &track.id))
                .or_else(|| rotated_queue(&session.library, &track.id))
                .unwrap_or_else(|| vec![track.clone()])
        };

        self.engine.reset().await?;
        self.engine.add(queue).await?;
        self.engine.play().await?;

        let mut session = self.session.lock().unwrap();
        session.pending = Some(track.clone());
        session.confirmed = None;
        Ok(())
    }

    /// Pause if playing, play otherwise. Read-then-act: an engine-driven
    /// state change between the read and the command is tolerated.
    pub async fn toggle_playback(&self) -> Result<()> {
        match self.engine.state().await {
            PlaybackState::Playing => self.engine.pause().await,
            _ => self.engine.play().await,
        }
    }

    pub async fn next_track(&self) -> Result<()> {
        self.skip(SkipDirection::Next).await
    }

    pub async fn previous_track(&self) -> Result<()> {
        self.skip(SkipDirection::Previous).await
    }

    async fn skip(&self, direction: SkipDirection) -> Result<()> {
        // Preferred path: the engine owns a queue, let it do the skip and
        // adopt whatever it reports as active.
        if !self.engine.queue().await.is_empty() {
            match direction {
                SkipDirection::Next => self.engine.skip_next().await?,
                SkipDirection::Previous => self.engine.skip_previous().await?,
            }
            let active = self.engine.active_track().await;
            let mut session = self.session.lock().unwrap();
            session.confirmed = active;
            session.pending = None;
            return Ok(());
        }

        // Fallback path: no native queue, walk the playlist context.
        let (list, current_id, shuffled, repeat) = {
            let session = self.session.lock().unwrap();
            let list = match &session.current_playlist {
                Some(playlist) => playlist.tracks.clone(),
                None => return Ok(()),
            };
            let current_id = session
                .confirmed
                .as_ref()
                .or(session.pending.as_ref())
                .map(|t| t.id.clone());
            (list, current_id, session.shuffled, session.repeat)
        };
        if list.is_empty() {
            return Ok(());
        }
        let Some(current_id) = current_id else {
            return Ok(());
        };
        let Some(index) = list.iter().position(|t| t.id == current_id) else {
            return Ok(());
        };

        let target = if shuffled {
            // Uniform over the whole list; may replay the same track
            Some(rand::thread_rng().gen_range(0..list.len()))
        } else {
            match repeat {
                RepeatMode::Track => Some(index),
                RepeatMode::Queue => Some(match direction {
                    SkipDirection::Next => (index + 1) % list.len(),
                    SkipDirection::Previous => {
                        if index == 0 {
                            list.len() - 1
                        } else {
                            index - 1
                        }
                    }
                }),
                RepeatMode::Off => match direction {
                    SkipDirection::Next => {
                        if index + 1 < list.len() {
                            Some(index + 1)
                        } else {
                            None
                        }
                    }
                    SkipDirection::Previous => index.checked_sub(1),
                },
            }
        };

        match target {
            Some(target) => {
                let track = list[target].clone();
                self.load_track(&track, Some(&list)).await
            }
            None => Ok(()),
        }
    }

    /// Flip shuffle and rebuild the engine queue: a fresh permutation of
    /// the current context when turning on, the original order when
    /// turning off. Best-effort repositioning keeps the playing track
    /// playing.
    pub async fn toggle_shuffle(&self) -> Result<()> {
        let (turning_on, context, current) = {
            let session = self.session.lock().unwrap();
            let context = match &session.current_playlist {
                Some(playlist) => playlist.tracks.clone(),
                None => session.library.clone(),
            };
            let current = session.confirmed.clone().or_else(|| session.pending.clone());
            (!session.shuffled, context, current)
        };

        if context.is_empty() {
            self.session.lock().unwrap().shuffled = turning_on;
            return Ok(());
        }

        let mut rebuilt = context;
        if turning_on {
            rebuilt.shuffle(&mut rand::thread_rng());
        }

        let was_playing = self.engine.state().await == PlaybackState::Playing;
        self.engine.reset().await?;
        self.engine.add(rebuilt.clone()).await?;

        if let Some(current) = &current {
            if let Some(new_index) = rebuilt.iter().position(|t| t.id == current.id) {
                self.engine.skip_to(new_index).await?;
            }
            if was_playing {
                self.engine.play().await?;
            }
        }

        self.session.lock().unwrap().shuffled = turning_on;
        Ok(())
    }

    /// Cycle Off -> Queue -> Track -> Off and hand the new mode to the
    /// engine's native repeat.
    pub async fn toggle_repeat(&self) -> Result<()> {
        let next = self.repeat_mode().cycled();
        self.engine.set_repeat_mode(next).await?;
        self.session.lock().unwrap().repeat = next;
        Ok(())
    }

    /// Seek within the current track, clamped to `[0, duration]`.
    /// No-op when nothing is loaded.
    pub async fn seek_to(&self, position_ms: i64) -> Result<()> {
        let Some(track) = self.current_track() else {
            debug!("seek ignored, no current track");
            return Ok(());
        };
        let clamped = position_ms.clamp(0, track.duration_ms as i64) as u64;
        self.engine.seek(Duration::from_millis(clamped)).await
    }

    /// Apply one engine event to the session. Engine truth wins over any
    /// optimistic update still pending.
    pub fn handle_engine_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::ActiveTrackChanged(track) => {
                let mut session = self.session.lock().unwrap();
                session.confirmed = Some(track);
                session.pending = None;
            }
            EngineEvent::QueueEnded => {
                let mut session = self.session.lock().unwrap();
                session.confirmed = None;
                session.pending = None;
            }
            EngineEvent::Error(message) => {
                warn!(%message, "engine reported a playback error");
                // Never claim a track the engine could not load
                self.session.lock().unwrap().pending = None;
            }
            EngineEvent::StateChanged(_) => {}
        }
    }

    /// Subscribe to the engine and apply its events until the engine side
    /// closes. Spawn once per controller.
    pub fn spawn_event_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        let mut events = controller.engine.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => controller.handle_engine_event(event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "engine event stream lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

#[derive(Clone, Copy)]
enum SkipDirection {
    Next,
    Previous,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::playback::sim::SimulatedEngine;

    fn track(id: &str) -> Track {
        Track::new(id, id.to_uppercase(), format!("file:///music/{id}.mp3"))
            .with_duration_ms(180_000)
    }

    fn context() -> Vec<Track> {
        vec![track("a"), track("b"), track("c"), track("d")]
    }

    fn controller() -> (Arc<SimulatedEngine>, PlayerController) {
        let engine = Arc::new(SimulatedEngine::new());
        let controller = PlayerController::new(engine.clone());
        (engine, controller)
    }

    fn queue_ids(queue: &[Track]) -> Vec<&str> {
        queue.iter().map(|t| t.id.as_str()).collect()
    }

    #[tokio::test]
    async fn load_track_rotates_the_context_list() {
        let (engine, controller) = controller();
        controller
            .load_track(&track("c"), Some(&context()))
            .await
            .unwrap();

        assert_eq!(queue_ids(&engine.queue().await), vec!["c", "d", "a", "b"]);
        assert_eq!(controller.current_track().unwrap().id, "c");
    }

    #[tokio::test]
    async fn load_track_falls_back_to_library_snapshot() {
        let (engine, controller) = controller();
        controller.set_library_snapshot(context());

        controller.load_track(&track("b"), None).await.unwrap();
        assert_eq!(queue_ids(&engine.queue().await), vec!["b", "c", "d", "a"]);
    }

    #[tokio::test]
    async fn unknown_track_plays_as_singleton() {
        let (engine, controller) = controller();
        controller.set_library_snapshot(context());

        controller
            .load_track(&track("zz"), Some(&context()))
            .await
            .unwrap();
        assert_eq!(queue_ids(&engine.queue().await), vec!["zz"]);
    }

    #[tokio::test]
    async fn failed_load_leaves_previous_session_intact() {
        let (engine, controller) = controller();
        controller
            .load_track(&track("a"), Some(&context()))
            .await
            .unwrap();
        // Confirm the first load the way the engine would.
        controller.handle_engine_event(EngineEvent::ActiveTrackChanged(track("a")));

        engine.fail_next_add();
        let err = controller
            .load_track(&track("b"), Some(&context()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Playback(_)));
        assert_eq!(controller.current_track().unwrap().id, "a");
    }

    #[tokio::test]
    async fn engine_confirmation_overrides_optimistic_state() {
        let (_, controller) = controller();
        controller
            .load_track(&track("a"), Some(&context()))
            .await
            .unwrap();

        // Engine settled on a different track than the optimistic one.
        controller.handle_engine_event(EngineEvent::ActiveTrackChanged(track("b")));
        assert_eq!(controller.current_track().unwrap().id, "b");
    }

    #[tokio::test]
    async fn event_listener_applies_engine_events() {
        let (engine, controller) = controller();
        let controller = Arc::new(controller);
        let _listener = controller.spawn_event_listener();

        controller
            .load_track(&track("a"), Some(&context()))
            .await
            .unwrap();
        engine.skip_next().await.unwrap();

        // Bounded wait for the broadcast to be applied.
        for _ in 0..100 {
            if controller.current_track().map(|t| t.id == "b").unwrap_or(false) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(controller.current_track().unwrap().id, "b");
    }

    #[tokio::test]
    async fn next_stays_put_at_tail_with_repeat_off() {
        let (_, controller) = controller();
        let list = vec![track("a"), track("b"), track("c")];
        controller.load_track(&track("a"), Some(&list)).await.unwrap();

        controller.next_track().await.unwrap();
        controller.next_track().await.unwrap();
        assert_eq!(controller.current_track().unwrap().id, "c");

        controller.next_track().await.unwrap();
        assert_eq!(controller.current_track().unwrap().id, "c");
    }

    #[tokio::test]
    async fn next_wraps_with_repeat_queue() {
        let (_, controller) = controller();
        let list = vec![track("a"), track("b"), track("c")];
        controller.load_track(&track("a"), Some(&list)).await.unwrap();
        controller.toggle_repeat().await.unwrap(); // Off -> Queue

        controller.next_track().await.unwrap();
        controller.next_track().await.unwrap();
        controller.next_track().await.unwrap();
        assert_eq!(controller.current_track().unwrap().id, "a");
    }

    #[tokio::test]
    async fn fallback_skip_walks_the_playlist_context() {
        let (_, controller) = controller();
        let playlist = Playlist::new("Mix", vec![track("a"), track("b"), track("c")]);
        controller.set_current_playlist(Some(playlist));
        // Engine has no queue; the session knows the current track only
        // through a stale confirmation.
        controller.handle_engine_event(EngineEvent::ActiveTrackChanged(track("b")));

        controller.next_track().await.unwrap();
        assert_eq!(controller.current_track().unwrap().id, "c");
    }

    #[tokio::test]
    async fn fallback_skip_without_context_is_a_noop() {
        let (_, controller) = controller();
        controller.next_track().await.unwrap();
        assert_eq!(controller.current_track(), None);
    }

    #[tokio::test]
    async fn toggle_repeat_cycles_off_queue_track() {
        let (_engine, controller) = controller();
        assert_eq!(controller.repeat_mode(), RepeatMode::Off);

        controller.toggle_repeat().await.unwrap();
        assert_eq!(controller.repeat_mode(), RepeatMode::Queue);
        controller.toggle_repeat().await.unwrap();
        assert_eq!(controller.repeat_mode(), RepeatMode::Track);
        controller.toggle_repeat().await.unwrap();
        assert_eq!(controller.repeat_mode(), RepeatMode::Off);
    }

    #[tokio::test]
    async fn toggle_shuffle_permutes_and_keeps_the_current_track() {
        let (engine, controller) = controller();
        let playlist = Playlist::new("Mix", context());
        controller.set_current_playlist(Some(playlist));
        controller
            .load_track(&track("b"), Some(&context()))
            .await
            .unwrap();

        controller.toggle_shuffle().await.unwrap();
        assert!(controller.is_shuffled());

        let mut shuffled_ids: Vec<String> = engine
            .queue()
            .await
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(shuffled_ids.len(), 4);
        shuffled_ids.sort();
        assert_eq!(shuffled_ids, vec!["a", "b", "c", "d"]);

        // The playing track survived the rebuild and playback continues.
        assert_eq!(engine.active_track().await.unwrap().id, "b");
        assert_eq!(engine.state().await, PlaybackState::Playing);

        controller.toggle_shuffle().await.unwrap();
        assert!(!controller.is_shuffled());
        assert_eq!(queue_ids(&engine.queue().await), vec!["a", "b", "c", "d"]);
        assert_eq!(engine.active_track().await.unwrap().id, "b");
    }

    #[tokio::test]
    async fn seek_clamps_at_both_ends() {
        let (engine, controller) = controller();
        controller
            .load_track(&track("a"), Some(&context()))
            .await
            .unwrap();

        controller.seek_to(-5).await.unwrap();
        controller.seek_to(180_000 + 100).await.unwrap();

        assert_eq!(
            engine.recorded_seeks(),
            vec![Duration::from_millis(0), Duration::from_millis(180_000)]
        );
    }

    #[tokio::test]
    async fn seek_without_a_track_is_a_noop() {
        let (engine, controller) = controller();
        controller.seek_to(1_000).await.unwrap();
        assert!(engine.recorded_seeks().is_empty());
    }

    #[tokio::test]
    async fn toggle_playback_pauses_and_resumes() {
        let (engine, controller) = controller();
        controller
            .load_track(&track("a"), Some(&context()))
            .await
            .unwrap();
        assert_eq!(engine.state().await, PlaybackState::Playing);

        controller.toggle_playback().await.unwrap();
        assert_eq!(engine.state().await, PlaybackState::Paused);
        controller.toggle_playback().await.unwrap();
        assert_eq!(engine.state().await, PlaybackState::Playing);
    }

    #[tokio::test]
    async fn queue_end_returns_the_session_to_idle() {
        let (engine, controller) = controller();
        // No context anywhere: the track plays as a singleton queue.
        controller.load_track(&track("zz"), None).await.unwrap();
        controller.handle_engine_event(EngineEvent::ActiveTrackChanged(track("zz")));

        engine.finish_current();
        controller.handle_engine_event(EngineEvent::QueueEnded);

        assert_eq!(controller.current_track(), None);
        assert_eq!(controller.phase().await, PlaybackPhase::Idle);
    }

    #[tokio::test]
    async fn deleted_playlist_clears_the_playback_context() {
        let (_, controller) = controller();
        let playlist = Playlist::new("Mix", context());
        let id = playlist.id.clone();
        controller.set_current_playlist(Some(playlist));

        controller.on_playlist_deleted("other-playlist");
        assert!(controller.current_playlist().is_some());

        controller.on_playlist_deleted(&id);
        assert!(controller.current_playlist().is_none());
    }

    #[tokio::test]
    async fn engine_error_drops_the_pending_track() {
        let (_, controller) = controller();
        controller
            .load_track(&track("a"), Some(&context()))
            .await
            .unwrap();

        controller.handle_engine_event(EngineEvent::Error("decode failed".into()));
        assert_eq!(controller.current_track(), None);
    }

    #[test]
    fn rotation_of_the_first_element_is_the_identity() {
        let list = context();
        let rotated = rotated_queue(&list, "a").unwrap();
        assert_eq!(queue_ids(&rotated), vec!["a", "b", "c", "d"]);
        assert!(rotated_queue(&list, "zz").is_none());
    }
}
