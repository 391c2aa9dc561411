// Real audio backend on a dedicated playback thread. The audio output
// handle is not Send, so it lives on its own thread; the trait side only
// touches shared queue state and a command channel.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::engine::{EngineEvent, MediaEngine, PlaybackState, RepeatMode};
use crate::error::{Error, Result};
use crate::library::Track;

const EVENT_CHANNEL_CAPACITY: usize = 64;
const COMPLETION_POLL_INTERVAL: Duration = Duration::from_millis(200);

enum Command {
    Load { track: Track, start_paused: bool },
    Resume,
    Pause,
    Stop,
    Seek(Duration),
    Shutdown,
}

#[derive(Default)]
struct QueueState {
    tracks: Vec<Track>,
    index: Option<usize>,
    state: PlaybackState,
    repeat: RepeatMode,
}

struct Shared {
    queue: Mutex<QueueState>,
    events: broadcast::Sender<EngineEvent>,
}

impl Shared {
    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }
}

/// Media engine backed by the system audio output via rodio.
///
/// One track plays at a time; queue bookkeeping stays on this side and the
/// playback thread is told which track to decode next. Completion is
/// detected by polling the sink and advances the queue per the native
/// repeat mode.
pub struct RodioEngine {
    shared: Arc<Shared>,
    commands: Mutex<mpsc::Sender<Command>>,
    volume: f32,
}

impl RodioEngine {
    pub fn new() -> Result<Self> {
        Self::with_volume(1.0)
    }

    pub fn with_volume(volume: f32) -> Result<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Arc::new(Shared {
            queue: Mutex::new(QueueState::default()),
            events,
        });

        let (commands, command_rx) = mpsc::channel();
        let (init_tx, init_rx) = mpsc::channel();

        let worker_shared = Arc::clone(&shared);
        std::thread::Builder::new()
            .name("ocarina-playback".to_string())
            .spawn(move || playback_thread(worker_shared, command_rx, init_tx, volume))
            .map_err(|e| Error::playback(format!("failed to spawn playback thread: {e}")))?;

        // The output device must be opened on the playback thread; wait for
        // the verdict before handing the engine out.
        match init_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(message)) => return Err(Error::playback(message)),
            Err(_) => return Err(Error::playback("playback thread died during startup")),
        }

        info!("audio output ready");
        Ok(Self {
            shared,
            commands: Mutex::new(commands),
            volume,
        })
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .lock()
            .unwrap()
            .send(command)
            .map_err(|_| Error::playback("playback thread is gone"))
    }

    /// Shared skip policy: where does the pointer land, honoring the
    /// native repeat mode. `None` means stay put.
    fn neighbor(queue: &QueueState, forward: bool) -> Option<usize> {
        let index = queue.index?;
        let len = queue.tracks.len();
        match queue.repeat {
            RepeatMode::Track => Some(index),
            RepeatMode::Queue => Some(if forward {
                (index + 1) % len
            } else if index == 0 {
                len - 1
            } else {
                index - 1
            }),
            RepeatMode::Off => {
                if forward {
                    (index + 1 < len).then_some(index + 1)
                } else {
                    index.checked_sub(1)
                }
            }
        }
    }

    fn skip_with(&self, forward: bool) -> Result<()> {
        let (target, start_paused) = {
            let mut queue = self.shared.queue.lock().unwrap();
            if queue.index.is_none() {
                return Err(Error::playback("no active track to skip from"));
            }
            let Some(target) = Self::neighbor(&queue, forward) else {
                return Ok(());
            };
            queue.index = Some(target);
            (
                queue.tracks[target].clone(),
                queue.state != PlaybackState::Playing,
            )
        };
        self.send(Command::Load {
            track: target,
            start_paused,
        })
    }
}

impl Drop for RodioEngine {
    fn drop(&mut self) {
        let _ = self.send(Command::Shutdown);
    }
}

#[async_trait]
impl MediaEngine for RodioEngine {
    async fn reset(&self) -> Result<()> {
        {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.tracks.clear();
            queue.index = None;
            queue.state = PlaybackState::Idle;
        }
        self.send(Command::Stop)
    }

    async fn add(&self, tracks: Vec<Track>) -> Result<()> {
        self.shared.queue.lock().unwrap().tracks.extend(tracks);
        Ok(())
    }

    async fn play(&self) -> Result<()> {
        let load = {
            let mut queue = self.shared.queue.lock().unwrap();
            if queue.tracks.is_empty() {
                return Err(Error::playback("cannot play an empty queue"));
            }
            match queue.index {
                // Resuming an already-loaded track
                Some(_) if queue.state == PlaybackState::Paused => None,
                Some(i) => Some(queue.tracks[i].clone()),
                None => {
                    queue.index = Some(0);
                    Some(queue.tracks[0].clone())
                }
            }
        };
        match load {
            Some(track) => self.send(Command::Load {
                track,
                start_paused: false,
            }),
            None => self.send(Command::Resume),
        }
    }

    async fn pause(&self) -> Result<()> {
        self.send(Command::Pause)
    }

    async fn seek(&self, position: Duration) -> Result<()> {
        if self.shared.queue.lock().unwrap().index.is_none() {
            return Err(Error::playback("no active track to seek in"));
        }
        self.send(Command::Seek(position))
    }

    async fn skip_next(&self) -> Result<()> {
        self.skip_with(true)
    }

    async fn skip_previous(&self) -> Result<()> {
        self.skip_with(false)
    }

    async fn skip_to(&self, index: usize) -> Result<()> {
        let (track, start_paused) = {
            let mut queue = self.shared.queue.lock().unwrap();
            if index >= queue.tracks.len() {
                return Err(Error::playback(format!(
                    "queue index {index} out of range ({} entries)",
                    queue.tracks.len()
                )));
            }
            queue.index = Some(index);
            (
                queue.tracks[index].clone(),
                queue.state != PlaybackState::Playing,
            )
        };
        self.send(Command::Load { track, start_paused })
    }

    async fn set_repeat_mode(&self, mode: RepeatMode) -> Result<()> {
        self.shared.queue.lock().unwrap().repeat = mode;
        Ok(())
    }

    async fn state(&self) -> PlaybackState {
        self.shared.queue.lock().unwrap().state
    }

    async fn active_track(&self) -> Option<Track> {
        let queue = self.shared.queue.lock().unwrap();
        queue.index.and_then(|i| queue.tracks.get(i).cloned())
    }

    async fn queue(&self) -> Vec<Track> {
        self.shared.queue.lock().unwrap().tracks.clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.shared.events.subscribe()
    }
}

/// Everything that must touch the audio device runs here.
fn playback_thread(
    shared: Arc<Shared>,
    commands: mpsc::Receiver<Command>,
    init_tx: mpsc::Sender<std::result::Result<(), String>>,
    volume: f32,
) {
    let (stream, handle) = match OutputStream::try_default() {
        Ok(pair) => pair,
        Err(e) => {
            let _ = init_tx.send(Err(format!("failed to open audio output: {e}")));
            return;
        }
    };
    // Keep the stream alive for the lifetime of the thread
    let _stream = stream;
    let _ = init_tx.send(Ok(()));

    let mut sink: Option<Sink> = None;

    loop {
        match commands.recv_timeout(COMPLETION_POLL_INTERVAL) {
            Ok(Command::Load { track, start_paused }) => {
                if let Some(old) = sink.take() {
                    old.stop();
                }
                match open_sink(&handle, &track, volume) {
                    Ok(new_sink) => {
                        let state = if start_paused {
                            new_sink.pause();
                            PlaybackState::Paused
                        } else {
                            PlaybackState::Playing
                        };
                        sink = Some(new_sink);
                        shared.queue.lock().unwrap().state = state;
                        shared.emit(EngineEvent::ActiveTrackChanged(track));
                        shared.emit(EngineEvent::StateChanged(state));
                    }
                    Err(message) => {
                        warn!(url = %track.url, %message, "failed to load track");
                        // Idle keeps the intent retryable: the next play()
                        // re-submits the load instead of resuming nothing
                        shared.queue.lock().unwrap().state = PlaybackState::Idle;
                        shared.emit(EngineEvent::Error(message));
                    }
                }
            }
            Ok(Command::Resume) => {
                if let Some(sink) = &sink {
                    sink.play();
                    shared.queue.lock().unwrap().state = PlaybackState::Playing;
                    shared.emit(EngineEvent::StateChanged(PlaybackState::Playing));
                }
            }
            Ok(Command::Pause) => {
                if let Some(sink) = &sink {
                    sink.pause();
                    shared.queue.lock().unwrap().state = PlaybackState::Paused;
                    shared.emit(EngineEvent::StateChanged(PlaybackState::Paused));
                }
            }
            Ok(Command::Stop) => {
                if let Some(old) = sink.take() {
                    old.stop();
                }
            }
            Ok(Command::Seek(position)) => {
                if let Some(sink) = &sink {
                    if let Err(e) = sink.try_seek(position) {
                        warn!(?position, "seek failed: {e}");
                    }
                }
            }
            Ok(Command::Shutdown) => break,
            Err(RecvTimeoutError::Timeout) => {
                // Completion check: the sink draining empty means the
                // active track finished.
                let finished = sink.as_ref().map(|s| s.empty()).unwrap_or(false);
                let playing =
                    shared.queue.lock().unwrap().state == PlaybackState::Playing;
                if !(finished && playing) {
                    continue;
                }

                match self_advance(&shared) {
                    Some(track) => {
                        debug!(title = %track.title, "auto-advancing to next track");
                        if let Some(old) = sink.take() {
                            old.stop();
                        }
                        match open_sink(&handle, &track, volume) {
                            Ok(new_sink) => {
                                sink = Some(new_sink);
                                shared.queue.lock().unwrap().state = PlaybackState::Playing;
                                shared.emit(EngineEvent::ActiveTrackChanged(track));
                            }
                            Err(message) => {
                                shared.queue.lock().unwrap().state = PlaybackState::Idle;
                                shared.emit(EngineEvent::Error(message));
                            }
                        }
                    }
                    None => {
                        sink = None;
                        shared.emit(EngineEvent::QueueEnded);
                        shared.emit(EngineEvent::StateChanged(PlaybackState::Idle));
                    }
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Advance the queue pointer after a track completed. Returns the track to
/// load next, or `None` when the queue ended (pointer cleared, state Idle).
fn self_advance(shared: &Shared) -> Option<Track> {
    let mut queue = shared.queue.lock().unwrap();
    let index = queue.index?;
    let len = queue.tracks.len();

    let next = match queue.repeat {
        RepeatMode::Track => Some(index),
        RepeatMode::Queue => Some((index + 1) % len),
        RepeatMode::Off => (index + 1 < len).then_some(index + 1),
    };

    match next {
        Some(next) => {
            queue.index = Some(next);
            Some(queue.tracks[next].clone())
        }
        None => {
            queue.index = None;
            queue.state = PlaybackState::Idle;
            None
        }
    }
}

fn open_sink(
    handle: &OutputStreamHandle,
    track: &Track,
    volume: f32,
) -> std::result::Result<Sink, String> {
    let path = Path::new(&track.url);
    let file = File::open(path).map_err(|e| format!("failed to open {}: {e}", track.url))?;
    let source = Decoder::new(BufReader::new(file))
        .map_err(|e| format!("failed to decode {}: {e}", track.url))?;

    let sink = Sink::try_new(handle).map_err(|e| format!("failed to open sink: {e}"))?;
    sink.set_volume(volume);
    sink.append(source);
    Ok(sink)
}
