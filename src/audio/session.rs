//! Per-channel playback session.
//!
//! A [`Session`] owns the queue of one voice channel and runs a background
//! loop that moves it between idle and playing. Queue, current track and the
//! playing flag live behind one lock so that "am I idle" checks made by
//! commands never race the loop's dequeue.
//!
//! Lock order: `state` is a synchronous lock and is never held across an
//! `.await`. The connection slot is an async lock; holding it is what keeps a
//! track from starting after [`Session::leave`] has disconnected.

use parking_lot::Mutex as SyncMutex;
use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Weak},
    time::{Duration, Instant},
};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::transport::{Connection, Destination, FinishedCallback};
use crate::{
    error::{PlaybackError, ResolutionError, SessionError},
    sources::{Resolver, Track},
};

/// Tunables shared by every session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Fallback wake-up interval of the playback loop.
    pub poll_interval: Duration,
    pub resolve_timeout: Duration,
    /// Time the transport gets to start a track before it counts as failed.
    pub playback_start_timeout: Duration,
    pub max_queue_size: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            resolve_timeout: Duration::from_secs(30),
            playback_start_timeout: Duration::from_secs(15),
            max_queue_size: 1000,
        }
    }
}

/// Result of a successful [`Session::enqueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The session was idle; the loop picks the track up on its next wake.
    NowPlaying(Track),
    Added(Track),
    AddedMany(usize),
}

impl fmt::Display for EnqueueOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnqueueOutcome::NowPlaying(track) => write!(f, "Now playing: {}", track.title()),
            EnqueueOutcome::Added(track) => write!(f, "Added {} to queue.", track.title()),
            EnqueueOutcome::AddedMany(count) => write!(f, "Added {} songs to queue.", count),
        }
    }
}

/// Consistent point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub current: Option<Track>,
    pub queue_len: usize,
    pub playing: bool,
}

#[derive(Debug)]
struct PlaybackState {
    queue: VecDeque<Track>,
    current: Option<Track>,
    playing: bool,
    alive: bool,
    /// Bumped for every started track so late callbacks can be told apart.
    epoch: u64,
    started_at: Option<Instant>,
}

enum LoopAction {
    Exit,
    Wait,
    Start(Track, u64),
}

pub struct Session {
    destination: Destination,
    state: SyncMutex<PlaybackState>,
    connection: Mutex<Option<Arc<dyn Connection>>>,
    resolver: Arc<dyn Resolver>,
    settings: SessionSettings,
    wake: Notify,
    shutdown: CancellationToken,
}

impl Session {
    /// Creates a session for an already connected destination and spawns its
    /// playback loop.
    pub fn start(
        destination: Destination,
        connection: Arc<dyn Connection>,
        resolver: Arc<dyn Resolver>,
        settings: SessionSettings,
    ) -> Arc<Self> {
        let session = Arc::new(Self {
            destination,
            state: SyncMutex::new(PlaybackState {
                queue: VecDeque::new(),
                current: None,
                playing: false,
                alive: true,
                epoch: 0,
                started_at: None,
            }),
            connection: Mutex::new(Some(connection)),
            resolver,
            settings,
            wake: Notify::new(),
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(session.clone().run());

        session
    }

    pub fn destination(&self) -> Destination {
        self.destination
    }

    pub fn is_alive(&self) -> bool {
        self.state.lock().alive
    }

    /// Resolves `query` and appends every resulting track.
    ///
    /// The message depends on whether the session was playing right before
    /// the tracks were appended. Nothing is appended if resolution fails.
    pub async fn enqueue(&self, query: &str) -> Result<EnqueueOutcome, SessionError> {
        self.ensure_alive()?;

        let resolved = tokio::time::timeout(self.settings.resolve_timeout, self.resolver.resolve(query))
            .await
            .map_err(|_| ResolutionError::Timeout(self.settings.resolve_timeout))??;

        if resolved.is_empty() {
            return Err(ResolutionError::NotFound.into());
        }

        let count = resolved.len();
        let outcome = {
            let mut state = self.state.lock();
            if !state.alive {
                return Err(SessionError::Terminated);
            }

            if state.queue.len() + count > self.settings.max_queue_size {
                return Err(SessionError::QueueFull {
                    max: self.settings.max_queue_size,
                });
            }

            let tracks = resolved.into_tracks();
            let outcome = match (count, state.playing) {
                (1, true) => EnqueueOutcome::Added(tracks[0].clone()),
                (1, false) => EnqueueOutcome::NowPlaying(tracks[0].clone()),
                _ => EnqueueOutcome::AddedMany(count),
            };
            state.queue.extend(tracks);
            outcome
        };

        info!("➕ {} en {}", outcome, self.destination);
        self.wake.notify_one();

        Ok(outcome)
    }

    /// Stops the current track so the loop advances.
    ///
    /// `Ok(false)` means there was nothing playing; it is a definitive answer,
    /// not a transient failure.
    pub async fn skip(&self) -> Result<bool, SessionError> {
        let epoch = {
            let state = self.state.lock();
            if !state.alive {
                return Err(SessionError::Terminated);
            }
            if !state.playing {
                return Ok(false);
            }
            state.epoch
        };

        // Con el slot tomado no puede arrancar otro track hasta que `stop` termine
        let slot = self.connection.lock().await;
        if !self.is_current(epoch) {
            debug!("El track a saltar ya terminó en {}", self.destination);
            return Ok(true);
        }
        if let Some(connection) = slot.as_ref() {
            connection.stop().await;
        }
        drop(slot);

        info!("⏭️ Track saltado en {}", self.destination);
        Ok(true)
    }

    /// Moves the queued track at `from` to `to` (0-based) and returns it.
    pub fn move_track(&self, from: usize, to: usize) -> Result<Track, SessionError> {
        let mut state = self.state.lock();
        if !state.alive {
            return Err(SessionError::Terminated);
        }

        let len = state.queue.len();
        if from >= len || to >= len {
            return Err(SessionError::InvalidPosition { from, to, len });
        }

        let track = state
            .queue
            .remove(from)
            .ok_or(SessionError::InvalidPosition { from, to, len })?;
        state.queue.insert(to, track.clone());

        debug!("📍 Track movido de posición {} a {} en {}", from, to, self.destination);
        Ok(track)
    }

    /// Terminates the session and disconnects from the destination.
    ///
    /// Returns `false` if the session had already been terminated.
    pub async fn leave(&self) -> bool {
        {
            let mut state = self.state.lock();
            if !state.alive {
                return false;
            }
            state.alive = false;
            state.playing = false;
            state.current = None;
            state.queue.clear();
        }

        self.shutdown.cancel();

        // Tomar la conexión espera a que termine cualquier `play` en curso
        let connection = self.connection.lock().await.take();
        if let Some(connection) = connection {
            if let Err(e) = connection.disconnect().await {
                warn!("Error al desconectar {}: {:?}", self.destination, e);
            }
        }

        info!("👋 Sesión terminada en {}", self.destination);
        true
    }

    /// Copy of the queue, excluding the current track.
    pub fn queue_snapshot(&self) -> Vec<Track> {
        self.state.lock().queue.iter().cloned().collect()
    }

    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn status(&self) -> SessionStatus {
        let state = self.state.lock();
        SessionStatus {
            current: state.current.clone(),
            queue_len: state.queue.len(),
            playing: state.playing,
        }
    }

    /// Whether the track started at `epoch` is still the one playing.
    fn is_current(&self, epoch: u64) -> bool {
        let state = self.state.lock();
        state.alive && state.playing && state.epoch == epoch
    }

    fn ensure_alive(&self) -> Result<(), SessionError> {
        if self.state.lock().alive {
            Ok(())
        } else {
            Err(SessionError::Terminated)
        }
    }

    async fn run(self: Arc<Self>) {
        debug!("🔁 Loop de reproducción iniciado en {}", self.destination);

        loop {
            let polled = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = self.wake.notified() => false,
                _ = tokio::time::sleep(self.settings.poll_interval) => true,
            };

            if polled {
                self.check_stalled().await;
            }

            match self.next_action() {
                LoopAction::Exit => break,
                LoopAction::Wait => {}
                LoopAction::Start(track, epoch) => self.start_track(track, epoch).await,
            }
        }

        debug!("🛑 Loop de reproducción terminado en {}", self.destination);
    }

    fn next_action(&self) -> LoopAction {
        let mut state = self.state.lock();
        if !state.alive {
            return LoopAction::Exit;
        }
        if state.playing {
            return LoopAction::Wait;
        }

        match state.queue.pop_front() {
            Some(track) => {
                state.epoch += 1;
                state.current = Some(track.clone());
                state.playing = true;
                state.started_at = Some(Instant::now());
                LoopAction::Start(track, state.epoch)
            }
            None => {
                state.current = None;
                LoopAction::Wait
            }
        }
    }

    async fn start_track(self: &Arc<Self>, track: Track, epoch: u64) {
        let slot = self.connection.lock().await;

        // `leave` pudo ganar la carrera mientras esperábamos el slot
        if !self.is_current(epoch) {
            debug!("Sesión cerrada antes de reproducir {}", track.title());
            return;
        }
        let Some(connection) = slot.as_ref() else {
            return;
        };

        let session: Weak<Session> = Arc::downgrade(self);
        let on_finished: FinishedCallback = Box::new(move |err| {
            if let Some(session) = session.upgrade() {
                session.track_finished(epoch, err);
            }
        });

        let started = tokio::time::timeout(
            self.settings.playback_start_timeout,
            connection.play(&track, on_finished),
        )
        .await;

        drop(slot);

        match started {
            Ok(Ok(())) => info!("🎵 Reproduciendo {} en {}", track.title(), self.destination),
            Ok(Err(e)) => self.track_finished(epoch, Some(e)),
            Err(_) => self.track_finished(epoch, Some(PlaybackError::Timeout)),
        }
    }

    /// Completion of the track started at `epoch`. Errors only get logged;
    /// the loop moves on to the next track either way.
    fn track_finished(&self, epoch: u64, err: Option<PlaybackError>) {
        if let Some(e) = err {
            error!("❌ Error de reproducción en {}: {}", self.destination, e);
        }

        {
            let mut state = self.state.lock();
            if !state.alive || state.epoch != epoch || !state.playing {
                return;
            }
            state.playing = false;
            state.current = None;
            state.started_at = None;
        }

        self.wake.notify_one();
    }

    /// Safety net for transports that never report the end of a track.
    async fn check_stalled(&self) {
        let epoch = {
            let state = self.state.lock();
            let overdue = state
                .started_at
                .is_some_and(|t| t.elapsed() >= self.settings.playback_start_timeout);
            if !state.playing || !overdue {
                return;
            }
            state.epoch
        };

        let connection = self.connection.lock().await.clone();
        if let Some(connection) = connection {
            if !connection.is_playing().await {
                warn!("⚠️ El transporte dejó de reproducir sin avisar en {}", self.destination);
                self.track_finished(epoch, None);
            }
        }
    }
}
