//! In-memory transport used by the session, registry and gateway tests.

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use super::{
    session::SessionSettings,
    transport::{Connection, Destination, FinishedCallback, Transport},
};
use crate::{error::PlaybackError, sources::Track};

pub fn destination(guild: u64, channel: u64) -> Destination {
    Destination::new(GuildId::new(guild), ChannelId::new(channel))
}

pub fn settings() -> SessionSettings {
    SessionSettings {
        poll_interval: Duration::from_millis(20),
        resolve_timeout: Duration::from_secs(1),
        playback_start_timeout: Duration::from_secs(5),
        max_queue_size: 1000,
    }
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

/// Connection that "renders" a track until the test or `stop` finishes it.
#[derive(Default)]
pub struct FakeConnection {
    played: SyncMutex<Vec<Track>>,
    pending: SyncMutex<Option<FinishedCallback>>,
    stops: AtomicUsize,
    disconnected: AtomicBool,
    plays_after_disconnect: AtomicUsize,
    fail_next: AtomicBool,
    silent: AtomicBool,
}

impl FakeConnection {
    pub fn played(&self) -> Vec<Track> {
        self.played.lock().clone()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    pub fn plays_after_disconnect(&self) -> usize {
        self.plays_after_disconnect.load(Ordering::SeqCst)
    }

    /// The next `play` call fails to start.
    pub fn fail_next_play(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Stops reporting playback without firing the completion callback.
    pub fn go_silent(&self) {
        self.silent.store(true, Ordering::SeqCst);
    }

    /// Ends the current track as the transport would.
    pub fn finish(&self, err: Option<PlaybackError>) {
        let callback = self.pending.lock().take();
        if let Some(callback) = callback {
            callback(err);
        }
    }
}

#[async_trait]
impl Connection for FakeConnection {
    async fn play(&self, track: &Track, on_finished: FinishedCallback) -> Result<(), PlaybackError> {
        if self.is_disconnected() {
            self.plays_after_disconnect.fetch_add(1, Ordering::SeqCst);
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(PlaybackError::Start("unplayable".to_string()));
        }

        self.played.lock().push(track.clone());
        *self.pending.lock() = Some(on_finished);
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.finish(None);
    }

    async fn is_playing(&self) -> bool {
        !self.silent.load(Ordering::SeqCst) && self.pending.lock().is_some()
    }

    async fn disconnect(&self) -> Result<(), PlaybackError> {
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out a fresh [`FakeConnection`] per connect and keeps them for
/// inspection.
#[derive(Default)]
pub struct FakeTransport {
    connections: SyncMutex<Vec<(Destination, Arc<FakeConnection>)>>,
    fail_connect: AtomicBool,
    connect_delay: SyncMutex<Option<Duration>>,
}

impl FakeTransport {
    pub fn connect_count(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn connection(&self, destination: Destination) -> Option<Arc<FakeConnection>> {
        self.connections
            .lock()
            .iter()
            .rev()
            .find(|(dest, _)| *dest == destination)
            .map(|(_, connection)| connection.clone())
    }

    pub fn fail_connects(&self) {
        self.fail_connect.store(true, Ordering::SeqCst);
    }

    pub fn delay_connects(&self, delay: Duration) {
        *self.connect_delay.lock() = Some(delay);
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, destination: Destination) -> Result<Arc<dyn Connection>, PlaybackError> {
        let delay = *self.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(PlaybackError::Connect("channel full".to_string()));
        }

        let connection = Arc::new(FakeConnection::default());
        self.connections.lock().push((destination, connection.clone()));
        Ok(connection)
    }
}
