//! Songbird-backed voice transport.

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use songbird::{
    input::{Input, YoutubeDl},
    tracks::{PlayMode, TrackHandle},
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::transport::{Connection, Destination, FinishedCallback, Transport};
use crate::{error::PlaybackError, sources::Track};

/// Opens voice connections through the shared Songbird manager.
pub struct SongbirdTransport {
    manager: Arc<Songbird>,
    http: reqwest::Client,
    connect_timeout: Duration,
    ytdlp_program: &'static str,
}

impl SongbirdTransport {
    /// `ytdlp_program` is the executable Songbird runs to turn a track page
    /// into an audio stream; it must match the one the resolver uses.
    pub fn new(manager: Arc<Songbird>, connect_timeout: Duration, ytdlp_program: &'static str) -> Self {
        Self {
            manager,
            http: reqwest::Client::new(),
            connect_timeout,
            ytdlp_program,
        }
    }

    pub fn ytdlp_program(&self) -> &'static str {
        self.ytdlp_program
    }
}

#[async_trait]
impl Transport for SongbirdTransport {
    async fn connect(&self, destination: Destination) -> Result<Arc<dyn Connection>, PlaybackError> {
        let join = self.manager.join(destination.guild_id, destination.channel_id);

        let call = tokio::time::timeout(self.connect_timeout, join)
            .await
            .map_err(|_| PlaybackError::Timeout)?
            .map_err(|e| {
                error!("Error al conectar al canal de voz {}: {:?}", destination, e);
                PlaybackError::Connect(e.to_string())
            })?;

        // Nada debe sonar hasta que la sesión lo pida
        call.lock().await.stop();

        info!("🔊 Conectado al canal de voz {}", destination);

        Ok(Arc::new(SongbirdConnection {
            destination,
            manager: self.manager.clone(),
            call,
            http: self.http.clone(),
            ytdlp_program: self.ytdlp_program,
            current: SyncMutex::new(None),
        }))
    }
}

/// One joined voice channel.
pub struct SongbirdConnection {
    destination: Destination,
    manager: Arc<Songbird>,
    call: Arc<Mutex<Call>>,
    http: reqwest::Client,
    ytdlp_program: &'static str,
    current: SyncMutex<Option<TrackHandle>>,
}

#[async_trait]
impl Connection for SongbirdConnection {
    async fn play(&self, track: &Track, on_finished: FinishedCallback) -> Result<(), PlaybackError> {
        let input: Input =
            YoutubeDl::new_ytdl_like(self.ytdlp_program, self.http.clone(), track.url().to_string()).into();

        let handle = {
            let mut call = self.call.lock().await;
            call.play_input(input)
        };

        // End y Error comparten el callback; el primero que llegue lo consume
        let on_finished = Arc::new(SyncMutex::new(Some(on_finished)));

        handle
            .add_event(
                Event::Track(TrackEvent::End),
                TrackEndHandler {
                    destination: self.destination,
                    on_finished: on_finished.clone(),
                },
            )
            .map_err(|e| PlaybackError::Start(e.to_string()))?;

        handle
            .add_event(
                Event::Track(TrackEvent::Error),
                TrackErrorHandler {
                    destination: self.destination,
                    on_finished,
                },
            )
            .map_err(|e| PlaybackError::Start(e.to_string()))?;

        debug!("▶️ Renderizando {} en {}", track.title(), self.destination);
        *self.current.lock() = Some(handle);

        Ok(())
    }

    async fn stop(&self) {
        let handle = self.current.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.stop() {
                warn!("No se pudo detener el track en {}: {:?}", self.destination, e);
            }
        }
    }

    async fn is_playing(&self) -> bool {
        let handle = self.current.lock().clone();
        match handle {
            Some(handle) => match handle.get_info().await {
                Ok(info) => info.playing == PlayMode::Play,
                Err(_) => false,
            },
            None => false,
        }
    }

    async fn disconnect(&self) -> Result<(), PlaybackError> {
        self.stop().await;
        self.manager
            .remove(self.destination.guild_id)
            .await
            .map_err(|e| PlaybackError::Connect(e.to_string()))?;

        info!("👋 Desconectado del canal de voz {}", self.destination);
        Ok(())
    }
}

/// Fires the completion callback when a track ends (naturally or by `stop`).
struct TrackEndHandler {
    destination: Destination,
    on_finished: Arc<SyncMutex<Option<FinishedCallback>>>,
}

#[async_trait]
impl VoiceEventHandler for TrackEndHandler {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        debug!("Track terminado en {}", self.destination);

        let callback = self.on_finished.lock().take();
        if let Some(callback) = callback {
            callback(None);
        }

        None
    }
}

/// Fires the completion callback with the reported failure.
struct TrackErrorHandler {
    destination: Destination,
    on_finished: Arc<SyncMutex<Option<FinishedCallback>>>,
}

#[async_trait]
impl VoiceEventHandler for TrackErrorHandler {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let reason = match ctx {
            EventContext::Track(track_list) => track_list
                .iter()
                .map(|(state, _handle)| format!("{:?}", state.playing))
                .collect::<Vec<_>>()
                .join(", "),
            _ => "unknown".to_string(),
        };

        error!("❌ Error en track para {}: {}", self.destination, reason);

        let callback = self.on_finished.lock().take();
        if let Some(callback) = callback {
            callback(Some(PlaybackError::Track(reason)));
        }

        None
    }
}
