use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::{fmt, sync::Arc};

use crate::{error::PlaybackError, sources::Track};

/// The voice channel a session renders audio into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Destination {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
}

impl Destination {
    pub fn new(guild_id: GuildId, channel_id: ChannelId) -> Self {
        Self { guild_id, channel_id }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.guild_id, self.channel_id)
    }
}

/// Invoked once when a track stops rendering, with the error if it failed.
pub type FinishedCallback = Box<dyn FnOnce(Option<PlaybackError>) + Send + 'static>;

/// Opens voice connections.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, destination: Destination) -> Result<Arc<dyn Connection>, PlaybackError>;
}

/// A live voice connection to one destination.
///
/// `play` returns once rendering has been requested; `on_finished` fires
/// later from the transport's own context, after natural end, `stop`, or a
/// failure.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn play(&self, track: &Track, on_finished: FinishedCallback) -> Result<(), PlaybackError>;

    async fn stop(&self);

    async fn is_playing(&self) -> bool;

    async fn disconnect(&self) -> Result<(), PlaybackError>;
}
