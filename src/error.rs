//! # Error Types
//!
//! Domain errors for the playback core. Each layer owns one enum:
//!
//! - [`ResolutionError`]: the resolver could not turn a query into tracks
//! - [`PlaybackError`]: the voice transport failed to connect or render
//! - [`SessionError`]: an operation on a [`Session`](crate::audio::session::Session) was rejected
//! - [`CommandError`]: a command was rejected at the gateway (always user visible)
//!
//! The `Display` of [`CommandError`] is the exact text sent back to the caller.

use serenity::model::id::ChannelId;
use std::time::Duration;
use thiserror::Error;

/// Failure to turn a query into one or more tracks.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("no results found")]
    NotFound,

    #[error("resolver failed: {0}")]
    Failed(String),

    #[error("malformed resolver output: {0}")]
    Malformed(String),

    #[error("resolution timed out after {0:?}")]
    Timeout(Duration),
}

/// Failure reported by the voice transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("could not connect to voice channel: {0}")]
    Connect(String),

    #[error("could not start track: {0}")]
    Start(String),

    #[error("track failed during playback: {0}")]
    Track(String),

    #[error("transport did not respond in time")]
    Timeout,
}

/// Rejection of an operation on a single session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The session has left its destination; nothing may touch it anymore.
    #[error("session is terminated")]
    Terminated,

    #[error("invalid queue position (from {from}, to {to}, queue length {len})")]
    InvalidPosition { from: usize, to: usize, len: usize },

    #[error("queue is full (max {max} songs)")]
    QueueFull { max: usize },

    #[error(transparent)]
    Resolution(#[from] ResolutionError),
}

/// Rejection of a command before or during dispatch.
///
/// Precondition failures never reach a session; the remaining variants carry
/// the failure of the forwarded call back to the caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("You must be connected to a voice channel to use this command.")]
    NotInVoice,

    #[error("You must be connected to a voice channel with the bot to use this command.")]
    NotConnectedWithBot,

    #[error("Not connected to a voice channel.")]
    NotConnected,

    #[error("Already connected.")]
    AlreadyConnected,

    /// The guild's session is bound to another voice channel.
    #[error("Already connected to <#{channel}>.")]
    ConnectedElsewhere { channel: ChannelId },

    #[error("Nothing to skip.")]
    NothingToSkip,

    #[error("Invalid position. The queue has {len} songs.")]
    InvalidPosition { len: usize },

    #[error("The queue is full (max {max} songs).")]
    QueueFull { max: usize },

    #[error("Could not add song: {0}.")]
    Resolution(ResolutionError),

    #[error("Could not join the voice channel.")]
    Playback(PlaybackError),

    #[error("Something went wrong, try again.")]
    Internal,
}

impl From<SessionError> for CommandError {
    fn from(err: SessionError) -> Self {
        match err {
            // Inalcanzable mientras el registro saque la sesión antes de `leave`
            SessionError::Terminated => {
                tracing::error!("🚨 Operación sobre una sesión ya terminada");
                CommandError::Internal
            }
            SessionError::InvalidPosition { len, .. } => CommandError::InvalidPosition { len },
            SessionError::QueueFull { max } => CommandError::QueueFull { max },
            SessionError::Resolution(e) => CommandError::Resolution(e),
        }
    }
}

impl From<PlaybackError> for CommandError {
    fn from(err: PlaybackError) -> Self {
        CommandError::Playback(err)
    }
}
