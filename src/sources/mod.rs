//! # Sources
//!
//! Turning user queries into playable [`Track`]s.
//!
//! The core only depends on the [`Resolver`] trait; [`YtDlpResolver`] is the
//! production implementation backed by the `yt-dlp` executable.

pub mod ytdlp;

use async_trait::async_trait;
use std::fmt;

use crate::error::ResolutionError;

pub use ytdlp::YtDlpResolver;

/// A resolved, playable item. Never mutated after the resolver creates it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Track {
    url: String,
    title: String,
}

impl Track {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
        }
    }

    /// Opaque locator the transport knows how to render.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn title(&self) -> &str {
        &self.title
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.title)
    }
}

/// What a query resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Single(Track),
    /// Ordered entries of a playlist, in playlist order.
    Playlist(Vec<Track>),
}

impl Resolved {
    pub fn len(&self) -> usize {
        match self {
            Resolved::Single(_) => 1,
            Resolved::Playlist(tracks) => tracks.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_tracks(self) -> Vec<Track> {
        match self {
            Resolved::Single(track) => vec![track],
            Resolved::Playlist(tracks) => tracks,
        }
    }
}

/// External collaborator turning a query (direct locator or free text search)
/// into one or more tracks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, query: &str) -> Result<Resolved, ResolutionError>;
}
