//! # Audio Module
//!
//! Playback sessions and the voice transport they drive.
//!
//! ## Architecture
//!
//! ### [`session`] - Playback Session
//! - One per voice channel the bot is connected to
//! - Owns the FIFO queue, the current track and the playing flag
//! - Runs its own loop that starts the next track when the previous one ends
//!
//! ### [`registry`] - Session Registry
//! - Concurrent map from guild to its live session
//! - Atomic get-or-create so a guild never ends up with two sessions
//!
//! ### [`transport`] / [`player`] - Voice Transport
//! - `Transport`/`Connection` traits the sessions talk to
//! - Songbird implementation used in production
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use music_sessions::audio::{registry::SessionRegistry, session::Session};
//!
//! # async fn example(registry: SessionRegistry, session: std::sync::Arc<Session>) -> anyhow::Result<()> {
//! let outcome = session.enqueue("never gonna give you up").await?;
//! println!("{}", outcome);
//!
//! if !session.skip().await? {
//!     println!("Nothing to skip.");
//! }
//!
//! registry.terminate(session.destination().guild_id).await;
//! # Ok(())
//! # }
//! ```

pub mod player;
pub mod registry;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;
