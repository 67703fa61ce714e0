//! Discord music bot with one playback session per voice channel.
//!
//! - [`sources`]: tracks and the resolver turning queries into them
//! - [`audio`]: sessions, their registry and the voice transport
//! - [`bot`]: command parsing, the command gateway and the Discord handler

pub mod audio;
pub mod bot;
pub mod config;
pub mod error;
pub mod sources;
