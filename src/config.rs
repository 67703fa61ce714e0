use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{audio::session::SessionSettings, bot::gateway::GatewaySettings};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub command_prefix: String,

    // Sesiones
    #[serde(with = "humantime_serde_compat")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde_compat")]
    pub resolve_timeout: Duration,
    #[serde(with = "humantime_serde_compat")]
    pub playback_start_timeout: Duration,
    pub max_queue_size: usize,

    // Comandos
    pub queue_display_limit: usize,
    pub clean_history_limit: u8,

    // Dependencias externas
    pub ytdlp_path: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let config = Self {
            // Discord (TOKEN se acepta por compatibilidad con despliegues antiguos)
            discord_token: std::env::var("DISCORD_TOKEN")
                .or_else(|_| std::env::var("TOKEN"))
                .context("DISCORD_TOKEN no está definido")?,
            command_prefix: std::env::var("COMMAND_PREFIX").unwrap_or(defaults.command_prefix),

            // Sesiones
            poll_interval: env_duration("POLL_INTERVAL", defaults.poll_interval)?,
            resolve_timeout: env_duration("RESOLVE_TIMEOUT", defaults.resolve_timeout)?,
            playback_start_timeout: env_duration(
                "PLAYBACK_START_TIMEOUT",
                defaults.playback_start_timeout,
            )?,
            max_queue_size: std::env::var("MAX_QUEUE_SIZE")
                .unwrap_or_else(|_| defaults.max_queue_size.to_string())
                .parse()?,

            // Comandos
            queue_display_limit: std::env::var("QUEUE_DISPLAY_LIMIT")
                .unwrap_or_else(|_| defaults.queue_display_limit.to_string())
                .parse()?,
            clean_history_limit: std::env::var("CLEAN_HISTORY_LIMIT")
                .unwrap_or_else(|_| defaults.clean_history_limit.to_string())
                .parse()?,

            ytdlp_path: Self::ytdlp_path_from_env(),
        };

        config.validate()?;

        Ok(config)
    }

    /// yt-dlp executable from `YTDLP_PATH` (`.env` included), without
    /// requiring the rest of the configuration.
    pub fn ytdlp_path_from_env() -> String {
        dotenvy::dotenv().ok();

        match std::env::var("YTDLP_PATH") {
            Ok(path) if !path.trim().is_empty() => path.trim().to_string(),
            _ => Self::default().ytdlp_path,
        }
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Token and prefix must not be empty
    /// - Poll interval must be between 10ms and 10s
    /// - Timeouts must be non-zero
    /// - Queue size and display limit must be greater than 0
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("Discord token must not be empty");
        }

        if self.command_prefix.is_empty() {
            anyhow::bail!("Command prefix must not be empty");
        }

        if self.poll_interval < Duration::from_millis(10) || self.poll_interval > Duration::from_secs(10) {
            anyhow::bail!(
                "Poll interval must be between 10ms and 10s, got: {}",
                humantime::format_duration(self.poll_interval)
            );
        }

        if self.resolve_timeout.is_zero() {
            anyhow::bail!("Resolve timeout must be greater than 0");
        }

        if self.playback_start_timeout.is_zero() {
            anyhow::bail!("Playback start timeout must be greater than 0");
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.queue_display_limit == 0 {
            anyhow::bail!("Queue display limit must be greater than 0");
        }

        if self.clean_history_limit == 0 {
            anyhow::bail!("Clean history limit must be between 1 and 255");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The token is never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Commands: prefix '{}', {} queue entries shown, clean scans {} messages\n  \
            Sessions: poll every {}, max {} songs\n  \
            Timeouts: resolve {}, playback start {}\n  \
            Resolver: {}",
            self.command_prefix,
            self.queue_display_limit,
            self.clean_history_limit,
            humantime::format_duration(self.poll_interval),
            self.max_queue_size,
            humantime::format_duration(self.resolve_timeout),
            humantime::format_duration(self.playback_start_timeout),
            self.ytdlp_path,
        )
    }

    /// Values every [`Session`](crate::audio::session::Session) is created with.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            poll_interval: self.poll_interval,
            resolve_timeout: self.resolve_timeout,
            playback_start_timeout: self.playback_start_timeout,
            max_queue_size: self.max_queue_size,
        }
    }

    pub fn gateway_settings(&self) -> GatewaySettings {
        GatewaySettings {
            session: self.session_settings(),
            queue_display_limit: self.queue_display_limit,
            clean_history_limit: self.clean_history_limit,
        }
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            command_prefix: "!".to_string(),

            poll_interval: Duration::from_millis(500),
            resolve_timeout: Duration::from_secs(30),
            playback_start_timeout: Duration::from_secs(15),
            max_queue_size: 1000,

            queue_display_limit: 10,
            clean_history_limit: 200,

            ytdlp_path: "yt-dlp".to_string(),
        }
    }
}

fn env_duration(key: &str, default: Duration) -> Result<Duration> {
    match std::env::var(key) {
        Ok(val) if !val.trim().is_empty() => humantime::parse_duration(val.trim())
            .with_context(|| format!("{} no es una duración válida: {}", key, val)),
        _ => Ok(default),
    }
}

/// Serializa duraciones en formato legible ("500ms", "30s").
mod humantime_serde_compat {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
