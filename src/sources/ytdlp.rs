use async_process::Command;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use super::{Resolved, Resolver, Track};
use crate::error::ResolutionError;

/// Título usado cuando yt-dlp no devuelve uno para una entrada de playlist.
const UNKNOWN_TITLE: &str = "-";

/// Resolver backed by the `yt-dlp` executable.
///
/// Direct URLs are extracted as-is; anything else becomes a YouTube search.
/// Playlists are extracted flat, so every entry keeps its page URL and is
/// only turned into a stream when the transport plays it.
pub struct YtDlpResolver {
    program: String,
}

/// Subconjunto del JSON de `--dump-single-json` que nos interesa.
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: Option<String>,
    url: Option<String>,
    webpage_url: Option<String>,
    id: Option<String>,
    entries: Option<Vec<YtDlpEntry>>,
}

#[derive(Debug, Deserialize)]
struct YtDlpEntry {
    title: Option<String>,
    url: Option<String>,
    webpage_url: Option<String>,
    id: Option<String>,
}

impl YtDlpResolver {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Checks that the executable is available.
    pub async fn verify(&self) -> anyhow::Result<String> {
        let output = Command::new(&self.program).arg("--version").output().await?;
        if !output.status.success() {
            anyhow::bail!("{} --version terminó con {}", self.program, output.status);
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// URLs http(s) se pasan tal cual; el resto se busca en YouTube.
    fn target_for(query: &str) -> String {
        match Url::parse(query) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => query.to_string(),
            _ => format!("ytsearch:{}", query),
        }
    }

    fn parse_output(stdout: &str) -> Result<Resolved, ResolutionError> {
        if stdout.trim().is_empty() {
            return Err(ResolutionError::NotFound);
        }

        let info: YtDlpInfo = serde_json::from_str(stdout.trim())
            .map_err(|e| ResolutionError::Malformed(e.to_string()))?;

        // Con `entries` es una playlist (o el resultado de una búsqueda)
        if let Some(entries) = info.entries {
            let mut tracks: Vec<Track> = entries
                .into_iter()
                .filter_map(|entry| {
                    let locator = entry.url.or(entry.webpage_url).or(entry.id)?;
                    Some(Track::new(
                        locator,
                        entry.title.unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
                    ))
                })
                .collect();

            return match tracks.len() {
                0 => Err(ResolutionError::NotFound),
                1 => Ok(Resolved::Single(tracks.remove(0))),
                _ => Ok(Resolved::Playlist(tracks)),
            };
        }

        let locator = info
            .webpage_url
            .or(info.url)
            .or(info.id)
            .ok_or_else(|| ResolutionError::Malformed("missing url".to_string()))?;

        Ok(Resolved::Single(Track::new(
            locator,
            info.title.unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
        )))
    }
}

impl Default for YtDlpResolver {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

#[async_trait]
impl Resolver for YtDlpResolver {
    async fn resolve(&self, query: &str) -> Result<Resolved, ResolutionError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ResolutionError::NotFound);
        }

        let target = Self::target_for(query);
        info!("🔍 Resolviendo: {}", target);

        let output = Command::new(&self.program)
            .args([
                "--flat-playlist",
                "--dump-single-json",
                "--no-warnings",
                "--default-search",
                "ytsearch",
                "-f",
                "bestaudio/best",
                target.as_str(),
            ])
            .output()
            .await
            .map_err(|e| ResolutionError::Failed(format!("no se pudo ejecutar yt-dlp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("❌ yt-dlp falló para '{}': {}", query, stderr.trim());
            return Err(ResolutionError::Failed(stderr.trim().to_string()));
        }

        let resolved = Self::parse_output(&String::from_utf8_lossy(&output.stdout))?;
        debug!("✅ '{}' resuelto a {} track(s)", query, resolved.len());

        Ok(resolved)
    }
}
