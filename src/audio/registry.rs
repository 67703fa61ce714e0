use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::{future::Future, sync::Arc};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::session::Session;

/// Live sessions, one per guild.
///
/// Discord allows a single voice connection per guild, so the guild is the
/// key; the exact channel is kept by the session itself.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<GuildId, Arc<OnceCell<Arc<Session>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the session for `guild_id`, creating it with `factory` if there
    /// is none.
    ///
    /// Concurrent callers for the same guild share one creation: `factory`
    /// runs at most once and everyone receives the same session. The flag is
    /// `true` only for the caller whose factory ran. A failed factory leaves
    /// no entry behind.
    pub async fn get_or_create<F, Fut, E>(
        &self,
        guild_id: GuildId,
        factory: F,
    ) -> Result<(Arc<Session>, bool), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<Session>, E>>,
    {
        let cell = loop {
            let cell = self.sessions.entry(guild_id).or_default().clone();

            // Una sesión terminada nunca debería seguir registrada; si pasa, se reemplaza
            if cell.get().is_some_and(|session| !session.is_alive()) {
                self.sessions
                    .remove_if(&guild_id, |_, current| Arc::ptr_eq(current, &cell));
                continue;
            }

            break cell;
        };

        let mut created = false;
        let result = cell
            .get_or_try_init(|| {
                created = true;
                factory()
            })
            .await
            .cloned();

        match result {
            Ok(session) => {
                if created {
                    info!("🆕 Sesión creada en {}", session.destination());
                }
                Ok((session, created))
            }
            Err(e) => {
                self.sessions
                    .remove_if(&guild_id, |_, current| Arc::ptr_eq(current, &cell) && current.get().is_none());
                Err(e)
            }
        }
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<Session>> {
        self.sessions
            .get(&guild_id)
            .and_then(|cell| cell.get().cloned())
    }

    /// Unregisters and returns the session; it stays alive until `leave`.
    ///
    /// A session still being created is left in place: removing its cell
    /// would orphan a connected session nobody can reach.
    pub fn remove(&self, guild_id: GuildId) -> Option<Arc<Session>> {
        self.sessions
            .remove_if(&guild_id, |_, cell| cell.initialized())
            .and_then(|(_, cell)| cell.get().cloned())
    }

    /// Unregisters the session and makes it leave. Returns whether there was one.
    pub async fn terminate(&self, guild_id: GuildId) -> bool {
        match self.remove(guild_id) {
            Some(session) => {
                session.leave().await;
                true
            }
            None => false,
        }
    }

    /// Terminates every session, e.g. on shutdown.
    pub async fn terminate_all(&self) -> usize {
        let guilds: Vec<GuildId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        let sessions: Vec<Arc<Session>> = guilds
            .into_iter()
            .filter_map(|guild_id| self.remove(guild_id))
            .collect();

        let count = sessions.len();
        futures::future::join_all(sessions.iter().map(|session| session.leave())).await;

        debug!("🧹 {} sesiones terminadas", count);
        count
    }

    pub fn len(&self) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
