//! Command gateway.
//!
//! Every command goes through [`CommandGateway::dispatch`]: its guards run in
//! order and the first failure short-circuits, so a rejected command never
//! touches a session. Cleanup of the invoking message runs afterwards on both
//! the success and the failure path.

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};

use super::commands::{format_queue, format_status, Command};
use crate::{
    audio::{
        registry::SessionRegistry,
        session::{Session, SessionSettings},
        transport::{Destination, Transport},
    },
    error::{CommandError, PlaybackError},
    sources::Resolver,
};

/// How long the "Cleared history." confirmation stays visible.
const CLEAN_CONFIRMATION_TTL: Duration = Duration::from_secs(2);

/// Who issued a command, and where they are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub guild_id: GuildId,
    /// Voice channel the caller is currently in.
    pub voice_channel: Option<ChannelId>,
}

impl Caller {
    pub fn destination(&self) -> Option<Destination> {
        self.voice_channel
            .map(|channel_id| Destination::new(self.guild_id, channel_id))
    }
}

/// A single precondition checked before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    /// The caller is in some voice channel.
    CallerInVoice,
    /// The bot has a session in the caller's exact voice channel.
    SharesChannelWithBot,
    /// The bot has a session in the caller's guild.
    BotConnected,
    /// The bot has no session in the caller's guild yet.
    NotAlreadyConnected,
}

impl Guard {
    pub fn check(self, caller: &Caller, session: Option<&Arc<Session>>) -> Result<(), CommandError> {
        match self {
            Guard::CallerInVoice => match caller.voice_channel {
                Some(_) => Ok(()),
                None => Err(CommandError::NotInVoice),
            },
            Guard::SharesChannelWithBot => match session {
                Some(session) if Some(session.destination()) == caller.destination() => Ok(()),
                _ => Err(CommandError::NotConnectedWithBot),
            },
            Guard::BotConnected => match session {
                Some(_) => Ok(()),
                None => Err(CommandError::NotConnected),
            },
            Guard::NotAlreadyConnected => match session {
                Some(session) => Err(already_connected(caller, session)),
                None => Ok(()),
            },
        }
    }
}

/// Rejection for a caller asking the bot to join where it already has a session.
fn already_connected(caller: &Caller, session: &Session) -> CommandError {
    let bound = session.destination();
    if caller.destination() == Some(bound) {
        CommandError::AlreadyConnected
    } else {
        CommandError::ConnectedElsewhere {
            channel: bound.channel_id,
        }
    }
}

/// Chat-side collaborator of a single command invocation.
#[async_trait]
pub trait ChatContext: Send + Sync {
    /// Deletes the message that invoked the command.
    async fn delete_invocation(&self) -> anyhow::Result<()>;

    /// Deletes the bot's own messages among the last `limit` channel messages.
    async fn purge_own_messages(&self, limit: u8) -> anyhow::Result<usize>;
}

/// Text to send back for a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub content: String,
    /// Delete the reply itself after this long.
    pub delete_after: Option<Duration>,
}

impl Reply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            delete_after: None,
        }
    }
}

/// Options the gateway needs besides the session settings.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub session: SessionSettings,
    pub queue_display_limit: usize,
    pub clean_history_limit: u8,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            session: SessionSettings::default(),
            queue_display_limit: 10,
            clean_history_limit: 200,
        }
    }
}

pub struct CommandGateway {
    registry: Arc<SessionRegistry>,
    transport: Arc<dyn Transport>,
    resolver: Arc<dyn Resolver>,
    settings: GatewaySettings,
}

impl CommandGateway {
    pub fn new(
        registry: Arc<SessionRegistry>,
        transport: Arc<dyn Transport>,
        resolver: Arc<dyn Resolver>,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            registry,
            transport,
            resolver,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Runs `command` for `caller` and returns the reply to send.
    ///
    /// Errors are turned into their user-facing message here; nothing is
    /// propagated further.
    pub async fn dispatch(&self, caller: &Caller, command: Command, chat: &dyn ChatContext) -> Reply {
        let result = self.execute(caller, &command, chat).await;

        if command.deletes_invocation() {
            if let Err(e) = chat.delete_invocation().await {
                warn!("No se pudo borrar el mensaje de /{}: {:?}", command.name(), e);
            }
        }

        match result {
            Ok(reply) => reply,
            Err(CommandError::Internal) => {
                error!("🚨 Error interno en /{} (guild {})", command.name(), caller.guild_id);
                Reply::text(CommandError::Internal.to_string())
            }
            Err(e) => {
                debug!("/{} rechazado en guild {}: {}", command.name(), caller.guild_id, e);
                Reply::text(e.to_string())
            }
        }
    }

    async fn execute(
        &self,
        caller: &Caller,
        command: &Command,
        chat: &dyn ChatContext,
    ) -> Result<Reply, CommandError> {
        let session = self.registry.get(caller.guild_id);

        for guard in command.guards() {
            guard.check(caller, session.as_ref())?;
        }

        match command {
            Command::Hello => Ok(Reply::text("Hello!")),

            Command::Join => {
                let destination = caller.destination().ok_or(CommandError::NotInVoice)?;
                let (session, created) = self.open_session(destination).await?;
                if !created {
                    return Err(already_connected(caller, &session));
                }
                Ok(Reply::text("Joined."))
            }

            Command::Play(query) => {
                let session = match session {
                    Some(session) => session,
                    None => {
                        let destination = caller.destination().ok_or(CommandError::NotInVoice)?;
                        self.open_session(destination).await?.0
                    }
                };

                let outcome = session.enqueue(query).await?;
                Ok(Reply::text(outcome.to_string()))
            }

            Command::Skip => {
                let session = session.ok_or(CommandError::NotConnectedWithBot)?;
                if session.skip().await? {
                    Ok(Reply::text("Skipped."))
                } else {
                    Err(CommandError::NothingToSkip)
                }
            }

            Command::Queue => {
                let session = session.ok_or(CommandError::NotConnectedWithBot)?;
                let tracks = session.queue_snapshot();
                Ok(Reply::text(format_queue(&tracks, self.settings.queue_display_limit)))
            }

            Command::Move { from, to } => {
                let session = session.ok_or(CommandError::NotConnectedWithBot)?;
                if *from == 0 || *to == 0 {
                    return Err(CommandError::InvalidPosition {
                        len: session.queue_len(),
                    });
                }

                let track = session.move_track(from - 1, to - 1)?;
                Ok(Reply::text(format!("Moved {} to position {}.", track.title(), to)))
            }

            Command::Status => {
                let session = session.ok_or(CommandError::NotConnectedWithBot)?;
                Ok(Reply::text(format_status(&session.status())))
            }

            Command::Leave => {
                if !self.registry.terminate(caller.guild_id).await {
                    return Err(CommandError::NotConnected);
                }
                Ok(Reply::text("Left the voice channel."))
            }

            Command::Clean => {
                let purged = chat
                    .purge_own_messages(self.settings.clean_history_limit)
                    .await
                    .map_err(|e| {
                        warn!("Error limpiando historial en guild {}: {:?}", caller.guild_id, e);
                        CommandError::Internal
                    })?;
                debug!("🧹 {} mensajes borrados en guild {}", purged, caller.guild_id);

                Ok(Reply {
                    content: "Cleared history.".to_string(),
                    delete_after: Some(CLEAN_CONFIRMATION_TTL),
                })
            }
        }
    }

    /// Reacts to a change in the number of members of `destination`,
    /// the bot included. Returns whether the session was terminated.
    pub async fn membership_changed(&self, destination: Destination, remaining: usize) -> bool {
        let Some(session) = self.registry.get(destination.guild_id) else {
            return false;
        };

        if session.destination() != destination || remaining > 1 {
            return false;
        }

        info!("🚪 Bot solo en {}, saliendo", destination);
        self.registry.terminate(destination.guild_id).await
    }

    /// The bot was disconnected from voice in `guild_id` by someone else.
    pub async fn bot_disconnected(&self, guild_id: GuildId) -> bool {
        let terminated = self.registry.terminate(guild_id).await;
        if terminated {
            info!("🔌 Bot desconectado externamente en guild {}", guild_id);
        }
        terminated
    }

    async fn open_session(&self, destination: Destination) -> Result<(Arc<Session>, bool), CommandError> {
        let transport = self.transport.clone();
        let resolver = self.resolver.clone();
        let settings = self.settings.session.clone();

        self.registry
            .get_or_create(destination.guild_id, || async move {
                let connection = transport.connect(destination).await?;
                Ok::<_, PlaybackError>(Session::start(destination, connection, resolver, settings))
            })
            .await
            .map_err(CommandError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::testing::{destination, settings, wait_until, FakeTransport},
        error::ResolutionError,
        sources::{MockResolver, Resolved, Track},
    };
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeChat {
        deleted: AtomicUsize,
        purges: AtomicUsize,
        fail_purge: AtomicBool,
    }

    #[async_trait]
    impl ChatContext for FakeChat {
        async fn delete_invocation(&self) -> anyhow::Result<()> {
            self.deleted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn purge_own_messages(&self, _limit: u8) -> anyhow::Result<usize> {
            if self.fail_purge.load(Ordering::SeqCst) {
                anyhow::bail!("missing permissions");
            }
            self.purges.fetch_add(1, Ordering::SeqCst);
            Ok(3)
        }
    }

    fn track(title: &str) -> Track {
        Track::new(format!("https://example.com/{}", title), title)
    }

    fn gateway() -> (CommandGateway, Arc<FakeTransport>) {
        let mut resolver = MockResolver::new();
        resolver.expect_resolve().returning(|query| match query {
            "missing" => Err(ResolutionError::NotFound),
            "five" => Ok(Resolved::Playlist(
                ["B1", "B2", "B3", "B4", "B5"].iter().map(|t| track(t)).collect(),
            )),
            other => Ok(Resolved::Single(track(other))),
        });

        let transport = Arc::new(FakeTransport::default());
        let gateway = CommandGateway::new(
            Arc::new(SessionRegistry::new()),
            transport.clone(),
            Arc::new(resolver),
            GatewaySettings {
                session: settings(),
                queue_display_limit: 10,
                clean_history_limit: 200,
            },
        );
        (gateway, transport)
    }

    fn in_channel(guild: u64, channel: u64) -> Caller {
        Caller {
            guild_id: GuildId::new(guild),
            voice_channel: Some(ChannelId::new(channel)),
        }
    }

    fn outside_voice(guild: u64) -> Caller {
        Caller {
            guild_id: GuildId::new(guild),
            voice_channel: None,
        }
    }

    async fn send(gateway: &CommandGateway, caller: &Caller, command: Command) -> String {
        gateway.dispatch(caller, command, &FakeChat::default()).await.content
    }

    async fn wait_playing(gateway: &CommandGateway, guild: u64) {
        let session = gateway.registry().get(GuildId::new(guild)).unwrap();
        wait_until(|| session.status().playing).await;
    }

    #[tokio::test]
    async fn test_play_scenario() {
        let (gateway, transport) = gateway();
        let caller = in_channel(1, 10);

        assert_eq!(send(&gateway, &caller, Command::Play("songA".into())).await, "Now playing: songA");
        assert_eq!(transport.connect_count(), 1);
        wait_playing(&gateway, 1).await;

        assert_eq!(
            send(&gateway, &caller, Command::Play("songB".into())).await,
            "Added songB to queue."
        );
        assert_eq!(
            send(&gateway, &caller, Command::Play("five".into())).await,
            "Added 5 songs to queue."
        );

        let session = gateway.registry().get(GuildId::new(1)).unwrap();
        assert_eq!(session.queue_len(), 6);

        assert_eq!(
            send(&gateway, &caller, Command::Move { from: 1, to: 3 }).await,
            "Moved songB to position 3."
        );
        let titles: Vec<String> = session
            .queue_snapshot()
            .iter()
            .map(|t| t.title().to_string())
            .collect();
        assert_eq!(titles, vec!["B1", "B2", "songB", "B3", "B4", "B5"]);

        assert_eq!(send(&gateway, &caller, Command::Skip).await, "Skipped.");
        wait_until(|| session.status().current == Some(track("B1"))).await;
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_play_requires_voice() {
        let (gateway, transport) = gateway();

        assert_eq!(
            send(&gateway, &outside_voice(1), Command::Play("songA".into())).await,
            "You must be connected to a voice channel to use this command."
        );
        assert_eq!(transport.connect_count(), 0);
        assert!(gateway.registry().is_empty());
    }

    #[tokio::test]
    async fn test_failed_resolution_is_reported() {
        let (gateway, _transport) = gateway();
        let caller = in_channel(1, 10);

        assert_eq!(
            send(&gateway, &caller, Command::Play("missing".into())).await,
            "Could not add song: no results found."
        );
        let session = gateway.registry().get(GuildId::new(1)).unwrap();
        assert_eq!(session.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_join_twice() {
        let (gateway, transport) = gateway();
        let caller = in_channel(1, 10);

        assert_eq!(send(&gateway, &caller, Command::Join).await, "Joined.");
        assert_eq!(send(&gateway, &caller, Command::Join).await, "Already connected.");
        assert_eq!(
            send(&gateway, &in_channel(1, 11), Command::Join).await,
            "Already connected to <#10>."
        );
        assert_eq!(transport.connect_count(), 1);

        // La sesión sigue en el canal original
        let session = gateway.registry().get(GuildId::new(1)).unwrap();
        assert_eq!(session.destination(), destination(1, 10));
    }

    #[tokio::test]
    async fn test_join_connect_failure() {
        let (gateway, transport) = gateway();
        transport.fail_connects();

        assert_eq!(
            send(&gateway, &in_channel(1, 10), Command::Join).await,
            "Could not join the voice channel."
        );
        assert!(gateway.registry().is_empty());
    }

    #[tokio::test]
    async fn test_session_commands_require_same_channel() {
        let (gateway, _transport) = gateway();
        send(&gateway, &in_channel(1, 10), Command::Play("songA".into())).await;
        wait_playing(&gateway, 1).await;

        let elsewhere = in_channel(1, 11);
        for command in [Command::Skip, Command::Queue, Command::Status, Command::Move { from: 1, to: 1 }] {
            assert_eq!(
                send(&gateway, &elsewhere, command).await,
                "You must be connected to a voice channel with the bot to use this command."
            );
        }

        // Nada fue saltado
        let session = gateway.registry().get(GuildId::new(1)).unwrap();
        assert_eq!(session.status().current, Some(track("songA")));

        assert_eq!(
            send(&gateway, &in_channel(2, 20), Command::Queue).await,
            "You must be connected to a voice channel with the bot to use this command."
        );
    }

    #[tokio::test]
    async fn test_skip_when_idle() {
        let (gateway, _transport) = gateway();
        let caller = in_channel(1, 10);
        send(&gateway, &caller, Command::Join).await;

        assert_eq!(send(&gateway, &caller, Command::Skip).await, "Nothing to skip.");
    }

    #[tokio::test]
    async fn test_queue_and_status() {
        let (gateway, _transport) = gateway();
        let caller = in_channel(1, 10);
        send(&gateway, &caller, Command::Join).await;

        assert_eq!(send(&gateway, &caller, Command::Queue).await, "The queue is empty.");
        assert_eq!(
            send(&gateway, &caller, Command::Status).await,
            "Nothing is playing.\nSongs in queue: 0"
        );

        send(&gateway, &caller, Command::Play("songA".into())).await;
        wait_playing(&gateway, 1).await;
        send(&gateway, &caller, Command::Play("songB".into())).await;

        assert_eq!(send(&gateway, &caller, Command::Queue).await, "Songs in queue:\n1. songB");
        assert_eq!(
            send(&gateway, &caller, Command::Status).await,
            "Now playing: songA\nSongs in queue: 1"
        );
    }

    #[tokio::test]
    async fn test_move_positions_are_validated() {
        let (gateway, _transport) = gateway();
        let caller = in_channel(1, 10);
        send(&gateway, &caller, Command::Play("songA".into())).await;
        wait_playing(&gateway, 1).await;
        send(&gateway, &caller, Command::Play("songB".into())).await;

        assert_eq!(
            send(&gateway, &caller, Command::Move { from: 0, to: 1 }).await,
            "Invalid position. The queue has 1 songs."
        );
        assert_eq!(
            send(&gateway, &caller, Command::Move { from: 1, to: 2 }).await,
            "Invalid position. The queue has 1 songs."
        );
    }

    #[tokio::test]
    async fn test_leave() {
        let (gateway, transport) = gateway();
        let caller = in_channel(1, 10);

        assert_eq!(send(&gateway, &caller, Command::Leave).await, "Not connected to a voice channel.");

        send(&gateway, &caller, Command::Join).await;
        let session = gateway.registry().get(GuildId::new(1)).unwrap();

        // leave no exige estar en el canal de voz
        assert_eq!(send(&gateway, &outside_voice(1), Command::Leave).await, "Left the voice channel.");
        assert!(!session.is_alive());
        assert!(gateway.registry().get(GuildId::new(1)).is_none());
        assert!(transport.connection(destination(1, 10)).unwrap().is_disconnected());

        assert_eq!(
            send(&gateway, &caller, Command::Skip).await,
            "You must be connected to a voice channel with the bot to use this command."
        );
    }

    #[tokio::test]
    async fn test_cleanup_runs_on_success_and_failure() {
        let (gateway, _transport) = gateway();
        let chat = FakeChat::default();

        gateway.dispatch(&outside_voice(1), Command::Skip, &chat).await;
        gateway.dispatch(&in_channel(1, 10), Command::Join, &chat).await;
        gateway.dispatch(&in_channel(1, 10), Command::Hello, &chat).await;

        assert_eq!(chat.deleted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_clean() {
        let (gateway, _transport) = gateway();
        let chat = FakeChat::default();

        let reply = gateway.dispatch(&outside_voice(1), Command::Clean, &chat).await;
        assert_eq!(
            reply,
            Reply {
                content: "Cleared history.".to_string(),
                delete_after: Some(Duration::from_secs(2)),
            }
        );
        assert_eq!(chat.purges.load(Ordering::SeqCst), 1);
        assert_eq!(chat.deleted.load(Ordering::SeqCst), 1);

        chat.fail_purge.store(true, Ordering::SeqCst);
        let reply = gateway.dispatch(&outside_voice(1), Command::Clean, &chat).await;
        assert_eq!(reply.content, "Something went wrong, try again.");
        assert_eq!(chat.deleted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_membership_changes() {
        let (gateway, _transport) = gateway();
        send(&gateway, &in_channel(1, 10), Command::Join).await;

        assert!(!gateway.membership_changed(destination(1, 10), 2).await);
        assert!(!gateway.membership_changed(destination(1, 11), 1).await);
        assert!(gateway.registry().get(GuildId::new(1)).is_some());

        assert!(gateway.membership_changed(destination(1, 10), 1).await);
        assert!(gateway.registry().get(GuildId::new(1)).is_none());
        assert!(!gateway.membership_changed(destination(1, 10), 0).await);
    }

    #[tokio::test]
    async fn test_bot_disconnected() {
        let (gateway, _transport) = gateway();
        send(&gateway, &in_channel(1, 10), Command::Join).await;

        assert!(gateway.bot_disconnected(GuildId::new(1)).await);
        assert!(!gateway.bot_disconnected(GuildId::new(1)).await);
    }

    #[tokio::test]
    async fn test_guards_short_circuit_in_order() {
        let caller = outside_voice(1);
        let result = Command::Skip
            .guards()
            .iter()
            .try_for_each(|guard| guard.check(&caller, None));
        assert_eq!(result, Err(CommandError::NotInVoice));
    }
}
