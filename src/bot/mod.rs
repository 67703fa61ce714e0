//! # Bot Module
//!
//! Discord side of the bot: reads prefix commands from chat, works out where
//! the caller is, and hands everything to the [`CommandGateway`].
//!
//! ## Architecture
//!
//! [`MusicBot`] implements Serenity's [`EventHandler`] trait:
//!
//! - `message`: parses `!play`, `!skip`, ... and sends the gateway's reply
//! - `voice_state_update`: reports channel membership so the bot leaves when
//!   it is alone, and cleans up when it gets disconnected externally
//!
//! The gateway itself knows nothing about Serenity messages; chat operations
//! (deleting the command, purging history) go through [`ChatContext`].

use anyhow::Result;
use serenity::{
    all::{ChannelId, Context, EventHandler, GetMessages, GuildId, Message, Ready, UserId, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod gateway;

use crate::{audio::transport::Destination, config::Config};
use commands::Command;
use gateway::{Caller, ChatContext, CommandGateway, Reply};

/// Main Discord event handler.
pub struct MusicBot {
    config: Arc<Config>,
    gateway: Arc<CommandGateway>,
}

impl MusicBot {
    pub fn new(config: Arc<Config>, gateway: Arc<CommandGateway>) -> Self {
        Self { config, gateway }
    }

    async fn send_reply(&self, ctx: &Context, channel_id: ChannelId, reply: Reply) -> Result<()> {
        let sent = channel_id.say(&ctx.http, &reply.content).await?;

        if let Some(delay) = reply.delete_after {
            let http = ctx.http.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(e) = sent.delete(&http).await {
                    debug!("No se pudo borrar la respuesta temporal: {:?}", e);
                }
            });
        }

        Ok(())
    }
}

/// Chat operations scoped to the message that invoked a command.
struct MessageChat<'a> {
    ctx: &'a Context,
    message: &'a Message,
}

#[async_trait]
impl ChatContext for MessageChat<'_> {
    async fn delete_invocation(&self) -> Result<()> {
        self.message.delete(&self.ctx.http).await?;
        Ok(())
    }

    async fn purge_own_messages(&self, limit: u8) -> Result<usize> {
        let bot_id = self.ctx.cache.current_user().id;
        let history = self
            .message
            .channel_id
            .messages(&self.ctx.http, GetMessages::new().limit(limit))
            .await?;

        let mut deleted = 0;
        for message in history.iter().filter(|m| m.author.id == bot_id) {
            message.delete(&self.ctx.http).await?;
            deleted += 1;
        }

        Ok(deleted)
    }
}

/// Voice channel `user_id` is in, according to the cache.
fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}

/// Members currently in `destination`, the bot included.
fn channel_member_count(ctx: &Context, destination: Destination) -> Option<usize> {
    let guild = destination.guild_id.to_guild_cached(&ctx.cache)?;
    let count = guild
        .voice_states
        .values()
        .filter(|voice_state| voice_state.channel_id == Some(destination.channel_id))
        .count();
    Some(count)
}

#[async_trait]
impl EventHandler for MusicBot {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        // Solo comandos dentro de un servidor
        let Some(guild_id) = msg.guild_id else {
            return;
        };

        let command = match Command::parse(&msg.content, &self.config.command_prefix) {
            None => return,
            Some(Ok(command)) => command,
            Some(Err(e)) => {
                if let Err(e) = msg.channel_id.say(&ctx.http, e.to_string()).await {
                    error!("Error al enviar mensaje: {:?}", e);
                }
                return;
            }
        };

        info!(
            "📝 Comando !{} usado por {} en guild {}",
            command.name(),
            msg.author.name,
            guild_id
        );

        let caller = Caller {
            guild_id,
            voice_channel: user_voice_channel(&ctx, guild_id, msg.author.id),
        };

        let _typing = matches!(command, Command::Play(_)).then(|| msg.channel_id.start_typing(&ctx.http));

        let chat = MessageChat {
            ctx: &ctx,
            message: &msg,
        };
        let reply = self.gateway.dispatch(&caller, command, &chat).await;

        if let Err(e) = self.send_reply(&ctx, msg.channel_id, reply).await {
            error!("Error al enviar respuesta: {:?}", e);
        }
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id else {
            return;
        };

        // Detectar si el bot fue desconectado
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id == current_user_id && old.is_some() && new.channel_id.is_none() {
            self.gateway.bot_disconnected(guild_id).await;
            return;
        }

        let Some(session) = self.gateway.registry().get(guild_id) else {
            return;
        };
        let destination = session.destination();

        match channel_member_count(&ctx, destination) {
            Some(remaining) => {
                self.gateway.membership_changed(destination, remaining).await;
            }
            None => warn!("⚠️ Guild {} no encontrada en caché", guild_id),
        }
    }
}
