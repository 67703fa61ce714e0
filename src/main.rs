use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info};

use music_sessions::{
    audio::{player::SongbirdTransport, registry::SessionRegistry},
    bot::{gateway::CommandGateway, MusicBot},
    config::Config,
    sources::YtDlpResolver,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("music_sessions=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Music Sessions v{}", env!("CARGO_PKG_VERSION"));

    // El health check no necesita token
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check().await;
    }

    let config = Config::load()?;
    info!("{}", config.summary());

    // Voz y resolución
    let songbird = Songbird::serenity();
    // Songbird pide el ejecutable como &'static str; vive lo que el proceso
    let ytdlp_program: &'static str = Box::leak(config.ytdlp_path.clone().into_boxed_str());
    let transport = Arc::new(SongbirdTransport::new(
        songbird.clone(),
        config.playback_start_timeout,
        ytdlp_program,
    ));
    let resolver = Arc::new(YtDlpResolver::new(config.ytdlp_path.clone()));

    let registry = Arc::new(SessionRegistry::new());
    let gateway = Arc::new(CommandGateway::new(
        registry.clone(),
        transport,
        resolver,
        config.gateway_settings(),
    ));

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let handler = MusicBot::new(Arc::new(config.clone()), gateway);

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");

        let closed = registry.terminate_all().await;
        info!("👋 {} sesiones cerradas", closed);

        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn health_check() -> Result<()> {
    let program = Config::ytdlp_path_from_env();
    let version = YtDlpResolver::new(program).verify().await?;

    info!("yt-dlp {}", version);
    println!("OK");
    Ok(())
}
