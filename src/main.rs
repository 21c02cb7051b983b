// src/main.rs - Wires the relay, producer loop, live chat reader and control API

use anyhow::Result;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use chatsim::config::{load_usernames, DEFAULT_CONFIG_PATH};
use chatsim::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables and initialize logging
    dotenv::dotenv().ok();
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    info!("Starting chatsim v{}", chatsim::VERSION);

    let config_path = std::env::var("CHATSIM_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = AppConfig::load(&config_path).await?;

    // Engine state
    let usernames = load_usernames(&config.usernames_file).await;
    if usernames.is_empty() {
        warn!(
            "No replacement usernames loaded from {}, speakers keep their names",
            config.usernames_file.display()
        );
    }
    let session = ChatSession::from_config(&config.moderation, usernames, config.runner.force_username)?;

    // Relay server
    let audit_log = Arc::new(UsernameAuditLog::open(config.audit_log_path()).await);
    let relay = Arc::new(BroadcastRelay::new(audit_log));
    let listener = BroadcastRelay::bind(&config.relay_addr()).await?;
    let relay_server = Arc::clone(&relay);
    tokio::spawn(async move {
        if let Err(e) = relay_server.serve(listener).await {
            error!("Relay server stopped: {:#}", e);
        }
    });

    // Emotes load in the background; lines are moderated against whatever has arrived
    let fetcher = Arc::new(EmoteFetcher::new(&config.twitch)?);
    {
        let fetcher = Arc::clone(&fetcher);
        let session = session.clone();
        let channels = config.twitch.emote_channels.clone();
        tokio::spawn(async move {
            let added = session.merge_emotes(fetcher.global_emotes().await).await;
            info!("Emote index seeded with {} global entries", added);
            for channel in channels {
                let added = session.merge_emotes(fetcher.channel_emotes(&channel).await).await;
                info!("Emote index gained {} entries from '{}'", added, channel);
            }
        });
    }

    // Live chat rebroadcast
    let reader = Arc::new(TwitchChatReader::new(config.twitch.channels.clone()));
    if !reader.channels().is_empty() {
        info!("Rebroadcasting {} chat from {:?}", reader.platform_name(), reader.channels());
    }
    {
        let mut events = reader.subscribe();
        let relay = Arc::clone(&relay);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        relay.broadcast(&event.into_envelope()).await;
                    }
                    Err(RecvError::Lagged(skipped)) => warn!("Live chat forwarder skipped {} events", skipped),
                    Err(RecvError::Closed) => break,
                }
            }
        });
        let reader = Arc::clone(&reader);
        tokio::spawn(async move { reader.run().await });
    }

    // Producer loop
    let completion = Arc::new(CompletionClient::new(&config.completion)?);
    let runner = Arc::new(ChatRunner::new(
        session,
        completion,
        Arc::clone(&relay) as Arc<dyn ChatSink>,
        config.runner.clone(),
    ));
    if config.autostart {
        runner.start();
    }

    #[cfg(feature = "web")]
    if config.web.enabled {
        let server = ControlServer::new(ControlState {
            runner: Arc::clone(&runner),
            relay: Arc::clone(&relay),
            fetcher: Arc::clone(&fetcher),
            usernames_file: config.usernames_file.clone(),
        });
        let port = config.web.port;
        tokio::spawn(async move {
            if let Err(e) = server.start_server(port).await {
                error!("Control API stopped: {:#}", e);
            }
        });
    }

    info!("chatsim is running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received");
    reader.shutdown();
    let cancelled = runner.stop().await;
    info!("Stopped with {} undelivered batches cancelled", cancelled);
    Ok(())
}
