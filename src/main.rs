use poise::serenity_prelude::Http;
use solace_warden::clock::SystemClock;
use solace_warden::config::{Config, StorageBackend};
use solace_warden::messages::Messages;
use solace_warden::punishment::{
    EnforcementGates, MemoryStore, PoolSettings, PunishmentEngine, PunishmentStore, SqliteStore,
    effect_channel,
};
use solace_warden::roster::Roster;
use solace_warden::surfaces::bridge::{self, BridgeData, DiscordLogNotifier};
use solace_warden::surfaces::console::ConsoleDriver;
use solace_warden::surfaces::session::SessionBook;
use solace_warden::surfaces::socket::{self, ControlHandler};
use solace_warden::{BRIDGE_TARGET, Error, logging};
use std::env;
use std::path::Path;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{error, info};

/// Make sure the directory of a file-backed SQLite url exists
async fn prepare_database_dir(url: &str) -> std::io::Result<()> {
    let Some(path) = url.strip_prefix("sqlite://") else {
        return Ok(());
    };
    let path = path.split('?').next().unwrap_or(path);
    if path == ":memory:" {
        return Ok(());
    }
    match Path::new(path).parent() {
        Some(dir) if !dir.as_os_str().is_empty() => tokio::fs::create_dir_all(dir).await,
        _ => Ok(()),
    }
}

async fn async_main() -> Result<(), Error> {
    let config = Config::load(&Config::path_from_env()).await?;
    logging::init(&config.logging)?;

    let (store, sqlite): (Arc<dyn PunishmentStore>, Option<SqliteStore>) =
        match config.storage.backend {
            StorageBackend::Sqlite => {
                prepare_database_dir(&config.storage.url).await?;
                let settings = PoolSettings {
                    max_connections: config.storage.max_connections,
                    acquire_timeout: config.storage.acquire_timeout(),
                };
                let sqlite = SqliteStore::open(&config.storage.url, &settings).await?;
                (Arc::new(sqlite.clone()), Some(sqlite))
            }
            StorageBackend::Memory => (Arc::new(MemoryStore::new()), None),
        };

    let messages =
        Arc::new(Messages::load(&config.messages, config.appeal_links.clone()).await?);
    let roster = Arc::new(Roster::new());

    let (dispatcher, main_loop) = effect_channel(
        roster.clone(),
        config.effect_queue,
        config.effect_ack_timeout(),
    );
    let main_loop = main_loop.spawn();

    let token = if config.bridge.enabled {
        Some(env::var(&config.bridge.token_env)?)
    } else {
        None
    };

    let mut builder = PunishmentEngine::builder(store.clone(), roster.clone(), dispatcher.clone())
        .messages(messages.clone())
        .request_timeout(config.storage.request_timeout());
    if let (Some(token), Some(channel_id)) = (&token, config.bridge.log_channel_id) {
        builder = builder.notifier(Arc::new(DiscordLogNotifier::new(
            Arc::new(Http::new(token)),
            channel_id,
        )));
    }
    let engine = builder.build();

    let gates = EnforcementGates::new(store, messages)
        .with_request_timeout(config.storage.request_timeout());
    let sessions = SessionBook::new(Arc::new(SystemClock), config.sessions.ttl());

    let mut services = Vec::new();
    if config.socket.enabled {
        let listener = socket::bind(&config.socket.bind).await?;
        services.push(tokio::spawn(socket::serve(
            listener,
            ControlHandler::new(engine.clone()),
        )));
    }
    if let Some(token) = token {
        let data = BridgeData::new(engine.clone(), config.bridge.clone());
        let mut client = bridge::client(&token, data).await?;
        services.push(tokio::spawn(async move {
            if let Err(e) = client.start().await {
                error!(target: BRIDGE_TARGET, error = %e, "Bridge stopped");
            }
        }));
    }

    let console = ConsoleDriver::new(roster, gates, engine, sessions.clone());
    services.push(tokio::spawn(async move {
        if let Err(e) = console.run(BufReader::new(tokio::io::stdin())).await {
            error!(error = %e, "Console input failed");
        }
    }));

    info!("Punishment engine running, Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    for service in services {
        service.abort();
    }
    let dropped = sessions.cancel_all();
    if dropped > 0 {
        info!(sessions = dropped, "Dropped pending compositions");
    }
    dispatcher.shutdown().await;
    main_loop.await?;
    if let Some(sqlite) = sqlite {
        sqlite.close().await;
    }
    Ok(())
}

fn main() {
    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(Error::from)
        .and_then(|runtime| runtime.block_on(async_main()));

    if let Err(err) = result {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
