mod core;
mod http;
mod mpv;
mod now_playing;
mod socket;
mod video;

use std::sync::Arc;
use std::time::Duration;

use radiouas_proto::api::{EmbyClient, SpcClient, WordPressClient};
use radiouas_proto::config::Config;
use radiouas_proto::schedule::StationClock;
use radiouas_proto::state::StateManager;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Fallback when the configured offset is out of range (UTC-7, Culiacán).
const FALLBACK_UTC_OFFSET_MINUTES: i32 = -420;

#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    StateUpdated,
    Log(String),
    /// A playback failure worth showing to the listener.
    Error(String),
}

/// Forwards WARN and ERROR events to connected clients.
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let level = *event.metadata().level();
        if !matches!(level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        event.record(&mut MessageVisitor(&mut message));

        // no subscribers is fine
        let _ = self.sender.send(BroadcastMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl tracing::field::Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

fn init_logging(
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> anyhow::Result<std::path::PathBuf> {
    let data_dir = radiouas_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(log_file)
                .with_ansi(false),
        )
        .with(BroadcastLayer { sender: broadcast_tx })
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,radiouas_daemon=debug")
            }),
        )
        .init();

    Ok(log_path)
}

fn station_clock(config: &Config) -> anyhow::Result<StationClock> {
    let minutes = config.station.utc_offset_minutes;
    if let Some(clock) = StationClock::from_offset_minutes(minutes) {
        return Ok(clock);
    }
    warn!(
        "utc_offset_minutes {} is out of range, using {}",
        minutes, FALLBACK_UTC_OFFSET_MINUTES
    );
    StationClock::from_offset_minutes(FALLBACK_UTC_OFFSET_MINUTES)
        .ok_or_else(|| anyhow::anyhow!("invalid fallback UTC offset"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);
    let log_path = init_logging(broadcast_tx.clone())?;
    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let state_manager = Arc::new(StateManager::new(config.daemon.state_file.clone()));
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<core::DaemonEvent>(256);
    let cancel = CancellationToken::new();

    let spc = SpcClient::new(&config.spc.base_url)?;

    let daemon_core = core::DaemonCore::new(
        &config,
        state_manager.clone(),
        broadcast_tx.clone(),
        event_tx.clone(),
    )
    .await;

    let listener = socket::bind(
        &config.http.bind_address,
        radiouas_proto::platform::DAEMON_TCP_PORT,
    )
    .await?;
    let _socket_handle = socket::serve(
        listener,
        state_manager.clone(),
        event_tx.clone(),
        broadcast_tx.clone(),
    );

    if config.http.enabled {
        let sources = http::DataSources {
            spc: spc.clone(),
            emby: EmbyClient::new(
                &config.emby.base_url,
                &config.emby.api_key,
                &config.emby.library_id,
                config.emby.accept_invalid_certs,
            )?,
            wordpress: WordPressClient::new(
                &config.wordpress.base_url,
                config.wordpress.category_id,
                config.wordpress.per_page,
            )?,
            clock: station_clock(&config)?,
            page_size: config.emby.page_size,
        };
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            http::HttpState::new(state_manager.clone(), event_tx.clone(), sources),
        );
    }

    let _ticker = core::spawn_ticker(
        event_tx.clone(),
        Duration::from_millis(config.playback.progress_poll_ms.max(100)),
        cancel.clone(),
    );
    let _refresher = now_playing::spawn_refresher(
        spc,
        core::default_now_playing(&config),
        Duration::from_secs(config.spc.now_refresh_secs.max(1)),
        event_tx.clone(),
        cancel.clone(),
    );

    {
        let cancel = cancel.clone();
        let event_tx = event_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, shutting down");
                let _ = event_tx.send(core::DaemonEvent::Shutdown).await;
                cancel.cancel();
            }
        });
    }
    drop(event_tx);

    info!("Daemon initialised, running event loop");
    let result = daemon_core.run(event_rx, cancel.clone()).await;
    cancel.cancel();
    result
}
