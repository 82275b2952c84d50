/// DaemonCore: single-owner event loop for the shared player.
///
/// Every input (client commands, mpv events, progress ticks, now-playing
/// refreshes) arrives as a `DaemonEvent` on one mpsc channel. The core owns
/// the `Coordinator`, the `MpvDriver` and the video window exclusively; after
/// each event it publishes a snapshot to the `StateManager` and broadcasts
/// `StateUpdated` when something changed.
///
/// mpv reports pause and core-idle through `observe_property`; position and
/// duration are polled once per tick while an episode plays.
use std::sync::Arc;
use std::time::Duration;

use radiouas_proto::config::Config;
use radiouas_proto::playback::{Coordinator, EngineCommand, LiveStream};
use radiouas_proto::protocol::{Command, EngineHealth, NowPlaying};
use radiouas_proto::state::StateManager;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::mpv::{MpvDriver, MpvEvent, MpvHandle, OBS_CORE_IDLE, OBS_PAUSE};
use crate::video::VideoLauncher;
use crate::BroadcastMessage;

/// All inputs into the DaemonCore loop.
#[derive(Debug)]
pub enum DaemonEvent {
    /// A command from a socket client or the HTTP API.
    ClientCommand(Command),
    /// Unsolicited mpv event, tagged with the connection it came from.
    Mpv { conn: u64, event: MpvEvent },
    /// Progress poll and liveness check.
    ProgressTick,
    /// Fresh now-playing metadata.
    NowPlaying(NowPlaying),
    Shutdown,
}

pub struct DaemonCore {
    state_manager: Arc<StateManager>,
    coordinator: Coordinator,
    mpv_driver: MpvDriver,
    /// `None` until mpv is first needed, and again after it dies.
    mpv_handle: Option<MpvHandle>,
    /// Id of the current mpv connection; events from older ones are stale.
    mpv_conn: u64,
    /// Playlist entry of the last loadfile; `end-file` for any other entry is stale.
    current_entry: Option<u64>,
    video: VideoLauncher,
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    obs_pause: bool,
    obs_core_idle: bool,
}

impl DaemonCore {
    pub async fn new(
        config: &Config,
        state_manager: Arc<StateManager>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        event_tx: mpsc::Sender<DaemonEvent>,
    ) -> Self {
        let now_playing = state_manager
            .persistent()
            .await
            .now_playing
            .unwrap_or_else(|| default_now_playing(config));
        let live = LiveStream {
            url: config.station.stream_url.clone(),
            cover_url: config.station.cover_url.clone(),
        };

        Self {
            state_manager,
            coordinator: Coordinator::new(live, now_playing),
            mpv_driver: MpvDriver::new(
                radiouas_proto::platform::mpv_socket_name(),
                config.mpv.default_volume,
            ),
            mpv_handle: None,
            mpv_conn: 0,
            current_entry: None,
            video: VideoLauncher::new(
                config.station.video_url.clone(),
                config.station.name.clone(),
            ),
            event_tx,
            broadcast_tx,
            obs_pause: false,
            obs_core_idle: true,
        }
    }

    /// Run until `Shutdown`, cancellation, or every sender is gone.
    pub async fn run(
        mut self,
        mut event_rx: mpsc::Receiver<DaemonEvent>,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        info!("DaemonCore: starting event loop");
        self.reconcile().await;
        self.publish().await;

        loop {
            let evt = tokio::select! {
                () = cancel.cancelled() => {
                    info!("DaemonCore: cancelled");
                    break;
                }
                evt = event_rx.recv() => evt,
            };
            match evt {
                None => {
                    info!("DaemonCore: event channel closed, shutting down");
                    break;
                }
                Some(DaemonEvent::Shutdown) => {
                    info!("DaemonCore: shutdown requested");
                    break;
                }
                Some(evt) => self.handle_event(evt).await,
            }
            self.publish().await;
        }

        self.cleanup().await;
        Ok(())
    }

    async fn handle_event(&mut self, evt: DaemonEvent) {
        match evt {
            DaemonEvent::ClientCommand(cmd) => {
                info!("DaemonCore: command {:?}", cmd);
                self.handle_command(cmd).await;
            }
            DaemonEvent::Mpv { conn, event } => {
                if conn == self.mpv_conn {
                    self.handle_mpv_event(event).await;
                } else {
                    debug!("DaemonCore: dropping event from stale mpv connection {}", conn);
                }
            }
            DaemonEvent::ProgressTick => self.on_tick().await,
            DaemonEvent::NowPlaying(now_playing) => {
                debug!("DaemonCore: now playing {:?}", now_playing);
                self.coordinator.set_now_playing(now_playing.clone());
                if let Err(e) = self.state_manager.remember_now_playing(now_playing).await {
                    warn!("Failed to persist now-playing: {}", e);
                }
            }
            DaemonEvent::Shutdown => {}
        }
    }

    /// Publish the coordinator's snapshot; broadcast only on a real change.
    async fn publish(&mut self) {
        if let Some(rev) = self.state_manager.publish(self.coordinator.snapshot()).await {
            debug!("DaemonCore: state rev {}", rev);
            let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
        }
    }

    // ── session start ─────────────────────────────────────────────────────────

    /// Adopt an mpv left running by an earlier session, if there is one.
    async fn reconcile(&mut self) {
        let events = self.mpv_event_channel();
        let handle = self.mpv_driver.try_reconnect(events).await;
        self.adopt(handle).await;
    }

    /// Classify what `handle` has loaded against the live URL and the
    /// persisted last item.
    async fn adopt(&mut self, handle: Option<MpvHandle>) {
        let last_item = self.state_manager.persistent().await.last_item;
        self.current_entry = None;
        let loaded = match handle {
            Some(handle) => {
                handle.observe_status().await;
                let loaded = handle.loaded_media().await;
                self.mpv_handle = Some(handle);
                self.set_engine_health(EngineHealth::Running).await;
                loaded
            }
            None => None,
        };
        match &loaded {
            Some(media) => {
                info!("DaemonCore: mpv already has {} loaded", media.url);
                self.obs_pause = media.paused;
            }
            None => debug!("DaemonCore: nothing loaded at startup"),
        }
        self.coordinator.reconcile(loaded, last_item);
    }

    // ── commands ──────────────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::PlayLive => {
                let commands = self.coordinator.play_live();
                self.apply(commands).await;
            }
            Command::PlayEpisode { episode } => {
                let commands = self.coordinator.play_episode(&episode);
                self.apply(commands).await;
            }
            Command::Toggle => {
                let commands = self.coordinator.toggle();
                self.apply(commands).await;
            }
            Command::Seek { fraction } => match self.coordinator.seek(fraction) {
                Some(command) => self.apply(vec![command]).await,
                None => debug!("DaemonCore: seek ignored (live or no duration)"),
            },
            Command::Stop => {
                let commands = self.coordinator.stop();
                self.apply(commands).await;
            }
            Command::OpenVideo => {
                if let Err(e) = self.video.open().await {
                    warn!("Failed to open video stream: {}", e);
                    self.report_error(format!("No se pudo abrir el video: {}", e));
                }
            }
            Command::GetState => {
                // Socket clients get the state after every command anyway.
            }
        }
    }

    /// Apply engine commands in order. A failure unloads the item.
    async fn apply(&mut self, commands: Vec<EngineCommand>) {
        for command in commands {
            if let Err(e) = self.apply_one(command).await {
                warn!("DaemonCore: engine command failed: {}", e);
                self.coordinator.on_error();
                self.report_error(format!("Error de reproducción: {}", e));
                break;
            }
        }
    }

    async fn apply_one(&mut self, command: EngineCommand) -> anyhow::Result<()> {
        match command {
            EngineCommand::Load(item) => {
                let handle = self
                    .ensure_mpv_handle()
                    .await
                    .ok_or_else(|| anyhow::anyhow!("mpv unavailable"))?;
                info!("Loading {:?}: {}", item.source, item.title);
                self.obs_core_idle = true;
                self.obs_pause = false;
                self.current_entry = handle.load(&item.url).await?;
                if let Err(e) = self.state_manager.remember_item(Some(item)).await {
                    warn!("Failed to persist last item: {}", e);
                }
            }
            EngineCommand::Pause => self.current_handle()?.set_pause(true).await?,
            EngineCommand::Resume => self.current_handle()?.set_pause(false).await?,
            EngineCommand::SeekTo { seconds } => self.current_handle()?.seek_to(seconds).await?,
            EngineCommand::Stop => {
                if let Some(handle) = &self.mpv_handle {
                    handle.stop().await?;
                }
                if let Err(e) = self.state_manager.remember_item(None).await {
                    warn!("Failed to persist last item: {}", e);
                }
            }
        }
        Ok(())
    }

    fn current_handle(&self) -> anyhow::Result<&MpvHandle> {
        self.mpv_handle
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("mpv is not running"))
    }

    fn report_error(&self, message: String) {
        let _ = self.broadcast_tx.send(BroadcastMessage::Error(message));
    }

    // ── mpv ───────────────────────────────────────────────────────────────────

    async fn handle_mpv_event(&mut self, event: MpvEvent) {
        match event {
            MpvEvent::Property { id: OBS_PAUSE, data } => {
                self.obs_pause = data.as_bool().unwrap_or(false);
                self.coordinator
                    .on_engine_status(self.obs_pause, self.obs_core_idle);
            }
            MpvEvent::Property {
                id: OBS_CORE_IDLE,
                data,
            } => {
                self.obs_core_idle = data.as_bool().unwrap_or(true);
                self.coordinator
                    .on_engine_status(self.obs_pause, self.obs_core_idle);
            }
            MpvEvent::Property { id, .. } => debug!("mpv: ignoring property id={}", id),
            MpvEvent::StartFile => debug!("mpv: start-file"),
            MpvEvent::FileLoaded => debug!("mpv: file-loaded"),
            MpvEvent::EndFile {
                entry_id: Some(ended),
                ..
            } if self.current_entry.is_some_and(|current| current != ended) => {
                debug!("mpv: end-file for replaced entry {}", ended);
            }
            MpvEvent::EndFile { reason, error, .. } => match reason.as_str() {
                "eof" => {
                    info!("mpv: playback finished");
                    self.coordinator.on_finished();
                    if let Err(e) = self.state_manager.remember_item(None).await {
                        warn!("Failed to persist last item: {}", e);
                    }
                }
                "error" => {
                    let why = error.unwrap_or_else(|| "unknown error".into());
                    warn!("mpv: playback failed: {}", why);
                    self.coordinator.on_error();
                    self.report_error(format!("Error de reproducción: {}", why));
                }
                // `stop` and `redirect` follow our own loadfile/stop.
                other => debug!("mpv: end-file reason={}", other),
            },
            MpvEvent::Disconnected => {
                warn!("mpv: IPC connection lost");
                self.mpv_handle = None;
                self.current_entry = None;
                self.obs_pause = false;
                self.obs_core_idle = true;
                self.coordinator.on_error();
                self.set_engine_health(EngineHealth::Dead("connection closed".into()))
                    .await;
            }
            MpvEvent::Other(name) => debug!("mpv: event {}", name),
        }
    }

    async fn on_tick(&mut self) {
        if self.mpv_handle.is_some()
            && self.mpv_driver.owns_process()
            && !self.mpv_driver.process_alive()
        {
            warn!("DaemonCore: mpv process died");
            self.mpv_handle = None;
            self.current_entry = None;
            self.coordinator.on_error();
            self.set_engine_health(EngineHealth::Dead("process exited".into()))
                .await;
            return;
        }

        if !self.coordinator.wants_progress() {
            return;
        }
        if let Some(handle) = self.mpv_handle.clone() {
            let (position, duration) = handle.timeline().await;
            self.coordinator.on_timeline(position, duration);
        }
    }

    /// Events from one mpv connection, forwarded into the core loop with a
    /// fresh connection id.
    fn mpv_event_channel(&mut self) -> mpsc::Sender<MpvEvent> {
        self.mpv_conn += 1;
        let conn = self.mpv_conn;
        let (tx, mut rx) = mpsc::channel::<MpvEvent>(64);
        let core_tx = self.event_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if core_tx.send(DaemonEvent::Mpv { conn, event }).await.is_err() {
                    break;
                }
            }
        });
        tx
    }

    async fn ensure_mpv_handle(&mut self) -> Option<MpvHandle> {
        if self.mpv_handle.is_some()
            && self.mpv_driver.owns_process()
            && !self.mpv_driver.process_alive()
        {
            warn!("DaemonCore: mpv process died, dropping handle");
            self.mpv_handle = None;
            self.current_entry = None;
        }
        if let Some(handle) = &self.mpv_handle {
            return Some(handle.clone());
        }

        let events = self.mpv_event_channel();
        let handle = match self.mpv_driver.try_reconnect(events.clone()).await {
            Some(handle) => handle,
            None => {
                self.set_engine_health(EngineHealth::Starting).await;
                match self.mpv_driver.spawn_and_connect(events).await {
                    Ok(handle) => handle,
                    Err(e) => {
                        error!("DaemonCore: failed to start mpv: {}", e);
                        self.set_engine_health(EngineHealth::Dead(e.to_string()))
                            .await;
                        return None;
                    }
                }
            }
        };
        handle.observe_status().await;
        self.set_engine_health(EngineHealth::Running).await;
        self.mpv_handle = Some(handle.clone());
        Some(handle)
    }

    async fn set_engine_health(&mut self, health: EngineHealth) {
        if self.state_manager.set_engine_health(health.clone()).await.is_some() {
            info!("DaemonCore: mpv health → {:?}", health);
            let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
        }
    }

    async fn cleanup(&mut self) {
        info!("DaemonCore: cleanup, stopping mpv");
        self.coordinator.stop();
        if let Some(handle) = self.mpv_handle.take() {
            let _ = handle.stop().await;
            if !self.mpv_driver.owns_process() {
                let _ = handle.quit().await;
            }
        }
        self.mpv_driver.kill().await;
        self.video.close().await;
        self.publish().await;
    }
}

pub fn default_now_playing(config: &Config) -> NowPlaying {
    NowPlaying {
        program: config.station.default_program.clone(),
        production: config.station.default_production.clone(),
    }
}

/// Send `ProgressTick` every `period` until cancelled.
pub fn spawn_ticker(
    event_tx: mpsc::Sender<DaemonEvent>,
    period: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("progress ticker stopped");
                    break;
                }
                _ = interval.tick() => {
                    if event_tx.send(DaemonEvent::ProgressTick).await.is_err() {
                        break;
                    }
                }
            }
        }
    })
}
