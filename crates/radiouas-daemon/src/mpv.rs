/// mpv JSON IPC driver for the shared audio player.
///
/// ```text
///   MpvDriver::spawn_and_connect() / try_reconnect()
///         │
///         ├── writer_task   ← PendingRequest via mpsc → socket
///         └── reader_task   ← JSON lines from socket
///                                ├── reply (request_id) → waiting oneshot
///                                └── event              → MpvEvent channel
/// ```
///
/// Unix uses a domain socket, Windows a named pipe `\\.\pipe\<name>`.
use radiouas_proto::playback::LoadedMedia;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// observe_property ids, matched in property-change events.
pub const OBS_CORE_IDLE: u64 = 1;
pub const OBS_PAUSE: u64 = 2;

type Reply = oneshot::Sender<anyhow::Result<Value>>;
type PendingMap = Arc<Mutex<HashMap<u64, Reply>>>;

struct PendingRequest {
    req_id: u64,
    line: String,
    reply: Reply,
}

/// Unsolicited message from mpv, reduced to what the daemon reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum MpvEvent {
    Property { id: u64, data: Value },
    StartFile,
    FileLoaded,
    /// `reason` is `eof`, `stop`, `quit`, `error` or `redirect`.
    EndFile {
        reason: String,
        error: Option<String>,
        /// Playlist entry that ended, when mpv reports it.
        entry_id: Option<u64>,
    },
    /// The IPC connection went away (mpv exited or was killed).
    Disconnected,
    Other(String),
}

impl MpvEvent {
    pub fn parse(raw: &Value) -> Option<Self> {
        let name = raw.get("event")?.as_str()?;
        let event = match name {
            "property-change" => MpvEvent::Property {
                id: raw.get("id")?.as_u64()?,
                data: raw.get("data").cloned().unwrap_or(Value::Null),
            },
            "start-file" => MpvEvent::StartFile,
            "file-loaded" => MpvEvent::FileLoaded,
            "end-file" => MpvEvent::EndFile {
                reason: raw
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
                error: raw
                    .get("file_error")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                entry_id: raw.get("playlist_entry_id").and_then(Value::as_u64),
            },
            other => MpvEvent::Other(other.to_string()),
        };
        Some(event)
    }
}

/// Cloneable handle to the writer task.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let mut line = serde_json::to_string(&json!({ "command": command, "request_id": req_id }))?;
        line.push('\n');

        let (reply, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                line,
                reply,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(REPLY_TIMEOUT, reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    /// Replace whatever is loaded with `url` and make sure it plays. Returns
    /// the new playlist entry id when mpv reports one.
    pub async fn load(&self, url: &str) -> anyhow::Result<Option<u64>> {
        let resp = self.send(json!(["loadfile", url, "replace"])).await?;
        let entry_id = resp
            .get("data")
            .and_then(|data| data.get("playlist_entry_id"))
            .and_then(Value::as_u64);
        self.set_pause(false).await?;
        Ok(entry_id)
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.send(json!(["stop"])).await?;
        Ok(())
    }

    pub async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "pause", paused])).await?;
        Ok(())
    }

    pub async fn seek_to(&self, secs: f64) -> anyhow::Result<()> {
        self.send(json!(["seek", secs, "absolute"])).await?;
        Ok(())
    }

    /// Ask mpv to exit; used for an instance this session did not spawn.
    pub async fn quit(&self) -> anyhow::Result<()> {
        self.send(json!(["quit"])).await?;
        Ok(())
    }

    /// `None` when the property is unavailable (e.g. nothing loaded).
    pub async fn get_property(&self, name: &str) -> Option<Value> {
        match self.send(json!(["get_property", name])).await {
            Ok(resp) => resp.get("data").cloned().filter(|v| !v.is_null()),
            Err(e) => {
                debug!("mpv: get_property {} failed: {}", name, e);
                None
            }
        }
    }

    pub async fn get_f64(&self, name: &str) -> Option<f64> {
        self.get_property(name).await?.as_f64()
    }

    /// Position and duration of the loaded file, in seconds.
    pub async fn timeline(&self) -> (Option<f64>, Option<f64>) {
        (self.get_f64("time-pos").await, self.get_f64("duration").await)
    }

    /// What mpv currently has loaded, if anything.
    pub async fn loaded_media(&self) -> Option<LoadedMedia> {
        let url = self.get_property("path").await?.as_str()?.to_string();
        let title = self
            .get_property("media-title")
            .await
            .and_then(|v| v.as_str().map(str::to_string));
        let paused = self
            .get_property("pause")
            .await
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        Some(LoadedMedia { url, title, paused })
    }

    /// Ask mpv to push pause and core-idle changes. Needed after every fresh
    /// connection.
    pub async fn observe_status(&self) {
        for (id, name) in [(OBS_CORE_IDLE, "core-idle"), (OBS_PAUSE, "pause")] {
            match self.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("mpv: observe_property id={} name={}", id, name),
                Err(e) => warn!("mpv: observe_property {} failed: {}", name, e),
            }
        }
    }
}

/// Owns the mpv child process.
pub struct MpvDriver {
    socket_name: String,
    process: Option<tokio::process::Child>,
    volume: f32,
}

impl MpvDriver {
    pub fn new(socket_name: String, volume: f32) -> Self {
        Self {
            socket_name,
            process: None,
            volume,
        }
    }

    /// True while a process we spawned is still running. A reused mpv from a
    /// previous session is not ours and reads as not alive.
    pub fn process_alive(&mut self) -> bool {
        match self.process.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    pub fn owns_process(&self) -> bool {
        self.process.is_some()
    }

    pub async fn kill(&mut self) {
        if let Some(mut child) = self.process.take() {
            if let Err(e) = child.kill().await {
                debug!("mpv: kill failed: {}", e);
            }
        }
    }

    /// Attach to an mpv left running by an earlier session, without spawning.
    pub async fn try_reconnect(&mut self, event_tx: mpsc::Sender<MpvEvent>) -> Option<MpvHandle> {
        match self.open_ipc(event_tx).await {
            Ok(handle) => {
                info!("mpv: attached to existing IPC endpoint");
                Some(handle)
            }
            Err(e) => {
                debug!("mpv: no existing IPC endpoint: {}", e);
                None
            }
        }
    }

    pub async fn spawn_and_connect(
        &mut self,
        event_tx: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;
        #[cfg(unix)]
        {
            let _ = tokio::fs::remove_file(&self.socket_name).await;
        }

        let binary = radiouas_proto::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;
        info!("mpv: spawning {}", binary.display());

        let child = tokio::process::Command::new(binary)
            .args(audio_args(self.volume))
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.process = Some(child);

        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if let Ok(handle) = self.open_ipc(event_tx.clone()).await {
                info!("mpv: connected to IPC endpoint");
                return Ok(handle);
            }
            if !self.process_alive() {
                anyhow::bail!("mpv exited during startup");
            }
        }
        anyhow::bail!("mpv IPC endpoint did not appear")
    }

    #[cfg(unix)]
    async fn open_ipc(&self, event_tx: mpsc::Sender<MpvEvent>) -> std::io::Result<MpvHandle> {
        let stream = tokio::net::UnixStream::connect(&self.socket_name).await?;
        Ok(start_io_tasks(stream, event_tx))
    }

    #[cfg(windows)]
    async fn open_ipc(&self, event_tx: mpsc::Sender<MpvEvent>) -> std::io::Result<MpvHandle> {
        use tokio::net::windows::named_pipe::ClientOptions;
        let pipe = ClientOptions::new().open(format!(r"\\.\pipe\{}", self.socket_name))?;
        Ok(start_io_tasks(pipe, event_tx))
    }
}

/// Command line of the headless audio player.
fn audio_args(volume: f32) -> Vec<String> {
    vec![
        "--no-video".into(),
        "--idle=yes".into(),
        "--no-terminal".into(),
        radiouas_proto::platform::mpv_socket_arg(),
        format!("--volume={}", (volume * 100.0).clamp(0.0, 100.0).round() as i64),
    ]
}

pub(crate) fn start_io_tasks<S>(stream: S, event_tx: mpsc::Sender<MpvEvent>) -> MpvHandle
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (tx, rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(write_half, rx, pending.clone()));
    tokio::spawn(reader_task(BufReader::new(read_half), pending, event_tx));

    MpvHandle { tx }
}

async fn fail_all(pending: &PendingMap, why: &str) {
    let mut map = pending.lock().await;
    for (_, reply) in map.drain() {
        let _ = reply.send(Err(anyhow::anyhow!("{}", why)));
    }
}

/// Route one IPC line: replies resolve their request, everything else is an
/// event.
async fn dispatch_line(line: &str, pending: &PendingMap, event_tx: &mpsc::Sender<MpvEvent>) {
    let val: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            debug!("mpv reader: invalid json '{}': {}", line, e);
            return;
        }
    };

    let Some(req_id) = val.get("request_id").and_then(Value::as_u64) else {
        if let Some(event) = MpvEvent::parse(&val) {
            debug!("mpv reader: event {:?}", event);
            let _ = event_tx.send(event).await;
        }
        return;
    };

    let Some(reply) = pending.lock().await.remove(&req_id) else {
        debug!("mpv reader: reply for unknown req={}", req_id);
        return;
    };
    let result = match val.get("error").and_then(Value::as_str) {
        Some("success") => Ok(val),
        other => Err(anyhow::anyhow!("mpv error: {}", other.unwrap_or("unknown error"))),
    };
    let _ = reply.send(result);
}

async fn reader_task<R>(
    mut reader: BufReader<R>,
    pending: PendingMap,
    event_tx: mpsc::Sender<MpvEvent>,
) where
    R: AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_all(&pending, "mpv IPC connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    dispatch_line(trimmed, &pending, &event_tx).await;
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_all(&pending, "mpv IPC read error").await;
                break;
            }
        }
    }
    let _ = event_tx.send(MpvEvent::Disconnected).await;
}

async fn writer_task<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<PendingRequest>,
    pending: PendingMap,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register before writing so the reader can always match the reply.
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: req={} {}", req.req_id, req.line.trim());
        if let Err(e) = writer.write_all(req.line.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(reply) = pending.lock().await.remove(&req.req_id) {
                let _ = reply.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}
