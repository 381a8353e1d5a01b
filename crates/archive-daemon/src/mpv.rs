/// mpv as the shared audio output.
///
/// ```text
///   MpvOutput (AudioOutput)
///     ├── MpvDriver     owns the child process, spawns or reattaches
///     └── MpvHandle     writer task ← requests        → IPC socket
///                       reader task → replies (by request_id)
///                                   → events → SignalMapper → CoreEvent::Media
/// ```
///
/// mpv is started lazily on the first load.  Status is derived from
/// observed properties (core-idle, pause, paused-for-cache) and the
/// end-file event, never polled.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use archive_engine::{AudioOutput, CoreEvent, MediaSignal};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

const IPC_TIMEOUT: Duration = Duration::from_secs(5);

// observe_property ids, matched in property-change events
pub const OBS_CORE_IDLE: u64 = 1;
pub const OBS_PAUSE: u64 = 2;
pub const OBS_PAUSED_FOR_CACHE: u64 = 3;

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct Request {
    id: u64,
    line: String,
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// Unsolicited message from mpv (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    pub fn name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }

    /// `(observe id, data)` for property-change events.
    pub fn property_change(&self) -> Option<(u64, &Value)> {
        if self.name()? != "property-change" {
            return None;
        }
        let id = self.raw.get("id")?.as_u64()?;
        Some((id, self.raw.get("data").unwrap_or(&Value::Null)))
    }
}

// ── handle ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<Request>,
    /// Cleared by the reader task when the IPC connection ends.
    connected: Arc<AtomicBool>,
}

impl MpvHandle {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let mut line = serde_json::to_string(&json!({ "command": command, "request_id": id }))?;
        line.push('\n');

        let (reply, reply_rx) = oneshot::channel();
        self.tx
            .send(Request { id, line, reply })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        timeout(IPC_TIMEOUT, reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", id))?
    }

    pub async fn load(&self, url: &str, volume: f32) -> anyhow::Result<()> {
        // pause survives loadfile in mpv, so clear it first
        self.set_pause(false).await?;
        self.send(json!(["loadfile", url, "replace"])).await?;
        self.set_volume(volume).await
    }

    pub async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "pause", paused])).await?;
        Ok(())
    }

    pub async fn set_volume(&self, volume: f32) -> anyhow::Result<()> {
        self.send(json!(["set_property", "volume", volume_percent(volume)]))
            .await?;
        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.send(json!(["stop"])).await?;
        Ok(())
    }

    /// Register the observed properties.  Required after every fresh
    /// connection; mpv replies with the current values immediately.
    pub async fn observe(&self) {
        for (id, name) in [
            (OBS_CORE_IDLE, "core-idle"),
            (OBS_PAUSE, "pause"),
            (OBS_PAUSED_FOR_CACHE, "paused-for-cache"),
        ] {
            match self.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("mpv: observing {} as {}", name, id),
                Err(e) => warn!("mpv: observe_property {} failed: {}", name, e),
            }
        }
    }
}

fn volume_percent(volume: f32) -> f64 {
    f64::from((volume * 100.0).clamp(0.0, 100.0)).round()
}

// ── driver ────────────────────────────────────────────────────────────────────

/// Owns the mpv child process.
pub struct MpvDriver {
    socket_name: String,
    process: Option<tokio::process::Child>,
}

impl MpvDriver {
    pub fn new() -> Self {
        Self {
            socket_name: archive_proto::platform::mpv_socket_name(),
            process: None,
        }
    }

    pub async fn kill(&mut self) {
        if let Some(mut child) = self.process.take() {
            let _ = child.kill().await;
        }
    }

    /// Start a fresh mpv (replacing any stale one) and connect to it.
    pub async fn spawn_and_connect(
        &mut self,
        volume: f32,
        events: mpsc::Sender<MpvEvent>,
    ) -> anyhow::Result<MpvHandle> {
        self.kill().await;
        #[cfg(unix)]
        let _ = tokio::fs::remove_file(&self.socket_name).await;

        let binary = archive_proto::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;
        info!("mpv: spawning {:?}", binary);
        let child = tokio::process::Command::new(binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg("--quiet")
            .arg(archive_proto::platform::mpv_socket_arg())
            .arg(format!("--volume={}", volume_percent(volume)))
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.process = Some(child);

        for _ in 0..50 {
            sleep(Duration::from_millis(100)).await;
            if let Some(handle) = self.connect(events.clone()).await {
                info!("mpv: connected to IPC endpoint");
                return Ok(handle);
            }
        }
        anyhow::bail!("mpv IPC endpoint did not appear")
    }

    /// Attach to an mpv left running by a previous daemon, if any.
    pub async fn try_reconnect(&mut self, events: mpsc::Sender<MpvEvent>) -> Option<MpvHandle> {
        let handle = self.connect(events).await?;
        info!("mpv: reattached to running instance");
        Some(handle)
    }

    #[cfg(unix)]
    async fn connect(&self, events: mpsc::Sender<MpvEvent>) -> Option<MpvHandle> {
        let stream = UnixStream::connect(&self.socket_name).await.ok()?;
        let (read_half, write_half) = stream.into_split();
        Some(start_io_tasks(read_half, write_half, events))
    }

    #[cfg(windows)]
    async fn connect(&self, events: mpsc::Sender<MpvEvent>) -> Option<MpvHandle> {
        let pipe = ClientOptions::new()
            .open(format!(r"\\.\pipe\{}", self.socket_name))
            .ok()?;
        let (read_half, write_half) = tokio::io::split(pipe);
        Some(start_io_tasks(read_half, write_half, events))
    }
}

fn start_io_tasks<R, W>(read_half: R, write_half: W, events: mpsc::Sender<MpvEvent>) -> MpvHandle
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
    let connected = Arc::new(AtomicBool::new(true));
    let (tx, rx) = mpsc::channel::<Request>(64);
    tokio::spawn(writer_task(write_half, rx, pending.clone()));
    let reader_connected = connected.clone();
    tokio::spawn(async move {
        reader_task(BufReader::new(read_half), pending, events).await;
        reader_connected.store(false, Ordering::Relaxed);
    });
    MpvHandle { tx, connected }
}

async fn fail_all(pending: &Pending, reason: &str) {
    for (_, tx) in pending.lock().await.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", reason)));
    }
}

async fn reader_task<R>(mut reader: BufReader<R>, pending: Pending, events: mpsc::Sender<MpvEvent>)
where
    R: tokio::io::AsyncRead + Unpin,
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
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                let Some(id) = val.get("request_id").and_then(Value::as_u64) else {
                    let _ = events.send(MpvEvent { raw: val }).await;
                    continue;
                };
                let Some(tx) = pending.lock().await.remove(&id) else {
                    debug!("mpv reader: reply for unknown req={}", id);
                    continue;
                };
                let result = match val.get("error").and_then(Value::as_str) {
                    Some("success") => Ok(val),
                    other => Err(anyhow::anyhow!(
                        "mpv error: {}",
                        other.unwrap_or("unknown error")
                    )),
                };
                let _ = tx.send(result);
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_all(&pending, &format!("mpv IPC read error: {e}")).await;
                break;
            }
        }
    }
}

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<Request>, pending: Pending)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // registered before writing so the reader can always match the reply
        pending.lock().await.insert(req.id, req.reply);
        debug!("mpv writer: req={} {}", req.id, req.line.trim());
        if let Err(e) = writer.write_all(req.line.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── event → signal mapping ────────────────────────────────────────────────────

/// Turns mpv's property and lifecycle events into session signals.
#[derive(Debug, Default)]
pub struct SignalMapper {
    core_idle: Option<bool>,
    paused: bool,
    /// Between end-of-file and the next start-file nothing is playing and
    /// core-idle must not read as a stall.
    ended: bool,
}

impl SignalMapper {
    pub fn map(&mut self, evt: &MpvEvent) -> Option<MediaSignal> {
        if let Some((id, data)) = evt.property_change() {
            return match id {
                OBS_CORE_IDLE => {
                    let idle = data.as_bool();
                    if idle == self.core_idle {
                        return None;
                    }
                    self.core_idle = idle;
                    match idle {
                        Some(false) if !self.paused => Some(MediaSignal::Playing),
                        Some(true) if !self.paused && !self.ended => Some(MediaSignal::Waiting),
                        _ => None,
                    }
                }
                OBS_PAUSE => {
                    let paused = data.as_bool().unwrap_or(false);
                    if paused == self.paused {
                        return None;
                    }
                    self.paused = paused;
                    if paused {
                        Some(MediaSignal::Paused)
                    } else if self.core_idle == Some(false) {
                        Some(MediaSignal::Playing)
                    } else {
                        None
                    }
                }
                OBS_PAUSED_FOR_CACHE => match data.as_bool() {
                    Some(true) if !self.paused => Some(MediaSignal::Waiting),
                    _ => None,
                },
                _ => None,
            };
        }

        match evt.name()? {
            "start-file" => {
                self.ended = false;
                None
            }
            "playback-restart" => Some(MediaSignal::LoadedData),
            "end-file" => {
                let reason = evt.raw.get("reason").and_then(Value::as_str).unwrap_or("unknown");
                info!("mpv: end-file reason={}", reason);
                match reason {
                    "eof" => {
                        self.ended = true;
                        Some(MediaSignal::Ended)
                    }
                    "error" => {
                        self.ended = true;
                        let detail = evt
                            .raw
                            .get("file_error")
                            .and_then(Value::as_str)
                            .unwrap_or("playback error");
                        Some(MediaSignal::Error(detail.to_string()))
                    }
                    "quit" => {
                        self.ended = true;
                        Some(MediaSignal::Error("mpv quit".to_string()))
                    }
                    // stop / redirect: replaced by the next loadfile
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

// ── AudioOutput ───────────────────────────────────────────────────────────────

pub struct MpvOutput {
    driver: MpvDriver,
    handle: Option<MpvHandle>,
    volume: f32,
    /// Loop-back into the coordinator for media signals.
    core_tx: mpsc::Sender<CoreEvent>,
}

impl MpvOutput {
    pub fn new(volume: f32, core_tx: mpsc::Sender<CoreEvent>) -> Self {
        Self {
            driver: MpvDriver::new(),
            handle: None,
            volume,
            core_tx,
        }
    }

    async fn ensure_handle(&mut self) -> anyhow::Result<MpvHandle> {
        if let Some(handle) = &self.handle {
            if handle.is_connected() {
                return Ok(handle.clone());
            }
            warn!("mpv: IPC connection gone, dropping handle");
            self.handle = None;
        }

        let (event_tx, mut event_rx) = mpsc::channel::<MpvEvent>(64);
        let core_tx = self.core_tx.clone();
        tokio::spawn(async move {
            let mut mapper = SignalMapper::default();
            while let Some(evt) = event_rx.recv().await {
                debug!("mpv event: {}", evt.raw);
                if let Some(signal) = mapper.map(&evt) {
                    if core_tx.send(CoreEvent::Media(signal)).await.is_err() {
                        return;
                    }
                }
            }
            let lost = MediaSignal::Error("mpv IPC connection lost".to_string());
            let _ = core_tx.send(CoreEvent::Media(lost)).await;
        });

        let handle = match self.driver.try_reconnect(event_tx.clone()).await {
            Some(handle) => handle,
            None => self.driver.spawn_and_connect(self.volume, event_tx).await?,
        };
        handle.observe().await;
        self.handle = Some(handle.clone());
        Ok(handle)
    }
}

#[async_trait]
impl AudioOutput for MpvOutput {
    async fn load(&mut self, url: &str, volume: f32) -> anyhow::Result<()> {
        self.volume = volume;
        let handle = self.ensure_handle().await?;
        info!("mpv: loadfile {}", url);
        handle.load(url, volume).await
    }

    async fn set_paused(&mut self, paused: bool) -> anyhow::Result<()> {
        match &self.handle {
            Some(handle) => handle.set_pause(paused).await,
            None => Ok(()),
        }
    }

    async fn set_volume(&mut self, volume: f32) -> anyhow::Result<()> {
        self.volume = volume;
        match &self.handle {
            Some(handle) => handle.set_volume(volume).await,
            None => Ok(()),
        }
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        info!("mpv: stopping");
        if let Some(handle) = self.handle.take() {
            let _ = handle.stop().await;
        }
        self.driver.kill().await;
        Ok(())
    }
}
