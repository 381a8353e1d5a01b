#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use archive_engine::{AudioOutput, Coordinator, CoreEvent, EngineError, HtmlFetch};
use archive_proto::config::Config;
use archive_proto::protocol::{Broadcast, Command};
use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

pub const INDEX_URL: &str = "https://radio.example.org/listen/archive/";
pub const LIVE_URL: &str = "https://live.example.org/stream.mp3";
pub const JAZZ_PAGE: &str = "https://radio.example.org/listen/archive/jazz-hour";
pub const BLUES_PAGE: &str = "https://radio.example.org/listen/archive/blues-show";
pub const JAZZ_MP3: &str = "https://cdn.example.org/jazz-hour.mp3";
pub const BLUES_MP3: &str = "https://cdn.example.org/blues-show.mp3";

pub const LISTING: &str = r#"
<html><body><div class="view-content">
  <div class="views-row">
    <span class="date">2024-05-01</span>
    <h3 class="show-title"><a href="/listen/archive/jazz-hour">Jazz Hour</a></h3>
  </div>
  <div class="views-row">
    <span class="date">2024-05-02</span>
    <h3 class="show-title"><a href="/listen/archive/blues-show">Blues Show</a></h3>
  </div>
</div></body></html>"#;

/// Serves canned pages and counts requests per URL.
#[derive(Default)]
pub struct ScriptedFetcher {
    pages: Mutex<HashMap<String, Result<String, EngineError>>>,
    hits: Mutex<HashMap<String, usize>>,
}

impl ScriptedFetcher {
    pub fn standard() -> Self {
        let fetcher = Self::default();
        fetcher.serve(INDEX_URL, LISTING);
        fetcher.serve(
            JAZZ_PAGE,
            &format!(r#"<div class="player"><audio controls src="{JAZZ_MP3}"></audio></div>"#),
        );
        fetcher.serve(
            BLUES_PAGE,
            r#"<script>player.load({"file":"https:\/\/cdn.example.org\/blues-show.mp3"});</script>"#,
        );
        fetcher
    }

    pub fn serve(&self, url: &str, html: &str) {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), Ok(html.to_string()));
    }

    pub fn fail(&self, url: &str, reason: &str) {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), Err(EngineError::fetch(url, reason)));
    }

    pub fn hits(&self, url: &str) -> usize {
        self.hits.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl HtmlFetch for ScriptedFetcher {
    async fn fetch_text(&self, url: &str) -> archive_engine::Result<String> {
        *self.hits.lock().unwrap().entry(url.to_string()).or_default() += 1;
        self.pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| Err(EngineError::fetch(url, "HTTP 404 Not Found")))
    }
}

/// Records every call made to the audio output.
#[derive(Clone, Default)]
pub struct RecordingOutput {
    calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingOutput {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn loads(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| c.strip_prefix("load ").map(str::to_string))
            .collect()
    }

    fn push(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl AudioOutput for RecordingOutput {
    async fn load(&mut self, url: &str, _volume: f32) -> anyhow::Result<()> {
        self.push(format!("load {url}"));
        Ok(())
    }
    async fn set_paused(&mut self, paused: bool) -> anyhow::Result<()> {
        self.push(format!("pause {paused}"));
        Ok(())
    }
    async fn set_volume(&mut self, volume: f32) -> anyhow::Result<()> {
        self.push(format!("volume {volume}"));
        Ok(())
    }
    async fn stop(&mut self) -> anyhow::Result<()> {
        self.push("stop".to_string());
        Ok(())
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.station.base_url = "https://radio.example.org".to_string();
    config.station.archive_index_url = INDEX_URL.to_string();
    config.station.live_stream_url = LIVE_URL.to_string();
    config
}

/// A coordinator driven step by step: the test owns the event receiver and
/// decides when background results are applied.
pub struct Harness {
    pub core: Coordinator<RecordingOutput>,
    pub fetcher: Arc<ScriptedFetcher>,
    pub output: RecordingOutput,
    pub events: mpsc::Receiver<CoreEvent>,
    pub broadcasts: broadcast::Receiver<Broadcast>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(test_config(), ScriptedFetcher::standard())
    }

    pub fn with(config: Config, fetcher: ScriptedFetcher) -> Self {
        let fetcher = Arc::new(fetcher);
        let output = RecordingOutput::default();
        let (event_tx, events) = mpsc::channel(64);
        let (broadcast_tx, broadcasts) = broadcast::channel(256);
        let core = Coordinator::new(
            &config,
            fetcher.clone(),
            output.clone(),
            event_tx,
            broadcast_tx,
        )
        .unwrap();
        Self {
            core,
            fetcher,
            output,
            events,
            broadcasts,
        }
    }

    pub async fn command(&mut self, cmd: Command) {
        self.core.handle_event(CoreEvent::Command(cmd)).await;
    }

    /// Wait for the next background result without applying it.
    pub async fn next_event(&mut self) -> CoreEvent {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("timed out waiting for a background result")
            .expect("event channel closed")
    }

    /// Apply the next background result.
    pub async fn pump(&mut self) {
        let evt = self.next_event().await;
        self.core.handle_event(evt).await;
    }

    pub fn drain_broadcasts(&mut self) -> Vec<Broadcast> {
        let mut out = Vec::new();
        while let Ok(msg) = self.broadcasts.try_recv() {
            out.push(msg);
        }
        out
    }
}
