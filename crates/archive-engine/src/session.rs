//! The one playback session shared by every view.
//!
//! ```text
//!   Idle ──load_source──▶ Loading ──Playing/LoadedData──▶ Playing ◀──▶ Paused
//!                           ▲  │                            │           │
//!                           │  └───────── Error ──▶ Errored ◀───────────┘
//!                           └────── Waiting (stall) ───────┘
//! ```
//!
//! Status is driven by what the audio output reports, not by what was
//! requested: `toggle_play_pause` only asks the output to pause or resume and
//! the resulting [`MediaSignal`] performs the transition.

use archive_proto::protocol::PlaybackStatus;
use async_trait::async_trait;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{EngineError, Result};

/// The single physical audio sink.  Loading a URL replaces whatever was
/// attached before.
#[async_trait]
pub trait AudioOutput: Send {
    /// Attach `url` and start playing it at `volume`.
    async fn load(&mut self, url: &str, volume: f32) -> anyhow::Result<()>;
    async fn set_paused(&mut self, paused: bool) -> anyhow::Result<()>;
    async fn set_volume(&mut self, volume: f32) -> anyhow::Result<()>;
    /// Detach the current source.  Only used on shutdown.
    async fn stop(&mut self) -> anyhow::Result<()>;
}

/// Status reports from the audio output.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaSignal {
    /// Enough data buffered to render the first frame.
    LoadedData,
    Playing,
    Paused,
    /// Stalled waiting for data.
    Waiting,
    Ended,
    Error(String),
}

/// One observable status transition.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub status: PlaybackStatus,
    pub source_url: Option<String>,
}

pub struct PlaybackSession<O> {
    output: O,
    current_source: Option<String>,
    status: PlaybackStatus,
    volume: f32,
    /// Pause state last requested from or reported by the output.
    paused: bool,
    /// The output reached the end of the source and detached it.
    ended: bool,
    last_error: Option<String>,
    changes: Vec<StatusChange>,
}

impl<O: AudioOutput> PlaybackSession<O> {
    pub fn new(output: O, volume: f32) -> Self {
        Self {
            output,
            current_source: None,
            status: PlaybackStatus::Idle,
            volume: clamp_volume(volume),
            paused: false,
            ended: false,
            last_error: None,
            changes: Vec::new(),
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn current_source(&self) -> Option<&str> {
        self.current_source.as_deref()
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn has_ended(&self) -> bool {
        self.ended
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    /// Transitions recorded since the last call, oldest first.
    pub fn take_changes(&mut self) -> Vec<StatusChange> {
        std::mem::take(&mut self.changes)
    }

    /// Attach a new source and start it.  Always passes through `Loading`.
    pub async fn load_source(&mut self, url: &str) -> Result<()> {
        let url = url.trim();
        if url.is_empty() || Url::parse(url).is_err() {
            warn!("session: rejecting source {:?}", url);
            return Err(EngineError::InvalidSource(url.to_string()));
        }

        info!("session: loading {}", url);
        self.current_source = Some(url.to_string());
        self.paused = false;
        self.ended = false;
        self.last_error = None;
        self.record(PlaybackStatus::Loading);

        if let Err(e) = self.output.load(url, self.volume).await {
            warn!("session: output refused {}: {}", url, e);
            let reason = e.to_string();
            self.last_error = Some(reason.clone());
            self.record(PlaybackStatus::Errored);
            return Err(EngineError::PlaybackFault(reason));
        }
        Ok(())
    }

    /// Apply a status report from the audio output.
    pub fn on_signal(&mut self, signal: MediaSignal) {
        if matches!(self.status, PlaybackStatus::Idle | PlaybackStatus::Errored) {
            debug!("session: ignoring {:?} while {:?}", signal, self.status);
            return;
        }

        match signal {
            MediaSignal::LoadedData => {
                if !self.paused {
                    self.set_status(PlaybackStatus::Playing);
                }
            }
            MediaSignal::Playing => {
                self.paused = false;
                self.ended = false;
                self.set_status(PlaybackStatus::Playing);
            }
            MediaSignal::Paused => {
                self.paused = true;
                self.set_status(PlaybackStatus::Paused);
            }
            MediaSignal::Ended => {
                self.paused = true;
                self.ended = true;
                self.set_status(PlaybackStatus::Paused);
            }
            MediaSignal::Waiting => self.set_status(PlaybackStatus::Loading),
            MediaSignal::Error(reason) => {
                warn!("session: playback fault on {:?}: {}", self.current_source, reason);
                self.last_error = Some(reason);
                self.set_status(PlaybackStatus::Errored);
            }
        }
    }

    /// Ask the output to resume when paused or pause when playing.  A source
    /// that played to its end is no longer attached, so resuming reloads it.
    pub async fn toggle_play_pause(&mut self) -> Result<()> {
        if self.ended && self.status == PlaybackStatus::Paused {
            if let Some(source) = self.current_source.clone() {
                return self.load_source(&source).await;
            }
        }
        let pause = match self.status {
            PlaybackStatus::Paused => false,
            PlaybackStatus::Playing | PlaybackStatus::Loading => true,
            PlaybackStatus::Idle | PlaybackStatus::Errored => return Ok(()),
        };
        self.request_pause(pause).await
    }

    /// Pause without detaching, e.g. when the user navigates away.
    pub async fn pause(&mut self) -> Result<()> {
        match self.status {
            PlaybackStatus::Playing | PlaybackStatus::Loading => self.request_pause(true).await,
            _ => Ok(()),
        }
    }

    /// Clamp to `[0.0, 1.0]` and apply immediately.  Never changes status.
    pub async fn set_volume(&mut self, volume: f32) -> Result<f32> {
        self.volume = clamp_volume(volume);
        self.output
            .set_volume(self.volume)
            .await
            .map_err(|e| EngineError::PlaybackFault(e.to_string()))?;
        Ok(self.volume)
    }

    pub async fn shutdown(&mut self) {
        if self.current_source.is_some() {
            if let Err(e) = self.output.stop().await {
                debug!("session: stop on shutdown failed: {}", e);
            }
        }
    }

    async fn request_pause(&mut self, pause: bool) -> Result<()> {
        self.output
            .set_paused(pause)
            .await
            .map_err(|e| EngineError::PlaybackFault(e.to_string()))?;
        self.paused = pause;
        Ok(())
    }

    fn set_status(&mut self, status: PlaybackStatus) {
        if status != self.status {
            self.record(status);
        }
    }

    fn record(&mut self, status: PlaybackStatus) {
        debug!("session: status {:?} → {:?}", self.status, status);
        self.status = status;
        self.changes.push(StatusChange {
            status,
            source_url: self.current_source.clone(),
        });
    }
}

fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}
