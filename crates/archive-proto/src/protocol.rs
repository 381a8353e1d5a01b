use serde::{Deserialize, Serialize};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Clients check this on connect and can refuse to talk to an
/// incompatible daemon.
pub const PROTOCOL_VERSION: u32 = 1;

/// Messages sent from a client (window) to the daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd")]
pub enum Command {
    /// Navigate to a view.  Leaving a view pauses the shared output.
    ShowView { view: View },
    /// Drop the in-memory archive list and fetch the index page again.
    RefreshArchive,
    /// Resolve and play the archive entry at `index` of the current list.
    SelectEntry { index: usize },
    TogglePlayPause,
    Volume { value: f32 },
    GetState,
}

/// Messages sent from the daemon to every client (broadcasts)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: daemon version + full snapshot.
    Hello {
        protocol_version: u32,
        snapshot: SessionSnapshot,
    },
    Snapshot {
        data: SessionSnapshot,
    },
    ViewChanged {
        view: View,
    },
    EntriesReady {
        entries: Vec<ArchiveEntry>,
    },
    EntriesFailed {
        reason: String,
    },
    /// An entry was selected; its playback page is being fetched.
    StreamResolving {
        entry: ArchiveEntry,
    },
    StreamReady {
        entry: ArchiveEntry,
        stream: ResolvedStream,
    },
    StreamFailed {
        entry: ArchiveEntry,
        reason: String,
    },
    /// Session status changed.  `view` is the view whose status display is
    /// bound to the session at the time of the change, if any.
    StatusChanged {
        view: Option<View>,
        status: PlaybackStatus,
        source_url: Option<String>,
        label: String,
    },
    VolumeChanged {
        volume: f32,
    },
    Log {
        message: String,
    },
}

/// The three logical views sharing one audio output.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum View {
    #[default]
    Live,
    ArchiveList,
    ArchivePlayer,
}

impl View {
    /// Views that render a status label and play/pause affordance.
    pub fn has_transport(self) -> bool {
        matches!(self, View::Live | View::ArchivePlayer)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "live" => Some(View::Live),
            "archive" | "archive-list" => Some(View::ArchiveList),
            "player" | "archive-player" => Some(View::ArchivePlayer),
            _ => None,
        }
    }
}

/// Playback status of the shared session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Idle, // no source attached yet
    Loading, // source attached, buffering or stalled
    Playing,
    Paused,
    Errored, // media fault; controls disabled until a new source
}

impl PlaybackStatus {
    /// Text shown in the status display of the bound view.
    pub fn label(self) -> &'static str {
        match self {
            PlaybackStatus::Idle => "Stopped",
            PlaybackStatus::Loading => "Loading...",
            PlaybackStatus::Playing => "Playing...",
            PlaybackStatus::Paused => "Paused",
            PlaybackStatus::Errored => "Error loading stream.",
        }
    }

    /// Label for the play/pause affordance.
    pub fn button_label(self) -> &'static str {
        match self {
            PlaybackStatus::Playing | PlaybackStatus::Loading => "Pause",
            _ => "Play",
        }
    }

    /// Whether transport controls accept input in this status.
    pub fn controls_enabled(self) -> bool {
        !matches!(self, PlaybackStatus::Idle | PlaybackStatus::Errored)
    }
}

/// One archived show from the station's listing page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub show_name: String,
    /// Station-provided date label, kept verbatim.
    pub date: String,
    pub playback_page_url: String,
}

impl ArchiveEntry {
    /// Heading for the player view: "date – show".
    pub fn heading(&self) -> String {
        format!("{} – {}", self.date, self.show_name)
    }
}

/// A direct audio URL extracted from a playback page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolvedStream {
    pub stream_url: String,
}

/// Everything a freshly attached client needs to render any view.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SessionSnapshot {
    pub view: View,
    pub status: PlaybackStatus,
    pub source_url: Option<String>,
    pub volume: f32,
    pub entries: Vec<ArchiveEntry>,
    /// Entry whose stream is current or being resolved.
    #[serde(default)]
    pub selected: Option<ArchiveEntry>,
    /// Last failure shown on the archive list or player view.
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}
