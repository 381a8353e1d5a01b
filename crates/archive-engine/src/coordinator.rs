/// Single-owner event loop for navigation and playback.
///
/// Every input (client commands, audio output signals, results of background
/// page fetches) arrives as a `CoreEvent` on one mpsc channel.  The
/// coordinator owns the playback session, the archive list and the current
/// view exclusively; nothing else mutates them.
///
/// Page fetches run as spawned tasks that post their result back into the
/// loop tagged with a sequence number.  A result whose number is no longer
/// current was superseded (a newer selection or refresh) and is dropped.
///
/// After each event the coordinator publishes a fresh `SessionSnapshot` on a
/// watch channel and broadcasts what changed to every connected client.
use std::sync::Arc;

use archive_proto::config::Config;
use archive_proto::protocol::{
    ArchiveEntry, Broadcast, Command, ResolvedStream, SessionSnapshot, View,
};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::{EngineError, Result};
use crate::fetch::HtmlFetch;
use crate::listing::ListingParser;
use crate::resolver::StreamResolver;
use crate::session::{AudioOutput, MediaSignal, PlaybackSession};

/// Shown when the index page parsed to zero shows.
pub const NO_SHOWS: &str = "No archive shows found.";

// ── CoreEvent ─────────────────────────────────────────────────────────────────

/// All inputs into the coordinator loop.
#[derive(Debug)]
pub enum CoreEvent {
    /// A command from a socket client or the HTTP API.
    Command(Command),
    /// Status report from the audio output.
    Media(MediaSignal),
    ListingFetched {
        seq: u64,
        result: Result<Vec<ArchiveEntry>>,
    },
    StreamResolved {
        seq: u64,
        entry: ArchiveEntry,
        result: Result<ResolvedStream>,
    },
    Shutdown,
}

// ── Coordinator ───────────────────────────────────────────────────────────────

pub struct Coordinator<O> {
    archive_index_url: String,
    live_stream_url: String,
    keep_live_audio: bool,
    fetcher: Arc<dyn HtmlFetch>,
    listing: Arc<ListingParser>,
    resolver: Arc<StreamResolver>,
    session: PlaybackSession<O>,
    view: View,
    entries: Vec<ArchiveEntry>,
    /// Set once a listing fetch succeeded; only a refresh clears it.
    listing_loaded: bool,
    listing_in_flight: bool,
    listing_seq: u64,
    selection_seq: u64,
    selected: Option<ArchiveEntry>,
    error_message: Option<String>,
    /// Loop-back for results of spawned fetch tasks.
    event_tx: mpsc::Sender<CoreEvent>,
    broadcast_tx: broadcast::Sender<Broadcast>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl<O: AudioOutput + 'static> Coordinator<O> {
    pub fn new(
        config: &Config,
        fetcher: Arc<dyn HtmlFetch>,
        output: O,
        event_tx: mpsc::Sender<CoreEvent>,
        broadcast_tx: broadcast::Sender<Broadcast>,
    ) -> Result<Self> {
        let listing = ListingParser::from_config(config)?;
        let resolver = StreamResolver::from_config(config)?;
        let session = PlaybackSession::new(output, config.mpv.default_volume);

        let snapshot = SessionSnapshot {
            volume: session.volume(),
            ..Default::default()
        };
        let (snapshot_tx, _) = watch::channel(snapshot);

        Ok(Self {
            archive_index_url: config.station.archive_index_url.clone(),
            live_stream_url: config.station.live_stream_url.clone(),
            keep_live_audio: config.navigation.keep_live_audio,
            fetcher,
            listing: Arc::new(listing),
            resolver: Arc::new(resolver),
            session,
            view: View::Live,
            entries: Vec::new(),
            listing_loaded: false,
            listing_in_flight: false,
            listing_seq: 0,
            selection_seq: 0,
            selected: None,
            error_message: None,
            event_tx,
            broadcast_tx,
            snapshot_tx,
        })
    }

    /// Receiver that always holds the latest snapshot (for late joiners).
    pub fn snapshots(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            view: self.view,
            status: self.session.status(),
            source_url: self.session.current_source().map(str::to_string),
            volume: self.session.volume(),
            entries: self.entries.clone(),
            selected: self.selected.clone(),
            error_message: self.error_message.clone(),
        }
    }

    pub fn session(&self) -> &PlaybackSession<O> {
        &self.session
    }

    /// Run the loop.  Returns on `Shutdown` or once every sender is gone.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<CoreEvent>) {
        info!("coordinator: starting event loop");
        loop {
            match event_rx.recv().await {
                None => {
                    info!("coordinator: event channel closed, shutting down");
                    break;
                }
                Some(CoreEvent::Shutdown) => {
                    info!("coordinator: shutdown requested");
                    break;
                }
                Some(evt) => self.handle_event(evt).await,
            }
        }
        self.session.shutdown().await;
    }

    /// Apply one event.  `run` calls this for everything but `Shutdown`.
    pub async fn handle_event(&mut self, evt: CoreEvent) {
        match evt {
            CoreEvent::Command(cmd) => {
                info!("coordinator: command {:?}", cmd);
                if let Err(e) = self.handle_command(cmd).await {
                    error!("coordinator: command error: {}", e);
                }
            }
            CoreEvent::Media(signal) => {
                debug!("coordinator: media signal {:?}", signal);
                self.session.on_signal(signal);
            }
            CoreEvent::ListingFetched { seq, result } => self.on_listing(seq, result),
            CoreEvent::StreamResolved { seq, entry, result } => {
                self.on_stream(seq, entry, result).await
            }
            CoreEvent::Shutdown => {}
        }
        self.publish();
    }

    // ── command handlers ──────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) -> Result<()> {
        match cmd {
            Command::ShowView { view } => self.show_view(view).await?,
            Command::RefreshArchive => self.refresh_archive(),
            Command::SelectEntry { index } => self.select_entry(index).await?,
            Command::TogglePlayPause => self.toggle_play_pause().await?,
            Command::Volume { value } => {
                let volume = self.session.set_volume(value).await?;
                self.send(Broadcast::VolumeChanged { volume });
            }
            Command::GetState => self.send(Broadcast::Snapshot {
                data: self.snapshot(),
            }),
        }
        Ok(())
    }

    async fn show_view(&mut self, view: View) -> Result<()> {
        self.navigate(view).await?;
        if view == View::ArchiveList && !self.listing_loaded && !self.listing_in_flight {
            self.start_listing_fetch();
        }
        Ok(())
    }

    /// Switch the visible view, pausing the shared output when leaving one.
    async fn navigate(&mut self, view: View) -> Result<()> {
        if view == self.view {
            return Ok(());
        }
        info!("coordinator: view {:?} → {:?}", self.view, view);
        let live_playing = self.session.current_source() == Some(self.live_stream_url.as_str());
        let pause_result = if self.keep_live_audio && live_playing {
            Ok(())
        } else {
            self.session.pause().await
        };
        self.view = view;
        self.send(Broadcast::ViewChanged { view });
        pause_result
    }

    fn refresh_archive(&mut self) {
        self.entries.clear();
        self.listing_loaded = false;
        self.start_listing_fetch();
    }

    async fn select_entry(&mut self, index: usize) -> Result<()> {
        let Some(entry) = self.entries.get(index).cloned() else {
            warn!(
                "coordinator: no archive entry at {} ({} listed)",
                index,
                self.entries.len()
            );
            return Ok(());
        };

        self.selection_seq += 1;
        let seq = self.selection_seq;
        info!("coordinator: resolving {:?} (selection {})", entry.heading(), seq);

        self.selected = Some(entry.clone());
        self.error_message = None;
        let nav_result = self.navigate(View::ArchivePlayer).await;
        self.send(Broadcast::StreamResolving {
            entry: entry.clone(),
        });

        let fetcher = Arc::clone(&self.fetcher);
        let resolver = Arc::clone(&self.resolver);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = match Url::parse(&entry.playback_page_url) {
                Ok(page_url) => fetcher
                    .fetch_text(page_url.as_str())
                    .await
                    .and_then(|html| resolver.resolve(&html, &page_url)),
                Err(e) => Err(EngineError::fetch(&entry.playback_page_url, e)),
            };
            if tx
                .send(CoreEvent::StreamResolved { seq, entry, result })
                .await
                .is_err()
            {
                debug!("coordinator: loop gone before selection {} resolved", seq);
            }
        });

        nav_result
    }

    async fn toggle_play_pause(&mut self) -> Result<()> {
        match self.view {
            View::Live => {
                let on_live = self.session.current_source() == Some(self.live_stream_url.as_str());
                if !on_live || !self.session.status().controls_enabled() {
                    let live = self.live_stream_url.clone();
                    return self.session.load_source(&live).await;
                }
                self.session.toggle_play_pause().await
            }
            View::ArchivePlayer => self.session.toggle_play_pause().await,
            View::ArchiveList => {
                debug!("coordinator: archive list has no transport, ignoring toggle");
                Ok(())
            }
        }
    }

    // ── background results ────────────────────────────────────────────────────

    fn start_listing_fetch(&mut self) {
        self.listing_seq += 1;
        self.listing_in_flight = true;
        let seq = self.listing_seq;
        info!("coordinator: fetching archive index (request {})", seq);

        let fetcher = Arc::clone(&self.fetcher);
        let parser = Arc::clone(&self.listing);
        let url = self.archive_index_url.clone();
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = fetcher
                .fetch_text(&url)
                .await
                .map(|html| parser.parse(&html));
            if tx
                .send(CoreEvent::ListingFetched { seq, result })
                .await
                .is_err()
            {
                debug!("coordinator: loop gone before listing {} arrived", seq);
            }
        });
    }

    fn on_listing(&mut self, seq: u64, result: Result<Vec<ArchiveEntry>>) {
        if seq != self.listing_seq {
            debug!("coordinator: dropping superseded listing {}", seq);
            return;
        }
        self.listing_in_flight = false;

        match result {
            Ok(entries) => {
                info!("coordinator: archive index lists {} shows", entries.len());
                self.error_message = entries.is_empty().then(|| NO_SHOWS.to_string());
                self.entries = entries;
                self.listing_loaded = true;
                self.send(Broadcast::EntriesReady {
                    entries: self.entries.clone(),
                });
            }
            Err(e) => {
                warn!("coordinator: archive index failed: {}", e);
                let reason = e.to_string();
                self.error_message = Some(reason.clone());
                self.send(Broadcast::EntriesFailed { reason });
            }
        }
    }

    async fn on_stream(
        &mut self,
        seq: u64,
        entry: ArchiveEntry,
        result: Result<ResolvedStream>,
    ) {
        if seq != self.selection_seq || self.view != View::ArchivePlayer {
            debug!("coordinator: dropping superseded selection {}", seq);
            return;
        }

        let stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                warn!("coordinator: could not resolve {:?}: {}", entry.heading(), e);
                self.fail_stream(entry, e);
                return;
            }
        };

        info!("coordinator: {:?} → {}", entry.heading(), stream.stream_url);
        self.send(Broadcast::StreamReady {
            entry: entry.clone(),
            stream: stream.clone(),
        });
        if let Err(e) = self.session.load_source(&stream.stream_url).await {
            self.fail_stream(entry, e);
        }
    }

    fn fail_stream(&mut self, entry: ArchiveEntry, e: EngineError) {
        let reason = e.to_string();
        self.error_message = Some(reason.clone());
        self.send(Broadcast::StreamFailed { entry, reason });
    }

    // ── helpers ───────────────────────────────────────────────────────────────

    /// Status display bound to the session, if the current view has one.
    fn bound_view(&self) -> Option<View> {
        self.view.has_transport().then_some(self.view)
    }

    fn publish(&mut self) {
        let view = self.bound_view();
        for change in self.session.take_changes() {
            self.send(Broadcast::StatusChanged {
                view,
                status: change.status,
                source_url: change.source_url,
                label: change.status.label().to_string(),
            });
        }
        self.snapshot_tx.send_replace(self.snapshot());
    }

    fn send(&self, msg: Broadcast) {
        // No receivers is fine.
        let _ = self.broadcast_tx.send(msg);
    }
}
