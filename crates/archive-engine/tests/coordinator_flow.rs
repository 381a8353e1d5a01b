mod common;

use archive_engine::{CoreEvent, MediaSignal};
use archive_proto::protocol::{Broadcast, Command, PlaybackStatus, View};
use common::*;

fn show(view: View) -> Command {
    Command::ShowView { view }
}

async fn open_archive(h: &mut Harness) {
    h.command(show(View::ArchiveList)).await;
    h.pump().await;
}

async fn play_entry(h: &mut Harness, index: usize) {
    h.command(Command::SelectEntry { index }).await;
    h.pump().await;
    h.core.handle_event(CoreEvent::Media(MediaSignal::Playing)).await;
}

#[tokio::test]
async fn selecting_an_entry_resolves_and_plays_it() {
    let mut h = Harness::new();
    open_archive(&mut h).await;

    let snapshot = h.core.snapshot();
    assert_eq!(snapshot.view, View::ArchiveList);
    assert_eq!(snapshot.entries.len(), 2);
    assert_eq!(snapshot.entries[0].show_name, "Jazz Hour");
    assert_eq!(snapshot.entries[0].playback_page_url, JAZZ_PAGE);
    assert!(h
        .drain_broadcasts()
        .iter()
        .any(|b| matches!(b, Broadcast::EntriesReady { entries } if entries.len() == 2)));

    h.command(Command::SelectEntry { index: 0 }).await;
    assert_eq!(h.core.snapshot().view, View::ArchivePlayer);
    h.pump().await;
    assert_eq!(h.output.loads(), vec![JAZZ_MP3]);
    assert_eq!(h.core.session().status(), PlaybackStatus::Loading);

    h.core.handle_event(CoreEvent::Media(MediaSignal::LoadedData)).await;
    let snapshot = h.core.snapshot();
    assert_eq!(snapshot.status, PlaybackStatus::Playing);
    assert_eq!(snapshot.source_url.as_deref(), Some(JAZZ_MP3));
    assert_eq!(snapshot.selected.map(|e| e.heading()).as_deref(), Some("2024-05-01 – Jazz Hour"));

    let labels: Vec<(Option<View>, String)> = h
        .drain_broadcasts()
        .into_iter()
        .filter_map(|b| match b {
            Broadcast::StatusChanged { view, label, .. } => Some((view, label)),
            _ => None,
        })
        .collect();
    assert_eq!(
        labels,
        vec![
            (Some(View::ArchivePlayer), "Loading...".to_string()),
            (Some(View::ArchivePlayer), "Playing...".to_string()),
        ]
    );
}

#[tokio::test]
async fn listing_is_fetched_once_until_refresh() {
    let mut h = Harness::new();
    open_archive(&mut h).await;
    h.command(show(View::Live)).await;
    h.command(show(View::ArchiveList)).await;
    assert_eq!(h.fetcher.hits(INDEX_URL), 1);
    assert!(h.events.try_recv().is_err(), "no second fetch was started");

    h.command(Command::RefreshArchive).await;
    assert!(h.core.snapshot().entries.is_empty());
    h.pump().await;
    assert_eq!(h.fetcher.hits(INDEX_URL), 2);
    assert_eq!(h.core.snapshot().entries.len(), 2);
}

#[tokio::test]
async fn reentering_the_list_while_a_fetch_is_outstanding_does_not_refetch() {
    let mut h = Harness::new();
    h.command(show(View::ArchiveList)).await;
    h.command(show(View::Live)).await;
    h.command(show(View::ArchiveList)).await;
    h.pump().await;
    assert_eq!(h.fetcher.hits(INDEX_URL), 1);
    assert_eq!(h.core.snapshot().entries.len(), 2);
}

#[tokio::test]
async fn later_selection_supersedes_an_earlier_one() {
    let mut h = Harness::new();
    open_archive(&mut h).await;

    h.command(Command::SelectEntry { index: 0 }).await;
    h.command(show(View::ArchiveList)).await;
    h.command(Command::SelectEntry { index: 1 }).await;

    let first = h.next_event().await;
    let second = h.next_event().await;
    // apply in reverse arrival order; only the newest selection may win
    h.core.handle_event(second).await;
    h.core.handle_event(first).await;

    assert_eq!(h.output.loads(), vec![BLUES_MP3]);
    let snapshot = h.core.snapshot();
    assert_eq!(snapshot.source_url.as_deref(), Some(BLUES_MP3));
    assert_eq!(snapshot.selected.map(|e| e.show_name).as_deref(), Some("Blues Show"));
}

#[tokio::test]
async fn resolution_abandoned_by_navigation_is_dropped() {
    let mut h = Harness::new();
    open_archive(&mut h).await;
    h.command(Command::SelectEntry { index: 0 }).await;
    h.command(show(View::ArchiveList)).await;
    h.pump().await;
    assert!(h.output.loads().is_empty());
    assert_eq!(h.core.session().status(), PlaybackStatus::Idle);
}

#[tokio::test]
async fn failed_resolution_leaves_current_playback_untouched() {
    let fetcher = ScriptedFetcher::standard();
    fetcher.serve(BLUES_PAGE, "<html><body><p>Coming soon</p></body></html>");
    let mut h = Harness::with(test_config(), fetcher);
    open_archive(&mut h).await;
    play_entry(&mut h, 0).await;
    h.drain_broadcasts();

    h.command(show(View::ArchiveList)).await;
    h.core.handle_event(CoreEvent::Media(MediaSignal::Paused)).await;
    h.command(Command::SelectEntry { index: 1 }).await;
    h.pump().await;

    assert_eq!(h.output.loads(), vec![JAZZ_MP3]);
    let snapshot = h.core.snapshot();
    assert_eq!(snapshot.source_url.as_deref(), Some(JAZZ_MP3));
    assert_eq!(snapshot.status, PlaybackStatus::Paused);
    assert_eq!(
        snapshot.error_message.as_deref(),
        Some("no audio URL found in archive playback page")
    );
    assert!(h.drain_broadcasts().iter().any(|b| matches!(
        b,
        Broadcast::StreamFailed { entry, .. } if entry.show_name == "Blues Show"
    )));
}

#[tokio::test]
async fn unreachable_playback_page_reports_fetch_failure() {
    let fetcher = ScriptedFetcher::standard();
    fetcher.fail(JAZZ_PAGE, "HTTP 503 Service Unavailable");
    let mut h = Harness::with(test_config(), fetcher);
    open_archive(&mut h).await;
    h.command(Command::SelectEntry { index: 0 }).await;
    h.pump().await;

    assert!(h.output.loads().is_empty());
    let reason = h.core.snapshot().error_message.unwrap_or_default();
    assert!(reason.contains("503"), "{reason}");
}

#[tokio::test]
async fn failed_listing_is_reported_and_retried_on_next_visit() {
    let fetcher = ScriptedFetcher::standard();
    fetcher.fail(INDEX_URL, "connection refused");
    let mut h = Harness::with(test_config(), fetcher);
    open_archive(&mut h).await;

    assert!(h.core.snapshot().entries.is_empty());
    assert!(h
        .drain_broadcasts()
        .iter()
        .any(|b| matches!(b, Broadcast::EntriesFailed { reason } if reason.contains("connection refused"))));

    h.fetcher.serve(INDEX_URL, LISTING);
    h.command(show(View::Live)).await;
    open_archive(&mut h).await;
    assert_eq!(h.core.snapshot().entries.len(), 2);
    assert_eq!(h.core.snapshot().error_message, None);
}

#[tokio::test]
async fn out_of_range_selection_is_ignored() {
    let mut h = Harness::new();
    open_archive(&mut h).await;
    h.command(Command::SelectEntry { index: 7 }).await;
    assert_eq!(h.core.snapshot().view, View::ArchiveList);
    assert!(h.events.try_recv().is_err());
}

#[tokio::test]
async fn live_toggle_attaches_live_stream_and_navigation_pauses_it() {
    let mut h = Harness::new();
    h.command(Command::TogglePlayPause).await;
    assert_eq!(h.output.loads(), vec![LIVE_URL]);
    h.core.handle_event(CoreEvent::Media(MediaSignal::Playing)).await;

    h.command(Command::TogglePlayPause).await;
    assert_eq!(h.output.calls().last().map(String::as_str), Some("pause true"));
    h.core.handle_event(CoreEvent::Media(MediaSignal::Paused)).await;
    h.command(Command::TogglePlayPause).await;
    assert_eq!(h.output.calls().last().map(String::as_str), Some("pause false"));
    h.core.handle_event(CoreEvent::Media(MediaSignal::Playing)).await;

    h.command(show(View::ArchiveList)).await;
    assert_eq!(h.output.calls().last().map(String::as_str), Some("pause true"));
    h.core.handle_event(CoreEvent::Media(MediaSignal::Paused)).await;

    // the list view has no status display of its own
    let unbound = h.drain_broadcasts().into_iter().any(|b| {
        matches!(
            b,
            Broadcast::StatusChanged { view: None, status: PlaybackStatus::Paused, .. }
        )
    });
    assert!(unbound);
}

#[tokio::test]
async fn keep_live_audio_skips_the_navigation_pause() {
    let mut config = test_config();
    config.navigation.keep_live_audio = true;
    let mut h = Harness::with(config, ScriptedFetcher::standard());
    h.command(Command::TogglePlayPause).await;
    h.core.handle_event(CoreEvent::Media(MediaSignal::Playing)).await;

    h.command(show(View::ArchiveList)).await;
    assert_eq!(h.output.calls(), vec![format!("load {LIVE_URL}")]);
    assert_eq!(h.core.session().status(), PlaybackStatus::Playing);
}

#[tokio::test]
async fn returning_to_live_after_an_archive_show_reattaches_on_play() {
    let mut h = Harness::new();
    open_archive(&mut h).await;
    play_entry(&mut h, 0).await;

    h.command(show(View::Live)).await;
    h.core.handle_event(CoreEvent::Media(MediaSignal::Paused)).await;
    assert_eq!(h.core.snapshot().status, PlaybackStatus::Paused);

    h.command(Command::TogglePlayPause).await;
    assert_eq!(h.output.loads(), vec![JAZZ_MP3.to_string(), LIVE_URL.to_string()]);
    assert_eq!(h.core.session().status(), PlaybackStatus::Loading);
}

#[tokio::test]
async fn volume_is_clamped_and_broadcast() {
    let mut h = Harness::new();
    h.command(Command::Volume { value: 1.5 }).await;
    assert_eq!(h.core.snapshot().volume, 1.0);
    assert_eq!(h.core.snapshot().status, PlaybackStatus::Idle);
    assert!(h
        .drain_broadcasts()
        .contains(&Broadcast::VolumeChanged { volume: 1.0 }));
}

#[tokio::test]
async fn snapshot_watch_tracks_every_event() {
    let mut h = Harness::new();
    let watch = h.core.snapshots();
    assert_eq!(watch.borrow().volume, 0.5);
    open_archive(&mut h).await;
    assert_eq!(watch.borrow().entries.len(), 2);
    assert_eq!(watch.borrow().view, View::ArchiveList);
}

#[tokio::test]
async fn empty_listing_is_not_an_error_but_is_explained() {
    let fetcher = ScriptedFetcher::standard();
    fetcher.serve(INDEX_URL, "<html><body><p>Maintenance</p></body></html>");
    let mut h = Harness::with(test_config(), fetcher);
    open_archive(&mut h).await;

    let snapshot = h.core.snapshot();
    assert!(snapshot.entries.is_empty());
    assert_eq!(snapshot.error_message.as_deref(), Some(archive_engine::coordinator::NO_SHOWS));
    assert!(h
        .drain_broadcasts()
        .iter()
        .any(|b| matches!(b, Broadcast::EntriesReady { entries } if entries.is_empty())));
}

#[tokio::test]
async fn live_stream_that_ended_is_reloaded_on_play() {
    let mut h = Harness::new();
    h.command(Command::TogglePlayPause).await;
    h.core.handle_event(CoreEvent::Media(MediaSignal::Playing)).await;
    h.core.handle_event(CoreEvent::Media(MediaSignal::Ended)).await;
    assert_eq!(h.core.snapshot().status, PlaybackStatus::Paused);

    h.command(Command::TogglePlayPause).await;
    assert_eq!(h.output.loads(), vec![LIVE_URL.to_string(), LIVE_URL.to_string()]);
    assert_eq!(h.core.session().status(), PlaybackStatus::Loading);
    h.core.handle_event(CoreEvent::Media(MediaSignal::Playing)).await;
    assert_eq!(h.core.snapshot().status, PlaybackStatus::Playing);
}

#[tokio::test]
async fn archive_show_that_played_to_the_end_can_be_replayed() {
    let mut h = Harness::new();
    open_archive(&mut h).await;
    play_entry(&mut h, 0).await;
    h.core.handle_event(CoreEvent::Media(MediaSignal::Ended)).await;

    h.command(Command::TogglePlayPause).await;
    assert_eq!(h.output.loads(), vec![JAZZ_MP3.to_string(), JAZZ_MP3.to_string()]);
    assert_eq!(h.core.snapshot().source_url.as_deref(), Some(JAZZ_MP3));
}

#[tokio::test]
async fn playback_fault_keeps_entries_and_next_selection_recovers() {
    let mut h = Harness::new();
    open_archive(&mut h).await;
    play_entry(&mut h, 0).await;
    h.drain_broadcasts();

    h.core
        .handle_event(CoreEvent::Media(MediaSignal::Error("HTTP 403".to_string())))
        .await;
    let snapshot = h.core.snapshot();
    assert_eq!(snapshot.status, PlaybackStatus::Errored);
    assert_eq!(snapshot.entries.len(), 2);
    assert_eq!(h.core.session().last_error(), Some("HTTP 403"));
    assert!(h.drain_broadcasts().iter().any(|b| matches!(
        b,
        Broadcast::StatusChanged { view: Some(View::ArchivePlayer), status: PlaybackStatus::Errored, label, .. }
            if label == "Error loading stream."
    )));

    // controls are disabled until a new source is attached
    h.command(Command::TogglePlayPause).await;
    assert_eq!(h.output.loads(), vec![JAZZ_MP3.to_string()]);

    play_entry(&mut h, 1).await;
    let snapshot = h.core.snapshot();
    assert_eq!(snapshot.status, PlaybackStatus::Playing);
    assert_eq!(snapshot.source_url.as_deref(), Some(BLUES_MP3));
    assert_eq!(snapshot.entries.len(), 2);
}
