use archive_engine::CoreEvent;
use archive_proto::protocol::{ArchiveEntry, Command, SessionSnapshot, View};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

#[derive(Clone)]
struct HttpState {
    snapshots: watch::Receiver<SessionSnapshot>,
    event_tx: mpsc::Sender<CoreEvent>,
}

#[derive(Serialize)]
struct ApiState {
    view: View,
    status: String,
    button: String,
    controls_enabled: bool,
    source_url: Option<String>,
    volume: u8,
    now_showing: Option<String>,
    error_message: Option<String>,
}

#[derive(Serialize)]
struct ApiEntry {
    idx: usize,
    heading: String,
    show_name: String,
    date: String,
    playback_page_url: String,
}

impl From<&SessionSnapshot> for ApiState {
    fn from(snapshot: &SessionSnapshot) -> Self {
        Self {
            view: snapshot.view,
            status: snapshot.status.label().to_string(),
            button: snapshot.status.button_label().to_string(),
            controls_enabled: snapshot.status.controls_enabled(),
            source_url: snapshot.source_url.clone(),
            volume: (snapshot.volume * 100.0).round() as u8,
            now_showing: snapshot.selected.as_ref().map(ArchiveEntry::heading),
            error_message: snapshot.error_message.clone(),
        }
    }
}

fn api_entries(entries: &[ArchiveEntry]) -> Vec<ApiEntry> {
    entries
        .iter()
        .enumerate()
        .map(|(idx, e)| ApiEntry {
            idx,
            heading: e.heading(),
            show_name: e.show_name.clone(),
            date: e.date.clone(),
            playback_page_url: e.playback_page_url.clone(),
        })
        .collect()
}

fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/view/:view", post(show_view))
        .route("/api/archive", get(get_archive))
        .route("/api/archive/refresh", post(refresh_archive))
        .route("/api/archive/:idx/play", post(play_entry))
        .route("/api/toggle", post(toggle))
        .route("/api/volume/:volume", get(set_volume).post(set_volume))
        .with_state(state)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    snapshots: watch::Receiver<SessionSnapshot>,
    event_tx: mpsc::Sender<CoreEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(HttpState {
            snapshots,
            event_tx,
        });

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };
        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn dispatch(state: &HttpState, cmd: Command) -> StatusCode {
    info!("HTTP API: {:?}", cmd);
    if state.event_tx.send(CoreEvent::Command(cmd)).await.is_err() {
        error!("HTTP API: coordinator channel closed");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::ACCEPTED
}

async fn get_state(State(state): State<HttpState>) -> Json<ApiState> {
    Json(ApiState::from(&*state.snapshots.borrow()))
}

async fn get_archive(State(state): State<HttpState>) -> Json<Vec<ApiEntry>> {
    Json(api_entries(&state.snapshots.borrow().entries))
}

async fn show_view(State(state): State<HttpState>, Path(view): Path<String>) -> StatusCode {
    match View::parse(&view) {
        Some(view) => dispatch(&state, Command::ShowView { view }).await,
        None => StatusCode::NOT_FOUND,
    }
}

async fn refresh_archive(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::RefreshArchive).await
}

async fn play_entry(State(state): State<HttpState>, Path(idx): Path<usize>) -> StatusCode {
    if idx >= state.snapshots.borrow().entries.len() {
        return StatusCode::NOT_FOUND;
    }
    dispatch(&state, Command::SelectEntry { index: idx }).await
}

async fn toggle(State(state): State<HttpState>) -> StatusCode {
    dispatch(&state, Command::TogglePlayPause).await
}

async fn set_volume(State(state): State<HttpState>, Path(volume): Path<i32>) -> StatusCode {
    let value = (volume as f32 / 100.0).clamp(0.0, 1.0);
    dispatch(&state, Command::Volume { value }).await
}
