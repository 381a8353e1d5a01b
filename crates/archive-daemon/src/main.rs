mod http;
mod mpv;
mod socket;

use std::sync::Arc;

use anyhow::Context;
use archive_engine::{Coordinator, CoreEvent, HttpFetcher};
use archive_proto::config::Config;
use archive_proto::protocol::Broadcast;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Forwards WARN and ERROR events to connected clients as `Broadcast::Log`.
struct BroadcastLayer {
    sender: broadcast::Sender<Broadcast>,
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let level = *event.metadata().level();
        if !matches!(level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        event.record(&mut MessageVisitor(&mut message));

        // no receivers is fine
        let _ = self.sender.send(Broadcast::Log { message });
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

fn init_logging(broadcast_tx: broadcast::Sender<Broadcast>) -> anyhow::Result<()> {
    let data_dir = archive_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {:?}", data_dir))?;
    let log_path = data_dir.join("daemon.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("opening log file {:?}", log_path))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(log_file)
                .with_ansi(false),
        )
        .with(BroadcastLayer {
            sender: broadcast_tx,
        })
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,radio_archive=debug,archive_engine=debug")
            }),
        )
        .init();

    info!("Log file: {:?}", log_path);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // created first so the log layer can forward to clients
    let (broadcast_tx, _) = broadcast::channel::<Broadcast>(256);
    init_logging(broadcast_tx.clone())?;

    let config = Config::load().context("loading config")?;
    info!("Config loaded from: {:?}", Config::config_path());

    let pid_file = config.daemon.pid_file.clone();
    if let Some(parent) = pid_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&pid_file, std::process::id().to_string())
        .with_context(|| format!("writing pid file {:?}", pid_file))?;

    // every external input funnels into the coordinator
    let (event_tx, event_rx) = mpsc::channel::<CoreEvent>(256);

    let fetcher = Arc::new(HttpFetcher::new(&config.fetch)?);
    let output = mpv::MpvOutput::new(config.mpv.default_volume, event_tx.clone());
    let coordinator = Coordinator::new(
        &config,
        fetcher,
        output,
        event_tx.clone(),
        broadcast_tx.clone(),
    )?;
    let snapshots = coordinator.snapshots();

    let _socket_handle = socket::start_server(
        config.http.bind_address.clone(),
        config.socket.port,
        snapshots.clone(),
        event_tx.clone(),
        broadcast_tx.clone(),
    );

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            snapshots,
            event_tx.clone(),
        );
    }

    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for ctrl-c: {}", e);
            return;
        }
        info!("Interrupt received");
        let _ = shutdown_tx.send(CoreEvent::Shutdown).await;
    });
    drop(event_tx);

    info!("{} archive daemon ready", config.station.name);
    coordinator.run(event_rx).await;

    if let Err(e) = std::fs::remove_file(&pid_file) {
        warn!("Could not remove pid file {:?}: {}", pid_file, e);
    }
    Ok(())
}
