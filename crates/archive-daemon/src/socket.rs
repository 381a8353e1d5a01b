use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use archive_engine::CoreEvent;
use archive_proto::protocol::{Broadcast, Message, SessionSnapshot, PROTOCOL_VERSION};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

/// Largest frame body a client may announce.
const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Length-prefixed JSON over TCP.  Every client gets a `Hello` with the
/// current snapshot, then every broadcast the coordinator emits.
pub fn start_server(
    bind_address: String,
    port: u16,
    snapshots: watch::Receiver<SessionSnapshot>,
    event_tx: mpsc::Sender<CoreEvent>,
    broadcast_tx: broadcast::Sender<Broadcast>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind TCP socket {}: {}", addr, e);
                return;
            }
        };
        info!("TCP server listening at {}", addr);

        let connected = Arc::new(AtomicUsize::new(0));
        let mut next_id = 0usize;

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            };
            next_id += 1;
            let id = next_id;
            let count = connected.fetch_add(1, Ordering::Relaxed) + 1;
            info!("Client {} connected from {} ({} connected)", id, peer, count);

            let snapshots = snapshots.clone();
            let event_tx = event_tx.clone();
            let broadcast_rx = broadcast_tx.subscribe();
            let connected = connected.clone();
            tokio::spawn(async move {
                handle_client(stream, id, snapshots, event_tx, broadcast_rx).await;
                let count = connected.fetch_sub(1, Ordering::Relaxed) - 1;
                info!("Client {} disconnected ({} connected)", id, count);
            });
        }
    })
}

async fn handle_client(
    stream: TcpStream,
    client_id: usize,
    snapshots: watch::Receiver<SessionSnapshot>,
    event_tx: mpsc::Sender<CoreEvent>,
    mut broadcast_rx: broadcast::Receiver<Broadcast>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    let hello = Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        snapshot: snapshots.borrow().clone(),
    };
    if send(&mut write_half, hello).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                let n = match result {
                    Ok(0) => {
                        debug!("Client {} closed connection", client_id);
                        break;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        error!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                };
                read_buf.extend_from_slice(&tmp[..n]);
                if read_buf.len() >= 4 && frame_len(&read_buf) > MAX_FRAME_LEN {
                    warn!(
                        "Client {} announced a {} byte frame, disconnecting",
                        client_id,
                        frame_len(&read_buf)
                    );
                    break;
                }

                while read_buf.len() >= 4 {
                    let (msg, consumed) = match Message::decode(&read_buf) {
                        Ok(decoded) => decoded,
                        // partial frame, wait for more bytes
                        Err(_) if !frame_complete(&read_buf) => break,
                        Err(e) => {
                            warn!("Client {} sent an undecodable frame: {}", client_id, e);
                            let len = frame_len(&read_buf);
                            read_buf.drain(..4 + len);
                            continue;
                        }
                    };
                    read_buf.drain(..consumed);

                    match msg {
                        Message::Command(cmd) => {
                            debug!("Client {} sent command: {:?}", client_id, cmd);
                            if event_tx.send(CoreEvent::Command(cmd)).await.is_err() {
                                warn!("Coordinator channel closed");
                                return;
                            }
                        }
                        Message::Broadcast(_) => {
                            debug!("Client {} sent a broadcast, ignoring", client_id);
                        }
                    }
                }
            }

            msg = broadcast_rx.recv() => {
                let outgoing = match msg {
                    Ok(broadcast) => broadcast,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} broadcast messages", client_id, n);
                        Broadcast::Snapshot { data: snapshots.borrow().clone() }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if send(&mut write_half, outgoing).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn send(writer: &mut OwnedWriteHalf, broadcast: Broadcast) -> anyhow::Result<()> {
    let encoded = Message::Broadcast(broadcast).encode()?;
    writer.write_all(&encoded).await?;
    Ok(())
}

fn frame_len(buf: &[u8]) -> usize {
    u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize
}

fn frame_complete(buf: &[u8]) -> bool {
    buf.len() >= 4 && buf.len() >= 4 + frame_len(buf)
}
