//! Subscription socket: length-prefixed JSON frames over TCP. Each client
//! gets `Hello` on connect, a `State` after every change, and WARN/ERROR log
//! lines.
use crate::core::DaemonEvent;
use crate::BroadcastMessage;
use radiouas_proto::protocol::{Broadcast, FrameError, Message, PROTOCOL_VERSION};
use radiouas_proto::state::StateManager;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

pub async fn bind(bind_address: &str, port: u16) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind((bind_address, port)).await?;
    info!("TCP server listening at {}", listener.local_addr()?);
    Ok(listener)
}

pub fn serve(
    listener: TcpListener,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let connected = Arc::new(AtomicUsize::new(0));
        let mut next_id = 0usize;

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            };
            next_id += 1;
            let id = next_id;
            let count = connected.fetch_add(1, Ordering::Relaxed) + 1;
            info!("Client {} connected from {} ({} connected)", id, peer, count);

            let sm = state_manager.clone();
            let evt_tx = event_tx.clone();
            let bcast_rx = broadcast_tx.subscribe();
            let connected = connected.clone();
            tokio::spawn(async move {
                handle_client(stream, sm, id, evt_tx, bcast_rx).await;
                let count = connected.fetch_sub(1, Ordering::Relaxed) - 1;
                info!("Client {} disconnected ({} connected)", id, count);
            });
        }
    })
}

async fn handle_client(
    stream: TcpStream,
    state_manager: Arc<StateManager>,
    client_id: usize,
    event_tx: mpsc::Sender<DaemonEvent>,
    mut broadcast_rx: broadcast::Receiver<BroadcastMessage>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    let state = state_manager.get_state().await;
    let hello = Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        daemon_rev: state.rev,
        state,
    };
    if send(&mut write_half, hello).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                let n = match result {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        error!("Read error from client {}: {}", client_id, e);
                        break;
                    }
                };
                read_buf.extend_from_slice(&tmp[..n]);

                loop {
                    let msg = match Message::decode(&read_buf) {
                        Ok((msg, consumed)) => {
                            read_buf.drain(..consumed);
                            msg
                        }
                        Err(FrameError::Incomplete) => break,
                        Err(FrameError::Invalid { consumed, source }) => {
                            warn!("Client {} sent an invalid frame: {}", client_id, source);
                            read_buf.drain(..consumed);
                            continue;
                        }
                        Err(e @ FrameError::TooLarge { .. }) => {
                            warn!("Dropping client {}: {}", client_id, e);
                            return;
                        }
                    };
                    let Message::Command(cmd) = msg else { continue };
                    info!("Client {} sent command: {:?}", client_id, cmd);
                    if event_tx.send(DaemonEvent::ClientCommand(cmd)).await.is_err() {
                        warn!("DaemonEvent channel closed");
                        return;
                    }
                    if send_state(&mut write_half, &state_manager).await.is_err() {
                        return;
                    }
                }
            }

            msg = broadcast_rx.recv() => {
                let sent = match msg {
                    Ok(BroadcastMessage::StateUpdated) => {
                        send_state(&mut write_half, &state_manager).await
                    }
                    Ok(BroadcastMessage::Log(message)) => {
                        send(&mut write_half, Broadcast::Log { message }).await
                    }
                    Ok(BroadcastMessage::Error(message)) => {
                        send(&mut write_half, Broadcast::Error { message }).await
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} missed {} broadcasts, resyncing", client_id, n);
                        send_state(&mut write_half, &state_manager).await
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if sent.is_err() {
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

async fn send_state(
    writer: &mut OwnedWriteHalf,
    state_manager: &StateManager,
) -> anyhow::Result<()> {
    let data = state_manager.get_state().await;
    send(writer, Broadcast::State { data }).await
}
