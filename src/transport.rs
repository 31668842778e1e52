//! Typed message streams between host and peers.
//!
//! Internally both sides work on a reliable ordered pair of channels; the
//! WebSocket adapters pump JSON text frames into and out of those channels,
//! and tests wire the two ends together directly in memory.

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;
use tracing::{debug, warn};

use crate::protocol::{ClientMessage, HostMessage};

const LOG_TARGET: &str = "one_left::transport";

/// Per-connection channel depth; events are dropped, not queued, beyond it.
pub const CHANNEL_BUFFER: usize = 64;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(String),
    #[error("frame decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("stream closed")]
    Closed,
}

/// The host's end of one client connection.
pub struct HostConn {
    pub tx: mpsc::Sender<HostMessage>,
    pub rx: mpsc::Receiver<ClientMessage>,
}

/// A peer's end of its host connection.
pub struct PeerConn {
    pub tx: mpsc::Sender<ClientMessage>,
    pub rx: mpsc::Receiver<HostMessage>,
}

/// Directly wired connection pair for in-process games and tests.
pub fn memory_pair() -> (HostConn, PeerConn) {
    let (host_tx, peer_rx) = mpsc::channel(CHANNEL_BUFFER);
    let (peer_tx, host_rx) = mpsc::channel(CHANNEL_BUFFER);
    (
        HostConn {
            tx: host_tx,
            rx: host_rx,
        },
        PeerConn {
            tx: peer_tx,
            rx: peer_rx,
        },
    )
}

/// Wrap an accepted WebSocket into a [`HostConn`], spawning the two pump
/// tasks. Dropping either channel end tears the socket down.
pub fn serve_host_ws(socket: WebSocket) -> HostConn {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<HostMessage>(CHANNEL_BUFFER);
    let (in_tx, in_rx) = mpsc::channel::<ClientMessage>(CHANNEL_BUFFER);

    tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let frame = match serde_json::to_string(&msg) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(target: LOG_TARGET, %err, "failed encoding host frame");
                    break;
                }
            };
            if ws_tx.send(WsMessage::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        while let Some(frame) = ws_rx.next().await {
            let frame = match frame {
                Ok(WsMessage::Text(text)) => text,
                Ok(WsMessage::Close(_)) | Err(_) => break,
                Ok(_) => continue,
            };
            let msg: ClientMessage = match serde_json::from_str(&frame) {
                Ok(msg) => msg,
                Err(err) => {
                    debug!(target: LOG_TARGET, %err, "dropping undecodable client frame");
                    break;
                }
            };
            if in_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    HostConn {
        tx: out_tx,
        rx: in_rx,
    }
}

/// Dial a host WebSocket URL and wrap it into a [`PeerConn`].
pub async fn connect_peer_ws(url: &str) -> Result<PeerConn, TransportError> {
    let (socket, _) = connect_async(url)
        .await
        .map_err(|e| TransportError::WebSocket(e.to_string()))?;
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ClientMessage>(CHANNEL_BUFFER);
    let (in_tx, in_rx) = mpsc::channel::<HostMessage>(CHANNEL_BUFFER);

    tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let frame = match serde_json::to_string(&msg) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(target: LOG_TARGET, %err, "failed encoding client frame");
                    break;
                }
            };
            if ws_tx.send(TungsteniteMessage::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        while let Some(frame) = ws_rx.next().await {
            let frame = match frame {
                Ok(TungsteniteMessage::Text(text)) => text,
                Ok(TungsteniteMessage::Close(_)) | Err(_) => break,
                Ok(_) => continue,
            };
            let msg: HostMessage = match serde_json::from_str(&frame) {
                Ok(msg) => msg,
                Err(err) => {
                    debug!(target: LOG_TARGET, %err, "dropping undecodable host frame");
                    break;
                }
            };
            if in_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    Ok(PeerConn {
        tx: out_tx,
        rx: in_rx,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_pair_delivers_both_ways() {
        let (mut host, mut peer) = memory_pair();
        host.tx
            .send(HostMessage::PlayersUpdate { players: vec![] })
            .await
            .unwrap();
        assert!(matches!(
            peer.rx.recv().await,
            Some(HostMessage::PlayersUpdate { .. })
        ));
        peer.tx.send(ClientMessage::StartJoin).await.unwrap();
        assert!(matches!(host.rx.recv().await, Some(ClientMessage::StartJoin)));
    }
}
