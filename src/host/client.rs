//! Per-client stream handling on the host.
//!
//! Every connection runs one loop selecting over inbound messages and a
//! termination channel. RPC correlation is a single in-flight slot: the
//! caller installs a oneshot sender, the loop routes the next matching
//! response into it. A response with no outstanding request terminates the
//! client. Timeouts leave the slot installed; only a response or stream
//! termination clears it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::protocol::identity::ChatMessage;
use crate::protocol::{ClientMessage, GameErrorMsg, HostMessage, PlayerRequest, PlayerResponse};
use crate::transport::HostConn;

const LOG_TARGET: &str = "one_left::host::client";

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("rpc timed out")]
    Timeout,
    #[error("client stream closed")]
    Closed,
    #[error("another rpc is already in flight")]
    SlotBusy,
    #[error("peer refused: {0}")]
    Peer(String),
    #[error("response kind does not match request")]
    UnexpectedResponse,
}

/// Session-level callbacks invoked from a client's stream loop.
#[async_trait]
pub trait ClientEvents: Send + Sync + 'static {
    async fn on_run(&self, client: &Arc<ClientHandle>);
    async fn on_chat_message(&self, client: &Arc<ClientHandle>, message: ChatMessage);
    async fn on_start_join(&self, client: &Arc<ClientHandle>);
    async fn on_one_left(&self, client: &Arc<ClientHandle>, target_index: u32);
    async fn on_stop(&self, client: &Arc<ClientHandle>);
}

type ResponseSlot = Arc<Mutex<Option<oneshot::Sender<PlayerResponse>>>>;

pub struct ClientHandle {
    num: u64,
    tx: mpsc::Sender<HostMessage>,
    term_tx: mpsc::UnboundedSender<String>,
    slot: ResponseSlot,
    max_rpc_wait: Duration,
}

impl ClientHandle {
    pub fn num(&self) -> u64 {
        self.num
    }

    /// Issue a player request and wait for its response.
    pub async fn call(&self, request: PlayerRequest) -> Result<PlayerResponse, RpcError> {
        let kind = request.kind();
        let (resp_tx, resp_rx) = oneshot::channel();
        {
            let mut slot = self.slot.lock();
            if slot.is_some() {
                return Err(RpcError::SlotBusy);
            }
            *slot = Some(resp_tx);
        }
        if self
            .tx
            .send(HostMessage::PlayerRequest { request })
            .await
            .is_err()
        {
            // The loop is gone; nothing will ever clear the slot.
            self.slot.lock().take();
            return Err(RpcError::Closed);
        }
        let response = match tokio::time::timeout(self.max_rpc_wait, resp_rx).await {
            // The slot stays installed; the stream loop clears it when the
            // late response arrives or the stream dies.
            Err(_) => return Err(RpcError::Timeout),
            Ok(Err(_)) => return Err(RpcError::Closed),
            Ok(Ok(response)) => response,
        };
        match response {
            PlayerResponse::Failed { message } => Err(RpcError::Peer(message)),
            response if response.answers(kind) => Ok(response),
            _ => {
                self.fail("rpc response kind does not match request");
                Err(RpcError::UnexpectedResponse)
            }
        }
    }

    /// Best-effort send for events and chat; a full or closed channel is a
    /// silent drop.
    pub fn send_nonblocking(&self, msg: HostMessage) {
        if self.tx.try_send(msg).is_err() {
            debug!(target: LOG_TARGET, client = self.num, "dropped message to slow or closed client");
        }
    }

    /// Terminate this client's stream.
    pub fn fail(&self, reason: impl Into<String>) {
        let _ = self.term_tx.send(reason.into());
    }
}

/// Spawn the stream loop for a new connection and return its handle.
pub fn spawn_client(
    handler: Arc<dyn ClientEvents>,
    conn: HostConn,
    num: u64,
    max_rpc_wait: Duration,
) -> Arc<ClientHandle> {
    let (term_tx, term_rx) = mpsc::unbounded_channel();
    let handle = Arc::new(ClientHandle {
        num,
        tx: conn.tx.clone(),
        term_tx,
        slot: Arc::new(Mutex::new(None)),
        max_rpc_wait,
    });
    tokio::spawn(run_client(handler, Arc::clone(&handle), conn, term_rx));
    handle
}

async fn run_client(
    handler: Arc<dyn ClientEvents>,
    handle: Arc<ClientHandle>,
    mut conn: HostConn,
    mut term_rx: mpsc::UnboundedReceiver<String>,
) {
    handler.on_run(&handle).await;
    let reason = loop {
        tokio::select! {
            maybe = conn.rx.recv() => match maybe {
                None => break None,
                Some(ClientMessage::Chat { message }) => {
                    let handler = Arc::clone(&handler);
                    let handle = Arc::clone(&handle);
                    tokio::spawn(async move { handler.on_chat_message(&handle, message).await });
                }
                Some(ClientMessage::StartJoin) => {
                    let handler = Arc::clone(&handler);
                    let handle = Arc::clone(&handle);
                    tokio::spawn(async move { handler.on_start_join(&handle).await });
                }
                Some(ClientMessage::CallOneLeft { target_index }) => {
                    let handler = Arc::clone(&handler);
                    let handle = Arc::clone(&handle);
                    tokio::spawn(async move { handler.on_one_left(&handle, target_index).await });
                }
                Some(ClientMessage::PlayerResponse { response }) => {
                    let taken = handle.slot.lock().take();
                    match taken {
                        None => break Some("rpc response without outstanding request".to_string()),
                        Some(resp_tx) => {
                            // A receiver dropped on timeout is fine; the slot
                            // is cleared either way.
                            let _ = resp_tx.send(response);
                        }
                    }
                }
            },
            Some(reason) = term_rx.recv() => break Some(reason),
        }
    };
    if let Some(reason) = &reason {
        warn!(target: LOG_TARGET, client = handle.num, %reason, "terminating client");
        handle.send_nonblocking(HostMessage::Error {
            error: GameErrorMsg {
                game_id: None,
                message: reason.clone(),
                player_index: None,
                terminates_game: false,
            },
        });
    }
    // Fail any caller still waiting on a response.
    handle.slot.lock().take();
    handler.on_stop(&handle).await;
}
