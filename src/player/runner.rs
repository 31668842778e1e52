//! The peer's stream loop: joins the table, relays host messages to the
//! oracle, answers player requests, and forwards one-left calls.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::Config;
use crate::protocol::{ClientMessage, HostMessage};
use crate::signing::IdentityKey;
use crate::transport::PeerConn;

use super::handler::PeerHandler;
use super::oracle::Oracle;

const LOG_TARGET: &str = "one_left::player::runner";

#[derive(Debug, Error)]
pub enum PeerRunError {
    #[error("stream closed")]
    StreamClosed,
    #[error("host sent an invalid message: {0}")]
    Protocol(String),
}

pub struct PeerRunner {
    conn_tx: mpsc::Sender<ClientMessage>,
    conn_rx: mpsc::Receiver<HostMessage>,
    handler: Arc<PeerHandler>,
    oracle: Arc<dyn Oracle>,
    name: String,
    chat_counter: Mutex<u64>,
}

impl PeerRunner {
    pub fn new(
        conn: PeerConn,
        cfg: Arc<Config>,
        key: IdentityKey,
        name: String,
        oracle: Arc<dyn Oracle>,
    ) -> Self {
        let handler = Arc::new(PeerHandler::new(
            cfg,
            key,
            name.clone(),
            Arc::clone(&oracle),
        ));
        Self {
            conn_tx: conn.tx,
            conn_rx: conn.rx,
            handler,
            oracle,
            name,
            chat_counter: Mutex::new(0),
        }
    }

    pub fn handler(&self) -> &Arc<PeerHandler> {
        &self.handler
    }

    /// Sign and send a chat line with the next counter value.
    pub async fn send_chat(&self, contents: String) -> Result<(), PeerRunError> {
        let message = {
            let mut counter = self.chat_counter.lock();
            let msg = crate::protocol::identity::ChatMessage::sign(
                self.handler.identity_key(),
                self.name.clone(),
                *counter,
                contents,
            );
            *counter += 1;
            msg
        };
        self.conn_tx
            .send(ClientMessage::Chat { message })
            .await
            .map_err(|_| PeerRunError::StreamClosed)
    }

    /// Join the table and process host messages until the stream closes or
    /// the game ends (when `until_game_end` is set).
    pub async fn run(mut self, until_game_end: bool) -> Result<(), PeerRunError> {
        self.conn_tx
            .send(ClientMessage::StartJoin)
            .await
            .map_err(|_| PeerRunError::StreamClosed)?;
        loop {
            let Some(msg) = self.conn_rx.recv().await else {
                return Err(PeerRunError::StreamClosed);
            };
            match msg {
                HostMessage::Welcome {
                    players,
                    chat_messages,
                    last_game_event,
                } => {
                    for (i, player) in players.iter().enumerate() {
                        player.verify().map_err(|e| {
                            PeerRunError::Protocol(format!("welcome identity {i}: {e}"))
                        })?;
                    }
                    for message in &chat_messages {
                        message.verify().map_err(|e| {
                            PeerRunError::Protocol(format!("welcome chat message: {e}"))
                        })?;
                    }
                    self.oracle
                        .connected(&players, &chat_messages, last_game_event.as_ref())
                        .await;
                }
                HostMessage::PlayersUpdate { players } => {
                    for (i, player) in players.iter().enumerate() {
                        player.verify().map_err(|e| {
                            PeerRunError::Protocol(format!("roster identity {i}: {e}"))
                        })?;
                    }
                    self.oracle.players_updated(&players).await;
                }
                HostMessage::ChatMessageAdded { message } => {
                    if message.verify().is_err() {
                        warn!(target: LOG_TARGET, "dropping chat message with bad signature");
                        continue;
                    }
                    self.oracle.chat_message(&message).await;
                }
                HostMessage::GameEvent { event } => {
                    self.handler.on_event(event.clone());
                    self.oracle.game_event(&event).await;
                    if let Some(self_index) = self.handler.self_index() {
                        if let Some(target) = self.oracle.consider_one_left(self_index, &event) {
                            let _ = self
                                .conn_tx
                                .send(ClientMessage::CallOneLeft {
                                    target_index: target,
                                })
                                .await;
                        }
                    }
                    if until_game_end && event.kind == crate::engine::EventKind::GameEnd {
                        return Ok(());
                    }
                }
                HostMessage::Error { error } => {
                    debug!(
                        target: LOG_TARGET,
                        message = %error.message,
                        terminates = error.terminates_game,
                        "host error"
                    );
                    self.oracle.game_error(&error).await;
                }
                HostMessage::PlayerRequest { request } => {
                    let handler = Arc::clone(&self.handler);
                    let tx = self.conn_tx.clone();
                    tokio::spawn(async move {
                        let response = handler.handle_request(request).await;
                        let _ = tx.send(ClientMessage::PlayerResponse { response }).await;
                    });
                }
            }
        }
    }
}
