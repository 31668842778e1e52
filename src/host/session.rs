//! Host session management: client lifecycle, join admission, chat relay,
//! event broadcast, and driving a game over the seated roster.
//!
//! Host-wide mutable state is copy-on-write under one RwLock: writers
//! publish replacement vectors, readers take cheap snapshots.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cards::CardColor;
use crate::config::Config;
use crate::engine::{
    one_left_channel, EventKind, EventSink, Game, GameError, GameEvent, GameRules, OneLeftCall,
    OneLeftSender, Player,
};
use crate::protocol::identity::{ChatMessage, PlayerIdentity};
use crate::protocol::requests::{GameEndRequest, GameStartRequest, JoinRequest, SignatureBlob};
use crate::protocol::seals::{GameEndSeal, GameStartSeal};
use crate::protocol::{GameErrorMsg, GameEventMsg, HandCompleteMsg, HandSnapshot, HostMessage};
use crate::signing::{self, Signable, PUBLIC_KEY_LEN};
use crate::transport::HostConn;

use super::client::{spawn_client, ClientEvents, ClientHandle};
use super::deck::{DeckSlot, HostDeckFactory};
use super::player::HostPlayer;
use super::{
    EventLog, Roster, SeatedPlayer, SharedCounters, SharedEventLog, SharedSigChain, SigChain,
    TableCounters,
};

const LOG_TARGET: &str = "one_left::host::session";

struct ClientSeat {
    handle: Arc<ClientHandle>,
    identity: Option<PlayerIdentity>,
}

#[derive(Default)]
struct HostState {
    clients: HashMap<u64, ClientSeat>,
    proto_players: Arc<Vec<PlayerIdentity>>,
    chat: Arc<Vec<ChatMessage>>,
    chat_counters: HashMap<u64, u64>,
    last_event: Option<GameEventMsg>,
    game_running: bool,
    one_left: Option<OneLeftSender>,
    game_roster: Option<Roster>,
}

pub struct Host {
    cfg: Arc<Config>,
    state: RwLock<HostState>,
    client_num: Mutex<u64>,
}

impl Host {
    pub fn new(cfg: Config) -> Arc<Host> {
        Arc::new(Host {
            cfg: Arc::new(cfg),
            state: RwLock::new(HostState::default()),
            client_num: Mutex::new(0),
        })
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Accept a new connection and start its stream loop.
    pub fn attach(self: &Arc<Self>, conn: HostConn) -> Arc<ClientHandle> {
        let num = {
            let mut counter = self.client_num.lock();
            *counter += 1;
            *counter
        };
        spawn_client(
            Arc::clone(self) as Arc<dyn ClientEvents>,
            conn,
            num,
            self.cfg.max_rpc_wait,
        )
    }

    pub fn seated_count(&self) -> usize {
        self.state.read().proto_players.len()
    }

    pub fn game_running(&self) -> bool {
        self.state.read().game_running
    }

    fn broadcast(&self, msg: HostMessage) {
        let state = self.state.read();
        for seat in state.clients.values() {
            seat.handle.send_nonblocking(msg.clone());
        }
    }

    fn set_last_event(&self, event: GameEventMsg) {
        self.state.write().last_event = Some(event);
    }

    /// Run one game over the currently seated players. Blocks until the game
    /// ends; on a protocol violation the blamed player's stream is failed and
    /// everyone else stays connected.
    pub async fn play_game(self: &Arc<Self>) -> Result<(), GameError> {
        let game_id = Uuid::new_v4();
        let (roster, mut one_left_rx) = {
            let mut state = self.state.write();
            if state.game_running {
                return Err(GameError::msg("a game is already running"));
            }
            let mut seats = Vec::new();
            for identity in state.proto_players.iter() {
                let handle = state
                    .clients
                    .values()
                    .find(|seat| {
                        seat.identity.as_ref().map(|i| &i.id) == Some(&identity.id)
                    })
                    .map(|seat| Arc::clone(&seat.handle));
                match handle {
                    Some(handle) => seats.push(SeatedPlayer {
                        identity: identity.clone(),
                        client: handle,
                    }),
                    None => return Err(GameError::msg("seated player has no live stream")),
                }
            }
            if seats.len() < 2 {
                return Err(GameError::msg("need at least two seated players"));
            }
            let roster: Roster = Arc::new(seats);
            let (tx, rx) = one_left_channel();
            state.game_running = true;
            state.one_left = Some(tx);
            state.game_roster = Some(Arc::clone(&roster));
            (roster, rx)
        };
        info!(
            target: LOG_TARGET,
            %game_id,
            players = roster.len(),
            "starting game"
        );

        let n = roster.len();
        let counters: SharedCounters = Arc::new(Mutex::new(TableCounters {
            deck_remaining: 0,
            card_counts: vec![0; n],
        }));
        let sig_chain: SharedSigChain = Arc::new(Mutex::new(SigChain::default()));
        let event_log: SharedEventLog = Arc::new(RwLock::new(EventLog::default()));
        let deck_slot: DeckSlot = Arc::new(AsyncMutex::new(None));
        let current_hand = Arc::new(Mutex::new(Uuid::nil()));

        let factory = Arc::new(HostDeckFactory {
            cfg: Arc::clone(&self.cfg),
            game_id,
            roster: Arc::clone(&roster),
            counters: Arc::clone(&counters),
            sig_chain: Arc::clone(&sig_chain),
            deck_slot: Arc::clone(&deck_slot),
            current_hand: Arc::clone(&current_hand),
        });
        let players: Vec<Arc<dyn Player>> = (0..n)
            .map(|index| {
                Arc::new(HostPlayer {
                    index,
                    roster: Arc::clone(&roster),
                    deck_slot: Arc::clone(&deck_slot),
                    counters: Arc::clone(&counters),
                    event_log: Arc::clone(&event_log),
                }) as Arc<dyn Player>
            })
            .collect();
        let sink = Arc::new(HostEventSink {
            host: Arc::clone(self),
            game_id,
            roster: Arc::clone(&roster),
            sig_chain: Arc::clone(&sig_chain),
            event_log,
            current_hand,
        });
        let rules = GameRules {
            winning_score: self.cfg.winning_score,
            starting_hand_size: self.cfg.starting_hand_size,
        };
        let mut game = Game::new(players, factory, sink, rules);
        let result = game.play(0, &mut one_left_rx).await;

        {
            let mut state = self.state.write();
            state.game_running = false;
            state.one_left = None;
            state.game_roster = None;
        }
        if let Err(err) = &result {
            let blamed = err.blamed_player();
            warn!(target: LOG_TARGET, %game_id, %err, ?blamed, "game aborted");
            self.broadcast(HostMessage::Error {
                error: GameErrorMsg {
                    game_id: Some(game_id),
                    message: err.to_string(),
                    player_index: blamed.map(|i| i as u32),
                    terminates_game: true,
                },
            });
            if let Some(blamed) = blamed {
                if let Some(seat) = roster.get(blamed) {
                    seat.client.fail(format!("protocol violation: {err}"));
                }
            }
        }
        result.map(|_| ())
    }
}

#[async_trait]
impl ClientEvents for Host {
    async fn on_run(&self, client: &Arc<ClientHandle>) {
        let welcome = {
            let state = self.state.read();
            HostMessage::Welcome {
                players: (*state.proto_players).clone(),
                chat_messages: (*state.chat).clone(),
                last_game_event: state.last_event.clone(),
            }
        };
        client.send_nonblocking(welcome);
        self.state.write().clients.insert(
            client.num(),
            ClientSeat {
                handle: Arc::clone(client),
                identity: None,
            },
        );
    }

    async fn on_chat_message(&self, client: &Arc<ClientHandle>, mut message: ChatMessage) {
        let (identity, expected) = {
            let state = self.state.read();
            let Some(seat) = state.clients.get(&client.num()) else {
                return;
            };
            (
                seat.identity.clone(),
                state.chat_counters.get(&client.num()).copied().unwrap_or(0),
            )
        };
        let Some(identity) = identity else {
            client.fail("only seated players can chat");
            return;
        };
        if message.player_id != identity.id || message.player_name != identity.name {
            client.fail("chat identity mismatch");
            return;
        }
        if message.counter != expected {
            client.fail("chat counter out of sequence");
            return;
        }
        let len = message.contents.chars().count();
        if len == 0 || len > self.cfg.max_chat_content_len {
            client.fail("chat message length out of bounds");
            return;
        }
        if message.host_utc_ms != 0 {
            client.fail("inbound chat must not be timestamped");
            return;
        }
        if message.verify().is_err() {
            client.fail("invalid chat signature");
            return;
        }
        message.host_utc_ms = Utc::now().timestamp_millis();
        {
            let mut state = self.state.write();
            state.chat_counters.insert(client.num(), expected + 1);
            let mut chat = (*state.chat).clone();
            chat.push(message.clone());
            let excess = chat.len().saturating_sub(self.cfg.max_chat_messages_kept);
            if excess > 0 {
                chat.drain(..excess);
            }
            state.chat = Arc::new(chat);
        }
        self.broadcast(HostMessage::ChatMessageAdded { message });
    }

    async fn on_start_join(&self, client: &Arc<ClientHandle>) {
        {
            let state = self.state.read();
            let reject = if state.game_running {
                Some("cannot join while a game is running")
            } else if state.proto_players.len() >= self.cfg.max_players {
                Some("table is full")
            } else if state
                .clients
                .get(&client.num())
                .map_or(false, |seat| seat.identity.is_some())
            {
                Some("already joined")
            } else {
                None
            };
            if let Some(reason) = reject {
                client.send_nonblocking(HostMessage::Error {
                    error: GameErrorMsg {
                        game_id: None,
                        message: reason.to_string(),
                        player_index: None,
                        terminates_game: false,
                    },
                });
                return;
            }
        }
        let mut nonce = vec![0u8; self.cfg.random_nonce_size];
        OsRng.fill_bytes(&mut nonce);
        // Join RPC failures (timeout, disconnect) are dropped silently.
        let Ok(resp) = client
            .join(JoinRequest {
                random_nonce: nonce.clone(),
            })
            .await
        else {
            return;
        };
        let identity = resp.player;
        if identity.random_nonce != nonce {
            client.fail("join nonce mismatch");
            return;
        }
        if identity.id.len() != PUBLIC_KEY_LEN {
            client.fail("identity key must be 32 bytes");
            return;
        }
        if identity.verify().is_err() {
            client.fail("invalid identity signature");
            return;
        }
        let name_len = identity.name.chars().count();
        if name_len == 0 || name_len > self.cfg.max_name_len {
            client.fail("player name length out of bounds");
            return;
        }
        let players = {
            let mut state = self.state.write();
            if state.game_running || state.proto_players.len() >= self.cfg.max_players {
                return;
            }
            if state.proto_players.iter().any(|p| p.id == identity.id) {
                drop(state);
                client.fail("duplicate player id");
                return;
            }
            if state
                .proto_players
                .iter()
                .any(|p| p.name.eq_ignore_ascii_case(&identity.name))
            {
                drop(state);
                client.fail("duplicate player name");
                return;
            }
            let Some(seat) = state.clients.get_mut(&client.num()) else {
                return;
            };
            seat.identity = Some(identity.clone());
            let mut players = (*state.proto_players).clone();
            players.push(identity.clone());
            state.proto_players = Arc::new(players.clone());
            state.chat_counters.entry(client.num()).or_insert(0);
            players
        };
        info!(
            target: LOG_TARGET,
            client = client.num(),
            name = %identity.name,
            seated = players.len(),
            "player joined"
        );
        self.broadcast(HostMessage::PlayersUpdate { players });
    }

    async fn on_one_left(&self, client: &Arc<ClientHandle>, target_index: u32) {
        let routed = {
            let state = self.state.read();
            let sender = state.one_left.clone();
            let caller = state
                .clients
                .get(&client.num())
                .and_then(|seat| seat.identity.as_ref())
                .and_then(|identity| {
                    state.game_roster.as_ref().and_then(|roster| {
                        roster.iter().position(|p| p.identity.id == identity.id)
                    })
                });
            match (sender, caller) {
                (Some(sender), Some(caller)) => Some((sender, caller)),
                _ => None,
            }
        };
        if let Some((sender, caller)) = routed {
            let _ = sender.try_send(OneLeftCall {
                caller,
                target: target_index as usize,
            });
        }
    }

    async fn on_stop(&self, client: &Arc<ClientHandle>) {
        let players = {
            let mut state = self.state.write();
            let seat = state.clients.remove(&client.num());
            state.chat_counters.remove(&client.num());
            match seat.and_then(|seat| seat.identity) {
                Some(identity) => {
                    let mut players = (*state.proto_players).clone();
                    players.retain(|p| p.id != identity.id);
                    state.proto_players = Arc::new(players.clone());
                    Some(players)
                }
                None => None,
            }
        };
        if let Some(players) = players {
            self.broadcast(HostMessage::PlayersUpdate { players });
        }
    }
}

struct HostEventSink {
    host: Arc<Host>,
    game_id: Uuid,
    roster: Roster,
    sig_chain: SharedSigChain,
    event_log: SharedEventLog,
    current_hand: Arc<Mutex<Uuid>>,
}

impl HostEventSink {
    async fn collect_game_start_signatures(&self) -> Result<(), GameError> {
        let players: Vec<PlayerIdentity> =
            self.roster.iter().map(|s| s.identity.clone()).collect();
        let seal = GameStartSeal {
            game_id: self.game_id,
            players: &players,
        };
        let seal_bytes = seal.to_signing_bytes();
        let calls = self.roster.iter().enumerate().map(|(i, seat)| {
            let req = GameStartRequest {
                game_id: self.game_id,
                players: players.clone(),
            };
            let client = Arc::clone(&seat.client);
            let identity = seat.identity.clone();
            let seal_bytes = seal_bytes.clone();
            async move {
                let resp = client
                    .game_start(req)
                    .await
                    .map_err(|e| GameError::blamed_wrap(i, "game start failed", e))?;
                signing::verify_bytes(&identity.id, &seal_bytes, &resp.sig)
                    .map_err(|e| GameError::blamed_wrap(i, "invalid game start signature", e))?;
                Ok(SignatureBlob(resp.sig))
            }
        });
        let sigs = futures::future::try_join_all(calls).await?;
        let mut chain = self.sig_chain.lock();
        chain.game_start_sigs = sigs;
        chain.hand_end_sigs.clear();
        Ok(())
    }

    async fn collect_game_end_signatures(&self, scores: &[u32]) -> Result<(), GameError> {
        let seal = GameEndSeal {
            game_id: self.game_id,
            player_scores: scores,
        };
        let seal_bytes = seal.to_signing_bytes();
        let hand_end_sigs = self.sig_chain.lock().hand_end_sigs.clone();
        let calls = self.roster.iter().enumerate().map(|(i, seat)| {
            let req = GameEndRequest {
                game_id: self.game_id,
                player_scores: scores.to_vec(),
                hand_end_sigs: hand_end_sigs.clone(),
            };
            let client = Arc::clone(&seat.client);
            let identity = seat.identity.clone();
            let seal_bytes = seal_bytes.clone();
            async move {
                let resp = client
                    .game_end(req)
                    .await
                    .map_err(|e| GameError::blamed_wrap(i, "game end failed", e))?;
                signing::verify_bytes(&identity.id, &seal_bytes, &resp.sig)
                    .map_err(|e| GameError::blamed_wrap(i, "invalid game end signature", e))
            }
        });
        futures::future::try_join_all(calls).await?;
        Ok(())
    }

    fn to_wire(&self, event: &GameEvent) -> GameEventMsg {
        GameEventMsg {
            game_id: self.game_id,
            kind: event.kind,
            player_scores: event.player_scores.clone(),
            dealer_index: event.dealer_index as u32,
            hand: event.hand.as_ref().map(|h| HandSnapshot {
                hand_id: *self.current_hand.lock(),
                player_index: h.player_index as u32,
                player_cards_remaining: h
                    .player_cards_remaining
                    .iter()
                    .map(|&c| c as u32)
                    .collect(),
                deck_cards_remaining: h.deck_cards_remaining as u32,
                discard_stack: h.discard_stack.clone(),
                last_wild_color: h.last_wild_color,
                forward: h.forward,
                one_left_target: h.one_left_target.map(|i| i as u32),
            }),
            hand_complete: event.hand_complete.as_ref().map(|c| HandCompleteMsg {
                winner_index: c.winner_index as u32,
                score: c.score,
                deck_cards: c.deck_cards.clone(),
                player_cards: c.player_cards.clone(),
            }),
        }
    }
}

fn effective_color(snapshot: &HandSnapshot) -> Option<CardColor> {
    let top = *snapshot.discard_stack.last()?;
    if top.is_wild() {
        snapshot.last_wild_color
    } else {
        top.color()
    }
}

#[async_trait]
impl EventSink for HostEventSink {
    async fn on_event(&self, event: &GameEvent) -> Result<(), GameError> {
        match event.kind {
            EventKind::GameStart => self.collect_game_start_signatures().await?,
            EventKind::GameEnd => {
                self.collect_game_end_signatures(&event.player_scores).await?
            }
            _ => {}
        }
        let msg = self.to_wire(event);
        {
            let mut log = self.event_log.write();
            if event.kind == EventKind::HandPlayerDiscarded {
                log.color_before_last_discard = log
                    .last
                    .as_ref()
                    .and_then(|e| e.hand.as_ref())
                    .and_then(effective_color);
            }
            log.last = Some(msg.clone());
        }
        self.host.set_last_event(msg.clone());
        self.host.broadcast(HostMessage::GameEvent { event: msg });
        Ok(())
    }
}
