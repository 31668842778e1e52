//! The relay host: client streams, join admission, chat, event fan-out, and
//! the host side of the trustless deck protocol. The host never learns a
//! card it is not entitled to; everything it relays is re-verified by peers.

pub mod client;
pub mod deck;
pub mod player;
pub mod rpc;
pub mod session;

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::cards::CardColor;
use crate::protocol::requests::SignatureBlob;
use crate::protocol::{GameEventMsg, PlayerIdentity};

pub use client::{ClientEvents, ClientHandle, RpcError};
pub use session::Host;

/// One seated player: verified identity plus the live stream handle.
#[derive(Clone)]
pub struct SeatedPlayer {
    pub identity: PlayerIdentity,
    pub client: Arc<ClientHandle>,
}

/// Roster snapshot fixed for the lifetime of a game.
pub type Roster = Arc<Vec<SeatedPlayer>>;

/// Signature chain linking game phases together.
#[derive(Default)]
pub struct SigChain {
    pub game_start_sigs: Vec<SignatureBlob>,
    pub hand_end_sigs: Vec<SignatureBlob>,
}

pub type SharedSigChain = Arc<Mutex<SigChain>>;

/// Card-count bookkeeping shared between the deck coordinator and the
/// per-player engine adapters.
pub struct TableCounters {
    pub deck_remaining: usize,
    pub card_counts: Vec<usize>,
}

pub type SharedCounters = Arc<Mutex<TableCounters>>;

/// Rolling view of the event stream kept for challenge resolution: the color
/// a wild-draw-four was played onto lives in the state before that discard.
#[derive(Default)]
pub struct EventLog {
    pub last: Option<GameEventMsg>,
    pub color_before_last_discard: Option<CardColor>,
}

pub type SharedEventLog = Arc<RwLock<EventLog>>;
