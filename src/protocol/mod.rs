//! Wire model: the two top-level tagged unions exchanged over a client
//! stream, plus the payload types they carry. Byte blobs ride as `0x`-hex
//! strings; signatures always cover canonical transcripts, never the JSON.

pub mod identity;
pub mod requests;
pub mod seals;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cards::{Card, CardColor};
use crate::engine::events::EventKind;

pub use identity::{ChatMessage, PlayerIdentity};
pub use requests::{PlayerRequest, PlayerResponse, RequestKind};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    Welcome {
        players: Vec<PlayerIdentity>,
        chat_messages: Vec<ChatMessage>,
        last_game_event: Option<GameEventMsg>,
    },
    PlayersUpdate {
        players: Vec<PlayerIdentity>,
    },
    ChatMessageAdded {
        message: ChatMessage,
    },
    GameEvent {
        event: GameEventMsg,
    },
    Error {
        error: GameErrorMsg,
    },
    PlayerRequest {
        request: PlayerRequest,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Chat {
        message: ChatMessage,
    },
    StartJoin,
    /// Race-window submission; the host routes it into the running hand.
    CallOneLeft {
        target_index: u32,
    },
    PlayerResponse {
        response: PlayerResponse,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameErrorMsg {
    pub game_id: Option<Uuid>,
    pub message: String,
    pub player_index: Option<u32>,
    pub terminates_game: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameEventMsg {
    pub game_id: Uuid,
    pub kind: EventKind,
    pub player_scores: Vec<u32>,
    pub dealer_index: u32,
    pub hand: Option<HandSnapshot>,
    pub hand_complete: Option<HandCompleteMsg>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HandSnapshot {
    pub hand_id: Uuid,
    pub player_index: u32,
    pub player_cards_remaining: Vec<u32>,
    pub deck_cards_remaining: u32,
    pub discard_stack: Vec<Card>,
    /// Only meaningful while the top of the discard is wild.
    pub last_wild_color: Option<CardColor>,
    pub forward: bool,
    pub one_left_target: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HandCompleteMsg {
    pub winner_index: u32,
    pub score: u32,
    pub deck_cards: Vec<Card>,
    pub player_cards: Vec<Vec<Card>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::BigNum;
    use crate::protocol::requests::JoinRequest;

    #[test]
    fn host_message_json_round_trip() {
        let msg = HostMessage::PlayerRequest {
            request: PlayerRequest::Join(JoinRequest {
                random_nonce: vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10],
            }),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: HostMessage = serde_json::from_str(&json).unwrap();
        match back {
            HostMessage::PlayerRequest {
                request: PlayerRequest::Join(req),
            } => assert_eq!(req.random_nonce.len(), 10),
            other => panic!("unexpected round trip: {other:?}"),
        }
    }

    #[test]
    fn client_message_json_round_trip() {
        let msg = ClientMessage::PlayerResponse {
            response: PlayerResponse::GetDeckTopDecryptionKey(
                requests::GetDeckTopDecryptionKeyResponse {
                    decryption_key: BigNum::from(12345u32),
                },
            ),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: ClientMessage = serde_json::from_str(&json).unwrap();
        match back {
            ClientMessage::PlayerResponse {
                response: PlayerResponse::GetDeckTopDecryptionKey(resp),
            } => assert_eq!(resp.decryption_key, BigNum::from(12345u32)),
            other => panic!("unexpected round trip: {other:?}"),
        }
    }
}
