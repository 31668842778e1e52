//! The player RPC surface: one request union, one response union, and the
//! correlation matching between them. Unknown or mismatched variants are
//! protocol violations, never silently ignored.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cards::{Card, CardColor};
use crate::crypto::encoding::hex_bytes;
use crate::crypto::BigNum;
use crate::protocol::identity::PlayerIdentity;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestKind {
    Join,
    GameStart,
    GameEnd,
    HandStart,
    HandEnd,
    Shuffle,
    ChooseColorSinceFirstCardIsWild,
    GetDeckTopDecryptionKey,
    GiveDeckTopCard,
    Play,
    ShouldChallengeWildDrawFour,
    RevealCardsForChallenge,
    RevealedCardsForChallenge,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlayerRequest {
    Join(JoinRequest),
    GameStart(GameStartRequest),
    GameEnd(GameEndRequest),
    HandStart(HandStartRequest),
    HandEnd(HandEndRequest),
    Shuffle(ShuffleRequest),
    ChooseColorSinceFirstCardIsWild(ChooseColorRequest),
    GetDeckTopDecryptionKey(GetDeckTopDecryptionKeyRequest),
    GiveDeckTopCard(GiveDeckTopCardRequest),
    Play(PlayRequest),
    ShouldChallengeWildDrawFour(ShouldChallengeRequest),
    RevealCardsForChallenge(RevealCardsRequest),
    RevealedCardsForChallenge(RevealedCardsRequest),
}

impl PlayerRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            PlayerRequest::Join(_) => RequestKind::Join,
            PlayerRequest::GameStart(_) => RequestKind::GameStart,
            PlayerRequest::GameEnd(_) => RequestKind::GameEnd,
            PlayerRequest::HandStart(_) => RequestKind::HandStart,
            PlayerRequest::HandEnd(_) => RequestKind::HandEnd,
            PlayerRequest::Shuffle(_) => RequestKind::Shuffle,
            PlayerRequest::ChooseColorSinceFirstCardIsWild(_) => {
                RequestKind::ChooseColorSinceFirstCardIsWild
            }
            PlayerRequest::GetDeckTopDecryptionKey(_) => RequestKind::GetDeckTopDecryptionKey,
            PlayerRequest::GiveDeckTopCard(_) => RequestKind::GiveDeckTopCard,
            PlayerRequest::Play(_) => RequestKind::Play,
            PlayerRequest::ShouldChallengeWildDrawFour(_) => {
                RequestKind::ShouldChallengeWildDrawFour
            }
            PlayerRequest::RevealCardsForChallenge(_) => RequestKind::RevealCardsForChallenge,
            PlayerRequest::RevealedCardsForChallenge(_) => RequestKind::RevealedCardsForChallenge,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlayerResponse {
    Join(JoinResponse),
    GameStart(SignatureResponse),
    GameEnd(SignatureResponse),
    HandStart(SignatureResponse),
    HandEnd(HandEndResponse),
    Shuffle(ShuffleResponse),
    ChooseColorSinceFirstCardIsWild(ChooseColorResponse),
    GetDeckTopDecryptionKey(GetDeckTopDecryptionKeyResponse),
    GiveDeckTopCard(GiveDeckTopCardResponse),
    Play(PlayResponse),
    ShouldChallengeWildDrawFour(ShouldChallengeResponse),
    RevealCardsForChallenge(RevealCardsResponse),
    RevealedCardsForChallenge(RevealedCardsResponse),
    /// The peer refused the request; carried back as the host's RPC error.
    Failed { message: String },
}

impl PlayerResponse {
    /// The request kind this response answers; `None` for `Failed`, which
    /// matches any outstanding request.
    pub fn kind(&self) -> Option<RequestKind> {
        match self {
            PlayerResponse::Join(_) => Some(RequestKind::Join),
            PlayerResponse::GameStart(_) => Some(RequestKind::GameStart),
            PlayerResponse::GameEnd(_) => Some(RequestKind::GameEnd),
            PlayerResponse::HandStart(_) => Some(RequestKind::HandStart),
            PlayerResponse::HandEnd(_) => Some(RequestKind::HandEnd),
            PlayerResponse::Shuffle(_) => Some(RequestKind::Shuffle),
            PlayerResponse::ChooseColorSinceFirstCardIsWild(_) => {
                Some(RequestKind::ChooseColorSinceFirstCardIsWild)
            }
            PlayerResponse::GetDeckTopDecryptionKey(_) => {
                Some(RequestKind::GetDeckTopDecryptionKey)
            }
            PlayerResponse::GiveDeckTopCard(_) => Some(RequestKind::GiveDeckTopCard),
            PlayerResponse::Play(_) => Some(RequestKind::Play),
            PlayerResponse::ShouldChallengeWildDrawFour(_) => {
                Some(RequestKind::ShouldChallengeWildDrawFour)
            }
            PlayerResponse::RevealCardsForChallenge(_) => {
                Some(RequestKind::RevealCardsForChallenge)
            }
            PlayerResponse::RevealedCardsForChallenge(_) => {
                Some(RequestKind::RevealedCardsForChallenge)
            }
            PlayerResponse::Failed { .. } => None,
        }
    }

    pub fn answers(&self, request: RequestKind) -> bool {
        match self.kind() {
            Some(kind) => kind == request,
            None => true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JoinRequest {
    #[serde(with = "hex_bytes")]
    pub random_nonce: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JoinResponse {
    pub player: PlayerIdentity,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameStartRequest {
    pub game_id: Uuid,
    pub players: Vec<PlayerIdentity>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameEndRequest {
    pub game_id: Uuid,
    pub player_scores: Vec<u32>,
    /// Per-player signatures over the final hand-end, in roster order.
    pub hand_end_sigs: Vec<SignatureBlob>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HandStartRequest {
    pub game_id: Uuid,
    pub hand_id: Uuid,
    pub dealer_index: u32,
    pub shared_prime: BigNum,
    /// Per-player signatures over the game-start, in roster order.
    pub game_start_sigs: Vec<SignatureBlob>,
    /// Per-player signatures over the previous hand-end; empty on the first
    /// hand of a game.
    pub hand_end_sigs: Vec<SignatureBlob>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HandEndRequest {
    pub hand_id: Uuid,
    pub stage: HandEndStage,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum HandEndStage {
    /// Stage 0: reveal hands and every retained per-card decryption key.
    Reveal { encrypted_deck: Vec<BigNum> },
    /// Stage 1: verify the pooled reveals and sign off on the result.
    Verify {
        winner_index: u32,
        winner_score: u32,
        player_infos: Vec<PlayerHandReveal>,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HandEndResponse {
    /// Present after stage 0.
    pub reveal: Option<PlayerHandReveal>,
    /// Present after stage 1.
    #[serde(default, with = "opt_hex_bytes")]
    pub sig: Option<Vec<u8>>,
}

/// One peer's end-of-hand disclosure: held cards in both forms plus the
/// decryption key for every ciphertext the peer ever re-encrypted in stage 1.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayerHandReveal {
    pub encrypted_cards: Vec<BigNum>,
    pub cards: Vec<Card>,
    pub decryption_keys: Vec<CardKeyEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CardKeyEntry {
    pub encrypted_card: BigNum,
    pub decryption_key: BigNum,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShuffleRequest {
    pub hand_id: Uuid,
    pub stage: u8,
    /// The claimed plaintext input multiset for this shuffle; the full deck
    /// at hand start, the discard minus its top card on a reshuffle.
    pub start_cards: Vec<Card>,
    pub cards: Vec<BigNum>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShuffleResponse {
    /// Empty for the record-only stage 2.
    pub cards: Vec<BigNum>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChooseColorRequest {}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChooseColorResponse {
    pub color: CardColor,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GetDeckTopDecryptionKeyRequest {
    /// Roster index of the receiving player, or -1 for the first discard
    /// (everyone reveals their key).
    pub for_player_index: i32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GetDeckTopDecryptionKeyResponse {
    pub decryption_key: BigNum,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GiveDeckTopCardRequest {
    /// Per-peer decryption keys in roster order; the receiver's own slot
    /// must be empty.
    pub decryption_keys: Vec<Option<BigNum>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GiveDeckTopCardResponse {}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayRequest {}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayResponse {
    /// `None` is a pass.
    pub play: Option<PlayedCard>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayedCard {
    pub encrypted_card: BigNum,
    /// Full per-peer decryption key vector, including the player's own.
    pub decryption_keys: Vec<BigNum>,
    /// Required for wild cards, forbidden otherwise.
    pub wild_color: Option<CardColor>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShouldChallengeRequest {
    /// Effective color the wild-draw-four was played onto.
    pub prev_color: CardColor,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShouldChallengeResponse {
    pub challenge: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RevealCardsRequest {
    pub challenger_index: u32,
    pub prev_color: CardColor,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RevealCardsResponse {
    pub encrypted_cards: Vec<BigNum>,
    /// Full key vector per revealed card, in roster order.
    pub decryption_keys: Vec<Vec<BigNum>>,
    pub challenge_will_succeed: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RevealedCardsRequest {
    pub encrypted_cards: Vec<BigNum>,
    pub decryption_keys: Vec<Vec<BigNum>>,
    pub challenge_will_succeed: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RevealedCardsResponse {
    pub challenge_succeeded: bool,
}

/// A detached ed25519 signature on the wire.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignatureBlob(#[serde(with = "hex_bytes")] pub Vec<u8>);

/// Response carrying a signature over the current phase transcript.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignatureResponse {
    #[serde(with = "hex_bytes")]
    pub sig: Vec<u8>,
}

mod opt_hex_bytes {
    use serde::{de::Error as DeError, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match bytes {
            Some(b) => serializer.serialize_some(&format!("0x{}", hex::encode(b))),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        match encoded {
            None => Ok(None),
            Some(s) => {
                let stripped = s.strip_prefix("0x").unwrap_or(&s);
                hex::decode(stripped).map(Some).map_err(D::Error::custom)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_matches_any_request() {
        let failed = PlayerResponse::Failed {
            message: "nope".into(),
        };
        assert!(failed.answers(RequestKind::Play));
        assert!(failed.answers(RequestKind::Shuffle));
    }

    #[test]
    fn kinds_correlate() {
        let req = PlayerRequest::Play(PlayRequest {});
        let resp = PlayerResponse::Play(PlayResponse { play: None });
        assert!(resp.answers(req.kind()));
        let wrong = PlayerResponse::ShouldChallengeWildDrawFour(ShouldChallengeResponse {
            challenge: false,
        });
        assert!(!wrong.answers(req.kind()));
    }

    #[test]
    fn hand_end_stage_round_trips() {
        let req = HandEndRequest {
            hand_id: Uuid::new_v4(),
            stage: HandEndStage::Reveal {
                encrypted_deck: vec![BigNum::from(7u32)],
            },
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: HandEndRequest = serde_json::from_str(&json).unwrap();
        match back.stage {
            HandEndStage::Reveal { encrypted_deck } => assert_eq!(encrypted_deck.len(), 1),
            other => panic!("unexpected stage: {other:?}"),
        }
    }
}
