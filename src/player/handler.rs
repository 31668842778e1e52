//! Peer-side request handling: every host request is validated against the
//! peer's local history before the vault or the oracle is consulted. A
//! refused request surfaces to the host as an RPC failure carrying the
//! reason.

use std::future::Future;
use std::sync::Arc;

use num_bigint::BigUint;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::cards::{self, Card, CardColor};
use crate::config::Config;
use crate::crypto::sra;
use crate::crypto::BigNum;
use crate::engine::EventKind;
use crate::protocol::identity::PlayerIdentity;
use crate::protocol::requests::{
    CardKeyEntry, ChooseColorRequest, ChooseColorResponse, GameEndRequest, GameStartRequest,
    GetDeckTopDecryptionKeyRequest, GetDeckTopDecryptionKeyResponse, GiveDeckTopCardRequest,
    GiveDeckTopCardResponse, HandEndRequest, HandEndResponse, HandEndStage, HandStartRequest,
    JoinRequest, JoinResponse, PlayRequest, PlayResponse, PlayedCard, PlayerHandReveal,
    RevealCardsRequest, RevealCardsResponse, RevealedCardsRequest, RevealedCardsResponse,
    ShouldChallengeRequest, ShouldChallengeResponse, ShuffleRequest, ShuffleResponse,
    SignatureResponse,
};
use crate::protocol::seals::{
    verify_roster_signatures, GameEndSeal, GameStartSeal, HandEndSeal, HandStartSeal,
};
use crate::protocol::{GameEventMsg, PlayerRequest, PlayerResponse};
use crate::signing::{IdentityKey, Signable, SignError};

use super::oracle::{Oracle, OracleError, PlayView};
use super::vault::{DeckVault, VaultError};

const LOG_TARGET: &str = "one_left::player::handler";

#[derive(Debug, Error)]
pub enum PeerError {
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error(transparent)]
    Signature(#[from] SignError),
    #[error(transparent)]
    Sra(#[from] sra::SraError),
    #[error(transparent)]
    Ui(#[from] OracleError),
    #[error("ui did not answer in time")]
    UiTimeout,
    #[error("{0}")]
    Protocol(String),
}

fn refuse(message: impl Into<String>) -> PeerError {
    PeerError::Protocol(message.into())
}

#[derive(Default)]
struct PeerState {
    game_id: Option<Uuid>,
    roster: Vec<PlayerIdentity>,
    self_index: usize,
    vault: Option<DeckVault>,
    hand_id: Option<Uuid>,
    game_start_bytes: Option<Vec<u8>>,
    last_hand_end_bytes: Option<Vec<u8>>,
    last_event: Option<GameEventMsg>,
    /// Effective discard color just before the most recent discard; the
    /// reference color for wild-draw-four challenges.
    color_before_last_discard: Option<CardColor>,
}

impl PeerState {
    fn discard_mirror(&self) -> Vec<Card> {
        self.last_event
            .as_ref()
            .and_then(|e| e.hand.as_ref())
            .map(|h| h.discard_stack.clone())
            .unwrap_or_default()
    }

    fn effective_color(&self) -> Option<CardColor> {
        let hand = self.last_event.as_ref()?.hand.as_ref()?;
        let top = *hand.discard_stack.last()?;
        if top.is_wild() {
            hand.last_wild_color
        } else {
            top.color()
        }
    }

    fn vault_mut(&mut self) -> Result<&mut DeckVault, PeerError> {
        self.vault.as_mut().ok_or_else(|| refuse("no game joined"))
    }

    fn vault(&self) -> Result<&DeckVault, PeerError> {
        self.vault.as_ref().ok_or_else(|| refuse("no game joined"))
    }
}

pub struct PeerHandler {
    cfg: Arc<Config>,
    key: IdentityKey,
    name: String,
    oracle: Arc<dyn Oracle>,
    state: Mutex<PeerState>,
}

impl PeerHandler {
    pub fn new(cfg: Arc<Config>, key: IdentityKey, name: String, oracle: Arc<dyn Oracle>) -> Self {
        Self {
            cfg,
            key,
            name,
            oracle,
            state: Mutex::new(PeerState::default()),
        }
    }

    pub fn self_index(&self) -> Option<usize> {
        let state = self.state.lock();
        state.vault.is_some().then_some(state.self_index)
    }

    pub fn public_key(&self) -> Vec<u8> {
        self.key.public_bytes()
    }

    pub fn identity_key(&self) -> &IdentityKey {
        &self.key
    }

    /// Track the host's event stream; requests are validated against this
    /// mirror.
    pub fn on_event(&self, event: GameEventMsg) {
        let mut state = self.state.lock();
        if event.kind == EventKind::HandPlayerDiscarded {
            state.color_before_last_discard = state.effective_color();
        }
        state.last_event = Some(event);
    }

    pub async fn handle_request(&self, request: PlayerRequest) -> PlayerResponse {
        let result = match request {
            PlayerRequest::Join(req) => self.join(req),
            PlayerRequest::GameStart(req) => self.game_start(req),
            PlayerRequest::GameEnd(req) => self.game_end(req),
            PlayerRequest::HandStart(req) => self.hand_start(req),
            PlayerRequest::HandEnd(req) => self.hand_end(req),
            PlayerRequest::Shuffle(req) => self.shuffle(req),
            PlayerRequest::ChooseColorSinceFirstCardIsWild(req) => self.choose_color(req).await,
            PlayerRequest::GetDeckTopDecryptionKey(req) => self.top_decryption_key(req),
            PlayerRequest::GiveDeckTopCard(req) => self.give_deck_top_card(req).await,
            PlayerRequest::Play(req) => self.play(req).await,
            PlayerRequest::ShouldChallengeWildDrawFour(req) => self.should_challenge(req).await,
            PlayerRequest::RevealCardsForChallenge(req) => self.reveal_cards(req),
            PlayerRequest::RevealedCardsForChallenge(req) => self.revealed_cards(req),
        };
        match result {
            Ok(response) => response,
            Err(err) => {
                debug!(target: LOG_TARGET, %err, "refusing request");
                PlayerResponse::Failed {
                    message: err.to_string(),
                }
            }
        }
    }

    async fn ui<T>(&self, fut: impl Future<Output = T>) -> Result<T, PeerError> {
        tokio::time::timeout(self.cfg.max_ui_wait, fut)
            .await
            .map_err(|_| PeerError::UiTimeout)
    }

    fn join(&self, req: JoinRequest) -> Result<PlayerResponse, PeerError> {
        let identity = PlayerIdentity::sign(&self.key, self.name.clone(), req.random_nonce);
        Ok(PlayerResponse::Join(JoinResponse { player: identity }))
    }

    fn game_start(&self, req: GameStartRequest) -> Result<PlayerResponse, PeerError> {
        let my_id = self.key.public_bytes();
        for (i, player) in req.players.iter().enumerate() {
            player
                .verify()
                .map_err(|e| refuse(format!("invalid identity for player {i}: {e}")))?;
        }
        let self_index = req
            .players
            .iter()
            .position(|p| p.id == my_id)
            .ok_or_else(|| refuse("we are not part of the roster"))?;
        let seal = GameStartSeal {
            game_id: req.game_id,
            players: &req.players,
        };
        let seal_bytes = seal.to_signing_bytes();
        let sig = self.key.sign(&seal);
        let mut state = self.state.lock();
        state.game_id = Some(req.game_id);
        state.self_index = self_index;
        state.vault = Some(DeckVault::new(
            self_index,
            req.players.len(),
            self.cfg.sra_key_bits,
        ));
        state.roster = req.players;
        state.game_start_bytes = Some(seal_bytes);
        state.last_hand_end_bytes = None;
        state.hand_id = None;
        Ok(PlayerResponse::GameStart(SignatureResponse { sig }))
    }

    fn hand_start(&self, req: HandStartRequest) -> Result<PlayerResponse, PeerError> {
        let mut state = self.state.lock();
        if state.game_id != Some(req.game_id) {
            return Err(refuse("hand start for an unknown game"));
        }
        let game_start_bytes = state
            .game_start_bytes
            .clone()
            .ok_or_else(|| refuse("no game start on record"))?;
        verify_roster_signatures(&state.roster, &game_start_bytes, &req.game_start_sigs)
            .map_err(|(i, e)| refuse(format!("game start signature of player {i}: {e}")))?;
        match &state.last_hand_end_bytes {
            Some(bytes) => {
                verify_roster_signatures(&state.roster, bytes, &req.hand_end_sigs)
                    .map_err(|(i, e)| refuse(format!("hand end signature of player {i}: {e}")))?;
            }
            None => {
                if !req.hand_end_sigs.is_empty() {
                    return Err(refuse("unexpected hand end signatures on the first hand"));
                }
            }
        }
        if req.dealer_index as usize >= state.roster.len() {
            return Err(refuse("dealer index out of range"));
        }
        let prime = req.shared_prime.as_uint().clone();
        sra::validate_shared_prime(&prime, self.cfg.min_shared_prime_bits, &mut OsRng)?;
        state.vault_mut()?.start_hand(prime);
        state.hand_id = Some(req.hand_id);
        let seal = HandStartSeal {
            game_id: req.game_id,
            hand_id: req.hand_id,
            dealer_index: req.dealer_index,
            shared_prime: &req.shared_prime,
        };
        Ok(PlayerResponse::HandStart(SignatureResponse {
            sig: self.key.sign(&seal),
        }))
    }

    fn shuffle(&self, req: ShuffleRequest) -> Result<PlayerResponse, PeerError> {
        let mut state = self.state.lock();
        if state.hand_id != Some(req.hand_id) {
            return Err(refuse("shuffle for an unknown hand"));
        }
        let discard = state.discard_mirror();
        let working: Vec<BigUint> = req.cards.iter().map(|c| c.as_uint().clone()).collect();
        match req.stage {
            0 => {
                let vault = state.vault_mut()?;
                let mut claimed = req.start_cards.clone();
                claimed.sort_unstable();
                if vault.is_first_shuffle() {
                    if claimed != cards::full_deck() {
                        return Err(refuse("initial shuffle must cover the full deck"));
                    }
                } else {
                    if discard.len() < 2 {
                        return Err(refuse("reshuffle with no reclaimable discard"));
                    }
                    let mut expected = discard[..discard.len() - 1].to_vec();
                    expected.sort_unstable();
                    if claimed != expected {
                        return Err(refuse("reshuffle cards do not match the discard pile"));
                    }
                }
                let out = vault.shuffle_stage0(&req.start_cards, working)?;
                Ok(PlayerResponse::Shuffle(ShuffleResponse {
                    cards: out.iter().map(BigNum::from).collect(),
                }))
            }
            1 => {
                let out = state.vault_mut()?.shuffle_stage1(working)?;
                Ok(PlayerResponse::Shuffle(ShuffleResponse {
                    cards: out.iter().map(BigNum::from).collect(),
                }))
            }
            2 => {
                state.vault_mut()?.shuffle_stage2(&working)?;
                Ok(PlayerResponse::Shuffle(ShuffleResponse { cards: vec![] }))
            }
            other => Err(refuse(format!("unknown shuffle stage {other}"))),
        }
    }

    fn top_decryption_key(
        &self,
        req: GetDeckTopDecryptionKeyRequest,
    ) -> Result<PlayerResponse, PeerError> {
        let mut state = self.state.lock();
        let discard = state.discard_mirror();
        let key = state
            .vault_mut()?
            .top_decryption_key(req.for_player_index, &discard)?;
        Ok(PlayerResponse::GetDeckTopDecryptionKey(
            GetDeckTopDecryptionKeyResponse {
                decryption_key: BigNum::from(key),
            },
        ))
    }

    async fn give_deck_top_card(
        &self,
        req: GiveDeckTopCardRequest,
    ) -> Result<PlayerResponse, PeerError> {
        let card = {
            let mut state = self.state.lock();
            let keys: Vec<Option<BigUint>> = req
                .decryption_keys
                .into_iter()
                .map(|k| k.map(BigNum::into_uint))
                .collect();
            state.vault_mut()?.receive_card(keys)?
        };
        // Oracle calls stay outside the state lock.
        self.ui(self.oracle.received_card(card)).await?;
        Ok(PlayerResponse::GiveDeckTopCard(GiveDeckTopCardResponse {}))
    }

    fn make_view(&self, state: &PeerState) -> Result<PlayView, PeerError> {
        Ok(PlayView {
            hand: state.vault()?.cards(),
            top_discard: state
                .last_event
                .as_ref()
                .and_then(|e| e.hand.as_ref())
                .and_then(|h| h.discard_stack.last().copied()),
            effective_color: state.effective_color(),
        })
    }

    async fn choose_color(&self, _req: ChooseColorRequest) -> Result<PlayerResponse, PeerError> {
        let view = {
            let state = self.state.lock();
            self.make_view(&state)?
        };
        let color = self.ui(self.oracle.choose_wild_color(&view)).await??;
        Ok(PlayerResponse::ChooseColorSinceFirstCardIsWild(
            ChooseColorResponse { color },
        ))
    }

    async fn play(&self, _req: PlayRequest) -> Result<PlayerResponse, PeerError> {
        let view = {
            let state = self.state.lock();
            self.make_view(&state)?
        };
        let choice = self.ui(self.oracle.play(&view)).await??;
        let Some((card, wild_color)) = choice else {
            return Ok(PlayerResponse::Play(PlayResponse { play: None }));
        };
        if card.is_wild() && wild_color.is_none() {
            return Err(refuse("wild card chosen without a color"));
        }
        if !card.is_wild() && wild_color.is_some() {
            return Err(refuse("color declared on a non-wild card"));
        }
        let hand_card = {
            let mut state = self.state.lock();
            if let Some(top) = view.top_discard {
                if !card.can_play_on(top, view.effective_color) {
                    return Err(refuse(format!("{card} cannot be played on {top}")));
                }
            }
            state.vault_mut()?.play_card(card)?
        };
        Ok(PlayerResponse::Play(PlayResponse {
            play: Some(PlayedCard {
                encrypted_card: BigNum::from(hand_card.ciphertext),
                decryption_keys: hand_card
                    .decryption_keys
                    .iter()
                    .map(BigNum::from)
                    .collect(),
                wild_color,
            }),
        }))
    }

    async fn should_challenge(
        &self,
        req: ShouldChallengeRequest,
    ) -> Result<PlayerResponse, PeerError> {
        let view = {
            let state = self.state.lock();
            if state.color_before_last_discard != Some(req.prev_color) {
                return Err(refuse("challenge color does not match our event history"));
            }
            self.make_view(&state)?
        };
        let challenge = self
            .ui(self.oracle.should_challenge(req.prev_color, &view))
            .await??;
        Ok(PlayerResponse::ShouldChallengeWildDrawFour(
            ShouldChallengeResponse { challenge },
        ))
    }

    fn reveal_cards(&self, req: RevealCardsRequest) -> Result<PlayerResponse, PeerError> {
        let state = self.state.lock();
        if state.color_before_last_discard != Some(req.prev_color) {
            return Err(refuse("challenge color does not match our event history"));
        }
        if req.challenger_index as usize >= state.roster.len()
            || req.challenger_index as usize == state.self_index
        {
            return Err(refuse("bad challenger index"));
        }
        let vault = state.vault()?;
        let (ciphertexts, key_vectors) = vault.reveal_for_challenge();
        let challenge_will_succeed = vault.holds_color(req.prev_color);
        Ok(PlayerResponse::RevealCardsForChallenge(
            RevealCardsResponse {
                encrypted_cards: ciphertexts.iter().map(BigNum::from).collect(),
                decryption_keys: key_vectors
                    .iter()
                    .map(|keys| keys.iter().map(BigNum::from).collect())
                    .collect(),
                challenge_will_succeed,
            },
        ))
    }

    fn revealed_cards(&self, req: RevealedCardsRequest) -> Result<PlayerResponse, PeerError> {
        let state = self.state.lock();
        let prev_color = state
            .color_before_last_discard
            .ok_or_else(|| refuse("no discard on record to challenge"))?;
        let last_hand = state
            .last_event
            .as_ref()
            .filter(|e| e.kind == EventKind::HandPlayerDiscarded)
            .and_then(|e| e.hand.as_ref())
            .ok_or_else(|| refuse("no discard event on record to challenge"))?;
        let challengee = last_hand.player_index as usize;
        let claimed_count = last_hand
            .player_cards_remaining
            .get(challengee)
            .copied()
            .unwrap_or(0) as usize;
        if req.encrypted_cards.len() != claimed_count {
            return Err(refuse("challenge reveal does not match the table card count"));
        }
        let ciphertexts: Vec<BigUint> = req
            .encrypted_cards
            .iter()
            .map(|c| c.as_uint().clone())
            .collect();
        let key_vectors: Vec<Vec<BigUint>> = req
            .decryption_keys
            .iter()
            .map(|keys| keys.iter().map(|k| k.as_uint().clone()).collect())
            .collect();
        let challenge_succeeded = state.vault()?.verify_challenge_reveal(
            challengee,
            &ciphertexts,
            &key_vectors,
            prev_color,
        )?;
        Ok(PlayerResponse::RevealedCardsForChallenge(
            RevealedCardsResponse {
                challenge_succeeded,
            },
        ))
    }

    fn hand_end(&self, req: HandEndRequest) -> Result<PlayerResponse, PeerError> {
        let mut state = self.state.lock();
        if state.hand_id != Some(req.hand_id) {
            return Err(refuse("hand end for an unknown hand"));
        }
        match req.stage {
            HandEndStage::Reveal { encrypted_deck } => {
                let deck: Vec<BigUint> = encrypted_deck
                    .iter()
                    .map(|c| c.as_uint().clone())
                    .collect();
                let (hand, keys) = state.vault()?.hand_end_reveal(&deck)?;
                Ok(PlayerResponse::HandEnd(HandEndResponse {
                    reveal: Some(PlayerHandReveal {
                        encrypted_cards: hand.iter().map(|h| BigNum::from(&h.ciphertext)).collect(),
                        cards: hand.iter().map(|h| h.card).collect(),
                        decryption_keys: keys
                            .into_iter()
                            .map(|(ct, key)| CardKeyEntry {
                                encrypted_card: BigNum::from(ct),
                                decryption_key: BigNum::from(key),
                            })
                            .collect(),
                    }),
                    sig: None,
                }))
            }
            HandEndStage::Verify {
                winner_index,
                winner_score,
                player_infos,
            } => {
                let infos: Vec<(Vec<BigUint>, Vec<Card>, Vec<(BigUint, BigUint)>)> = player_infos
                    .iter()
                    .map(|info| {
                        (
                            info.encrypted_cards
                                .iter()
                                .map(|c| c.as_uint().clone())
                                .collect(),
                            info.cards.clone(),
                            info.decryption_keys
                                .iter()
                                .map(|e| {
                                    (
                                        e.encrypted_card.as_uint().clone(),
                                        e.decryption_key.as_uint().clone(),
                                    )
                                })
                                .collect(),
                        )
                    })
                    .collect();
                let discard = state.discard_mirror();
                state.vault()?.hand_end_verify(
                    &infos,
                    winner_index as usize,
                    winner_score,
                    &discard,
                )?;
                let seal = HandEndSeal {
                    hand_id: req.hand_id,
                    winner_index,
                    winner_score,
                    player_infos: &player_infos,
                };
                state.last_hand_end_bytes = Some(seal.to_signing_bytes());
                Ok(PlayerResponse::HandEnd(HandEndResponse {
                    reveal: None,
                    sig: Some(self.key.sign(&seal)),
                }))
            }
        }
    }

    fn game_end(&self, req: GameEndRequest) -> Result<PlayerResponse, PeerError> {
        let state = self.state.lock();
        if state.game_id != Some(req.game_id) {
            return Err(refuse("game end for an unknown game"));
        }
        let bytes = state
            .last_hand_end_bytes
            .as_ref()
            .ok_or_else(|| refuse("game end before any hand end"))?;
        verify_roster_signatures(&state.roster, bytes, &req.hand_end_sigs)
            .map_err(|(i, e)| refuse(format!("hand end signature of player {i}: {e}")))?;
        if let Some(event) = &state.last_event {
            if event.player_scores != req.player_scores {
                return Err(refuse("final scores do not match the event stream"));
            }
        }
        let seal = GameEndSeal {
            game_id: req.game_id,
            player_scores: &req.player_scores,
        };
        Ok(PlayerResponse::GameEnd(SignatureResponse {
            sig: self.key.sign(&seal),
        }))
    }
}
