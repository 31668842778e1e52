//! Host-side deck coordination: the three-stage shuffle relay, blind deals,
//! first-discard pops, play validation, and the two-stage end-of-hand audit.
//!
//! The host never decrypts a card it is not entitled to; it can only compose
//! decryption keys peers have chosen to reveal. Everything recorded here
//! (`seen_keys`, `card_holder`) exists to catch a peer contradicting itself
//! later.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use num_bigint::BigUint;
use rand::rngs::OsRng;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cards::{self, Card};
use crate::config::Config;
use crate::crypto::{sra, BigNum};
use crate::engine::{CardDeck, DeckFactory, GameError, HandReveal};
use crate::protocol::requests::{
    GetDeckTopDecryptionKeyRequest, GiveDeckTopCardRequest, HandEndRequest, HandEndStage,
    HandStartRequest, PlayerHandReveal, ShuffleRequest, SignatureBlob,
};
use crate::protocol::seals::{HandEndSeal, HandStartSeal};
use crate::signing::{self, Signable};

use super::{Roster, SharedCounters, SharedSigChain};

const LOG_TARGET: &str = "one_left::host::deck";

pub struct HostDeck {
    hand_id: Uuid,
    prime: BigUint,
    roster: Roster,
    counters: SharedCounters,
    sig_chain: SharedSigChain,
    encrypted_cards: Vec<BigUint>,
    seen_keys: HashMap<BigUint, Vec<Option<BigUint>>>,
    card_holder: HashMap<BigUint, usize>,
    start_cards: Vec<Card>,
}

/// The per-hand deck slot shared between the engine's deck handle and the
/// per-player adapters; the factory swaps a fresh deck in each hand.
pub type DeckSlot = Arc<AsyncMutex<Option<HostDeck>>>;

impl HostDeck {
    async fn shuffle_rounds(&mut self, input: Vec<Card>) -> Result<(), GameError> {
        if self.start_cards.is_empty() {
            let mut sorted = input.clone();
            sorted.sort_unstable();
            self.start_cards = sorted;
        }
        let mut working: Vec<BigUint> = input
            .iter()
            .map(|card| BigUint::from(card.id()))
            .collect();
        // Stages 0 and 1 are relay passes around the ring; each peer's
        // output becomes the next peer's input.
        for stage in 0..=1u8 {
            for (index, seat) in self.roster.iter().enumerate() {
                let resp = seat
                    .client
                    .shuffle(ShuffleRequest {
                        hand_id: self.hand_id,
                        stage,
                        start_cards: input.clone(),
                        cards: working.iter().map(BigNum::from).collect(),
                    })
                    .await
                    .map_err(|e| {
                        GameError::blamed_wrap(index, format!("shuffle stage {stage} failed"), e)
                    })?;
                if resp.cards.len() != working.len() {
                    return Err(GameError::blamed(
                        index,
                        format!("shuffle stage {stage} changed the card count"),
                    ));
                }
                working = resp.cards.into_iter().map(BigNum::into_uint).collect();
            }
        }
        // Stage 2 is record-only; every peer pins the final working set.
        let final_cards: Vec<BigNum> = working.iter().map(BigNum::from).collect();
        let record_calls = self.roster.iter().enumerate().map(|(index, seat)| {
            let req = ShuffleRequest {
                hand_id: self.hand_id,
                stage: 2,
                start_cards: input.clone(),
                cards: final_cards.clone(),
            };
            let client = Arc::clone(&seat.client);
            async move {
                client
                    .shuffle(req)
                    .await
                    .map_err(|e| GameError::blamed_wrap(index, "shuffle record stage failed", e))
            }
        });
        try_join_all(record_calls).await?;
        debug!(
            target: LOG_TARGET,
            hand_id = %self.hand_id,
            cards = working.len(),
            "shuffle complete"
        );
        self.encrypted_cards = working;
        self.counters.lock().deck_remaining = self.encrypted_cards.len();
        Ok(())
    }

    async fn deal_top_to(&mut self, target: usize) -> Result<(), GameError> {
        let n = self.roster.len();
        let top = self
            .encrypted_cards
            .last()
            .cloned()
            .ok_or_else(|| GameError::msg("deal from an empty deck"))?;
        let key_calls = (0..n).filter(|&i| i != target).map(|i| {
            let client = Arc::clone(&self.roster[i].client);
            let req = GetDeckTopDecryptionKeyRequest {
                for_player_index: target as i32,
            };
            async move {
                client
                    .get_deck_top_decryption_key(req)
                    .await
                    .map(|resp| (i, resp.decryption_key.into_uint()))
                    .map_err(|e| {
                        GameError::blamed_wrap(i, "failed getting deck top decryption key", e)
                    })
            }
        });
        // First error aborts before any local mutation.
        let results = try_join_all(key_calls).await?;
        let mut keys: Vec<Option<BigUint>> = vec![None; n];
        for (i, key) in results {
            keys[i] = Some(key);
        }
        self.encrypted_cards.pop();
        self.seen_keys.insert(top.clone(), keys.clone());
        self.card_holder.insert(top.clone(), target);
        {
            let mut counters = self.counters.lock();
            counters.deck_remaining = self.encrypted_cards.len();
            counters.card_counts[target] += 1;
        }
        self.roster[target]
            .client
            .give_deck_top_card(GiveDeckTopCardRequest {
                decryption_keys: keys.iter().map(|k| k.as_ref().map(BigNum::from)).collect(),
            })
            .await
            .map_err(|e| GameError::blamed_wrap(target, "failed giving deck top card", e))?;
        Ok(())
    }

    async fn pop_first_discard(&mut self) -> Result<Card, GameError> {
        let n = self.roster.len();
        let top = self
            .encrypted_cards
            .last()
            .cloned()
            .ok_or_else(|| GameError::msg("first discard from an empty deck"))?;
        let key_calls = (0..n).map(|i| {
            let client = Arc::clone(&self.roster[i].client);
            let req = GetDeckTopDecryptionKeyRequest {
                for_player_index: -1,
            };
            async move {
                client
                    .get_deck_top_decryption_key(req)
                    .await
                    .map(|resp| resp.decryption_key.into_uint())
                    .map_err(|e| {
                        GameError::blamed_wrap(i, "failed getting first discard key", e)
                    })
            }
        });
        let keys: Vec<BigUint> = try_join_all(key_calls).await?;
        self.encrypted_cards.pop();
        self.counters.lock().deck_remaining = self.encrypted_cards.len();
        self.seen_keys
            .insert(top.clone(), keys.iter().cloned().map(Some).collect());
        sra::decrypt_card(&top, keys.iter(), &self.prime)
            .ok_or_else(|| GameError::msg("first discard did not decrypt to a card"))
    }

    /// Validate a claimed play: the ciphertext must have been dealt to this
    /// player, its key vector must extend what the table has already seen by
    /// exactly the player's own slot, and it must decrypt to a real card.
    pub fn validate_play(
        &mut self,
        player_index: usize,
        ciphertext: &BigUint,
        keys: &[BigUint],
    ) -> Result<Card, GameError> {
        let n = self.roster.len();
        match self.card_holder.get(ciphertext) {
            Some(&holder) if holder == player_index => {}
            _ => {
                return Err(GameError::blamed(
                    player_index,
                    "played card was never given to this player",
                ))
            }
        }
        if keys.len() != n {
            return Err(GameError::blamed(
                player_index,
                "invalid decryption key set size",
            ));
        }
        let seen = self
            .seen_keys
            .get(ciphertext)
            .ok_or_else(|| GameError::blamed(player_index, "no decryption keys seen for card"))?;
        for i in 0..n {
            if i == player_index {
                if seen[i].is_some() {
                    return Err(GameError::blamed(
                        player_index,
                        "player's own decryption key was already revealed",
                    ));
                }
            } else if seen[i].as_ref() != Some(&keys[i]) {
                return Err(GameError::blamed(player_index, "decryption key mismatch"));
            }
        }
        let card = sra::decrypt_card(ciphertext, keys.iter(), &self.prime)
            .ok_or_else(|| GameError::blamed(player_index, "played card failed to decrypt"))?;
        self.card_holder.remove(ciphertext);
        self.seen_keys
            .insert(ciphertext.clone(), keys.iter().cloned().map(Some).collect());
        self.counters.lock().card_counts[player_index] -= 1;
        Ok(card)
    }

    async fn complete(&mut self, discard: &[Card]) -> Result<HandReveal, GameError> {
        let n = self.roster.len();
        // Stage 0: collect every peer's reveal.
        let deck_msg: Vec<BigNum> = self.encrypted_cards.iter().map(BigNum::from).collect();
        let reveal_calls = self.roster.iter().enumerate().map(|(i, seat)| {
            let req = HandEndRequest {
                hand_id: self.hand_id,
                stage: HandEndStage::Reveal {
                    encrypted_deck: deck_msg.clone(),
                },
            };
            let client = Arc::clone(&seat.client);
            async move {
                let resp = client
                    .hand_end(req)
                    .await
                    .map_err(|e| GameError::blamed_wrap(i, "hand end reveal failed", e))?;
                resp.reveal
                    .ok_or_else(|| GameError::blamed(i, "hand end reveal missing"))
            }
        });
        let reveals: Vec<PlayerHandReveal> = try_join_all(reveal_calls).await?;

        // Per-peer consistency with the table's own records.
        let counts = self.counters.lock().card_counts.clone();
        let mut holder_counts = vec![0usize; n];
        for &holder in self.card_holder.values() {
            holder_counts[holder] += 1;
        }
        for (i, reveal) in reveals.iter().enumerate() {
            if reveal.encrypted_cards.len() != reveal.cards.len() {
                return Err(GameError::blamed(i, "reveal card count mismatch"));
            }
            if reveal.encrypted_cards.len() != counts[i] {
                return Err(GameError::blamed(i, "reveal does not match dealt count"));
            }
            if reveal.encrypted_cards.len() != holder_counts[i] {
                return Err(GameError::blamed(i, "reveal does not match held cards"));
            }
            let mut distinct = HashSet::new();
            for ct in &reveal.encrypted_cards {
                let ct = ct.as_uint();
                if !distinct.insert(ct.clone()) {
                    return Err(GameError::blamed(i, "duplicate card in reveal"));
                }
                match self.card_holder.get(ct) {
                    Some(&holder) if holder == i => {}
                    _ => {
                        return Err(GameError::blamed(
                            i,
                            "revealed card was not given to this player",
                        ))
                    }
                }
            }
        }

        // Pool the keys and check them against everything seen during play.
        let pools: Vec<HashMap<BigUint, BigUint>> = reveals
            .iter()
            .map(|reveal| {
                reveal
                    .decryption_keys
                    .iter()
                    .map(|entry| {
                        (
                            entry.encrypted_card.as_uint().clone(),
                            entry.decryption_key.as_uint().clone(),
                        )
                    })
                    .collect()
            })
            .collect();
        let mut active_cts: Vec<BigUint> = self.encrypted_cards.clone();
        for reveal in &reveals {
            active_cts.extend(reveal.encrypted_cards.iter().map(|c| c.as_uint().clone()));
        }
        for (i, pool) in pools.iter().enumerate() {
            for ct in &active_cts {
                if !pool.contains_key(ct) {
                    return Err(GameError::blamed(i, "missing decryption key in reveal"));
                }
            }
            for (ct, seen_vec) in &self.seen_keys {
                if let (Some(seen_key), Some(pool_key)) = (&seen_vec[i], pool.get(ct)) {
                    if pool_key != seen_key {
                        return Err(GameError::blamed(
                            i,
                            "revealed key contradicts one revealed during play",
                        ));
                    }
                }
            }
        }

        // Decrypt every claimed hand and the remaining deck.
        for (i, reveal) in reveals.iter().enumerate() {
            for (ct, claimed) in reveal.encrypted_cards.iter().zip(&reveal.cards) {
                let keys: Vec<&BigUint> = pools
                    .iter()
                    .map(|pool| pool.get(ct.as_uint()).expect("completeness checked"))
                    .collect();
                let card = sra::decrypt_card(ct.as_uint(), keys, &self.prime)
                    .ok_or_else(|| GameError::blamed(i, "revealed card failed to decrypt"))?;
                if card != *claimed {
                    return Err(GameError::blamed(
                        i,
                        "revealed card does not match its plaintext claim",
                    ));
                }
            }
        }
        let mut deck_cards = Vec::with_capacity(self.encrypted_cards.len());
        for ct in &self.encrypted_cards {
            let keys: Vec<&BigUint> = pools
                .iter()
                .map(|pool| pool.get(ct).expect("completeness checked"))
                .collect();
            deck_cards.push(
                sra::decrypt_card(ct, keys, &self.prime)
                    .ok_or_else(|| GameError::msg("deck card failed to decrypt"))?,
            );
        }

        // Multiset reconciliation against the hand's starting cards.
        let mut all: Vec<Card> = discard.to_vec();
        all.extend(deck_cards.iter().copied());
        for reveal in &reveals {
            all.extend(reveal.cards.iter().copied());
        }
        all.sort_unstable();
        if all != self.start_cards {
            return Err(GameError::msg(
                "end-of-hand card multiset does not match the start deck",
            ));
        }

        let winner_index = reveals
            .iter()
            .position(|reveal| reveal.cards.is_empty())
            .ok_or_else(|| GameError::msg("hand completed without an empty hand"))?;
        let winner_score: u32 = reveals
            .iter()
            .flat_map(|reveal| &reveal.cards)
            .map(|card| card.score())
            .sum();

        // Stage 1: everyone signs off on the aggregated reveal.
        let seal = HandEndSeal {
            hand_id: self.hand_id,
            winner_index: winner_index as u32,
            winner_score,
            player_infos: &reveals,
        };
        let seal_bytes = seal.to_signing_bytes();
        let verify_calls = self.roster.iter().enumerate().map(|(i, seat)| {
            let req = HandEndRequest {
                hand_id: self.hand_id,
                stage: HandEndStage::Verify {
                    winner_index: winner_index as u32,
                    winner_score,
                    player_infos: reveals.clone(),
                },
            };
            let client = Arc::clone(&seat.client);
            let identity = seat.identity.clone();
            let seal_bytes = seal_bytes.clone();
            async move {
                let resp = client
                    .hand_end(req)
                    .await
                    .map_err(|e| GameError::blamed_wrap(i, "hand end verify failed", e))?;
                let sig = resp
                    .sig
                    .ok_or_else(|| GameError::blamed(i, "hand end signature missing"))?;
                signing::verify_bytes(&identity.id, &seal_bytes, &sig)
                    .map_err(|e| GameError::blamed_wrap(i, "invalid hand end signature", e))?;
                Ok(SignatureBlob(sig))
            }
        });
        let sigs = try_join_all(verify_calls).await?;
        self.sig_chain.lock().hand_end_sigs = sigs;
        info!(
            target: LOG_TARGET,
            hand_id = %self.hand_id,
            winner = winner_index,
            score = winner_score,
            "hand audit complete"
        );
        Ok(HandReveal {
            deck_cards,
            player_cards: reveals.into_iter().map(|r| r.cards).collect(),
        })
    }
}

/// The engine's handle onto the current hand's deck.
pub struct SharedDeck {
    slot: DeckSlot,
    counters: SharedCounters,
}

#[async_trait]
impl CardDeck for SharedDeck {
    fn cards_remaining(&self) -> usize {
        self.counters.lock().deck_remaining
    }

    async fn shuffle(&mut self, cards: Option<Vec<Card>>) -> Result<(), GameError> {
        let mut slot = self.slot.lock().await;
        let deck = slot
            .as_mut()
            .ok_or_else(|| GameError::msg("no active hand deck"))?;
        let input = cards.unwrap_or_else(cards::full_deck);
        deck.shuffle_rounds(input).await
    }

    async fn deal_to(&mut self, player_index: usize) -> Result<(), GameError> {
        let mut slot = self.slot.lock().await;
        let deck = slot
            .as_mut()
            .ok_or_else(|| GameError::msg("no active hand deck"))?;
        deck.deal_top_to(player_index).await
    }

    async fn pop_for_first_discard(&mut self) -> Result<Card, GameError> {
        let mut slot = self.slot.lock().await;
        let deck = slot
            .as_mut()
            .ok_or_else(|| GameError::msg("no active hand deck"))?;
        deck.pop_first_discard().await
    }

    async fn complete_hand(&mut self, discard: &[Card]) -> Result<HandReveal, GameError> {
        let mut slot = self.slot.lock().await;
        let deck = slot
            .as_mut()
            .ok_or_else(|| GameError::msg("no active hand deck"))?;
        deck.complete(discard).await
    }
}

/// Creates a deck per hand: generates the shared prime, runs the hand-start
/// signature round, and installs the fresh deck into the shared slot.
pub struct HostDeckFactory {
    pub cfg: Arc<Config>,
    pub game_id: Uuid,
    pub roster: Roster,
    pub counters: SharedCounters,
    pub sig_chain: SharedSigChain,
    pub deck_slot: DeckSlot,
    pub current_hand: Arc<parking_lot::Mutex<Uuid>>,
}

#[async_trait]
impl DeckFactory for HostDeckFactory {
    async fn new_deck(&self, dealer_index: usize) -> Result<Box<dyn crate::engine::CardDeck>, GameError> {
        let prime = sra::generate_shared_prime(self.cfg.shared_prime_bits, &mut OsRng);
        let hand_id = Uuid::new_v4();
        let prime_msg = BigNum::from(&prime);
        let (game_start_sigs, hand_end_sigs) = {
            let chain = self.sig_chain.lock();
            (chain.game_start_sigs.clone(), chain.hand_end_sigs.clone())
        };
        let seal = HandStartSeal {
            game_id: self.game_id,
            hand_id,
            dealer_index: dealer_index as u32,
            shared_prime: &prime_msg,
        };
        let seal_bytes = seal.to_signing_bytes();
        let start_calls = self.roster.iter().enumerate().map(|(i, seat)| {
            let req = HandStartRequest {
                game_id: self.game_id,
                hand_id,
                dealer_index: dealer_index as u32,
                shared_prime: prime_msg.clone(),
                game_start_sigs: game_start_sigs.clone(),
                hand_end_sigs: hand_end_sigs.clone(),
            };
            let client = Arc::clone(&seat.client);
            let identity = seat.identity.clone();
            let seal_bytes = seal_bytes.clone();
            async move {
                let resp = client
                    .hand_start(req)
                    .await
                    .map_err(|e| GameError::blamed_wrap(i, "hand start failed", e))?;
                signing::verify_bytes(&identity.id, &seal_bytes, &resp.sig)
                    .map_err(|e| GameError::blamed_wrap(i, "invalid hand start signature", e))
            }
        });
        try_join_all(start_calls).await?;

        {
            let mut counters = self.counters.lock();
            counters.deck_remaining = 0;
            for count in counters.card_counts.iter_mut() {
                *count = 0;
            }
        }
        *self.current_hand.lock() = hand_id;
        let deck = HostDeck {
            hand_id,
            prime,
            roster: Arc::clone(&self.roster),
            counters: Arc::clone(&self.counters),
            sig_chain: Arc::clone(&self.sig_chain),
            encrypted_cards: Vec::new(),
            seen_keys: HashMap::new(),
            card_holder: HashMap::new(),
            start_cards: Vec::new(),
        };
        *self.deck_slot.lock().await = Some(deck);
        Ok(Box::new(SharedDeck {
            slot: Arc::clone(&self.deck_slot),
            counters: Arc::clone(&self.counters),
        }))
    }
}
