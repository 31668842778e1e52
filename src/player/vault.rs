//! Peer-side private deck state.
//!
//! The vault owns every secret this peer contributes to a hand: the
//! stage-0 shuffle key, the per-card stage-1 key pairs, the deck mirror,
//! and the cards in hand with their full decryption-key vectors. All state
//! is per-hand and rebuilt on each hand start. Everything the vault refuses
//! here is something the host (or another peer) could otherwise exploit.

use std::collections::HashMap;

use num_bigint::BigUint;
use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use thiserror::Error;

use crate::cards::{Card, CardColor, CardValue};
use crate::crypto::sra::{self, SraKeyPair};

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("no hand in progress")]
    NoHand,
    #[error("shuffle stages arrived out of order")]
    StageOutOfOrder,
    #[error("shuffle input count changed")]
    CardCountChanged,
    #[error("deck mirror is empty")]
    DeckMirrorEmpty,
    #[error("unknown ciphertext")]
    UnknownCiphertext,
    #[error("refusing to reveal a decryption key for our own card")]
    SelfDeal,
    #[error("first discard requested while the discard pile is live")]
    FirstDiscardNotAllowed,
    #[error("receiving player index out of range")]
    BadPlayerIndex,
    #[error("card was already given out")]
    CardAlreadyGiven,
    #[error("decryption key vector has the wrong size")]
    KeyVectorSize,
    #[error("our own key slot must be empty")]
    OwnKeySlotFilled,
    #[error("a peer's decryption key is missing")]
    MissingKey,
    #[error("ciphertext did not decrypt to a card")]
    NotACard,
    #[error("card is not in hand")]
    CardNotInHand,
    #[error("host's encrypted deck does not match our mirror")]
    DeckMismatch,
    #[error("revealed key does not match the pair we generated")]
    OwnKeyMismatch,
    #[error("revealed card was not given to that player")]
    HolderMismatch,
    #[error("revealed card does not decrypt to its claim")]
    RevealMismatch,
    #[error("our own reveal was altered by the host")]
    OwnRevealAltered,
    #[error("end-of-hand card multiset does not match the start deck")]
    MultisetMismatch,
    #[error("winner claim does not match the reveals")]
    WinnerMismatch,
    #[error("score claim does not match the reveals")]
    ScoreMismatch,
    #[error("key generation failed: {0}")]
    Sra(#[from] sra::SraError),
}

/// Where a revealed top-of-deck key went.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GiveTarget {
    Player(usize),
    FirstDiscard,
}

/// A card held in hand: plaintext, ciphertext, and the full per-peer
/// decryption key vector (our own slot included).
#[derive(Clone, Debug)]
pub struct HandCard {
    pub card: Card,
    pub ciphertext: BigUint,
    pub decryption_keys: Vec<BigUint>,
}

pub struct DeckVault {
    self_index: usize,
    roster_len: usize,
    key_bits: u64,
    prime: Option<BigUint>,
    stage0_key: Option<SraKeyPair>,
    stage1_pairs: Vec<(BigUint, SraKeyPair)>,
    /// Every per-card pair this peer ever produced in stage 1, keyed by the
    /// final working-set ciphertext. Kept for the whole hand: any of these
    /// cards may end up in anyone's hand.
    card_pairs: HashMap<BigUint, SraKeyPair>,
    deck_stack: Vec<BigUint>,
    hand_cards: Vec<HandCard>,
    given_out: HashMap<BigUint, GiveTarget>,
    first_start_cards: Vec<Card>,
}

impl DeckVault {
    pub fn new(self_index: usize, roster_len: usize, key_bits: u64) -> Self {
        Self {
            self_index,
            roster_len,
            key_bits,
            prime: None,
            stage0_key: None,
            stage1_pairs: Vec::new(),
            card_pairs: HashMap::new(),
            deck_stack: Vec::new(),
            hand_cards: Vec::new(),
            given_out: HashMap::new(),
            first_start_cards: Vec::new(),
        }
    }

    /// Reset all per-hand state under a freshly validated shared prime.
    pub fn start_hand(&mut self, prime: BigUint) {
        self.prime = Some(prime);
        self.stage0_key = None;
        self.stage1_pairs.clear();
        self.card_pairs.clear();
        self.deck_stack.clear();
        self.hand_cards.clear();
        self.given_out.clear();
        self.first_start_cards.clear();
    }

    pub fn hand_started(&self) -> bool {
        self.prime.is_some()
    }

    pub fn is_first_shuffle(&self) -> bool {
        self.first_start_cards.is_empty()
    }

    pub fn hand_cards(&self) -> &[HandCard] {
        &self.hand_cards
    }

    pub fn cards(&self) -> Vec<Card> {
        self.hand_cards.iter().map(|h| h.card).collect()
    }

    fn prime(&self) -> Result<&BigUint, VaultError> {
        self.prime.as_ref().ok_or(VaultError::NoHand)
    }

    /// Stage 0: one fresh key over every card, then a CSPRNG shuffle.
    pub fn shuffle_stage0(
        &mut self,
        start_cards: &[Card],
        working: Vec<BigUint>,
    ) -> Result<Vec<BigUint>, VaultError> {
        let prime = self.prime()?.clone();
        if working.len() != start_cards.len() {
            return Err(VaultError::CardCountChanged);
        }
        if self.first_start_cards.is_empty() {
            let mut sorted = start_cards.to_vec();
            sorted.sort_unstable();
            self.first_start_cards = sorted;
        }
        let key = SraKeyPair::generate(&prime, self.key_bits, &mut OsRng)?;
        let mut out: Vec<BigUint> = working.iter().map(|ct| key.encrypt(ct)).collect();
        out.shuffle(&mut OsRng);
        self.stage0_key = Some(key);
        Ok(out)
    }

    /// Stage 1: strip the stage-0 layer and re-encrypt each card under a
    /// fresh per-card pair, preserving order.
    pub fn shuffle_stage1(&mut self, working: Vec<BigUint>) -> Result<Vec<BigUint>, VaultError> {
        let prime = self.prime()?.clone();
        let stage0 = self
            .stage0_key
            .take()
            .ok_or(VaultError::StageOutOfOrder)?;
        let mut out = Vec::with_capacity(working.len());
        self.stage1_pairs.clear();
        for ct in &working {
            let stripped = stage0.decrypt(ct);
            let pair = SraKeyPair::generate(&prime, self.key_bits, &mut OsRng)?;
            let rotated = pair.encrypt(&stripped);
            self.stage1_pairs.push((rotated.clone(), pair));
            out.push(rotated);
        }
        Ok(out)
    }

    /// Stage 2: pin each per-card pair to its final ciphertext and mirror
    /// the deck order. Replaying the same working set is a no-op.
    pub fn shuffle_stage2(&mut self, working: &[BigUint]) -> Result<(), VaultError> {
        if self.stage1_pairs.is_empty() {
            if self.deck_stack == working {
                return Ok(());
            }
            return Err(VaultError::StageOutOfOrder);
        }
        if working.len() != self.stage1_pairs.len() {
            return Err(VaultError::CardCountChanged);
        }
        for ((_, pair), final_ct) in self.stage1_pairs.drain(..).zip(working) {
            self.card_pairs.insert(final_ct.clone(), pair);
        }
        self.deck_stack = working.to_vec();
        Ok(())
    }

    /// Reveal this peer's decryption key for the top of the deck, destined
    /// for `for_player` (or the first discard when -1).
    pub fn top_decryption_key(
        &mut self,
        for_player: i32,
        discard_mirror: &[Card],
    ) -> Result<BigUint, VaultError> {
        let top = self.deck_stack.pop().ok_or(VaultError::DeckMirrorEmpty)?;
        let pair = self
            .card_pairs
            .get(&top)
            .ok_or(VaultError::UnknownCiphertext)?;
        let target = if for_player < 0 {
            // Only legitimate before any live discard exists: an empty pile,
            // or one holding nothing but buried wild-draw-fours.
            if !discard_mirror
                .iter()
                .all(|c| c.value() == CardValue::WildDrawFour)
            {
                return Err(VaultError::FirstDiscardNotAllowed);
            }
            GiveTarget::FirstDiscard
        } else {
            let index = for_player as usize;
            if index >= self.roster_len {
                return Err(VaultError::BadPlayerIndex);
            }
            if index == self.self_index {
                return Err(VaultError::SelfDeal);
            }
            GiveTarget::Player(index)
        };
        if self.given_out.contains_key(&top) {
            return Err(VaultError::CardAlreadyGiven);
        }
        self.given_out.insert(top, target);
        Ok(pair.decryption_key().clone())
    }

    /// Receive the top card of the deck using the other peers' keys.
    pub fn receive_card(
        &mut self,
        keys: Vec<Option<BigUint>>,
    ) -> Result<Card, VaultError> {
        let prime = self.prime()?.clone();
        let top = self.deck_stack.pop().ok_or(VaultError::DeckMirrorEmpty)?;
        if keys.len() != self.roster_len {
            return Err(VaultError::KeyVectorSize);
        }
        if keys[self.self_index].is_some() {
            return Err(VaultError::OwnKeySlotFilled);
        }
        let pair = self
            .card_pairs
            .get(&top)
            .ok_or(VaultError::UnknownCiphertext)?;
        let mut full_keys = Vec::with_capacity(self.roster_len);
        for (i, key) in keys.into_iter().enumerate() {
            if i == self.self_index {
                full_keys.push(pair.decryption_key().clone());
            } else {
                full_keys.push(key.ok_or(VaultError::MissingKey)?);
            }
        }
        let card =
            sra::decrypt_card(&top, full_keys.iter(), &prime).ok_or(VaultError::NotACard)?;
        self.hand_cards.push(HandCard {
            card,
            ciphertext: top,
            decryption_keys: full_keys,
        });
        Ok(card)
    }

    /// Remove a card from hand for play, returning everything the host
    /// needs to verify it.
    pub fn play_card(&mut self, card: Card) -> Result<HandCard, VaultError> {
        let pos = self
            .hand_cards
            .iter()
            .position(|h| h.card == card)
            .ok_or(VaultError::CardNotInHand)?;
        Ok(self.hand_cards.remove(pos))
    }

    /// Whether this peer could have matched `color` without a wild.
    pub fn holds_color(&self, color: CardColor) -> bool {
        self.hand_cards
            .iter()
            .any(|h| h.card.color() == Some(color))
    }

    /// The challenge side-channel reveal: every held card with its full key
    /// vector.
    pub fn reveal_for_challenge(&self) -> (Vec<BigUint>, Vec<Vec<BigUint>>) {
        (
            self.hand_cards.iter().map(|h| h.ciphertext.clone()).collect(),
            self.hand_cards
                .iter()
                .map(|h| h.decryption_keys.clone())
                .collect(),
        )
    }

    /// Verify a challengee's reveal: the cards must all have been dealt to
    /// them, our own key contribution must be the one we generated, and the
    /// verdict is whether any revealed card matches `prev_color`.
    pub fn verify_challenge_reveal(
        &self,
        challengee: usize,
        ciphertexts: &[BigUint],
        key_vectors: &[Vec<BigUint>],
        prev_color: CardColor,
    ) -> Result<bool, VaultError> {
        let prime = self.prime()?.clone();
        if ciphertexts.len() != key_vectors.len() {
            return Err(VaultError::KeyVectorSize);
        }
        let mut any_match = false;
        for (ct, keys) in ciphertexts.iter().zip(key_vectors) {
            if keys.len() != self.roster_len {
                return Err(VaultError::KeyVectorSize);
            }
            let pair = self
                .card_pairs
                .get(ct)
                .ok_or(VaultError::UnknownCiphertext)?;
            if &keys[self.self_index] != pair.decryption_key() {
                return Err(VaultError::OwnKeyMismatch);
            }
            match self.given_out.get(ct) {
                Some(GiveTarget::Player(holder)) if *holder == challengee => {}
                _ => return Err(VaultError::HolderMismatch),
            }
            let card =
                sra::decrypt_card(ct, keys.iter(), &prime).ok_or(VaultError::NotACard)?;
            if card.color() == Some(prev_color) {
                any_match = true;
            }
        }
        Ok(any_match)
    }

    /// Stage 0 of the end-of-hand audit: check the host's deck against our
    /// mirror and disclose our hand plus every per-card key we hold.
    pub fn hand_end_reveal(
        &self,
        claimed_deck: &[BigUint],
    ) -> Result<(Vec<HandCard>, Vec<(BigUint, BigUint)>), VaultError> {
        if claimed_deck != self.deck_stack.as_slice() {
            return Err(VaultError::DeckMismatch);
        }
        let mut keys: Vec<(BigUint, BigUint)> = self
            .card_pairs
            .iter()
            .map(|(ct, pair)| (ct.clone(), pair.decryption_key().clone()))
            .collect();
        keys.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        Ok((self.hand_cards.clone(), keys))
    }

    /// Stage 1 of the audit: verify the pooled reveals independently.
    pub fn hand_end_verify(
        &self,
        infos: &[(Vec<BigUint>, Vec<Card>, Vec<(BigUint, BigUint)>)],
        winner_index: usize,
        winner_score: u32,
        discard_mirror: &[Card],
    ) -> Result<(), VaultError> {
        let prime = self.prime()?.clone();
        if infos.len() != self.roster_len {
            return Err(VaultError::KeyVectorSize);
        }
        // Our own reveal must have survived aggregation untouched.
        let (own_cts, own_cards, own_keys) = &infos[self.self_index];
        let expected_cts: Vec<BigUint> =
            self.hand_cards.iter().map(|h| h.ciphertext.clone()).collect();
        let expected_cards: Vec<Card> = self.hand_cards.iter().map(|h| h.card).collect();
        if own_cts != &expected_cts || own_cards != &expected_cards {
            return Err(VaultError::OwnRevealAltered);
        }
        if own_keys.len() != self.card_pairs.len() {
            return Err(VaultError::OwnRevealAltered);
        }
        for (ct, key) in own_keys {
            match self.card_pairs.get(ct) {
                Some(pair) if pair.decryption_key() == key => {}
                _ => return Err(VaultError::OwnRevealAltered),
            }
        }

        let pools: Vec<HashMap<&BigUint, &BigUint>> = infos
            .iter()
            .map(|(_, _, keys)| keys.iter().map(|(ct, key)| (ct, key)).collect())
            .collect();
        let mut active: Vec<&BigUint> = self.deck_stack.iter().collect();
        for (cts, _, _) in infos {
            active.extend(cts.iter());
        }
        for pool in &pools {
            for ct in &active {
                if !pool.contains_key(*ct) {
                    return Err(VaultError::MissingKey);
                }
            }
        }

        // Every claimed card decrypts to its claim and was dealt to the
        // peer now claiming it.
        let mut all_cards: Vec<Card> = discard_mirror.to_vec();
        for (holder, (cts, cards, _)) in infos.iter().enumerate() {
            if cts.len() != cards.len() {
                return Err(VaultError::RevealMismatch);
            }
            for (ct, claimed) in cts.iter().zip(cards) {
                let keys = pools.iter().map(|pool| *pool.get(ct).expect("checked"));
                let card =
                    sra::decrypt_card(ct, keys, &prime).ok_or(VaultError::NotACard)?;
                if card != *claimed {
                    return Err(VaultError::RevealMismatch);
                }
                if let Some(target) = self.given_out.get(ct) {
                    if *target != GiveTarget::Player(holder) {
                        return Err(VaultError::HolderMismatch);
                    }
                }
            }
            all_cards.extend(cards.iter().copied());
        }
        for ct in &self.deck_stack {
            let keys = pools.iter().map(|pool| *pool.get(ct).expect("checked"));
            all_cards.push(sra::decrypt_card(ct, keys, &prime).ok_or(VaultError::NotACard)?);
        }

        all_cards.sort_unstable();
        if all_cards != self.first_start_cards {
            return Err(VaultError::MultisetMismatch);
        }

        if infos
            .get(winner_index)
            .map_or(true, |(_, cards, _)| !cards.is_empty())
        {
            return Err(VaultError::WinnerMismatch);
        }
        let recomputed: u32 = infos
            .iter()
            .flat_map(|(_, cards, _)| cards)
            .map(|card| card.score())
            .sum();
        if recomputed != winner_score {
            return Err(VaultError::ScoreMismatch);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards;

    fn prime() -> BigUint {
        sra::generate_shared_prime(128, &mut OsRng)
    }

    /// Run the full three-stage shuffle over `n` vaults and return the
    /// final working set.
    fn run_shuffle(vaults: &mut [DeckVault], cards: &[Card]) -> Vec<BigUint> {
        let mut working: Vec<BigUint> =
            cards.iter().map(|c| BigUint::from(c.id())).collect();
        for vault in vaults.iter_mut() {
            working = vault.shuffle_stage0(cards, working).unwrap();
        }
        for vault in vaults.iter_mut() {
            working = vault.shuffle_stage1(working).unwrap();
        }
        for vault in vaults.iter_mut() {
            vault.shuffle_stage2(&working).unwrap();
        }
        working
    }

    fn three_vaults() -> Vec<DeckVault> {
        let p = prime();
        (0..3)
            .map(|i| {
                let mut v = DeckVault::new(i, 3, 32);
                v.start_hand(p.clone());
                v
            })
            .collect()
    }

    #[test]
    fn full_shuffle_decrypts_back_to_the_start_multiset() {
        let mut vaults = three_vaults();
        let deck = cards::full_deck();
        let working = run_shuffle(&mut vaults, &deck);
        assert_eq!(working.len(), cards::DECK_SIZE);

        let prime = vaults[0].prime.clone().unwrap();
        let mut decrypted: Vec<Card> = working
            .iter()
            .map(|ct| {
                let keys: Vec<BigUint> = vaults
                    .iter()
                    .map(|v| v.card_pairs[ct].decryption_key().clone())
                    .collect();
                sra::decrypt_card(ct, keys.iter(), &prime).expect("must be a card")
            })
            .collect();
        decrypted.sort_unstable();
        assert_eq!(decrypted, deck);
    }

    #[test]
    fn stage_two_replay_leaves_the_deck_order_alone() {
        let mut vaults = three_vaults();
        let working = run_shuffle(&mut vaults, &cards::full_deck());
        let mirror = vaults[0].deck_stack.clone();
        vaults[0].shuffle_stage2(&working).unwrap();
        assert_eq!(vaults[0].deck_stack, mirror);
    }

    #[test]
    fn deal_and_receive_round_trip() {
        let mut vaults = three_vaults();
        let working = run_shuffle(&mut vaults, &cards::full_deck());
        let top = working.last().unwrap().clone();

        // Peers 1 and 2 hand over their keys for a deal to peer 0.
        let key1 = vaults[1].top_decryption_key(0, &[]).unwrap();
        let key2 = vaults[2].top_decryption_key(0, &[]).unwrap();
        let card = vaults[0]
            .receive_card(vec![None, Some(key1), Some(key2)])
            .unwrap();
        assert_eq!(vaults[0].cards(), vec![card]);
        assert_eq!(
            vaults[1].given_out.get(&top),
            Some(&GiveTarget::Player(0))
        );
    }

    #[test]
    fn top_key_is_never_given_twice() {
        let mut vaults = three_vaults();
        run_shuffle(&mut vaults, &cards::full_deck());
        let first = vaults[1].top_decryption_key(0, &[]).unwrap();
        // Rewind the mirror to simulate a replayed request for the same card.
        let ct = vaults[1].given_out.keys().next().unwrap().clone();
        vaults[1].deck_stack.push(ct);
        let err = vaults[1].top_decryption_key(2, &[]).unwrap_err();
        assert!(matches!(err, VaultError::CardAlreadyGiven));
        let _ = first;
    }

    #[test]
    fn refuses_self_deal_and_bad_first_discard() {
        let mut vaults = three_vaults();
        run_shuffle(&mut vaults, &cards::full_deck());
        assert!(matches!(
            vaults[1].top_decryption_key(1, &[]),
            Err(VaultError::SelfDeal)
        ));
        // A non-wild-draw-four discard forbids a first-discard pop.
        assert!(matches!(
            vaults[1].top_decryption_key(-1, &[Card::new(5).unwrap()]),
            Err(VaultError::FirstDiscardNotAllowed)
        ));
        // Buried wild-draw-fours are the one legitimate case.
        assert!(vaults[1]
            .top_decryption_key(-1, &[Card::new(104).unwrap()])
            .is_ok());
    }

    #[test]
    fn receive_rejects_prefilled_own_slot() {
        let mut vaults = three_vaults();
        run_shuffle(&mut vaults, &cards::full_deck());
        let key1 = vaults[1].top_decryption_key(0, &[]).unwrap();
        let err = vaults[0]
            .receive_card(vec![Some(key1.clone()), Some(key1), None])
            .unwrap_err();
        assert!(matches!(err, VaultError::OwnKeySlotFilled));
    }

    #[test]
    fn hand_end_audit_accepts_honest_table_and_catches_spoof() {
        let mut vaults = three_vaults();
        let deck = cards::full_deck();
        run_shuffle(&mut vaults, &deck);

        // Deal one card to peer 0 and one to peer 1.
        let k1 = vaults[1].top_decryption_key(0, &[]).unwrap();
        let k2 = vaults[2].top_decryption_key(0, &[]).unwrap();
        let card0 = vaults[0].receive_card(vec![None, Some(k1), Some(k2)]).unwrap();
        let k0 = vaults[0].top_decryption_key(1, &[]).unwrap();
        let k2b = vaults[2].top_decryption_key(1, &[]).unwrap();
        let card1 = vaults[1].receive_card(vec![Some(k0), None, Some(k2b)]).unwrap();

        let claimed_deck = vaults[2].deck_stack.clone();
        let reveals: Vec<(Vec<BigUint>, Vec<Card>, Vec<(BigUint, BigUint)>)> = vaults
            .iter()
            .map(|v| {
                let (hand, keys) = v.hand_end_reveal(&claimed_deck).unwrap();
                (
                    hand.iter().map(|h| h.ciphertext.clone()).collect(),
                    hand.iter().map(|h| h.card).collect(),
                    keys,
                )
            })
            .collect();

        // Peer 2 holds nothing, peer 0 and 1 hold one card each; peer 2 won
        // nothing so call peer 2 the winner for score accounting.
        let score = card0.score() + card1.score();
        vaults[2]
            .hand_end_verify(&reveals, 2, score, &[])
            .unwrap();

        // A spoofed reveal claiming peer 1's card as peer 0's is rejected.
        let mut spoofed = reveals.clone();
        let stolen_ct = spoofed[1].0[0].clone();
        let stolen_card = spoofed[1].1[0];
        spoofed[1].0.clear();
        spoofed[1].1.clear();
        spoofed[0].0.push(stolen_ct);
        spoofed[0].1.push(stolen_card);
        let err = vaults[2]
            .hand_end_verify(&spoofed, 2, score, &[])
            .unwrap_err();
        assert!(matches!(err, VaultError::HolderMismatch));
    }
}
