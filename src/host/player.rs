//! Engine `Player` adapter speaking RPC to one seated peer.

use std::sync::Arc;

use async_trait::async_trait;
use num_bigint::BigUint;

use crate::cards::CardColor;
use crate::crypto::encoding::BigNum;
use crate::engine::{GameError, Player, PlayerPlay};
use crate::protocol::requests::{
    ChooseColorRequest, PlayRequest, RevealCardsRequest, RevealedCardsRequest,
    ShouldChallengeRequest,
};

use super::deck::DeckSlot;
use super::{Roster, SharedCounters, SharedEventLog};

pub struct HostPlayer {
    pub index: usize,
    pub roster: Roster,
    pub deck_slot: DeckSlot,
    pub counters: SharedCounters,
    pub event_log: SharedEventLog,
}

impl HostPlayer {
    fn client(&self) -> &Arc<super::ClientHandle> {
        &self.roster[self.index].client
    }

    /// The effective color a just-played wild-draw-four was played onto.
    fn challenge_color(&self) -> Result<CardColor, GameError> {
        self.event_log
            .read()
            .color_before_last_discard
            .ok_or_else(|| GameError::msg("no discard color on record for challenge"))
    }
}

#[async_trait]
impl Player for HostPlayer {
    fn cards_remaining(&self) -> usize {
        self.counters.lock().card_counts[self.index]
    }

    async fn choose_color_for_first_wild(&self) -> Result<CardColor, GameError> {
        let resp = self
            .client()
            .choose_color_since_first_card_is_wild(ChooseColorRequest {})
            .await
            .map_err(|e| GameError::wrap("choose color rpc failed", e))?;
        Ok(resp.color)
    }

    async fn play(&self) -> Result<PlayerPlay, GameError> {
        let resp = self
            .client()
            .play(PlayRequest {})
            .await
            .map_err(|e| GameError::wrap("play rpc failed", e))?;
        let Some(played) = resp.play else {
            return Ok(PlayerPlay::pass());
        };
        let ciphertext = played.encrypted_card.into_uint();
        let keys: Vec<BigUint> = played
            .decryption_keys
            .into_iter()
            .map(BigNum::into_uint)
            .collect();
        let mut slot = self.deck_slot.lock().await;
        let deck = slot
            .as_mut()
            .ok_or_else(|| GameError::msg("no active hand deck"))?;
        let card = deck.validate_play(self.index, &ciphertext, &keys)?;
        Ok(PlayerPlay {
            card: Some(card),
            wild_color: played.wild_color,
        })
    }

    async fn should_challenge_wild_draw_four(&self) -> Result<bool, GameError> {
        let prev_color = self.challenge_color()?;
        let resp = self
            .client()
            .should_challenge_wild_draw_four(ShouldChallengeRequest { prev_color })
            .await
            .map_err(|e| GameError::wrap("challenge decision rpc failed", e))?;
        Ok(resp.challenge)
    }

    async fn challenged_wild_draw_four(&self, challenger_index: usize) -> Result<bool, GameError> {
        let prev_color = self.challenge_color()?;
        // This player reveals its cards over the challenge side channel.
        let mine = self
            .client()
            .reveal_cards_for_challenge(RevealCardsRequest {
                challenger_index: challenger_index as u32,
                prev_color,
            })
            .await
            .map_err(|e| GameError::wrap("challenge reveal rpc failed", e))?;
        // The challenger inspects them and reaches its own verdict.
        let theirs = self.roster[challenger_index]
            .client
            .revealed_cards_for_challenge(RevealedCardsRequest {
                encrypted_cards: mine.encrypted_cards.clone(),
                decryption_keys: mine.decryption_keys.clone(),
                challenge_will_succeed: mine.challenge_will_succeed,
            })
            .await
            .map_err(|e| {
                GameError::blamed_wrap(challenger_index, "challenge verification rpc failed", e)
            })?;
        // The two must agree on the outcome; the host cannot break ties
        // without seeing cards it has no right to.
        if theirs.challenge_succeeded != mine.challenge_will_succeed {
            return Err(GameError::msg(format!(
                "challenger says challenge success is {} but challengee says {}",
                theirs.challenge_succeeded, mine.challenge_will_succeed
            )));
        }
        Ok(theirs.challenge_succeeded)
    }
}
