//! Game and hand state machines, defined over abstract players and decks so
//! the same rules drive both the trustless protocol and in-process tests.

pub mod errors;
pub mod events;
mod game;
mod hand;

#[cfg(test)]
mod testkit;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::cards::{Card, CardColor};

pub use errors::GameError;
pub use events::{EventKind, GameEvent, HandComplete, HandState};
pub use game::{Game, GameComplete};

/// Rules fixed for the lifetime of a game.
#[derive(Clone, Copy, Debug)]
pub struct GameRules {
    pub winning_score: u32,
    pub starting_hand_size: usize,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            winning_score: 500,
            starting_hand_size: 7,
        }
    }
}

/// A player's answer to a play request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlayerPlay {
    /// `None` is a pass.
    pub card: Option<Card>,
    /// Must be set exactly when the played card is wild.
    pub wild_color: Option<CardColor>,
}

impl PlayerPlay {
    pub fn pass() -> Self {
        Self {
            card: None,
            wild_color: None,
        }
    }

    pub fn validate(&self) -> Result<(), GameError> {
        match self.card {
            None => {
                if self.wild_color.is_some() {
                    return Err(GameError::msg("wild color set on a pass"));
                }
            }
            Some(card) => {
                if card.is_wild() && self.wild_color.is_none() {
                    return Err(GameError::msg("wild card played without a color"));
                }
                if !card.is_wild() && self.wild_color.is_some() {
                    return Err(GameError::msg("wild color set on non-wild card"));
                }
            }
        }
        Ok(())
    }
}

/// A one-left race-window submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OneLeftCall {
    pub caller: usize,
    pub target: usize,
}

pub type OneLeftReceiver = mpsc::Receiver<OneLeftCall>;
pub type OneLeftSender = mpsc::Sender<OneLeftCall>;

pub fn one_left_channel() -> (OneLeftSender, OneLeftReceiver) {
    // Bounded mailbox: one slot per seat is plenty for a race window.
    mpsc::channel(16)
}

#[async_trait]
pub trait Player: Send + Sync {
    fn cards_remaining(&self) -> usize;

    async fn choose_color_for_first_wild(&self) -> Result<CardColor, GameError>;

    async fn play(&self) -> Result<PlayerPlay, GameError>;

    async fn should_challenge_wild_draw_four(&self) -> Result<bool, GameError>;

    /// Resolve a challenge against this player's wild-draw-four. Both sides
    /// must agree on the verdict; disagreement is a protocol violation.
    async fn challenged_wild_draw_four(&self, challenger_index: usize) -> Result<bool, GameError>;
}

/// Everything revealed when a hand completes.
#[derive(Clone, Debug)]
pub struct HandReveal {
    pub deck_cards: Vec<Card>,
    pub player_cards: Vec<Vec<Card>>,
}

#[async_trait]
pub trait CardDeck: Send + Sync {
    fn cards_remaining(&self) -> usize;

    /// `None` shuffles a fresh 108-card deck; `Some` reshuffles the given
    /// cards (the discard minus its top) back into the draw pile.
    async fn shuffle(&mut self, cards: Option<Vec<Card>>) -> Result<(), GameError>;

    async fn deal_to(&mut self, player_index: usize) -> Result<(), GameError>;

    async fn pop_for_first_discard(&mut self) -> Result<Card, GameError>;

    async fn complete_hand(&mut self, discard: &[Card]) -> Result<HandReveal, GameError>;
}

#[async_trait]
pub trait DeckFactory: Send + Sync {
    async fn new_deck(&self, dealer_index: usize) -> Result<Box<dyn CardDeck>, GameError>;
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn on_event(&self, event: &GameEvent) -> Result<(), GameError>;
}
