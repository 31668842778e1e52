//! Event stream emitted by the game task. All clients observe the same
//! sequence; each event carries enough state for a spectator to render the
//! table without history.

use serde::{Deserialize, Serialize};

use crate::cards::{Card, CardColor};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    GameStart,
    GameEnd,
    HandStartShuffled,
    HandStartCardDealt,
    /// May repeat while wild-draw-fours keep surfacing.
    HandStartTopCardAddedToDiscard,
    HandReshuffled,
    HandPlayerSkipped,
    HandPlayerDrewTwo,
    HandPlayReversed,
    HandPlayerDrewOne,
    HandPlayerPlayedNothing,
    HandPlayerDiscarded,
    HandPlayerNoChallengeDrewFour,
    HandPlayerChallengeSuccessDrewFour,
    HandPlayerChallengeFailedDrewSix,
    HandOneLeftCalled,
    HandPlayerOneLeftPenaltyDrewTwo,
    HandEnd,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameEvent {
    pub kind: EventKind,
    pub player_scores: Vec<u32>,
    pub dealer_index: usize,
    pub hand: Option<HandState>,
    pub hand_complete: Option<HandComplete>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HandState {
    pub player_index: usize,
    pub player_cards_remaining: Vec<usize>,
    pub deck_cards_remaining: usize,
    pub discard_stack: Vec<Card>,
    /// Only meaningful while the top of the discard is wild.
    pub last_wild_color: Option<CardColor>,
    pub forward: bool,
    pub one_left_target: Option<usize>,
}

impl HandState {
    pub fn top_discard(&self) -> Option<Card> {
        self.discard_stack.last().copied()
    }

    /// The color the next play must match: the declared wild color when the
    /// top card is wild, its printed color otherwise.
    pub fn effective_color(&self) -> Option<CardColor> {
        let top = self.top_discard()?;
        if top.is_wild() {
            self.last_wild_color
        } else {
            top.color()
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HandComplete {
    pub winner_index: usize,
    pub score: u32,
    pub deck_cards: Vec<Card>,
    pub player_cards: Vec<Vec<Card>>,
}
