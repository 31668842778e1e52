//! The UI oracle: the black box each peer consults for decisions.
//!
//! Notifications have no-op defaults so a decision-only oracle stays small.
//! Calls may block for as long as a human takes; the handler wraps each one
//! in a timeout budget.

use async_trait::async_trait;
use thiserror::Error;

use crate::cards::{Card, CardColor};
use crate::protocol::identity::{ChatMessage, PlayerIdentity};
use crate::protocol::{GameErrorMsg, GameEventMsg};

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("ui failed: {0}")]
    Failed(String),
}

/// What a player sees when asked to act.
#[derive(Clone, Debug)]
pub struct PlayView {
    pub hand: Vec<Card>,
    pub top_discard: Option<Card>,
    /// The color a play must match (declared color when the top is wild).
    pub effective_color: Option<CardColor>,
}

#[async_trait]
pub trait Oracle: Send + Sync {
    async fn connected(
        &self,
        _players: &[PlayerIdentity],
        _chat: &[ChatMessage],
        _last_event: Option<&GameEventMsg>,
    ) {
    }

    async fn players_updated(&self, _players: &[PlayerIdentity]) {}

    async fn chat_message(&self, _message: &ChatMessage) {}

    async fn game_event(&self, _event: &GameEventMsg) {}

    async fn game_error(&self, _error: &GameErrorMsg) {}

    async fn received_card(&self, _card: Card) {}

    /// Declare the color when the first up-card is wild.
    async fn choose_wild_color(&self, view: &PlayView) -> Result<CardColor, OracleError>;

    /// Pick a card to play, or `None` to pass. The color accompanies wilds.
    async fn play(&self, view: &PlayView)
        -> Result<Option<(Card, Option<CardColor>)>, OracleError>;

    async fn should_challenge(
        &self,
        prev_color: CardColor,
        view: &PlayView,
    ) -> Result<bool, OracleError>;

    /// Offered after each event: return a target index to call one-left on.
    fn consider_one_left(&self, _self_index: usize, _event: &GameEventMsg) -> Option<u32> {
        None
    }
}

/// Non-interactive oracle: plays the first legal card, declares its most
/// plentiful color, never challenges, and declares its own one-left
/// immediately to dodge the catch penalty.
pub struct StrategyOracle;

impl StrategyOracle {
    fn most_popular_color(hand: &[Card]) -> CardColor {
        let mut best = CardColor::Red;
        let mut best_count = 0usize;
        for color in CardColor::ALL {
            let count = hand.iter().filter(|c| c.color() == Some(color)).count();
            if count > best_count {
                best_count = count;
                best = color;
            }
        }
        best
    }
}

#[async_trait]
impl Oracle for StrategyOracle {
    async fn choose_wild_color(&self, view: &PlayView) -> Result<CardColor, OracleError> {
        Ok(Self::most_popular_color(&view.hand))
    }

    async fn play(
        &self,
        view: &PlayView,
    ) -> Result<Option<(Card, Option<CardColor>)>, OracleError> {
        let Some(top) = view.top_discard else {
            return Ok(None);
        };
        let playable = |card: &Card| card.can_play_on(top, view.effective_color);
        if let Some(card) = view
            .hand
            .iter()
            .find(|c| !c.is_wild() && playable(c))
            .copied()
        {
            return Ok(Some((card, None)));
        }
        if let Some(card) = view.hand.iter().find(|c| c.is_wild()).copied() {
            let rest: Vec<Card> = view
                .hand
                .iter()
                .copied()
                .filter(|c| *c != card)
                .collect();
            return Ok(Some((card, Some(Self::most_popular_color(&rest)))));
        }
        Ok(None)
    }

    async fn should_challenge(
        &self,
        _prev_color: CardColor,
        _view: &PlayView,
    ) -> Result<bool, OracleError> {
        Ok(false)
    }

    fn consider_one_left(&self, self_index: usize, event: &GameEventMsg) -> Option<u32> {
        let hand = event.hand.as_ref()?;
        let target = hand.one_left_target?;
        (target as usize == self_index).then_some(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn strategy_prefers_non_wilds() {
        let oracle = StrategyOracle;
        let view = PlayView {
            hand: vec![
                Card::new(100).unwrap(), // Wild
                Card::new(7).unwrap(),   // Red-7
            ],
            top_discard: Some(Card::new(5).unwrap()), // Red-5
            effective_color: None,
        };
        let (card, color) = oracle.play(&view).await.unwrap().unwrap();
        assert_eq!(card, Card::new(7).unwrap());
        assert!(color.is_none());
    }

    #[tokio::test]
    async fn strategy_falls_back_to_wild_then_pass() {
        let oracle = StrategyOracle;
        let view = PlayView {
            hand: vec![Card::new(100).unwrap(), Card::new(30).unwrap()], // Wild, Yellow-5
            top_discard: Some(Card::new(53).unwrap()),                   // Green-3
            effective_color: None,
        };
        let (card, color) = oracle.play(&view).await.unwrap().unwrap();
        assert_eq!(card, Card::new(100).unwrap());
        assert_eq!(color, Some(CardColor::Yellow));

        let stuck = PlayView {
            hand: vec![Card::new(30).unwrap()],
            top_discard: Some(Card::new(53).unwrap()),
            effective_color: None,
        };
        assert!(oracle.play(&stuck).await.unwrap().is_none());
    }
}
