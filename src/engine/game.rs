//! The game state machine: hands in sequence, score accumulation, dealer
//! rotation, and termination at the winning score.

use std::sync::Arc;

use tracing::info;

use super::events::{EventKind, GameEvent, HandComplete};
use super::hand::Hand;
use super::{DeckFactory, EventSink, GameError, GameRules, OneLeftReceiver, Player};

const LOG_TARGET: &str = "one_left::engine::game";

pub struct Game {
    players: Vec<Arc<dyn Player>>,
    factory: Arc<dyn DeckFactory>,
    sink: Arc<dyn EventSink>,
    rules: GameRules,
}

#[derive(Clone, Debug)]
pub struct GameComplete {
    pub player_scores: Vec<u32>,
}

impl Game {
    pub fn new(
        players: Vec<Arc<dyn Player>>,
        factory: Arc<dyn DeckFactory>,
        sink: Arc<dyn EventSink>,
        rules: GameRules,
    ) -> Self {
        Self {
            players,
            factory,
            sink,
            rules,
        }
    }

    pub async fn play(
        &mut self,
        initial_dealer_index: usize,
        one_left_calls: &mut OneLeftReceiver,
    ) -> Result<GameComplete, GameError> {
        let n = self.players.len();
        if n < 2 {
            return Err(GameError::msg("a game needs at least two players"));
        }
        let mut dealer_index = initial_dealer_index % n;
        let mut scores = vec![0u32; n];
        self.send_bare_event(EventKind::GameStart, &scores, dealer_index)
            .await?;
        loop {
            let deck = self
                .factory
                .new_deck(dealer_index)
                .await
                .map_err(|e| GameError::wrap("failed creating deck", e))?;
            let hand = Hand::new(
                &self.players,
                self.sink.as_ref(),
                &scores,
                dealer_index,
                self.rules,
                deck,
                one_left_calls,
            );
            let outcome = hand.play().await?;
            scores[outcome.winner_index] += outcome.score;
            info!(
                target: LOG_TARGET,
                winner = outcome.winner_index,
                score = outcome.score,
                total = scores[outcome.winner_index],
                "hand complete"
            );
            let event = GameEvent {
                kind: EventKind::HandEnd,
                player_scores: scores.clone(),
                dealer_index,
                hand: Some(outcome.final_state.clone()),
                hand_complete: Some(HandComplete {
                    winner_index: outcome.winner_index,
                    score: outcome.score,
                    deck_cards: outcome.reveal.deck_cards.clone(),
                    player_cards: outcome.reveal.player_cards.clone(),
                }),
            };
            self.sink
                .on_event(&event)
                .await
                .map_err(|e| GameError::wrap("failed sending hand end event", e))?;
            if scores[outcome.winner_index] >= self.rules.winning_score {
                break;
            }
            dealer_index = (dealer_index + 1) % n;
        }
        self.send_bare_event(EventKind::GameEnd, &scores, dealer_index)
            .await?;
        Ok(GameComplete {
            player_scores: scores,
        })
    }

    async fn send_bare_event(
        &self,
        kind: EventKind,
        scores: &[u32],
        dealer_index: usize,
    ) -> Result<(), GameError> {
        let event = GameEvent {
            kind,
            player_scores: scores.to_vec(),
            dealer_index,
            hand: None,
            hand_complete: None,
        };
        self.sink
            .on_event(&event)
            .await
            .map_err(|e| GameError::wrap(format!("failed sending event {kind:?}"), e))
    }
}
