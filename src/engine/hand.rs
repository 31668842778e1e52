//! The hand state machine: dealing, first discard, the turn loop with its
//! action-card effects and wild-draw-four challenges, reshuffles, and the
//! one-left race window.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::cards::{Card, CardColor, CardValue};

use super::events::{EventKind, GameEvent, HandState};
use super::{
    CardDeck, EventSink, GameError, GameRules, HandReveal, OneLeftCall, OneLeftReceiver, Player,
    PlayerPlay,
};

const LOG_TARGET: &str = "one_left::engine::hand";

#[derive(Debug)]
pub(crate) struct HandOutcome {
    pub winner_index: usize,
    pub score: u32,
    pub reveal: HandReveal,
    pub final_state: HandState,
}

/// A one-left call that survived the window rules; its penalty (if any) is
/// applied once the in-flight play resolves, so the drawing peer is never
/// asked for two RPCs at once.
struct AcceptedCall {
    penalty_drawer: Option<usize>,
}

pub(crate) struct Hand<'g> {
    players: &'g [Arc<dyn Player>],
    sink: &'g dyn EventSink,
    scores: &'g [u32],
    dealer_index: usize,
    rules: GameRules,
    deck: Box<dyn CardDeck>,
    one_left_calls: &'g mut OneLeftReceiver,
    calls_open: bool,

    player_index: usize,
    discard: Vec<Card>,
    last_wild_color: Option<CardColor>,
    forward: bool,
    one_left_target: Option<usize>,
    one_left_callers: HashSet<usize>,
    accepted_call: Option<AcceptedCall>,
}

enum Raced {
    Play(Result<PlayerPlay, GameError>),
    Call(Option<OneLeftCall>),
}

impl<'g> Hand<'g> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        players: &'g [Arc<dyn Player>],
        sink: &'g dyn EventSink,
        scores: &'g [u32],
        dealer_index: usize,
        rules: GameRules,
        deck: Box<dyn CardDeck>,
        one_left_calls: &'g mut OneLeftReceiver,
    ) -> Self {
        Self {
            players,
            sink,
            scores,
            dealer_index,
            rules,
            deck,
            one_left_calls,
            calls_open: true,
            player_index: dealer_index,
            discard: Vec::new(),
            last_wild_color: None,
            forward: true,
            one_left_target: None,
            one_left_callers: HashSet::new(),
            accepted_call: None,
        }
    }

    pub(crate) async fn play(mut self) -> Result<HandOutcome, GameError> {
        self.shuffle_and_deal().await?;
        self.create_discard_with_first_card().await?;
        loop {
            self.move_next();
            let mut play = match self.await_play().await {
                Ok(play) => play,
                Err(err) => {
                    return Err(GameError::blamed_wrap(
                        self.player_index,
                        "failure to play",
                        err,
                    ))
                }
            };
            if play.card.is_none() {
                // A pass costs a draw, then the player gets one more try.
                self.resolve_accepted_call().await?;
                self.draw_to(self.player_index, 1).await?;
                self.send_event(EventKind::HandPlayerDrewOne).await?;
                play = match self.await_play().await {
                    Ok(play) => play,
                    Err(err) => {
                        return Err(GameError::blamed_wrap(
                            self.player_index,
                            "failure to play",
                            err,
                        ))
                    }
                };
            }
            self.resolve_accepted_call().await?;
            self.close_one_left_window();
            if let Err(err) = play.validate() {
                return Err(GameError::blamed_wrap(
                    self.player_index,
                    "invalid play",
                    err,
                ));
            }
            match play.card {
                None => self.send_event(EventKind::HandPlayerPlayedNothing).await?,
                Some(card) => self.process_discard(card, play.wild_color).await?,
            }
            if let Some(outcome) = self.check_complete().await? {
                return Ok(outcome);
            }
        }
    }

    async fn shuffle_and_deal(&mut self) -> Result<(), GameError> {
        self.deck
            .shuffle(None)
            .await
            .map_err(|e| GameError::wrap("failed shuffling", e))?;
        self.send_event(EventKind::HandStartShuffled).await?;
        for _ in 0..self.rules.starting_hand_size {
            for _ in 0..self.players.len() {
                self.move_next();
                self.draw_to(self.player_index, 1).await?;
                self.send_event(EventKind::HandStartCardDealt).await?;
            }
        }
        Ok(())
    }

    async fn create_discard_with_first_card(&mut self) -> Result<(), GameError> {
        loop {
            let top = self
                .deck
                .pop_for_first_discard()
                .await
                .map_err(|e| GameError::wrap("unable to put top deck card on discard pile", e))?;
            self.discard.push(top);
            // Action cards take effect before the first player acts.
            match top.value() {
                CardValue::Skip => {
                    self.send_event(EventKind::HandStartTopCardAddedToDiscard)
                        .await?;
                    self.move_next();
                    self.send_event(EventKind::HandPlayerSkipped).await?;
                }
                CardValue::DrawTwo => {
                    self.send_event(EventKind::HandStartTopCardAddedToDiscard)
                        .await?;
                    self.move_next();
                    self.draw_to(self.player_index, 2).await?;
                    self.send_event(EventKind::HandPlayerDrewTwo).await?;
                }
                CardValue::Reverse => {
                    self.send_event(EventKind::HandStartTopCardAddedToDiscard)
                        .await?;
                    self.forward = !self.forward;
                    if self.players.len() == 2 {
                        self.move_next();
                    }
                    self.send_event(EventKind::HandPlayReversed).await?;
                }
                CardValue::Wild => {
                    // The first player to act declares the color.
                    let chooser = self.peek_next_index();
                    let color = self.players[chooser]
                        .choose_color_for_first_wild()
                        .await
                        .map_err(|e| {
                            GameError::blamed_wrap(
                                chooser,
                                "failure to get color for first wild",
                                e,
                            )
                        })?;
                    self.last_wild_color = Some(color);
                    self.send_event(EventKind::HandStartTopCardAddedToDiscard)
                        .await?;
                }
                CardValue::WildDrawFour => {
                    // Stays buried in the discard; draw another up-card.
                    self.send_event(EventKind::HandStartTopCardAddedToDiscard)
                        .await?;
                    continue;
                }
                CardValue::Digit(_) => {
                    self.send_event(EventKind::HandStartTopCardAddedToDiscard)
                        .await?;
                }
            }
            return Ok(());
        }
    }

    /// Wait for the current player's play while racing one-left calls.
    async fn await_play(&mut self) -> Result<PlayerPlay, GameError> {
        let player = Arc::clone(&self.players[self.player_index]);
        let mut play_fut = Box::pin(async move { player.play().await });
        loop {
            if !self.calls_open {
                return play_fut.await;
            }
            let raced = tokio::select! {
                result = &mut play_fut => Raced::Play(result),
                call = self.one_left_calls.recv() => Raced::Call(call),
            };
            match raced {
                Raced::Play(result) => return result,
                Raced::Call(Some(call)) => self.note_one_left_call(call),
                Raced::Call(None) => self.calls_open = false,
            }
        }
    }

    fn note_one_left_call(&mut self, call: OneLeftCall) {
        let Some(holder) = self.one_left_target else {
            return;
        };
        if call.caller >= self.players.len() || call.target >= self.players.len() {
            return;
        }
        // One submission per peer per window.
        if !self.one_left_callers.insert(call.caller) {
            return;
        }
        debug!(
            target: LOG_TARGET,
            caller = call.caller,
            target = call.target,
            holder,
            "one-left call"
        );
        let accepted = if call.caller == holder && call.target == holder {
            // Self-declaration; harmless.
            Some(AcceptedCall {
                penalty_drawer: None,
            })
        } else if call.target == holder {
            // Caught the one-left holder.
            Some(AcceptedCall {
                penalty_drawer: Some(holder),
            })
        } else if call.caller == call.target && self.players[call.caller].cards_remaining() != 1 {
            // Called on themselves without actually being at one card.
            Some(AcceptedCall {
                penalty_drawer: Some(call.caller),
            })
        } else {
            None
        };
        if let Some(accepted) = accepted {
            if self.accepted_call.is_none() {
                self.accepted_call = Some(accepted);
                // Window consumed; later calls this turn are ignored.
                self.one_left_target = None;
            }
        }
    }

    async fn resolve_accepted_call(&mut self) -> Result<(), GameError> {
        if let Some(call) = self.accepted_call.take() {
            self.send_event(EventKind::HandOneLeftCalled).await?;
            if let Some(drawer) = call.penalty_drawer {
                self.draw_to(drawer, 2).await?;
                self.send_event(EventKind::HandPlayerOneLeftPenaltyDrewTwo)
                    .await?;
            }
        }
        Ok(())
    }

    fn close_one_left_window(&mut self) {
        self.one_left_target = None;
        self.one_left_callers.clear();
    }

    fn open_one_left_window(&mut self, holder: usize) {
        self.one_left_target = Some(holder);
        self.one_left_callers.clear();
    }

    async fn process_discard(
        &mut self,
        card: Card,
        wild_color: Option<CardColor>,
    ) -> Result<(), GameError> {
        let top = self.top_card();
        if !card.can_play_on(top, self.last_wild_color) {
            return Err(GameError::blamed(
                self.player_index,
                format!("invalid card, tried to play {card} on {top}"),
            ));
        }
        let discarder = self.player_index;
        self.discard.push(card);
        self.last_wild_color = wild_color;
        // The race window opens with the discard that leaves one card, so
        // the event announcing it already names the target.
        if self.players[discarder].cards_remaining() == 1 {
            self.open_one_left_window(discarder);
        }
        self.send_event(EventKind::HandPlayerDiscarded).await?;
        match card.value() {
            CardValue::Skip => {
                self.move_next();
                self.send_event(EventKind::HandPlayerSkipped).await?;
            }
            CardValue::Reverse => {
                self.forward = !self.forward;
                if self.players.len() == 2 {
                    // Heads-up, a reverse plays like a skip.
                    self.move_next();
                }
                self.send_event(EventKind::HandPlayReversed).await?;
            }
            CardValue::DrawTwo => {
                self.move_next();
                self.draw_to(self.player_index, 2).await?;
                self.send_event(EventKind::HandPlayerDrewTwo).await?;
            }
            CardValue::WildDrawFour => {
                self.resolve_wild_draw_four().await?;
            }
            CardValue::Wild | CardValue::Digit(_) => {}
        }
        // A successful challenge hands the discarder four cards back and
        // cancels the window its discard opened.
        if self.one_left_target == Some(discarder)
            && self.players[discarder].cards_remaining() != 1
        {
            self.close_one_left_window();
        }
        Ok(())
    }

    async fn resolve_wild_draw_four(&mut self) -> Result<(), GameError> {
        let next = self.peek_next_index();
        let challenge = match self.players[next].should_challenge_wild_draw_four().await {
            Ok(challenge) => challenge,
            Err(err) => {
                self.move_next();
                return Err(GameError::blamed_wrap(
                    next,
                    "failed checking draw four challenge",
                    err,
                ));
            }
        };
        if !challenge {
            self.move_next();
            self.draw_to(self.player_index, 4).await?;
            self.send_event(EventKind::HandPlayerNoChallengeDrewFour)
                .await?;
            return Ok(());
        }
        let success = self.players[self.player_index]
            .challenged_wild_draw_four(next)
            .await
            .map_err(|e| {
                GameError::blamed_wrap(self.player_index, "failure during challenge", e)
            })?;
        if success {
            // The player who overplayed the wild-draw-four takes the cards;
            // the turn still advances once, to the challenger.
            self.draw_to(self.player_index, 4).await?;
            self.send_event(EventKind::HandPlayerChallengeSuccessDrewFour)
                .await?;
        } else {
            self.move_next();
            self.draw_to(self.player_index, 6).await?;
            self.send_event(EventKind::HandPlayerChallengeFailedDrewSix)
                .await?;
        }
        Ok(())
    }

    async fn draw_to(&mut self, player_index: usize, amount: usize) -> Result<(), GameError> {
        for _ in 0..amount {
            if self.deck.cards_remaining() == 0 {
                if self.discard.len() <= 1 {
                    return Err(GameError::msg(
                        "draw pile empty and no discard left to reshuffle",
                    ));
                }
                let keep = *self.discard.last().expect("discard checked non-empty");
                let back = self.discard[..self.discard.len() - 1].to_vec();
                self.deck
                    .shuffle(Some(back))
                    .await
                    .map_err(|e| GameError::wrap("failed reshuffling", e))?;
                self.discard = vec![keep];
                self.send_event(EventKind::HandReshuffled).await?;
            }
            self.deck
                .deal_to(player_index)
                .await
                .map_err(|e| GameError::blamed_wrap(player_index, "failed dealing", e))?;
        }
        Ok(())
    }

    fn step(&self, from: usize) -> usize {
        let n = self.players.len();
        if self.forward {
            (from + 1) % n
        } else {
            (from + n - 1) % n
        }
    }

    fn move_next(&mut self) {
        self.player_index = self.step(self.player_index);
    }

    fn peek_next_index(&self) -> usize {
        self.step(self.player_index)
    }

    fn top_card(&self) -> Card {
        *self.discard.last().expect("discard is never empty in play")
    }

    async fn check_complete(&mut self) -> Result<Option<HandOutcome>, GameError> {
        let Some(winner_index) = self
            .players
            .iter()
            .position(|p| p.cards_remaining() == 0)
        else {
            return Ok(None);
        };
        let reveal = self
            .deck
            .complete_hand(&self.discard)
            .await
            .map_err(|e| GameError::wrap("failed revealing deck", e))?;
        let score = reveal
            .player_cards
            .iter()
            .flatten()
            .map(|c| c.score())
            .sum();
        Ok(Some(HandOutcome {
            winner_index,
            score,
            final_state: self.snapshot(),
            reveal,
        }))
    }

    pub(crate) fn snapshot(&self) -> HandState {
        HandState {
            player_index: self.player_index,
            player_cards_remaining: self.players.iter().map(|p| p.cards_remaining()).collect(),
            deck_cards_remaining: self.deck.cards_remaining(),
            discard_stack: self.discard.clone(),
            last_wild_color: self.last_wild_color,
            forward: self.forward,
            one_left_target: self.one_left_target,
        }
    }

    async fn send_event(&self, kind: EventKind) -> Result<(), GameError> {
        let event = GameEvent {
            kind,
            player_scores: self.scores.to_vec(),
            dealer_index: self.dealer_index,
            hand: Some(self.snapshot()),
            hand_complete: None,
        };
        self.sink
            .on_event(&event)
            .await
            .map_err(|e| GameError::wrap(format!("failed sending event {kind:?}"), e))
    }
}
