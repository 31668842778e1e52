//! In-process players and decks for exercising the state machines without
//! the trustless protocol underneath.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::cards::{self, Card, CardColor};

use super::events::{EventKind, GameEvent};
use super::hand::Hand;
use super::{
    one_left_channel, CardDeck, DeckFactory, EventSink, Game, GameError, GameRules, HandReveal,
    OneLeftCall, Player, PlayerPlay,
};

/// Table state shared by every practical player in a hand, mirroring what a
/// real player would track from the event stream.
#[derive(Default)]
struct TableState {
    top_discard: Option<Card>,
    wild_color: Option<CardColor>,
}

/// Plays the first legal card, preferring non-wilds; never challenges.
struct PracticalPlayer {
    table: Arc<Mutex<TableState>>,
    cards: Mutex<Vec<Card>>,
}

impl PracticalPlayer {
    fn most_popular_color(cards: &[Card]) -> CardColor {
        let mut best = CardColor::Red;
        let mut best_count = 0usize;
        for color in CardColor::ALL {
            let count = cards.iter().filter(|c| c.color() == Some(color)).count();
            if count > best_count {
                best_count = count;
                best = color;
            }
        }
        best
    }
}

#[async_trait]
impl Player for PracticalPlayer {
    fn cards_remaining(&self) -> usize {
        self.cards.lock().len()
    }

    async fn choose_color_for_first_wild(&self) -> Result<CardColor, GameError> {
        let color = Self::most_popular_color(&self.cards.lock());
        self.table.lock().wild_color = Some(color);
        Ok(color)
    }

    async fn play(&self) -> Result<PlayerPlay, GameError> {
        let mut cards = self.cards.lock();
        let mut table = self.table.lock();
        let top = table.top_discard.expect("table has a discard");
        if let Some(pos) = cards
            .iter()
            .position(|c| !c.is_wild() && c.can_play_on(top, table.wild_color))
        {
            let card = cards.remove(pos);
            table.top_discard = Some(card);
            table.wild_color = None;
            return Ok(PlayerPlay {
                card: Some(card),
                wild_color: None,
            });
        }
        if let Some(pos) = cards.iter().position(|c| c.is_wild()) {
            let card = cards.remove(pos);
            let color = Self::most_popular_color(&cards);
            table.top_discard = Some(card);
            table.wild_color = Some(color);
            return Ok(PlayerPlay {
                card: Some(card),
                wild_color: Some(color),
            });
        }
        Ok(PlayerPlay::pass())
    }

    async fn should_challenge_wild_draw_four(&self) -> Result<bool, GameError> {
        Ok(false)
    }

    async fn challenged_wild_draw_four(&self, _challenger_index: usize) -> Result<bool, GameError> {
        Ok(false)
    }
}

struct SimpleDeck {
    rng: StdRng,
    cards: Vec<Card>,
    table: Arc<Mutex<TableState>>,
    players: Vec<Arc<PracticalPlayer>>,
}

#[async_trait]
impl CardDeck for SimpleDeck {
    fn cards_remaining(&self) -> usize {
        self.cards.len()
    }

    async fn shuffle(&mut self, cards: Option<Vec<Card>>) -> Result<(), GameError> {
        self.cards = cards.unwrap_or_else(cards::full_deck);
        self.cards.shuffle(&mut self.rng);
        Ok(())
    }

    async fn deal_to(&mut self, player_index: usize) -> Result<(), GameError> {
        let card = self
            .cards
            .pop()
            .ok_or_else(|| GameError::msg("deck underflow"))?;
        self.players[player_index].cards.lock().push(card);
        Ok(())
    }

    async fn pop_for_first_discard(&mut self) -> Result<Card, GameError> {
        let card = self
            .cards
            .pop()
            .ok_or_else(|| GameError::msg("deck underflow"))?;
        self.table.lock().top_discard = Some(card);
        Ok(card)
    }

    async fn complete_hand(&mut self, _discard: &[Card]) -> Result<HandReveal, GameError> {
        Ok(HandReveal {
            deck_cards: self.cards.clone(),
            player_cards: self
                .players
                .iter()
                .map(|p| p.cards.lock().clone())
                .collect(),
        })
    }
}

struct SimpleDeckFactory {
    seed: Mutex<u64>,
    table: Arc<Mutex<TableState>>,
    players: Vec<Arc<PracticalPlayer>>,
}

#[async_trait]
impl DeckFactory for SimpleDeckFactory {
    async fn new_deck(&self, _dealer_index: usize) -> Result<Box<dyn CardDeck>, GameError> {
        let mut seed = self.seed.lock();
        *seed += 1;
        Ok(Box::new(SimpleDeck {
            rng: StdRng::seed_from_u64(*seed),
            cards: Vec::new(),
            table: Arc::clone(&self.table),
            players: self.players.clone(),
        }))
    }
}

#[derive(Default)]
struct CollectSink {
    events: Mutex<Vec<GameEvent>>,
}

#[async_trait]
impl EventSink for CollectSink {
    async fn on_event(&self, event: &GameEvent) -> Result<(), GameError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Scripted player for turn-order scenarios: plays from a queue and keeps a
/// hand count the way a protocol adapter would.
struct ScriptPlayer {
    index: usize,
    count: Arc<Mutex<Vec<usize>>>,
    plays: Mutex<VecDeque<PlayerPlay>>,
    play_log: Arc<Mutex<Vec<usize>>>,
    play_delay: Option<Duration>,
}

#[async_trait]
impl Player for ScriptPlayer {
    fn cards_remaining(&self) -> usize {
        self.count.lock()[self.index]
    }

    async fn choose_color_for_first_wild(&self) -> Result<CardColor, GameError> {
        Ok(CardColor::Red)
    }

    async fn play(&self) -> Result<PlayerPlay, GameError> {
        if let Some(delay) = self.play_delay {
            tokio::time::sleep(delay).await;
        }
        self.play_log.lock().push(self.index);
        let play = self
            .plays
            .lock()
            .pop_front()
            .ok_or_else(|| GameError::msg("script exhausted"))?;
        if play.card.is_some() {
            self.count.lock()[self.index] -= 1;
        }
        Ok(play)
    }

    async fn should_challenge_wild_draw_four(&self) -> Result<bool, GameError> {
        Ok(false)
    }

    async fn challenged_wild_draw_four(&self, _challenger_index: usize) -> Result<bool, GameError> {
        Ok(false)
    }
}

/// Deck whose first discard is scripted and that only tracks counts.
struct ScriptDeck {
    remaining: usize,
    first_discards: VecDeque<Card>,
    count: Arc<Mutex<Vec<usize>>>,
}

#[async_trait]
impl CardDeck for ScriptDeck {
    fn cards_remaining(&self) -> usize {
        self.remaining
    }

    async fn shuffle(&mut self, cards: Option<Vec<Card>>) -> Result<(), GameError> {
        self.remaining = cards.map_or(cards::DECK_SIZE, |c| c.len());
        Ok(())
    }

    async fn deal_to(&mut self, player_index: usize) -> Result<(), GameError> {
        if self.remaining == 0 {
            return Err(GameError::msg("deck underflow"));
        }
        self.remaining -= 1;
        self.count.lock()[player_index] += 1;
        Ok(())
    }

    async fn pop_for_first_discard(&mut self) -> Result<Card, GameError> {
        self.remaining -= 1;
        self.first_discards
            .pop_front()
            .ok_or_else(|| GameError::msg("no scripted first discard"))
    }

    async fn complete_hand(&mut self, _discard: &[Card]) -> Result<HandReveal, GameError> {
        Ok(HandReveal {
            deck_cards: Vec::new(),
            player_cards: self.count.lock().iter().map(|_| Vec::new()).collect(),
        })
    }
}

struct Scenario {
    players: Vec<Arc<dyn Player>>,
    count: Arc<Mutex<Vec<usize>>>,
    play_log: Arc<Mutex<Vec<usize>>>,
    sink: Arc<CollectSink>,
}

fn scenario(scripts: Vec<Vec<PlayerPlay>>, delays: Vec<Option<Duration>>) -> Scenario {
    let n = scripts.len();
    let count = Arc::new(Mutex::new(vec![0usize; n]));
    let play_log = Arc::new(Mutex::new(Vec::new()));
    let players: Vec<Arc<dyn Player>> = scripts
        .into_iter()
        .zip(delays)
        .enumerate()
        .map(|(index, (plays, play_delay))| {
            Arc::new(ScriptPlayer {
                index,
                count: Arc::clone(&count),
                plays: Mutex::new(plays.into()),
                play_log: Arc::clone(&play_log),
                play_delay,
            }) as Arc<dyn Player>
        })
        .collect();
    Scenario {
        players,
        count,
        play_log,
        sink: Arc::new(CollectSink::default()),
    }
}

fn played(card_id: u8) -> PlayerPlay {
    let card = Card::new(card_id).unwrap();
    PlayerPlay {
        card: Some(card),
        wild_color: card.is_wild().then_some(CardColor::Red),
    }
}

async fn run_scenario(
    sc: &Scenario,
    dealer_index: usize,
    first_discards: Vec<u8>,
) -> Result<(), GameError> {
    let deck = Box::new(ScriptDeck {
        remaining: 0,
        first_discards: first_discards
            .into_iter()
            .map(|id| Card::new(id).unwrap())
            .collect(),
        count: Arc::clone(&sc.count),
    });
    let scores = vec![0u32; sc.players.len()];
    let (_tx, mut rx) = one_left_channel();
    let hand = Hand::new(
        &sc.players,
        sc.sink.as_ref(),
        &scores,
        dealer_index,
        GameRules::default(),
        deck,
        &mut rx,
    );
    hand.play().await.map(|_| ())
}

#[tokio::test]
async fn draw_two_skips_the_next_player() {
    // Dealer is 3, so player 0 acts first onto a Red-5. Playing Red-DrawTwo
    // makes player 1 draw two and hands the turn to player 2.
    let sc = scenario(
        vec![vec![played(23)], vec![], vec![], vec![]],
        vec![None; 4],
    );
    let err = run_scenario(&sc, 3, vec![5]).await.unwrap_err();
    assert!(err.to_string().contains("failure to play"));
    assert_eq!(*sc.play_log.lock(), vec![0, 2]);
    let counts = sc.count.lock();
    assert_eq!(counts[1], 7 + 2);
    assert_eq!(counts[0], 7 - 1);
}

#[tokio::test]
async fn reverse_heads_up_acts_like_skip() {
    // Roster {A, B}, dealer A: B acts first and plays Red-Reverse; direction
    // flips and B immediately acts again.
    let sc = scenario(vec![vec![], vec![played(21), played(14)]], vec![None; 2]);
    let err = run_scenario(&sc, 0, vec![5]).await.unwrap_err();
    assert!(err.to_string().contains("failure to play"));
    assert_eq!(*sc.play_log.lock(), vec![1, 1, 0]);
}

#[tokio::test]
async fn skip_as_first_up_card_passes_over_first_player() {
    // Dealer 0 over three seats; a Skip up-card means player 1 never acts.
    let sc = scenario(vec![vec![], vec![], vec![]], vec![None; 3]);
    let err = run_scenario(&sc, 0, vec![19]).await.unwrap_err();
    assert!(err.to_string().contains("failure to play"));
    assert_eq!(*sc.play_log.lock(), vec![2]);
}

#[tokio::test]
async fn one_left_catch_draws_two() {
    let mut rules = GameRules::default();
    rules.starting_hand_size = 2;
    // Two seats, dealer 0. B plays down to one card; while A deliberates, A
    // calls one-left on B, who draws two.
    let count = Arc::new(Mutex::new(vec![0usize; 2]));
    let play_log = Arc::new(Mutex::new(Vec::new()));
    let players: Vec<Arc<dyn Player>> = vec![
        Arc::new(ScriptPlayer {
            index: 0,
            count: Arc::clone(&count),
            plays: Mutex::new(VecDeque::from([PlayerPlay::pass()])),
            play_log: Arc::clone(&play_log),
            play_delay: Some(Duration::from_millis(100)),
        }),
        Arc::new(ScriptPlayer {
            index: 1,
            count: Arc::clone(&count),
            plays: Mutex::new(VecDeque::from([played(14)])),
            play_log: Arc::clone(&play_log),
            play_delay: None,
        }),
    ];
    let sink = Arc::new(CollectSink::default());
    let deck = Box::new(ScriptDeck {
        remaining: 0,
        first_discards: VecDeque::from([Card::new(5).unwrap()]),
        count: Arc::clone(&count),
    });
    let scores = vec![0u32; 2];
    let (tx, mut rx) = one_left_channel();
    let caller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(OneLeftCall {
            caller: 0,
            target: 1,
        })
        .await
        .ok();
    });
    let hand = Hand::new(
        &players,
        sink.as_ref(),
        &scores,
        0,
        rules,
        deck,
        &mut rx,
    );
    let err = hand.play().await.unwrap_err();
    caller.await.unwrap();
    assert!(err.to_string().contains("failure to play"));
    assert_eq!(count.lock()[1], 1 + 2, "caught holder draws two");
    let kinds: Vec<EventKind> = sink.events.lock().iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&EventKind::HandOneLeftCalled));
    assert!(kinds.contains(&EventKind::HandPlayerOneLeftPenaltyDrewTwo));
}

#[tokio::test]
async fn full_game_reaches_winning_score() {
    let table = Arc::new(Mutex::new(TableState::default()));
    let players: Vec<Arc<PracticalPlayer>> = (0..4)
        .map(|_| {
            Arc::new(PracticalPlayer {
                table: Arc::clone(&table),
                cards: Mutex::new(Vec::new()),
            })
        })
        .collect();
    let factory = Arc::new(SimpleDeckFactory {
        seed: Mutex::new(7),
        table: Arc::clone(&table),
        players: players.clone(),
    });
    let sink = Arc::new(CollectSink::default());
    let engine_players: Vec<Arc<dyn Player>> = players
        .iter()
        .map(|p| Arc::clone(p) as Arc<dyn Player>)
        .collect();
    let mut game = Game::new(
        engine_players,
        factory,
        Arc::clone(&sink) as Arc<dyn EventSink>,
        GameRules::default(),
    );
    let (_tx, mut rx) = one_left_channel();
    let complete = game.play(0, &mut rx).await.unwrap();
    assert!(complete
        .player_scores
        .iter()
        .any(|&s| s >= GameRules::default().winning_score));

    let events = sink.events.lock();
    assert_eq!(events.first().unwrap().kind, EventKind::GameStart);
    assert_eq!(events.last().unwrap().kind, EventKind::GameEnd);

    // Scores only ever increase.
    let mut prev = vec![0u32; 4];
    for event in events.iter() {
        for (a, b) in prev.iter().zip(&event.player_scores) {
            assert!(b >= a, "scores must be monotonic");
        }
        prev = event.player_scores.clone();
    }

    // Every completed hand accounts for all 108 cards.
    for event in events.iter().filter(|e| e.kind == EventKind::HandEnd) {
        let complete = event.hand_complete.as_ref().unwrap();
        let hand_state = event.hand.as_ref().unwrap();
        let mut all: Vec<Card> = complete.deck_cards.clone();
        all.extend(hand_state.discard_stack.iter().copied());
        for cards in &complete.player_cards {
            all.extend(cards.iter().copied());
        }
        let mut ids: Vec<u8> = all.iter().map(|c| c.id()).collect();
        ids.sort_unstable();
        let expected: Vec<u8> = (0..cards::DECK_SIZE as u8).collect();
        assert_eq!(ids, expected, "hand-end multiset must match the start deck");
    }
}
