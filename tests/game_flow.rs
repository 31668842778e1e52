//! End-to-end protocol test: a host and three peers play a complete game
//! over in-memory streams, with every shuffle, deal, play, and audit going
//! through the real trustless protocol.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use one_left::cards::{Card, CardColor};
use one_left::engine::EventKind;
use one_left::host::Host;
use one_left::player::oracle::{Oracle, OracleError, PlayView};
use one_left::player::{PeerRunner, StrategyOracle};
use one_left::protocol::GameEventMsg;
use one_left::signing::IdentityKey;
use one_left::transport::memory_pair;
use one_left::Config;

/// Strategy oracle that also records every event it sees.
struct RecordingOracle {
    inner: StrategyOracle,
    events: Arc<Mutex<Vec<GameEventMsg>>>,
}

#[async_trait]
impl Oracle for RecordingOracle {
    async fn game_event(&self, event: &GameEventMsg) {
        self.events.lock().push(event.clone());
    }

    async fn choose_wild_color(&self, view: &PlayView) -> Result<CardColor, OracleError> {
        self.inner.choose_wild_color(view).await
    }

    async fn play(
        &self,
        view: &PlayView,
    ) -> Result<Option<(Card, Option<CardColor>)>, OracleError> {
        self.inner.play(view).await
    }

    async fn should_challenge(
        &self,
        prev_color: CardColor,
        view: &PlayView,
    ) -> Result<bool, OracleError> {
        self.inner.should_challenge(prev_color, view).await
    }

    fn consider_one_left(&self, self_index: usize, event: &GameEventMsg) -> Option<u32> {
        self.inner.consider_one_left(self_index, event)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn three_peers_play_a_full_game() {
    let cfg = Config {
        // Keep the test quick; the protocol is identical at any target.
        winning_score: 150,
        ..Config::default()
    };
    let host = Host::new(cfg.clone());

    let mut peers = Vec::new();
    let mut event_logs = Vec::new();
    for i in 0..3 {
        let (host_conn, peer_conn) = memory_pair();
        host.attach(host_conn);
        let events = Arc::new(Mutex::new(Vec::new()));
        event_logs.push(Arc::clone(&events));
        let runner = PeerRunner::new(
            peer_conn,
            Arc::new(cfg.clone()),
            IdentityKey::generate(),
            format!("peer-{i}"),
            Arc::new(RecordingOracle {
                inner: StrategyOracle,
                events,
            }),
        );
        peers.push(tokio::spawn(runner.run(true)));
    }

    // Wait for all three joins to settle.
    for _ in 0..200 {
        if host.seated_count() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(host.seated_count(), 3, "all peers should be seated");

    tokio::time::timeout(Duration::from_secs(300), host.play_game())
        .await
        .expect("game timed out")
        .expect("game should complete without protocol errors");

    // Every peer ran to the game-end event.
    for peer in peers {
        tokio::time::timeout(Duration::from_secs(10), peer)
            .await
            .expect("peer timed out")
            .expect("peer task panicked")
            .expect("peer stream should close cleanly");
    }

    for events in &event_logs {
        let events = events.lock();
        assert_eq!(
            events.first().map(|e| e.kind),
            Some(EventKind::GameStart),
            "stream starts with game start"
        );
        assert_eq!(
            events.last().map(|e| e.kind),
            Some(EventKind::GameEnd),
            "stream ends with game end"
        );

        // Scores only ever increase and someone reached the target.
        let mut prev = vec![0u32; 3];
        for event in events.iter() {
            for (before, after) in prev.iter().zip(&event.player_scores) {
                assert!(after >= before, "scores must be monotonic");
            }
            prev = event.player_scores.clone();
        }
        assert!(prev.iter().any(|&s| s >= 150));

        // Every completed hand reconciles to the full 108-card deck.
        for event in events.iter().filter(|e| e.kind == EventKind::HandEnd) {
            let complete = event.hand_complete.as_ref().expect("hand end payload");
            let hand = event.hand.as_ref().expect("hand state");
            let mut ids: Vec<u8> = complete
                .deck_cards
                .iter()
                .chain(hand.discard_stack.iter())
                .chain(complete.player_cards.iter().flatten())
                .map(|c| c.id())
                .collect();
            ids.sort_unstable();
            let expected: Vec<u8> = (0..108).collect();
            assert_eq!(ids, expected, "hand end multiset mismatch");
        }
    }

    // All event streams agree on the order of events.
    let reference: Vec<EventKind> = event_logs[0].lock().iter().map(|e| e.kind).collect();
    for events in &event_logs[1..] {
        let kinds: Vec<EventKind> = events.lock().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, reference, "all peers see the same event order");
    }
}

/// Join a hand-driven raw client: answer the join request and wait until the
/// roster update lists us.
async fn drive_join(
    conn: &mut one_left::transport::PeerConn,
    key: &IdentityKey,
    name: &str,
) {
    use one_left::protocol::requests::{JoinResponse, PlayerRequest, PlayerResponse};
    use one_left::protocol::{ClientMessage, HostMessage, PlayerIdentity};

    conn.tx.send(ClientMessage::StartJoin).await.unwrap();
    loop {
        match tokio::time::timeout(Duration::from_secs(5), conn.rx.recv())
            .await
            .expect("join timed out")
            .expect("stream closed during join")
        {
            HostMessage::PlayerRequest {
                request: PlayerRequest::Join(req),
            } => {
                let player = PlayerIdentity::sign(key, name.to_string(), req.random_nonce);
                conn.tx
                    .send(ClientMessage::PlayerResponse {
                        response: PlayerResponse::Join(JoinResponse { player }),
                    })
                    .await
                    .unwrap();
            }
            HostMessage::PlayersUpdate { players }
                if players.iter().any(|p| p.name == name) =>
            {
                return;
            }
            _ => {}
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn chat_is_verified_stamped_and_relayed() {
    use one_left::protocol::{ChatMessage, ClientMessage, HostMessage};

    let host = Host::new(Config::default());

    let (a_host, mut alice) = memory_pair();
    host.attach(a_host);
    let (b_host, mut bob) = memory_pair();
    host.attach(b_host);

    let alice_key = IdentityKey::generate();
    let bob_key = IdentityKey::generate();
    drive_join(&mut alice, &alice_key, "alice").await;
    drive_join(&mut bob, &bob_key, "bob").await;

    let message = ChatMessage::sign(&alice_key, "alice".into(), 0, "hello table".into());
    alice
        .tx
        .send(ClientMessage::Chat { message })
        .await
        .unwrap();

    // Bob sees the relayed message, verified and host-stamped.
    let relayed = loop {
        match tokio::time::timeout(Duration::from_secs(5), bob.rx.recv())
            .await
            .expect("chat timed out")
            .expect("stream closed")
        {
            HostMessage::ChatMessageAdded { message } => break message,
            _ => {}
        }
    };
    assert_eq!(relayed.contents, "hello table");
    assert!(relayed.host_utc_ms > 0, "host must stamp the message");
    relayed.verify().expect("relayed chat must still verify");

    // A second message with a stale counter terminates the sender.
    let stale = ChatMessage::sign(&alice_key, "alice".into(), 0, "replayed".into());
    alice
        .tx
        .send(ClientMessage::Chat { message: stale })
        .await
        .unwrap();
    let saw_error = loop {
        match tokio::time::timeout(Duration::from_secs(5), alice.rx.recv()).await {
            Err(_) => panic!("expected an error or disconnect"),
            Ok(None) => break true,
            Ok(Some(HostMessage::Error { error })) => {
                assert!(error.message.contains("counter"));
                break true;
            }
            Ok(Some(_)) => {}
        }
    };
    assert!(saw_error);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_name_is_rejected() {
    use one_left::protocol::requests::{JoinResponse, PlayerRequest, PlayerResponse};
    use one_left::protocol::{ClientMessage, HostMessage, PlayerIdentity};

    let host = Host::new(Config::default());

    let (a_host, mut alice) = memory_pair();
    host.attach(a_host);
    drive_join(&mut alice, &IdentityKey::generate(), "alice").await;

    let (b_host, mut impostor) = memory_pair();
    host.attach(b_host);
    impostor.tx.send(ClientMessage::StartJoin).await.unwrap();
    let rejected = loop {
        match tokio::time::timeout(Duration::from_secs(5), impostor.rx.recv())
            .await
            .expect("join timed out")
        {
            None => break true,
            Some(HostMessage::PlayerRequest {
                request: PlayerRequest::Join(req),
            }) => {
                let player = PlayerIdentity::sign(
                    &IdentityKey::generate(),
                    // Same name, different case: still a collision.
                    "ALICE".to_string(),
                    req.random_nonce,
                );
                impostor
                    .tx
                    .send(ClientMessage::PlayerResponse {
                        response: PlayerResponse::Join(JoinResponse { player }),
                    })
                    .await
                    .unwrap();
            }
            Some(HostMessage::Error { error }) => {
                assert!(error.message.contains("duplicate"));
                break true;
            }
            Some(_) => {}
        }
    };
    assert!(rejected);
    assert_eq!(host.seated_count(), 1);
}
