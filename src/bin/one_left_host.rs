use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use one_left::host::Host;
use one_left::transport::serve_host_ws;
use one_left::Config;

const LOG_TARGET: &str = "bin::one_left_host";
const DEFAULT_BIND: &str = "127.0.0.1:4790";

#[derive(Debug, Parser)]
#[command(name = "one-left-host")]
#[command(about = "Relay host for one-left games", long_about = None)]
struct Args {
    /// Address to bind the WebSocket listener to (host:port)
    #[arg(long, env = "ONE_LEFT_BIND", default_value = DEFAULT_BIND)]
    bind: SocketAddr,

    /// Start a game automatically once this many players are seated
    #[arg(long, env = "ONE_LEFT_START_AT", default_value_t = 2)]
    start_at: usize,

    /// Points needed to win the game
    #[arg(long, env = "ONE_LEFT_WINNING_SCORE", default_value_t = 500)]
    winning_score: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let cfg = Config {
        winning_score: args.winning_score,
        ..Config::default()
    };
    let host = Host::new(cfg);

    let app = Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(Arc::clone(&host));

    tokio::spawn(auto_start(Arc::clone(&host), args.start_at));

    info!(target: LOG_TARGET, bind = %args.bind, "listening");
    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    axum::serve(listener, app).await.context("server failed")
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::fmt().with_env_filter(filter).compact().init();
}

async fn ws_upgrade(State(host): State<Arc<Host>>, upgrade: WebSocketUpgrade) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| async move {
        host.attach(serve_host_ws(socket));
    })
}

/// Kick off a game whenever enough players are seated and none is running.
async fn auto_start(host: Arc<Host>, start_at: usize) {
    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
        if host.game_running() || host.seated_count() < start_at.max(2) {
            continue;
        }
        info!(
            target: LOG_TARGET,
            seated = host.seated_count(),
            "starting game"
        );
        if let Err(err) = host.play_game().await {
            error!(target: LOG_TARGET, %err, "game ended with error");
        }
    }
}
