use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use one_left::player::{PeerRunner, StrategyOracle};
use one_left::signing::IdentityKey;
use one_left::transport::connect_peer_ws;
use one_left::Config;

const LOG_TARGET: &str = "bin::one_left_player";

#[derive(Debug, Parser)]
#[command(name = "one-left-player")]
#[command(about = "Automated one-left peer", long_about = None)]
struct Args {
    /// Host WebSocket URL
    #[arg(long, env = "ONE_LEFT_URL", default_value = "ws://127.0.0.1:4790/ws")]
    url: String,

    /// Display name to join with
    #[arg(long, env = "ONE_LEFT_NAME")]
    name: String,

    /// Exit once the game ends instead of spectating
    #[arg(long, default_value_t = false)]
    until_game_end: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::fmt().with_env_filter(filter).compact().init();

    let conn = connect_peer_ws(&args.url)
        .await
        .with_context(|| format!("failed to connect to {}", args.url))?;
    info!(target: LOG_TARGET, url = %args.url, name = %args.name, "connected");

    let runner = PeerRunner::new(
        conn,
        Arc::new(Config::default()),
        IdentityKey::generate(),
        args.name,
        Arc::new(StrategyOracle),
    );
    runner
        .run(args.until_game_end)
        .await
        .context("peer stream failed")
}
