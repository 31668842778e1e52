//! Peer-side protocol: the private deck vault, the RPC request handlers
//! with their validation against local history, and the stream runner that
//! ties them to a UI oracle.

pub mod handler;
pub mod oracle;
pub mod runner;
pub mod vault;

pub use handler::PeerHandler;
pub use oracle::{Oracle, PlayView, StrategyOracle};
pub use runner::PeerRunner;
pub use vault::{DeckVault, VaultError};
