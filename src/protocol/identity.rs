//! Player identities and chat messages, both self-signed.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::encoding::hex_bytes;
use crate::signing::{self, IdentityKey, Signable, SignError, TranscriptBuilder};

/// A peer's asserted identity: ed25519 public key, display name, and the
/// host-issued join nonce, self-signed over all three.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerIdentity {
    #[serde(with = "hex_bytes")]
    pub id: Vec<u8>,
    pub name: String,
    #[serde(with = "hex_bytes")]
    pub random_nonce: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub sig: Vec<u8>,
}

/// The signed view of an identity: everything but `sig`.
struct IdentitySeal<'a> {
    id: &'a [u8],
    name: &'a str,
    random_nonce: &'a [u8],
}

impl Signable for IdentitySeal<'_> {
    fn domain_kind(&self) -> &'static str {
        "player_identity"
    }

    fn write_transcript(&self, builder: &mut TranscriptBuilder) {
        builder.append_bytes(self.id);
        builder.append_str(self.name);
        builder.append_bytes(self.random_nonce);
    }
}

impl PlayerIdentity {
    pub fn sign(key: &IdentityKey, name: String, random_nonce: Vec<u8>) -> PlayerIdentity {
        let id = key.public_bytes();
        let sig = key.sign(&IdentitySeal {
            id: &id,
            name: &name,
            random_nonce: &random_nonce,
        });
        PlayerIdentity {
            id,
            name,
            random_nonce,
            sig,
        }
    }

    pub fn verify(&self) -> Result<(), SignError> {
        signing::verify(
            &self.id,
            &IdentitySeal {
                id: &self.id,
                name: &self.name,
                random_nonce: &self.random_nonce,
            },
            &self.sig,
        )
    }

    /// Verify a detached signature made by this player.
    pub fn verify_signature(&self, value: &impl Signable, sig: &[u8]) -> Result<(), SignError> {
        signing::verify(&self.id, value, sig)
    }
}

/// A chat line. `host_utc_ms` is stamped by the host after signature
/// verification, so it is excluded from the signed view (zero inbound).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    #[serde(with = "hex_bytes")]
    pub player_id: Vec<u8>,
    pub player_name: String,
    pub counter: u64,
    pub contents: String,
    pub host_utc_ms: i64,
    #[serde(with = "hex_bytes")]
    pub sig: Vec<u8>,
}

struct ChatSeal<'a> {
    player_id: &'a [u8],
    player_name: &'a str,
    counter: u64,
    contents: &'a str,
}

impl Signable for ChatSeal<'_> {
    fn domain_kind(&self) -> &'static str {
        "chat_message"
    }

    fn write_transcript(&self, builder: &mut TranscriptBuilder) {
        builder.append_bytes(self.player_id);
        builder.append_str(self.player_name);
        builder.append_u64(self.counter);
        builder.append_str(self.contents);
    }
}

impl ChatMessage {
    pub fn sign(key: &IdentityKey, player_name: String, counter: u64, contents: String) -> Self {
        let player_id = key.public_bytes();
        let sig = key.sign(&ChatSeal {
            player_id: &player_id,
            player_name: &player_name,
            counter,
            contents: &contents,
        });
        ChatMessage {
            player_id,
            player_name,
            counter,
            contents,
            host_utc_ms: 0,
            sig,
        }
    }

    pub fn verify(&self) -> Result<(), SignError> {
        signing::verify(
            &self.player_id,
            &ChatSeal {
                player_id: &self.player_id,
                player_name: &self.player_name,
                counter: self.counter,
                contents: &self.contents,
            },
            &self.sig,
        )
    }

    pub fn host_time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.host_utc_ms).single()
    }
}
