//! Canonical transcripts for the phase-chaining signatures.
//!
//! Each phase of a game is sealed by every player signing the same
//! transcript; the next phase carries those signatures so peers can refuse
//! to advance past a phase any roster member never endorsed.

use uuid::Uuid;

use crate::crypto::BigNum;
use crate::protocol::identity::PlayerIdentity;
use crate::protocol::requests::{PlayerHandReveal, SignatureBlob};
use crate::signing::{self, Signable, SignError, TranscriptBuilder};

pub struct GameStartSeal<'a> {
    pub game_id: Uuid,
    pub players: &'a [PlayerIdentity],
}

impl Signable for GameStartSeal<'_> {
    fn domain_kind(&self) -> &'static str {
        "game_start"
    }

    fn write_transcript(&self, builder: &mut TranscriptBuilder) {
        builder.append_bytes(self.game_id.as_bytes());
        builder.append_u32(self.players.len() as u32);
        for player in self.players {
            builder.append_bytes(&player.id);
            builder.append_str(&player.name);
            builder.append_bytes(&player.random_nonce);
        }
    }
}

pub struct HandStartSeal<'a> {
    pub game_id: Uuid,
    pub hand_id: Uuid,
    pub dealer_index: u32,
    pub shared_prime: &'a BigNum,
}

impl Signable for HandStartSeal<'_> {
    fn domain_kind(&self) -> &'static str {
        "hand_start"
    }

    fn write_transcript(&self, builder: &mut TranscriptBuilder) {
        builder.append_bytes(self.game_id.as_bytes());
        builder.append_bytes(self.hand_id.as_bytes());
        builder.append_u32(self.dealer_index);
        builder.append_bytes(&self.shared_prime.to_bytes_be());
    }
}

pub struct HandEndSeal<'a> {
    pub hand_id: Uuid,
    pub winner_index: u32,
    pub winner_score: u32,
    pub player_infos: &'a [PlayerHandReveal],
}

impl Signable for HandEndSeal<'_> {
    fn domain_kind(&self) -> &'static str {
        "hand_end"
    }

    fn write_transcript(&self, builder: &mut TranscriptBuilder) {
        builder.append_bytes(self.hand_id.as_bytes());
        builder.append_u32(self.winner_index);
        builder.append_u32(self.winner_score);
        builder.append_u32(self.player_infos.len() as u32);
        for info in self.player_infos {
            builder.append_u32(info.encrypted_cards.len() as u32);
            for ct in &info.encrypted_cards {
                builder.append_bytes(&ct.to_bytes_be());
            }
            builder.append_u32(info.cards.len() as u32);
            for card in &info.cards {
                builder.append_u8(card.id());
            }
            builder.append_u32(info.decryption_keys.len() as u32);
            for entry in &info.decryption_keys {
                builder.append_bytes(&entry.encrypted_card.to_bytes_be());
                builder.append_bytes(&entry.decryption_key.to_bytes_be());
            }
        }
    }
}

pub struct GameEndSeal<'a> {
    pub game_id: Uuid,
    pub player_scores: &'a [u32],
}

impl Signable for GameEndSeal<'_> {
    fn domain_kind(&self) -> &'static str {
        "game_end"
    }

    fn write_transcript(&self, builder: &mut TranscriptBuilder) {
        builder.append_bytes(self.game_id.as_bytes());
        builder.append_u32(self.player_scores.len() as u32);
        for score in self.player_scores {
            builder.append_u32(*score);
        }
    }
}

/// Verify one signature per roster member over `transcript_bytes`.
/// Returns the index of the first offender on failure.
pub fn verify_roster_signatures(
    roster: &[PlayerIdentity],
    transcript_bytes: &[u8],
    sigs: &[SignatureBlob],
) -> Result<(), (usize, SignError)> {
    if sigs.len() != roster.len() {
        // A short vector cannot name an offender; blame the host's framing
        // by reporting index 0 length mismatch upstream via BadSignatureLength.
        return Err((0, SignError::BadSignatureLength(sigs.len())));
    }
    for (index, (player, sig)) in roster.iter().zip(sigs).enumerate() {
        signing::verify_bytes(&player.id, transcript_bytes, &sig.0).map_err(|e| (index, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::IdentityKey;

    fn roster(keys: &[IdentityKey]) -> Vec<PlayerIdentity> {
        keys.iter()
            .enumerate()
            .map(|(i, k)| PlayerIdentity::sign(k, format!("p{i}"), vec![i as u8; 10]))
            .collect()
    }

    #[test]
    fn roster_signatures_verify_in_order() {
        let keys: Vec<IdentityKey> = (0..3).map(|_| IdentityKey::generate()).collect();
        let players = roster(&keys);
        let seal = GameStartSeal {
            game_id: Uuid::new_v4(),
            players: &players,
        };
        let bytes = seal.to_signing_bytes();
        let sigs: Vec<SignatureBlob> = keys
            .iter()
            .map(|k| SignatureBlob(k.sign(&seal)))
            .collect();
        verify_roster_signatures(&players, &bytes, &sigs).unwrap();
    }

    #[test]
    fn offender_index_is_reported() {
        let keys: Vec<IdentityKey> = (0..3).map(|_| IdentityKey::generate()).collect();
        let players = roster(&keys);
        let seal = GameStartSeal {
            game_id: Uuid::new_v4(),
            players: &players,
        };
        let bytes = seal.to_signing_bytes();
        let mut sigs: Vec<SignatureBlob> = keys
            .iter()
            .map(|k| SignatureBlob(k.sign(&seal)))
            .collect();
        // Player 1 swaps in a signature over something else.
        sigs[1] = SignatureBlob(keys[1].sign(&GameEndSeal {
            game_id: Uuid::new_v4(),
            player_scores: &[],
        }));
        let err = verify_roster_signatures(&players, &bytes, &sigs).unwrap_err();
        assert_eq!(err.0, 1);
    }
}
