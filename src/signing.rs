//! Canonical transcripts and ed25519 signing.
//!
//! Wire messages are JSON, which is not a stable byte encoding, so nothing is
//! ever signed over serialized frames. Every signable value instead appends
//! its fields to a domain-separated transcript and the ed25519 signature
//! covers those bytes. Both sides rebuild the transcript independently, so
//! verification never depends on re-encoding.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

const DOMAIN_TAG: &[u8] = b"one-left/v1";

pub const PUBLIC_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum SignError {
    #[error("public key must be {PUBLIC_KEY_LEN} bytes, got {0}")]
    BadPublicKeyLength(usize),
    #[error("malformed public key")]
    BadPublicKey,
    #[error("signature must be {SIGNATURE_LEN} bytes, got {0}")]
    BadSignatureLength(usize),
    #[error("signature verification failed")]
    Invalid,
}

/// Builder for canonical signing transcripts.
pub struct TranscriptBuilder {
    buffer: Vec<u8>,
}

impl TranscriptBuilder {
    pub fn new(kind: &'static str) -> Self {
        let mut buffer = Vec::with_capacity(128);
        buffer.extend_from_slice(DOMAIN_TAG);
        buffer.extend_from_slice(&(kind.len() as u16).to_be_bytes());
        buffer.extend_from_slice(kind.as_bytes());
        Self { buffer }
    }

    pub fn append_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn append_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    pub fn append_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    pub fn append_i64(&mut self, value: i64) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    pub fn append_bytes(&mut self, bytes: &[u8]) {
        self.buffer
            .extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        self.buffer.extend_from_slice(bytes);
    }

    pub fn append_str(&mut self, value: &str) {
        self.append_bytes(value.as_bytes());
    }

    pub fn finish(self) -> Vec<u8> {
        self.buffer
    }
}

/// Values with a canonical, domain-separated byte representation.
pub trait Signable {
    /// Logical kind string used for domain separation.
    fn domain_kind(&self) -> &'static str;

    fn write_transcript(&self, builder: &mut TranscriptBuilder);

    fn to_signing_bytes(&self) -> Vec<u8> {
        let mut builder = TranscriptBuilder::new(self.domain_kind());
        self.write_transcript(&mut builder);
        builder.finish()
    }
}

/// A peer's long-lived ed25519 identity key.
pub struct IdentityKey {
    signing: SigningKey,
}

impl IdentityKey {
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(bytes),
        }
    }

    pub fn public_bytes(&self) -> Vec<u8> {
        self.signing.verifying_key().to_bytes().to_vec()
    }

    pub fn sign(&self, value: &impl Signable) -> Vec<u8> {
        self.signing
            .sign(&value.to_signing_bytes())
            .to_bytes()
            .to_vec()
    }
}

pub fn verify(public_key: &[u8], value: &impl Signable, sig: &[u8]) -> Result<(), SignError> {
    verify_bytes(public_key, &value.to_signing_bytes(), sig)
}

pub fn verify_bytes(public_key: &[u8], message: &[u8], sig: &[u8]) -> Result<(), SignError> {
    let key_bytes: &[u8; PUBLIC_KEY_LEN] = public_key
        .try_into()
        .map_err(|_| SignError::BadPublicKeyLength(public_key.len()))?;
    let key = VerifyingKey::from_bytes(key_bytes).map_err(|_| SignError::BadPublicKey)?;
    let sig_bytes: &[u8; SIGNATURE_LEN] = sig
        .try_into()
        .map_err(|_| SignError::BadSignatureLength(sig.len()))?;
    let signature = Signature::from_bytes(sig_bytes);
    key.verify(message, &signature)
        .map_err(|_| SignError::Invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sample {
        a: u64,
        b: String,
    }

    impl Signable for Sample {
        fn domain_kind(&self) -> &'static str {
            "test/sample"
        }

        fn write_transcript(&self, builder: &mut TranscriptBuilder) {
            builder.append_u64(self.a);
            builder.append_str(&self.b);
        }
    }

    #[test]
    fn sign_and_verify_round_trip() {
        let key = IdentityKey::generate();
        let value = Sample {
            a: 7,
            b: "hello".into(),
        };
        let sig = key.sign(&value);
        assert_eq!(sig.len(), SIGNATURE_LEN);
        verify(&key.public_bytes(), &value, &sig).unwrap();
    }

    #[test]
    fn verify_rejects_tampering() {
        let key = IdentityKey::generate();
        let value = Sample {
            a: 7,
            b: "hello".into(),
        };
        let sig = key.sign(&value);
        let tampered = Sample {
            a: 8,
            b: "hello".into(),
        };
        assert!(matches!(
            verify(&key.public_bytes(), &tampered, &sig),
            Err(SignError::Invalid)
        ));
        let other = IdentityKey::generate();
        assert!(verify(&other.public_bytes(), &value, &sig).is_err());
    }

    #[test]
    fn transcripts_are_length_prefixed() {
        // "ab" + "c" must not collide with "a" + "bc".
        let one = {
            let mut b = TranscriptBuilder::new("test/prefix");
            b.append_str("ab");
            b.append_str("c");
            b.finish()
        };
        let two = {
            let mut b = TranscriptBuilder::new("test/prefix");
            b.append_str("a");
            b.append_str("bc");
            b.finish()
        };
        assert_ne!(one, two);
    }
}
