//! Commutative SRA-style cipher over a hand-shared prime.
//!
//! Every peer derives key pairs `(enc, dec)` with `enc * dec == 1 (mod p-1)`.
//! Encryption is `m^enc mod p`, decryption `c^dec mod p`, so any number of
//! peers' encryptions compose and can be removed again in any order.

use num_bigint::{BigUint, RandBigInt};
use rand::{CryptoRng, RngCore};
use thiserror::Error;

use crate::cards::Card;

pub const MILLER_RABIN_ROUNDS: usize = 20;

#[derive(Debug, Error)]
pub enum SraError {
    #[error("shared prime has {bits} bits, need at least {min}")]
    PrimeTooSmall { bits: u64, min: u64 },
    #[error("shared prime failed the primality check")]
    NotPrime,
    #[error("could not derive an invertible encryption exponent")]
    KeyGeneration,
}

/// Generate a probable prime of exactly `bits` bits.
pub fn generate_shared_prime<R>(bits: u64, rng: &mut R) -> BigUint
where
    R: RngCore + CryptoRng,
{
    let one = BigUint::from(1u8);
    loop {
        let mut candidate = rng.gen_biguint(bits);
        // Force the width and make it odd.
        candidate |= &one << (bits - 1);
        candidate |= &one;
        if is_probable_prime(&candidate, MILLER_RABIN_ROUNDS, rng) {
            return candidate;
        }
    }
}

/// Peer-side acceptance check for a host-supplied prime.
pub fn validate_shared_prime<R>(prime: &BigUint, min_bits: u64, rng: &mut R) -> Result<(), SraError>
where
    R: RngCore + CryptoRng,
{
    if prime.bits() < min_bits {
        return Err(SraError::PrimeTooSmall {
            bits: prime.bits(),
            min: min_bits,
        });
    }
    if !is_probable_prime(prime, MILLER_RABIN_ROUNDS, rng) {
        return Err(SraError::NotPrime);
    }
    Ok(())
}

/// Miller-Rabin with random witnesses.
pub fn is_probable_prime<R>(n: &BigUint, rounds: usize, rng: &mut R) -> bool
where
    R: RngCore + CryptoRng,
{
    let zero = BigUint::from(0u8);
    let one = BigUint::from(1u8);
    let two = BigUint::from(2u8);
    let three = BigUint::from(3u8);

    if *n < two {
        return false;
    }
    if *n == two || *n == three {
        return true;
    }
    if (n % &two) == zero {
        return false;
    }

    // n - 1 == d * 2^s with d odd.
    let n_minus_one = n - &one;
    let mut d = n_minus_one.clone();
    let mut s = 0u64;
    while (&d % &two) == zero {
        d >>= 1;
        s += 1;
    }

    'witness: for _ in 0..rounds {
        let a = rng.gen_biguint_range(&two, &n_minus_one);
        let mut x = a.modpow(&d, n);
        if x == one || x == n_minus_one {
            continue;
        }
        for _ in 0..s.saturating_sub(1) {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// One peer's `(enc, dec)` exponent pair bound to a shared prime.
#[derive(Clone, Debug)]
pub struct SraKeyPair {
    prime: BigUint,
    enc: BigUint,
    dec: BigUint,
}

impl SraKeyPair {
    pub fn generate<R>(prime: &BigUint, key_bits: u64, rng: &mut R) -> Result<SraKeyPair, SraError>
    where
        R: RngCore + CryptoRng,
    {
        let one = BigUint::from(1u8);
        let phi = prime - &one;
        for _ in 0..256 {
            let enc = rng.gen_biguint(key_bits) | &one;
            if enc <= one || enc >= phi {
                continue;
            }
            // modinv fails exactly when gcd(enc, p-1) != 1.
            if let Some(dec) = enc.modinv(&phi) {
                return Ok(SraKeyPair {
                    prime: prime.clone(),
                    enc,
                    dec,
                });
            }
        }
        Err(SraError::KeyGeneration)
    }

    pub fn encrypt(&self, plaintext: &BigUint) -> BigUint {
        plaintext.modpow(&self.enc, &self.prime)
    }

    pub fn decrypt(&self, ciphertext: &BigUint) -> BigUint {
        ciphertext.modpow(&self.dec, &self.prime)
    }

    pub fn decryption_key(&self) -> &BigUint {
        &self.dec
    }

    pub fn prime(&self) -> &BigUint {
        &self.prime
    }
}

/// Apply a set of decryption keys in sequence.
pub fn apply_decryption_keys<'a, I>(ciphertext: &BigUint, keys: I, prime: &BigUint) -> BigUint
where
    I: IntoIterator<Item = &'a BigUint>,
{
    let mut value = ciphertext.clone();
    for key in keys {
        value = value.modpow(key, prime);
    }
    value
}

/// Fully decrypt a card ciphertext; `None` when the result is not a card id.
pub fn decrypt_card<'a, I>(ciphertext: &BigUint, keys: I, prime: &BigUint) -> Option<Card>
where
    I: IntoIterator<Item = &'a BigUint>,
{
    let value = apply_decryption_keys(ciphertext, keys, prime);
    if value.bits() > 32 {
        return None;
    }
    let digits = value.to_u64_digits();
    let small = digits.first().copied().unwrap_or(0);
    u8::try_from(small).ok().and_then(Card::new)
}
