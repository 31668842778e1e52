//! Wire encoding for protocol byte blobs.
//!
//! Big integers travel as their unsigned big-endian bytes, hex-encoded with a
//! `0x` prefix inside JSON strings. [`BigNum`] wraps a `BigUint` so that
//! ciphertexts and decryption keys serialize that way everywhere without
//! per-field annotations.

use std::fmt;

use num_bigint::BigUint;
use serde::{de::Error as DeError, Deserialize, Deserializer, Serialize, Serializer};

#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BigNum(BigUint);

impl BigNum {
    pub fn from_bytes_be(bytes: &[u8]) -> Self {
        BigNum(BigUint::from_bytes_be(bytes))
    }

    pub fn to_bytes_be(&self) -> Vec<u8> {
        self.0.to_bytes_be()
    }

    pub fn as_uint(&self) -> &BigUint {
        &self.0
    }

    pub fn into_uint(self) -> BigUint {
        self.0
    }
}

impl From<BigUint> for BigNum {
    fn from(value: BigUint) -> Self {
        BigNum(value)
    }
}

impl From<&BigUint> for BigNum {
    fn from(value: &BigUint) -> Self {
        BigNum(value.clone())
    }
}

impl From<u32> for BigNum {
    fn from(value: u32) -> Self {
        BigNum(BigUint::from(value))
    }
}

impl fmt::Debug for BigNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = hex::encode(self.to_bytes_be());
        if hex.len() > 16 {
            write!(f, "BigNum(0x{}..{})", &hex[..8], &hex[hex.len() - 8..])
        } else {
            write!(f, "BigNum(0x{hex})")
        }
    }
}

impl fmt::Display for BigNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.to_bytes_be()))
    }
}

impl Serialize for BigNum {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.to_bytes_be())))
    }
}

impl<'de> Deserialize<'de> for BigNum {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let stripped = encoded.strip_prefix("0x").unwrap_or(&encoded);
        let bytes = hex::decode(stripped).map_err(D::Error::custom)?;
        Ok(BigNum::from_bytes_be(&bytes))
    }
}

/// Serde adapter for raw byte fields (ids, signatures, nonces): `0x`-hex.
pub mod hex_bytes {
    use serde::{de::Error as DeError, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let stripped = encoded.strip_prefix("0x").unwrap_or(&encoded);
        hex::decode(stripped).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bignum_round_trips_through_json() {
        let value = BigNum::from_bytes_be(&[0x01, 0x02, 0xff, 0x00]);
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, "\"0x0102ff00\"");
        let back: BigNum = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn zero_serializes() {
        let zero = BigNum::default();
        let json = serde_json::to_string(&zero).unwrap();
        let back: BigNum = serde_json::from_str(&json).unwrap();
        assert_eq!(back, zero);
    }
}
