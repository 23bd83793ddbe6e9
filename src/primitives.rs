//! EVM primitive types: addresses, selectors, 32-byte words, hex codecs.
//!
//! Everything here is pure and deterministic. Selectors are always derived
//! by hashing a canonical function signature, never pasted in as literals,
//! so the encoder and the contract dispatch table cannot drift apart.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};

/// Errors from parsing hex-encoded primitive values.
#[derive(Debug, thiserror::Error)]
pub enum PrimitiveError {
    #[error("hex string must be 0x-prefixed")]
    MissingPrefix,

    #[error("hex string is empty")]
    Empty,

    #[error("hex string must have an even number of characters")]
    OddLength,

    #[error("invalid hex character")]
    InvalidCharacter,

    #[error("expected {expected} bytes, got {got}")]
    BadLength { expected: usize, got: usize },
}

/// Compute keccak256 over arbitrary bytes.
pub fn keccak256(data: &[u8]) -> B256 {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    B256(out)
}

/// Decode a 0x-prefixed hex string.
pub fn decode_hex(value: &str) -> Result<Vec<u8>, PrimitiveError> {
    let trimmed = value.trim();
    let hex = trimmed
        .strip_prefix("0x")
        .ok_or(PrimitiveError::MissingPrefix)?;
    if !hex.len().is_multiple_of(2) {
        return Err(PrimitiveError::OddLength);
    }

    let mut out = Vec::with_capacity(hex.len() / 2);
    for pair in hex.as_bytes().chunks_exact(2) {
        let hi = decode_hex_nibble(pair[0]).ok_or(PrimitiveError::InvalidCharacter)?;
        let lo = decode_hex_nibble(pair[1]).ok_or(PrimitiveError::InvalidCharacter)?;
        out.push((hi << 4) | lo);
    }
    Ok(out)
}

/// Encode bytes as a 0x-prefixed lowercase hex string.
pub fn encode_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("0x");
    for b in bytes {
        out.push(nibble_to_hex(b >> 4));
        out.push(nibble_to_hex(b & 0x0f));
    }
    out
}

fn decode_hex_nibble(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

fn nibble_to_hex(nibble: u8) -> char {
    match nibble {
        0..=9 => (b'0' + nibble) as char,
        _ => (b'a' + nibble - 10) as char,
    }
}

fn decode_fixed<const N: usize>(value: &str) -> Result<[u8; N], PrimitiveError> {
    let bytes = decode_hex(value)?;
    if bytes.len() != N {
        return Err(PrimitiveError::BadLength {
            expected: N,
            got: bytes.len(),
        });
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// A 20-byte EVM address, rendered as lowercase 0x-hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_hex(&self.0))
    }
}

impl FromStr for Address {
    type Err = PrimitiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(decode_fixed::<20>(s)?))
    }
}

/// A 32-byte word: hashes, salts, operation handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct B256(pub [u8; 32]);

impl B256 {
    pub const ZERO: B256 = B256([0u8; 32]);

    pub fn repeat(byte: u8) -> Self {
        Self([byte; 32])
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for B256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_hex(&self.0))
    }
}

impl FromStr for B256 {
    type Err = PrimitiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(decode_fixed::<32>(s)?))
    }
}

/// A 4-byte function selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Selector(pub [u8; 4]);

impl Selector {
    /// Derive a selector from a canonical function signature,
    /// e.g. `transfer(address,uint256)`.
    pub fn from_signature(signature: &str) -> Self {
        let digest = keccak256(signature.as_bytes());
        let mut out = [0u8; 4];
        out.copy_from_slice(&digest.0[..4]);
        Self(out)
    }

    /// Read the selector off the front of ABI-encoded calldata.
    pub fn from_calldata(data: &[u8]) -> Option<Self> {
        if data.len() < 4 {
            return None;
        }
        let mut out = [0u8; 4];
        out.copy_from_slice(&data[..4]);
        Some(Self(out))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_hex(&self.0))
    }
}

impl FromStr for Selector {
    type Err = PrimitiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(decode_fixed::<4>(s)?))
    }
}

/// Variable-length byte payload (calldata, signatures), hex on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bytes(pub Vec<u8>);

impl Bytes {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Bytes {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl fmt::Display for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_hex(&self.0))
    }
}

impl FromStr for Bytes {
    type Err = PrimitiveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(decode_hex(s)?))
    }
}

macro_rules! hex_serde {
    ($ty:ident) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(D::Error::custom)
            }
        }
    };
}

hex_serde!(Address);
hex_serde!(B256);
hex_serde!(Selector);
hex_serde!(Bytes);

/// Left-pad an address into a 32-byte ABI word.
pub fn word_from_address(address: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(&address.0);
    word
}

/// Zero-extend a u128 into a 32-byte ABI word.
pub fn word_from_u128(value: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Right-pad a selector into a 32-byte ABI word.
pub fn word_from_selector(selector: Selector) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[..4].copy_from_slice(&selector.0);
    word
}

/// Format a u128 as a JSON-RPC quantity (`0x` hex, no leading zeros).
pub fn quantity(value: u128) -> String {
    format!("0x{value:x}")
}

/// Parse a JSON-RPC quantity into a u128.
pub fn parse_quantity(value: &str) -> Result<u128, PrimitiveError> {
    let hex = value
        .trim()
        .strip_prefix("0x")
        .ok_or(PrimitiveError::MissingPrefix)?;
    if hex.is_empty() {
        return Err(PrimitiveError::Empty);
    }
    u128::from_str_radix(hex, 16).map_err(|_| PrimitiveError::InvalidCharacter)
}
