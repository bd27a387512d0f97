//! Common types for the skirmish ledger program.
//!
//! Defines addresses, identifier tokens, account records and their binary
//! codecs, and instruction argument encoding shared by clients.

pub mod accounts;
pub mod codec;
pub mod instruction;

pub use accounts::{AccountKind, AccountRecord, Game, Player, Round, RoundHistoryEntry, RoundState};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// A 32-byte ledger public key, rendered in base-58 everywhere it crosses a
/// human- or JSON-facing boundary.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; 32]);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressParseError {
    #[error("invalid base-58: {0}")]
    Encoding(String),
    #[error("decoded {0} bytes, expected {expected}", expected = Address::LEN)]
    Length(usize),
}

impl Address {
    pub const LEN: usize = 32;

    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; 32] {
        self.0
    }
}

impl From<[u8; 32]> for Address {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(&self.0).into_string())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|err| AddressParseError::Encoding(err.to_string()))?;
        let bytes: [u8; Self::LEN] = bytes
            .try_into()
            .map_err(|rejected: Vec<u8>| AddressParseError::Length(rejected.len()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Fixed 26-character identifier token for games and rounds.
///
/// Tokens are ASCII by construction; decode rejects anything else.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdToken([u8; 26]);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenParseError {
    #[error("token length {0}, expected {expected}", expected = IdToken::LEN)]
    Length(usize),
    #[error("token contains non-ASCII bytes")]
    NonAscii,
}

impl IdToken {
    pub const LEN: usize = 26;

    /// Build a token from raw bytes, rejecting non-ASCII content.
    pub fn from_bytes(bytes: [u8; 26]) -> Result<Self, TokenParseError> {
        if !bytes.iter().all(|b| b.is_ascii_graphic()) {
            return Err(TokenParseError::NonAscii);
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 26] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        // ASCII enforced at construction.
        std::str::from_utf8(&self.0).unwrap_or("")
    }
}

impl fmt::Display for IdToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for IdToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdToken({self})")
    }
}

impl FromStr for IdToken {
    type Err = TokenParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes: [u8; Self::LEN] = s
            .as_bytes()
            .try_into()
            .map_err(|_| TokenParseError::Length(s.len()))?;
        Self::from_bytes(bytes)
    }
}

impl Serialize for IdToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for IdToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Serde adapter carrying u64 amounts as decimal strings so they survive
/// JSON consumers with 53-bit numeric precision.
pub mod amount_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
