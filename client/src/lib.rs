//! SDK for interacting with the skirmish ledger program: deterministic
//! address derivation, live account subscriptions, transaction assembly,
//! and the encrypted wallet-pairing handshake.

pub mod hub;
pub mod pda;
pub mod rpc;
pub mod storage;
pub mod store;
pub mod tx;
pub mod wallet;

pub use hub::{AccountKind, HubEvent, SubId, SubscriptionHub};
pub use rpc::{Commitment, RpcClient};
pub use storage::{KvStore, MemoryStore};
pub use store::{StateStore, WatchHandle};
pub use tx::{AccountMeta, Blockhash, Instruction, Message, Transaction};
pub use wallet::{ConnectLink, Envelope, KeyPair, Pairing, PairingState, WalletVault};

use thiserror::Error;

/// Error type for client operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid account data: {0}")]
    Codec(#[from] skirmish_types::codec::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid address: {0}")]
    Address(#[from] skirmish_types::AddressParseError),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("unexpected rpc response: {0}")]
    UnexpectedResponse(&'static str),
    #[error("no valid bump within 256 attempts")]
    DerivationExhausted,
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("malformed pairing callback: {0}")]
    MalformedCallback(&'static str),
    #[error("required derived address unavailable: {0}")]
    MissingAddress(&'static str),
    #[error("invalid argument encoding: {0}")]
    InvalidArgumentEncoding(&'static str),
    #[error("connection lost")]
    ConnectionLost,
    #[error("subscription hub closed")]
    HubClosed,
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
