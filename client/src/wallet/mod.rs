//! Encrypted wallet pairing.
//!
//! The dapp and the wallet never share a socket: pairing rides deep links.
//! We generate an x25519 key pair, advertise the public key in the connect
//! link, and the wallet's redirect callback carries its public key plus an
//! encrypted session payload. Both sides derive the same Diffie-Hellman
//! shared secret and seal payloads with XChaCha20-Poly1305 under a fresh
//! random 24-byte nonce per message.
//!
//! The whole exchange may span a process restart (the app is suspended
//! while the wallet is foregrounded), so key material for an in-flight
//! attempt lives in [`WalletVault`], not only in memory.

mod link;
mod vault;

pub use link::{parse_callback, CallbackParams, ConnectLink};
pub use vault::WalletVault;

use std::collections::HashSet;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand_core::{OsRng, RngCore};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use skirmish_types::Address;

use crate::{Error, Result};

pub const NONCE_LEN: usize = 24;

/// Shared secret from the Diffie-Hellman combine. Identical regardless of
/// which side computes it; wiped from memory on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedKey([u8; 32]);

/// x25519 key pair for one pairing attempt.
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    /// Diffie-Hellman combine with the counterpart's public key.
    pub fn shared_key(&self, counterpart: &PublicKey) -> SharedKey {
        SharedKey(self.secret.diffie_hellman(counterpart).to_bytes())
    }
}

/// Nonce + ciphertext, base-58 encoded for URL transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub nonce: String,
    pub data: String,
}

/// Seal a JSON payload under the shared secret with a fresh random nonce.
pub fn encrypt<T: Serialize>(payload: &T, key: &SharedKey) -> Result<Envelope> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = seal_raw(&nonce, &serde_json::to_vec(payload)?, key)?;
    Ok(Envelope {
        nonce: bs58::encode(&nonce).into_string(),
        data: bs58::encode(&ciphertext).into_string(),
    })
}

/// Open an envelope. Any authentication failure, corrupt encoding, or key
/// mismatch is [`Error::DecryptionFailed`]; no partial data escapes.
pub fn decrypt<T: DeserializeOwned>(envelope: &Envelope, key: &SharedKey) -> Result<T> {
    let nonce = decode_nonce(&envelope.nonce)?;
    let data = bs58::decode(&envelope.data)
        .into_vec()
        .map_err(|_| Error::DecryptionFailed)?;
    let plaintext = open_raw(&nonce, &data, key)?;
    serde_json::from_slice(&plaintext).map_err(|_| Error::DecryptionFailed)
}

fn decode_nonce(raw: &str) -> Result<[u8; NONCE_LEN]> {
    bs58::decode(raw)
        .into_vec()
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(Error::DecryptionFailed)
}

fn seal_raw(nonce: &[u8; NONCE_LEN], plaintext: &[u8], key: &SharedKey) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new_from_slice(&key.0)
        .map_err(|_| Error::InvalidArgumentEncoding("bad encryption key length"))?;
    cipher
        .encrypt(XNonce::from_slice(nonce), plaintext)
        .map_err(|_| Error::InvalidArgumentEncoding("payload encryption failed"))
}

fn open_raw(nonce: &[u8; NONCE_LEN], ciphertext: &[u8], key: &SharedKey) -> Result<Vec<u8>> {
    let cipher =
        XChaCha20Poly1305::new_from_slice(&key.0).map_err(|_| Error::DecryptionFailed)?;
    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::DecryptionFailed)
}

/// Lifecycle of one pairing attempt. `Failed` is terminal; a new attempt
/// needs a fresh key pair. `Abandoned` is a cancellation, not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PairingState {
    Initiated,
    AwaitingCallback,
    Received,
    Decrypted,
    Paired,
    Failed,
    Abandoned,
}

/// Payload the wallet returns when the user approves the connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectResponse {
    /// The user's wallet address, base-58.
    pub public_key: String,
    /// Wallet-issued session token for follow-up requests.
    pub session: String,
}

/// One pairing attempt: the ephemeral key pair, the state machine, and the
/// nonce log guarding against replays.
pub struct Pairing {
    keypair: KeyPair,
    state: PairingState,
    session_token: String,
    peer: Option<PublicKey>,
    wallet_address: Option<Address>,
    wallet_session: Option<String>,
    seen_nonces: HashSet<[u8; NONCE_LEN]>,
}

impl Pairing {
    /// Begin a fresh attempt with a newly generated key pair.
    pub fn new(session_token: String) -> Self {
        Self {
            keypair: KeyPair::generate(),
            state: PairingState::Initiated,
            session_token,
            peer: None,
            wallet_address: None,
            wallet_session: None,
            seen_nonces: HashSet::new(),
        }
    }

    /// Resume an attempt whose key material was persisted before the app
    /// was suspended; the callback may still arrive.
    pub fn resume(keypair: KeyPair, session_token: String) -> Self {
        Self {
            keypair,
            state: PairingState::AwaitingCallback,
            session_token,
            peer: None,
            wallet_address: None,
            wallet_session: None,
            seen_nonces: HashSet::new(),
        }
    }

    pub fn state(&self) -> PairingState {
        self.state
    }

    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    pub fn session_token(&self) -> &str {
        &self.session_token
    }

    /// Wallet address, once paired.
    pub fn wallet_address(&self) -> Option<&Address> {
        self.wallet_address.as_ref()
    }

    /// Wallet-issued session token, once paired.
    pub fn wallet_session(&self) -> Option<&str> {
        self.wallet_session.as_deref()
    }

    pub fn peer_public_key(&self) -> Option<&PublicKey> {
        self.peer.as_ref()
    }

    /// Build the outbound connect link and move to `AwaitingCallback`.
    pub fn connect_link(&mut self, config: &ConnectLink) -> Result<Url> {
        if !matches!(
            self.state,
            PairingState::Initiated | PairingState::AwaitingCallback
        ) {
            return Err(Error::MalformedCallback("pairing attempt already settled"));
        }
        let url = link::build_connect_link(config, self.keypair.public(), &self.session_token);
        self.state = PairingState::AwaitingCallback;
        Ok(url)
    }

    /// Ingest the redirect callback. On success the session token is stored
    /// and the attempt is `Paired`; any failure is terminal for the attempt.
    pub fn handle_callback(&mut self, url: &Url) -> Result<ConnectResponse> {
        if !matches!(
            self.state,
            PairingState::Initiated | PairingState::AwaitingCallback
        ) {
            return Err(Error::MalformedCallback("pairing attempt already settled"));
        }
        self.state = PairingState::Received;
        match self.try_decrypt_callback(url) {
            Ok(response) => {
                self.state = PairingState::Paired;
                Ok(response)
            }
            Err(err) => {
                self.state = PairingState::Failed;
                Err(err)
            }
        }
    }

    fn try_decrypt_callback(&mut self, url: &Url) -> Result<ConnectResponse> {
        let params = parse_callback(url)?;
        // A replayed nonce is never decrypted, even with a valid tag.
        if !self.seen_nonces.insert(params.nonce) {
            return Err(Error::DecryptionFailed);
        }
        let key = self.keypair.shared_key(&params.wallet_public_key);
        let plaintext = open_raw(&params.nonce, &params.data, &key)?;
        self.state = PairingState::Decrypted;
        let response: ConnectResponse =
            serde_json::from_slice(&plaintext).map_err(|_| Error::DecryptionFailed)?;
        let wallet_address: Address = response
            .public_key
            .parse()
            .map_err(|_| Error::DecryptionFailed)?;
        self.peer = Some(params.wallet_public_key);
        self.wallet_address = Some(wallet_address);
        self.wallet_session = Some(response.session.clone());
        Ok(response)
    }

    /// Cancellation hook: the caller's patience ran out before a callback
    /// arrived. Settled attempts are unaffected.
    pub fn abandon(&mut self) {
        if !matches!(self.state, PairingState::Paired | PairingState::Failed) {
            self.state = PairingState::Abandoned;
        }
    }

    /// Seal a payload for the paired wallet, logging the nonce used.
    pub fn encrypt_payload<T: Serialize>(&mut self, payload: &T) -> Result<Envelope> {
        if self.state != PairingState::Paired {
            return Err(Error::MalformedCallback("wallet not paired"));
        }
        let peer = self.peer.ok_or(Error::MalformedCallback("wallet not paired"))?;
        let key = self.keypair.shared_key(&peer);
        let envelope = encrypt(payload, &key)?;
        if let Ok(nonce) = decode_nonce(&envelope.nonce) {
            self.seen_nonces.insert(nonce);
        }
        Ok(envelope)
    }

    /// Open a payload from the paired wallet, rejecting replayed nonces.
    pub fn decrypt_payload<T: DeserializeOwned>(&mut self, envelope: &Envelope) -> Result<T> {
        if self.state != PairingState::Paired {
            return Err(Error::MalformedCallback("wallet not paired"));
        }
        let peer = self.peer.ok_or(Error::MalformedCallback("wallet not paired"))?;
        let nonce = decode_nonce(&envelope.nonce)?;
        if !self.seen_nonces.insert(nonce) {
            return Err(Error::DecryptionFailed);
        }
        let key = self.keypair.shared_key(&peer);
        decrypt(envelope, &key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shared_pair() -> (KeyPair, KeyPair) {
        (KeyPair::generate(), KeyPair::generate())
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let (ours, theirs) = shared_pair();
        let key = ours.shared_key(theirs.public());
        let payload = json!({"method": "signTransaction", "index": 4});
        let envelope = encrypt(&payload, &key).unwrap();
        let opened: serde_json::Value = decrypt(&envelope, &key).unwrap();
        assert_eq!(opened, payload);
    }

    #[test]
    fn shared_secret_is_symmetric() {
        let (ours, theirs) = shared_pair();
        let a = ours.shared_key(theirs.public());
        let b = theirs.shared_key(ours.public());
        assert_eq!(a.0, b.0);
    }

    #[test]
    fn wrong_key_fails_closed() {
        let (ours, theirs) = shared_pair();
        let intruder = KeyPair::generate();
        let key = ours.shared_key(theirs.public());
        let envelope = encrypt(&json!({"secret": true}), &key).unwrap();

        let wrong = intruder.shared_key(theirs.public());
        let result: Result<serde_json::Value> = decrypt(&envelope, &wrong);
        assert!(matches!(result, Err(Error::DecryptionFailed)));
    }

    #[test]
    fn tampered_ciphertext_fails_closed() {
        let (ours, theirs) = shared_pair();
        let key = ours.shared_key(theirs.public());
        let envelope = encrypt(&json!({"ok": 1}), &key).unwrap();

        let mut bytes = bs58::decode(&envelope.data).into_vec().unwrap();
        bytes[0] ^= 0xff;
        let tampered = Envelope {
            nonce: envelope.nonce.clone(),
            data: bs58::encode(&bytes).into_string(),
        };
        let result: Result<serde_json::Value> = decrypt(&tampered, &key);
        assert!(matches!(result, Err(Error::DecryptionFailed)));
    }

    #[test]
    fn truncated_envelope_fails_closed() {
        let (ours, theirs) = shared_pair();
        let key = ours.shared_key(theirs.public());
        let malformed = Envelope {
            nonce: bs58::encode(&[0u8; 5]).into_string(),
            data: bs58::encode(&[1u8, 2]).into_string(),
        };
        let result: Result<serde_json::Value> = decrypt(&malformed, &key);
        assert!(matches!(result, Err(Error::DecryptionFailed)));
    }

    #[test]
    fn nonces_are_fresh_per_encrypt() {
        let (ours, theirs) = shared_pair();
        let key = ours.shared_key(theirs.public());
        let a = encrypt(&json!({"n": 1}), &key).unwrap();
        let b = encrypt(&json!({"n": 1}), &key).unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.data, b.data);
    }

    #[test]
    fn secret_bytes_roundtrip_for_persistence() {
        let original = KeyPair::generate();
        let restored = KeyPair::from_secret_bytes(original.secret_bytes());
        assert_eq!(original.public().as_bytes(), restored.public().as_bytes());
    }

    fn wallet_callback(
        dapp_public: &PublicKey,
        wallet: &KeyPair,
        response: &ConnectResponse,
    ) -> Url {
        let key = wallet.shared_key(dapp_public);
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = seal_raw(&nonce, &serde_json::to_vec(response).unwrap(), &key).unwrap();
        let mut url = Url::parse("skirmish://wallet-callback").unwrap();
        url.query_pairs_mut()
            .append_pair("data", &bs58::encode(&ciphertext).into_string())
            .append_pair("nonce", &bs58::encode(&nonce).into_string())
            .append_pair(
                "wallet_encryption_public_key",
                &bs58::encode(wallet.public().as_bytes()).into_string(),
            );
        url
    }

    fn connect_config() -> ConnectLink {
        ConnectLink {
            base: Url::parse("https://wallet.example/ul/v1/connect").unwrap(),
            app_url: Url::parse("https://skirmish.example").unwrap(),
            redirect: Url::parse("skirmish://wallet-callback").unwrap(),
            cluster: "mainnet-beta".to_string(),
        }
    }

    #[test]
    fn full_pairing_flow_reaches_paired() {
        let mut pairing = Pairing::new("app-session-1".to_string());
        assert_eq!(pairing.state(), PairingState::Initiated);

        let link = pairing.connect_link(&connect_config()).unwrap();
        assert_eq!(pairing.state(), PairingState::AwaitingCallback);
        assert!(link
            .query_pairs()
            .any(|(k, _)| k == "dapp_encryption_public_key"));

        let wallet = KeyPair::generate();
        let wallet_address = Address::new([77u8; 32]);
        let response = ConnectResponse {
            public_key: wallet_address.to_string(),
            session: "wallet-session-9".to_string(),
        };
        let callback = wallet_callback(pairing.keypair().public(), &wallet, &response);

        let received = pairing.handle_callback(&callback).unwrap();
        assert_eq!(pairing.state(), PairingState::Paired);
        assert_eq!(received, response);
        assert_eq!(pairing.wallet_address(), Some(&wallet_address));
        assert_eq!(pairing.wallet_session(), Some("wallet-session-9"));
    }

    #[test]
    fn corrupted_callback_is_terminal() {
        let mut pairing = Pairing::new("app-session-2".to_string());
        pairing.connect_link(&connect_config()).unwrap();

        let wallet = KeyPair::generate();
        let response = ConnectResponse {
            public_key: Address::new([77u8; 32]).to_string(),
            session: "s".to_string(),
        };
        let mut callback = wallet_callback(pairing.keypair().public(), &wallet, &response);
        // Swap in a nonce that does not match the ciphertext.
        callback
            .query_pairs_mut()
            .append_pair("nonce", &bs58::encode(&[9u8; NONCE_LEN]).into_string());

        // Wrong-keypair decrypt also covered: tamper by replacing the data.
        let err = pairing.handle_callback(&callback);
        assert!(err.is_err());
        assert_eq!(pairing.state(), PairingState::Failed);

        // Terminal: even a valid callback is refused now.
        let valid = wallet_callback(pairing.keypair().public(), &wallet, &response);
        assert!(pairing.handle_callback(&valid).is_err());
        assert_eq!(pairing.state(), PairingState::Failed);
    }

    #[test]
    fn abandon_is_a_cancellation_not_an_error() {
        let mut pairing = Pairing::new("app-session-3".to_string());
        pairing.connect_link(&connect_config()).unwrap();
        pairing.abandon();
        assert_eq!(pairing.state(), PairingState::Abandoned);

        // A settled attempt is not clobbered by a late abandon.
        let mut paired = Pairing::new("app-session-4".to_string());
        paired.connect_link(&connect_config()).unwrap();
        let wallet = KeyPair::generate();
        let response = ConnectResponse {
            public_key: Address::new([7u8; 32]).to_string(),
            session: "s".to_string(),
        };
        let callback = wallet_callback(paired.keypair().public(), &wallet, &response);
        paired.handle_callback(&callback).unwrap();
        paired.abandon();
        assert_eq!(paired.state(), PairingState::Paired);
    }

    #[test]
    fn replayed_nonce_is_rejected_after_pairing() {
        let mut pairing = Pairing::new("app-session-5".to_string());
        pairing.connect_link(&connect_config()).unwrap();
        let wallet = KeyPair::generate();
        let response = ConnectResponse {
            public_key: Address::new([7u8; 32]).to_string(),
            session: "s".to_string(),
        };
        let callback = wallet_callback(pairing.keypair().public(), &wallet, &response);
        pairing.handle_callback(&callback).unwrap();

        // Wallet sends a follow-up payload; replaying it must fail.
        let key = wallet.shared_key(pairing.keypair().public());
        let envelope = encrypt(&serde_json::json!({"signature": "abc"}), &key).unwrap();
        let first: serde_json::Value = pairing.decrypt_payload(&envelope).unwrap();
        assert_eq!(first["signature"], "abc");
        let replay: Result<serde_json::Value> = pairing.decrypt_payload(&envelope);
        assert!(matches!(replay, Err(Error::DecryptionFailed)));
    }

    #[test]
    fn resume_continues_awaiting_callback() {
        let original = Pairing::new("app-session-6".to_string());
        let secret = original.keypair().secret_bytes();

        // Process restarted: rebuild from persisted material.
        let mut resumed = Pairing::resume(
            KeyPair::from_secret_bytes(secret),
            "app-session-6".to_string(),
        );
        assert_eq!(resumed.state(), PairingState::AwaitingCallback);

        let wallet = KeyPair::generate();
        let response = ConnectResponse {
            public_key: Address::new([7u8; 32]).to_string(),
            session: "s".to_string(),
        };
        let callback = wallet_callback(resumed.keypair().public(), &wallet, &response);
        resumed.handle_callback(&callback).unwrap();
        assert_eq!(resumed.state(), PairingState::Paired);
    }
}
