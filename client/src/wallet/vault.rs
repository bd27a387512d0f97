//! Durable pairing and session state in the host key-value store.
//!
//! The handshake is out-of-band: the process may be killed between opening
//! the deep link and receiving the redirect. Key material for an in-flight
//! attempt therefore lives here, keyed exactly as the host persists it.
//! Secret material is removed on explicit disconnect; the last known wallet
//! address survives as a convenience bookmark.

use std::sync::Arc;

use x25519_dalek::PublicKey;

use skirmish_types::{Address, IdToken};

use crate::storage::KvStore;

use super::KeyPair;

const KEY_WALLET_ADDRESS: &str = "wallet.address";
const KEY_SESSION_TOKEN: &str = "wallet.session_token";
const KEY_SECRET_KEY: &str = "wallet.secret_key";
const KEY_PUBLIC_KEY: &str = "wallet.public_key";
const KEY_PEER_PUBLIC_KEY: &str = "wallet.peer_public_key";
const KEY_LAST_GAME: &str = "app.last_game";
const KEY_LAST_ROUND: &str = "app.last_round";

/// Persistence facade over the injected host store.
pub struct WalletVault {
    store: Arc<dyn KvStore>,
}

impl WalletVault {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Persist an in-flight pairing attempt so it survives restart.
    pub fn save_pairing(&self, keypair: &KeyPair, session_token: &str) {
        self.store.set(
            KEY_SECRET_KEY,
            &bs58::encode(&keypair.secret_bytes()).into_string(),
        );
        self.store.set(
            KEY_PUBLIC_KEY,
            &bs58::encode(keypair.public().as_bytes()).into_string(),
        );
        self.store.set(KEY_SESSION_TOKEN, session_token);
    }

    /// Restore an in-flight pairing attempt, if one was persisted.
    pub fn load_pairing(&self) -> Option<(KeyPair, String)> {
        let secret = self.store.get(KEY_SECRET_KEY)?;
        let session_token = self.store.get(KEY_SESSION_TOKEN)?;
        let secret: [u8; 32] = bs58::decode(&secret)
            .into_vec()
            .ok()?
            .try_into()
            .ok()?;
        Some((KeyPair::from_secret_bytes(secret), session_token))
    }

    /// Record a successful pairing: wallet address, wallet-issued session
    /// token, and the wallet's encryption public key.
    pub fn save_session(&self, wallet: &Address, session: &str, peer: &PublicKey) {
        self.store.set(KEY_WALLET_ADDRESS, &wallet.to_string());
        self.store.set(KEY_SESSION_TOKEN, session);
        self.store.set(
            KEY_PEER_PUBLIC_KEY,
            &bs58::encode(peer.as_bytes()).into_string(),
        );
    }

    pub fn wallet_address(&self) -> Option<Address> {
        self.store.get(KEY_WALLET_ADDRESS)?.parse().ok()
    }

    pub fn session(&self) -> Option<String> {
        self.store.get(KEY_SESSION_TOKEN)
    }

    pub fn peer_public_key(&self) -> Option<PublicKey> {
        let bytes: [u8; 32] = bs58::decode(&self.store.get(KEY_PEER_PUBLIC_KEY)?)
            .into_vec()
            .ok()?
            .try_into()
            .ok()?;
        Some(PublicKey::from(bytes))
    }

    /// Explicit disconnect: secret material and the session are erased.
    /// The last known wallet address stays for display purposes.
    pub fn disconnect(&self) {
        self.store.remove(KEY_SECRET_KEY);
        self.store.remove(KEY_PUBLIC_KEY);
        self.store.remove(KEY_SESSION_TOKEN);
        self.store.remove(KEY_PEER_PUBLIC_KEY);
    }

    pub fn set_last_game(&self, id: &IdToken) {
        self.store.set(KEY_LAST_GAME, id.as_str());
    }

    pub fn last_game(&self) -> Option<IdToken> {
        self.store.get(KEY_LAST_GAME)?.parse().ok()
    }

    pub fn set_last_round(&self, id: &IdToken) {
        self.store.set(KEY_LAST_ROUND, id.as_str());
    }

    pub fn last_round(&self) -> Option<IdToken> {
        self.store.get(KEY_LAST_ROUND)?.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn vault() -> WalletVault {
        WalletVault::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn pairing_material_survives_reload() {
        let vault = vault();
        let keypair = KeyPair::generate();
        vault.save_pairing(&keypair, "token-5");

        let (restored, token) = vault.load_pairing().unwrap();
        assert_eq!(token, "token-5");
        assert_eq!(restored.public().as_bytes(), keypair.public().as_bytes());
    }

    #[test]
    fn disconnect_clears_secrets_but_keeps_last_wallet() {
        let vault = vault();
        let keypair = KeyPair::generate();
        let peer = KeyPair::generate();
        let wallet = Address::new([5u8; 32]);

        vault.save_pairing(&keypair, "token-1");
        vault.save_session(&wallet, "wallet-session", peer.public());
        assert_eq!(vault.session().as_deref(), Some("wallet-session"));
        assert!(vault.peer_public_key().is_some());

        vault.disconnect();
        assert!(vault.load_pairing().is_none());
        assert!(vault.session().is_none());
        assert!(vault.peer_public_key().is_none());
        assert_eq!(vault.wallet_address(), Some(wallet));
    }

    #[test]
    fn game_and_round_bookmarks_roundtrip() {
        let vault = vault();
        assert!(vault.last_game().is_none());
        let game: IdToken = "01HZX3V9K2M4N6P8Q0R2S4T6V8".parse().unwrap();
        let round: IdToken = "01HZX3VAB2M4N6P8Q0R2S4T6V9".parse().unwrap();
        vault.set_last_game(&game);
        vault.set_last_round(&round);
        assert_eq!(vault.last_game(), Some(game));
        assert_eq!(vault.last_round(), Some(round));
    }
}
