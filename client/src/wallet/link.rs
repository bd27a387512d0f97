//! Deep-link construction and redirect-callback parsing.

use std::borrow::Cow;

use url::Url;
use x25519_dalek::PublicKey;

use super::NONCE_LEN;
use crate::{Error, Result};

/// Configuration for the outbound connect link.
#[derive(Clone, Debug)]
pub struct ConnectLink {
    /// The wallet's universal-link connect endpoint.
    pub base: Url,
    /// Identifies the dapp to the wallet.
    pub app_url: Url,
    /// Callback the wallet redirects to; the app session token is embedded
    /// here so the callback can be matched to the attempt that produced it.
    pub redirect: Url,
    /// Network cluster name.
    pub cluster: String,
}

pub(super) fn build_connect_link(
    config: &ConnectLink,
    dapp_public_key: &PublicKey,
    session_token: &str,
) -> Url {
    let mut redirect = config.redirect.clone();
    redirect
        .query_pairs_mut()
        .append_pair("session", session_token);

    let mut url = config.base.clone();
    url.query_pairs_mut()
        .append_pair("app_url", config.app_url.as_str())
        .append_pair(
            "dapp_encryption_public_key",
            &bs58::encode(dapp_public_key.as_bytes()).into_string(),
        )
        .append_pair("redirect_link", redirect.as_str())
        .append_pair("cluster", &config.cluster);
    url
}

/// Decoded callback parameters.
pub struct CallbackParams {
    pub wallet_public_key: PublicKey,
    pub nonce: [u8; NONCE_LEN],
    pub data: Vec<u8>,
}

/// Parse a redirect callback URL.
///
/// Wallets differ in how they deliver the parameters: named pairs (`data`,
/// `nonce`, `wallet_encryption_public_key`) in the query or the fragment,
/// or the compact underscore-joined `{data}_{publicKey}_{nonce}` form.
/// All encodings are accepted; each component is base-58.
pub fn parse_callback(url: &Url) -> Result<CallbackParams> {
    if let Some(result) = from_named(url.query_pairs()) {
        return result;
    }
    if let Some(fragment) = url.fragment() {
        let pairs = url::form_urlencoded::parse(fragment.as_bytes());
        if let Some(result) = from_named(pairs) {
            return result;
        }
        if let Some(result) = from_compact(fragment) {
            return result;
        }
    }
    if let Some(query) = url.query() {
        if let Some(result) = from_compact(query) {
            return result;
        }
    }
    Err(Error::MalformedCallback("no pairing parameters found"))
}

fn from_named<'a>(
    pairs: impl Iterator<Item = (Cow<'a, str>, Cow<'a, str>)>,
) -> Option<Result<CallbackParams>> {
    let mut data = None;
    let mut nonce = None;
    let mut public_key = None;
    for (key, value) in pairs {
        match key.as_ref() {
            "data" => data = Some(value.into_owned()),
            "nonce" => nonce = Some(value.into_owned()),
            "wallet_encryption_public_key" | "phantom_encryption_public_key" => {
                public_key = Some(value.into_owned())
            }
            _ => {}
        }
    }
    match (data, public_key, nonce) {
        (Some(data), Some(public_key), Some(nonce)) => Some(decode(&data, &public_key, &nonce)),
        (None, None, None) => None,
        _ => Some(Err(Error::MalformedCallback(
            "incomplete named callback parameters",
        ))),
    }
}

fn from_compact(raw: &str) -> Option<Result<CallbackParams>> {
    let mut parts = raw.split('_');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(data), Some(public_key), Some(nonce), None) => {
            Some(decode(data, public_key, nonce))
        }
        _ => None,
    }
}

fn decode(data: &str, public_key: &str, nonce: &str) -> Result<CallbackParams> {
    let data = bs58::decode(data)
        .into_vec()
        .map_err(|_| Error::MalformedCallback("data is not base-58"))?;
    let public_key: [u8; 32] = bs58::decode(public_key)
        .into_vec()
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(Error::MalformedCallback("public key is not a 32-byte base-58 value"))?;
    let nonce: [u8; NONCE_LEN] = bs58::decode(nonce)
        .into_vec()
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(Error::MalformedCallback("nonce is not a 24-byte base-58 value"))?;
    Ok(CallbackParams {
        wallet_public_key: PublicKey::from(public_key),
        nonce,
        data,
    })
}
