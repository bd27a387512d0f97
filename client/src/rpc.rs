//! Minimal JSON-RPC client: account fetch, latest blockhash, transaction
//! submission. Everything else the application needs arrives through the
//! subscription hub.

use std::sync::atomic::{AtomicU64, Ordering};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};
use skirmish_types::Address;
use url::Url;

use crate::tx::{Blockhash, Transaction};
use crate::{Error, Result};

/// Confirmation-depth guarantee requested for reads and subscriptions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Commitment {
    #[default]
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Finalized => "finalized",
        }
    }
}

/// HTTP JSON-RPC client for the ledger.
pub struct RpcClient {
    http: reqwest::Client,
    url: Url,
    commitment: Commitment,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(url: &str, commitment: Commitment) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::new(),
            url: Url::parse(url)?,
            commitment,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn commitment(&self) -> Commitment {
        self.commitment
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let response = self.http.post(self.url.clone()).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Rpc {
                code: status.as_u16() as i64,
                message: response.text().await.unwrap_or_default(),
            });
        }
        let payload: Value = response.json().await?;
        if let Some(err) = payload.get("error") {
            return Err(Error::Rpc {
                code: err.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
            });
        }
        payload
            .get("result")
            .cloned()
            .ok_or(Error::UnexpectedResponse("missing result"))
    }

    /// Fetch raw account data, or `None` if the account does not exist.
    pub async fn get_account(&self, address: &Address) -> Result<Option<Vec<u8>>> {
        let result = self
            .request(
                "getAccountInfo",
                json!([
                    address.to_string(),
                    {"encoding": "base64", "commitment": self.commitment.as_str()},
                ]),
            )
            .await?;
        let value = &result["value"];
        if value.is_null() {
            return Ok(None);
        }
        let data = value["data"][0]
            .as_str()
            .ok_or(Error::UnexpectedResponse("account data missing"))?;
        let bytes = BASE64
            .decode(data)
            .map_err(|_| Error::UnexpectedResponse("account data not base64"))?;
        Ok(Some(bytes))
    }

    /// Latest blockhash at the configured commitment.
    pub async fn latest_blockhash(&self) -> Result<Blockhash> {
        let result = self
            .request(
                "getLatestBlockhash",
                json!([{"commitment": self.commitment.as_str()}]),
            )
            .await?;
        let hash = result["value"]["blockhash"]
            .as_str()
            .ok_or(Error::UnexpectedResponse("missing blockhash"))?;
        Ok(hash.parse()?)
    }

    /// Submit a signed transaction, returning its signature.
    pub async fn send_transaction(&self, transaction: &Transaction) -> Result<String> {
        let encoded = BASE64.encode(transaction.serialize());
        let result = self
            .request(
                "sendTransaction",
                json!([
                    encoded,
                    {"encoding": "base64", "preflightCommitment": self.commitment.as_str()},
                ]),
            )
            .await?;
        result
            .as_str()
            .map(str::to_owned)
            .ok_or(Error::UnexpectedResponse("missing signature"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use std::net::SocketAddr;

    async fn serve(router: Router) -> (String, tokio::task::JoinHandle<()>) {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            axum::serve(listener, router.into_make_service())
                .await
                .unwrap();
        });
        (base_url, handle)
    }

    #[tokio::test]
    async fn get_account_decodes_base64_value() {
        let router = Router::new().route(
            "/",
            post(|Json(req): Json<Value>| async move {
                assert_eq!(req["method"], "getAccountInfo");
                assert_eq!(req["params"][1]["commitment"], "confirmed");
                Json(json!({
                    "jsonrpc": "2.0",
                    "id": req["id"],
                    "result": {"value": {"data": [BASE64.encode([1u8, 2, 3]), "base64"]}},
                }))
            }),
        );
        let (base_url, handle) = serve(router).await;

        let client = RpcClient::new(&base_url, Commitment::Confirmed).unwrap();
        let data = client.get_account(&Address::new([9; 32])).await.unwrap();
        assert_eq!(data, Some(vec![1, 2, 3]));
        handle.abort();
    }

    #[tokio::test]
    async fn get_account_missing_is_none() {
        let router = Router::new().route(
            "/",
            post(|Json(req): Json<Value>| async move {
                Json(json!({"jsonrpc": "2.0", "id": req["id"], "result": {"value": null}}))
            }),
        );
        let (base_url, handle) = serve(router).await;

        let client = RpcClient::new(&base_url, Commitment::Finalized).unwrap();
        let data = client.get_account(&Address::new([9; 32])).await.unwrap();
        assert_eq!(data, None);
        handle.abort();
    }

    #[tokio::test]
    async fn rpc_errors_surface_code_and_message() {
        let router = Router::new().route(
            "/",
            post(|Json(req): Json<Value>| async move {
                Json(json!({
                    "jsonrpc": "2.0",
                    "id": req["id"],
                    "error": {"code": -32602, "message": "invalid params"},
                }))
            }),
        );
        let (base_url, handle) = serve(router).await;

        let client = RpcClient::new(&base_url, Commitment::Confirmed).unwrap();
        let err = client
            .get_account(&Address::new([9; 32]))
            .await
            .expect_err("rpc error expected");
        let Error::Rpc { code, message } = err else {
            panic!("expected Rpc error, got {err:?}");
        };
        assert_eq!(code, -32602);
        assert_eq!(message, "invalid params");
        handle.abort();
    }

    #[tokio::test]
    async fn latest_blockhash_parses_base58() {
        let hash = Blockhash::new([7u8; 32]);
        let encoded = hash.to_string();
        let router = Router::new().route(
            "/",
            post(move |Json(req): Json<Value>| {
                let encoded = encoded.clone();
                async move {
                    Json(json!({
                        "jsonrpc": "2.0",
                        "id": req["id"],
                        "result": {"value": {"blockhash": encoded}},
                    }))
                }
            }),
        );
        let (base_url, handle) = serve(router).await;

        let client = RpcClient::new(&base_url, Commitment::Confirmed).unwrap();
        assert_eq!(client.latest_blockhash().await.unwrap(), hash);
        handle.abort();
    }
}
