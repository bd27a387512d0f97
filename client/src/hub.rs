//! Multi-account subscription hub.
//!
//! One tokio task owns the WebSocket connection and every id table: local
//! subscription ids handed to callers, in-flight request ids, and the
//! network-assigned subscription ids that notifications reference. Commands
//! and socket traffic interleave through a single `select!` loop, so the
//! tables are only ever touched by one writer at a time.
//!
//! Caller-visible subscription ids are stable across reconnects: when the
//! socket drops, network-side ids are invalidated and every live
//! subscription is re-issued against the new connection.

use std::collections::HashMap;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use rand::{rngs::StdRng, Rng as _, RngCore, SeedableRng};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

pub use skirmish_types::AccountKind;
use skirmish_types::{AccountRecord, Address};

use crate::rpc::Commitment;
use crate::{Error, Result};

const INITIAL_RECONNECT_DELAY: Duration = Duration::from_millis(250);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(8);

/// Caller-visible subscription identifier. Never reused within a hub.
pub type SubId = u64;

/// Events emitted by the hub.
#[derive(Debug)]
pub enum HubEvent {
    /// A subscribed account changed and decoded cleanly.
    Update {
        sub: SubId,
        kind: AccountKind,
        address: Address,
        record: AccountRecord,
    },
    /// A single subscription failed (decode error, subscribe rejection).
    /// The connection and all other subscriptions stay live.
    SubError {
        sub: SubId,
        address: Address,
        error: Error,
    },
}

enum Command {
    Subscribe {
        address: Address,
        kind: AccountKind,
        reply: oneshot::Sender<SubId>,
    },
    Unsubscribe(SubId),
}

/// Handle to the hub task. Dropping it tears down the connection and every
/// subscription.
pub struct SubscriptionHub {
    commands: mpsc::UnboundedSender<Command>,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for SubscriptionHub {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl SubscriptionHub {
    /// Spawn the hub against the ledger's notification endpoint. Returns the
    /// handle and the event stream.
    pub fn connect(
        url: Url,
        commitment: Commitment,
    ) -> (Self, mpsc::UnboundedReceiver<HubEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(url, commitment, cmd_rx, event_tx));
        (
            Self {
                commands: cmd_tx,
                task,
            },
            event_rx,
        )
    }

    /// Register interest in an account. The returned id stays valid until
    /// [`SubscriptionHub::unsubscribe`], even across reconnects.
    pub async fn subscribe(&self, address: Address, kind: AccountKind) -> Result<SubId> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Subscribe {
                address,
                kind,
                reply: reply_tx,
            })
            .map_err(|_| Error::HubClosed)?;
        reply_rx.await.map_err(|_| Error::HubClosed)
    }

    /// Drop interest in a subscription. Safe to call with an id whose
    /// acknowledgment is still in flight; the late ack is cleaned up.
    pub fn unsubscribe(&self, sub: SubId) {
        let _ = self.commands.send(Command::Unsubscribe(sub));
    }
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct SubEntry {
    address: Address,
    kind: AccountKind,
    network_id: Option<u64>,
}

enum PendingRequest {
    Subscribe(SubId),
    Unsubscribe,
}

struct HubState {
    commitment: Commitment,
    events: mpsc::UnboundedSender<HubEvent>,
    subs: HashMap<SubId, SubEntry>,
    pending: HashMap<u64, PendingRequest>,
    by_network: HashMap<u64, SubId>,
    next_request: u64,
    next_sub: u64,
}

// "Equal jitter": delay is in [backoff/2, backoff].
fn jittered_backoff(rng: &mut impl RngCore, backoff: Duration) -> Duration {
    let backoff_ms = backoff.as_millis() as u64;
    if backoff_ms <= 1 {
        return backoff;
    }
    let half_ms = backoff_ms / 2;
    let jitter_ms = rng.gen_range(0..=half_ms);
    Duration::from_millis(half_ms.saturating_add(jitter_ms))
}

async fn run(
    url: Url,
    commitment: Commitment,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<HubEvent>,
) {
    let mut state = HubState {
        commitment,
        events,
        subs: HashMap::new(),
        pending: HashMap::new(),
        by_network: HashMap::new(),
        next_request: 1,
        next_sub: 1,
    };
    let mut rng = StdRng::from_entropy();
    let mut backoff = INITIAL_RECONNECT_DELAY;

    loop {
        let mut ws = match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                info!(url = %url, "subscription socket connected");
                backoff = INITIAL_RECONNECT_DELAY;
                ws
            }
            Err(err) => {
                warn!(error = %err, "subscription socket connect failed");
                let delay = jittered_backoff(&mut rng, backoff);
                backoff = (backoff * 2).min(MAX_RECONNECT_DELAY);
                if !wait_for_retry(delay, &mut commands, &mut state).await {
                    return;
                }
                continue;
            }
        };

        // Fresh connection: every network-side id from the old one is void.
        state.reset_connection();
        if state.resubscribe_all(&mut ws).await.is_err() {
            continue;
        }

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => {
                        if state.handle_command(&mut ws, cmd).await.is_err() {
                            break;
                        }
                    }
                    // All handles dropped; tear down.
                    None => return,
                },
                msg = ws.next() => match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        if state.handle_message(&mut ws, &text).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        warn!("subscription socket closed by peer");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(error = %err, "subscription socket error");
                        break;
                    }
                },
            }
        }

        warn!(
            subscriptions = state.subs.len(),
            "connection lost, re-establishing subscriptions"
        );
        state.notify_connection_lost();
    }
}

/// Sleep out a reconnect delay while still servicing commands. Returns
/// `false` when the command channel closed (hub dropped).
async fn wait_for_retry(
    delay: Duration,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    state: &mut HubState,
) -> bool {
    let deadline = tokio::time::Instant::now() + delay;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return true,
            cmd = commands.recv() => match cmd {
                Some(cmd) => state.handle_command_offline(cmd),
                None => return false,
            },
        }
    }
}

impl HubState {
    /// Connection-level failure is hub-wide: every live subscription is
    /// reported as re-establishing.
    fn notify_connection_lost(&mut self) {
        for (sub, entry) in &self.subs {
            let _ = self.events.send(HubEvent::SubError {
                sub: *sub,
                address: entry.address,
                error: Error::ConnectionLost,
            });
        }
    }

    fn reset_connection(&mut self) {
        self.by_network.clear();
        self.pending.clear();
        for entry in self.subs.values_mut() {
            entry.network_id = None;
        }
    }

    fn allocate(&mut self, address: Address, kind: AccountKind) -> SubId {
        let sub = self.next_sub;
        self.next_sub += 1;
        self.subs.insert(
            sub,
            SubEntry {
                address,
                kind,
                network_id: None,
            },
        );
        sub
    }

    /// Command handling while disconnected: ids are allocated immediately;
    /// the socket work happens on reconnect.
    fn handle_command_offline(&mut self, cmd: Command) {
        match cmd {
            Command::Subscribe {
                address,
                kind,
                reply,
            } => {
                let sub = self.allocate(address, kind);
                let _ = reply.send(sub);
            }
            Command::Unsubscribe(sub) => {
                self.subs.remove(&sub);
            }
        }
    }

    async fn handle_command(&mut self, ws: &mut Socket, cmd: Command) -> Result<()> {
        match cmd {
            Command::Subscribe {
                address,
                kind,
                reply,
            } => {
                let sub = self.allocate(address, kind);
                let _ = reply.send(sub);
                self.send_subscribe(ws, sub, address).await
            }
            Command::Unsubscribe(sub) => {
                let Some(entry) = self.subs.remove(&sub) else {
                    return Ok(());
                };
                if let Some(network_id) = entry.network_id {
                    self.by_network.remove(&network_id);
                    self.send_unsubscribe(ws, network_id).await?;
                }
                // No network id yet: either no connection, or the ack is in
                // flight and will be cleaned up when it lands.
                Ok(())
            }
        }
    }

    async fn resubscribe_all(&mut self, ws: &mut Socket) -> Result<()> {
        let live: Vec<(SubId, Address)> = self
            .subs
            .iter()
            .map(|(sub, entry)| (*sub, entry.address))
            .collect();
        for (sub, address) in live {
            self.send_subscribe(ws, sub, address).await?;
        }
        Ok(())
    }

    async fn send_subscribe(&mut self, ws: &mut Socket, sub: SubId, address: Address) -> Result<()> {
        let request_id = self.next_request;
        self.next_request += 1;
        self.pending.insert(request_id, PendingRequest::Subscribe(sub));
        let request = json!({
            "jsonrpc": "2.0",
            "id": request_id,
            "method": "accountSubscribe",
            "params": [
                address.to_string(),
                {"encoding": "jsonParsed", "commitment": self.commitment.as_str()},
            ],
        });
        debug!(sub, request_id, %address, "subscribing");
        ws.send(WsMessage::Text(request.to_string())).await?;
        Ok(())
    }

    async fn send_unsubscribe(&mut self, ws: &mut Socket, network_id: u64) -> Result<()> {
        let request_id = self.next_request;
        self.next_request += 1;
        self.pending.insert(request_id, PendingRequest::Unsubscribe);
        let request = json!({
            "jsonrpc": "2.0",
            "id": request_id,
            "method": "accountUnsubscribe",
            "params": [network_id],
        });
        debug!(network_id, request_id, "unsubscribing");
        ws.send(WsMessage::Text(request.to_string())).await?;
        Ok(())
    }

    async fn handle_message(&mut self, ws: &mut Socket, text: &str) -> Result<()> {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "undecodable message on subscription socket");
                return Ok(());
            }
        };

        if let Some(id) = value.get("id").and_then(Value::as_u64) {
            return self.handle_ack(ws, id, &value).await;
        }

        match value.get("method").and_then(Value::as_str) {
            Some("accountNotification") => self.handle_notification(&value),
            other => {
                debug!(method = ?other, "ignoring message on subscription socket");
            }
        }
        Ok(())
    }

    async fn handle_ack(&mut self, ws: &mut Socket, id: u64, value: &Value) -> Result<()> {
        match self.pending.remove(&id) {
            Some(PendingRequest::Subscribe(sub)) => {
                if let Some(err) = value.get("error") {
                    let message = err
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string();
                    let code = err.get("code").and_then(Value::as_i64).unwrap_or(0);
                    warn!(sub, code, reason = %message, "subscribe rejected");
                    if let Some(entry) = self.subs.remove(&sub) {
                        let _ = self.events.send(HubEvent::SubError {
                            sub,
                            address: entry.address,
                            error: Error::Rpc { code, message },
                        });
                    }
                    return Ok(());
                }
                let Some(network_id) = value.get("result").and_then(Value::as_u64) else {
                    warn!(sub, "subscribe ack without numeric result");
                    return Ok(());
                };
                match self.subs.get_mut(&sub) {
                    Some(entry) => {
                        entry.network_id = Some(network_id);
                        self.by_network.insert(network_id, sub);
                        debug!(sub, network_id, "subscription established");
                    }
                    None => {
                        // Cancelled before the ack arrived: release the
                        // network-side subscription instead of leaking it.
                        debug!(network_id, "ack for cancelled subscription");
                        self.send_unsubscribe(ws, network_id).await?;
                    }
                }
                Ok(())
            }
            Some(PendingRequest::Unsubscribe) => Ok(()),
            None => {
                warn!(id, "ack for unknown request id, dropping");
                Ok(())
            }
        }
    }

    fn handle_notification(&mut self, value: &Value) {
        let params = &value["params"];
        let Some(network_id) = params.get("subscription").and_then(Value::as_u64) else {
            warn!("notification without subscription id, dropping");
            return;
        };
        let Some(&sub) = self.by_network.get(&network_id) else {
            warn!(network_id, "notification for unknown subscription, dropping");
            return;
        };
        let Some(entry) = self.subs.get(&sub) else {
            warn!(sub, "notification for removed subscription, dropping");
            return;
        };

        let data = params["result"]["value"]["data"][0].as_str();
        let bytes = match data.map(|d| BASE64.decode(d)) {
            Some(Ok(bytes)) => bytes,
            Some(Err(_)) | None => {
                warn!(sub, address = %entry.address, "notification with malformed account data");
                let _ = self.events.send(HubEvent::SubError {
                    sub,
                    address: entry.address,
                    error: Error::UnexpectedResponse("malformed account data in notification"),
                });
                return;
            }
        };

        match AccountRecord::decode(entry.kind, &bytes) {
            Ok(record) => {
                let _ = self.events.send(HubEvent::Update {
                    sub,
                    kind: entry.kind,
                    address: entry.address,
                    record,
                });
            }
            Err(err) => {
                // One bad account payload never takes down the connection.
                warn!(sub, address = %entry.address, error = %err, "account decode failed");
                let _ = self.events.send(HubEvent::SubError {
                    sub,
                    address: entry.address,
                    error: err.into(),
                });
            }
        }
    }
}
