//! Latest-snapshot cache over the subscription hub.
//!
//! One entry per (kind, address) holding the most recent decoded record.
//! Merge policy is last-write-wins by arrival order; callers needing
//! stricter ordering consult the record's own monotonic fields (round
//! state, turn indices). Interest is reference-counted: the first watcher
//! for an address establishes the hub subscription and dropping the last
//! one releases it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use skirmish_types::{AccountKind, AccountRecord, Address};

use crate::hub::{HubEvent, SubId, SubscriptionHub};
use crate::{Error, Result};

type Key = (AccountKind, Address);

struct Entry {
    sub: SubId,
    watchers: usize,
    tx: watch::Sender<Option<AccountRecord>>,
}

struct Inner {
    hub: SubscriptionHub,
    entries: Mutex<HashMap<Key, Entry>>,
}

/// Snapshot store and watch fan-out for subscribed accounts.
pub struct StateStore {
    inner: Arc<Inner>,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for StateStore {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl StateStore {
    /// Wrap a hub and its event stream.
    pub fn new(hub: SubscriptionHub, events: mpsc::UnboundedReceiver<HubEvent>) -> Self {
        let inner = Arc::new(Inner {
            hub,
            entries: Mutex::new(HashMap::new()),
        });
        let task = tokio::spawn(consume(Arc::clone(&inner), events));
        Self { inner, task }
    }

    /// Latest decoded snapshot, if any update has arrived.
    pub fn snapshot(&self, kind: AccountKind, address: Address) -> Option<AccountRecord> {
        let entries = self.inner.entries.lock().ok()?;
        entries
            .get(&(kind, address))
            .and_then(|entry| entry.tx.borrow().clone())
    }

    /// Watch an account. Joins the existing subscription when one is live.
    pub async fn watch(&self, kind: AccountKind, address: Address) -> Result<WatchHandle> {
        let key = (kind, address);
        if let Some(handle) = self.join_existing(key) {
            return Ok(handle);
        }

        // No live entry: establish the subscription, then publish the entry.
        let sub = self.inner.hub.subscribe(address, kind).await?;
        let (tx, rx) = watch::channel(None);
        let mut entries = self
            .inner
            .entries
            .lock()
            .map_err(|_| Error::HubClosed)?;
        if let Some(entry) = entries.get_mut(&key) {
            // Another watcher raced us; keep its subscription.
            entry.watchers += 1;
            let rx = entry.tx.subscribe();
            drop(entries);
            self.inner.hub.unsubscribe(sub);
            return Ok(WatchHandle {
                rx,
                key,
                inner: Arc::clone(&self.inner),
            });
        }
        entries.insert(
            key,
            Entry {
                sub,
                watchers: 1,
                tx,
            },
        );
        drop(entries);
        Ok(WatchHandle {
            rx,
            key,
            inner: Arc::clone(&self.inner),
        })
    }

    fn join_existing(&self, key: Key) -> Option<WatchHandle> {
        let mut entries = self.inner.entries.lock().ok()?;
        let entry = entries.get_mut(&key)?;
        entry.watchers += 1;
        Some(WatchHandle {
            rx: entry.tx.subscribe(),
            key,
            inner: Arc::clone(&self.inner),
        })
    }
}

/// Live view of one account. Dropping the handle releases the interest;
/// the last drop unsubscribes from the hub.
pub struct WatchHandle {
    rx: watch::Receiver<Option<AccountRecord>>,
    key: Key,
    inner: Arc<Inner>,
}

impl WatchHandle {
    pub fn current(&self) -> Option<AccountRecord> {
        self.rx.borrow().clone()
    }

    /// Wait for the next snapshot change.
    pub async fn changed(&mut self) -> Result<Option<AccountRecord>> {
        self.rx.changed().await.map_err(|_| Error::HubClosed)?;
        Ok(self.rx.borrow_and_update().clone())
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        let Ok(mut entries) = self.inner.entries.lock() else {
            return;
        };
        let Some(entry) = entries.get_mut(&self.key) else {
            return;
        };
        entry.watchers -= 1;
        if entry.watchers == 0 {
            let sub = entry.sub;
            entries.remove(&self.key);
            drop(entries);
            self.inner.hub.unsubscribe(sub);
        }
    }
}

async fn consume(inner: Arc<Inner>, mut events: mpsc::UnboundedReceiver<HubEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            HubEvent::Update {
                kind,
                address,
                record,
                ..
            } => {
                let Ok(entries) = inner.entries.lock() else {
                    return;
                };
                match entries.get(&(kind, address)) {
                    Some(entry) => {
                        // Last write wins by arrival order.
                        let _ = entry.tx.send(Some(record));
                    }
                    None => {
                        debug!(%address, "update for address with no watchers, dropping");
                    }
                }
            }
            HubEvent::SubError { address, error, .. } => {
                // The previous snapshot stays; consumers retry via RPC if
                // they need fresh data immediately.
                warn!(%address, error = %error, "subscription error");
            }
        }
    }
}
