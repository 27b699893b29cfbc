//! Bookkeeping for peer servers: greetings, outstanding queries and the
//! outgoing rumor buffer.

use pop_types::jsonrpc::GreetServerParams;
use pop_types::{Message, MessageBatch};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// A query this server sent and still expects an answer for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingQuery {
    GetMessagesById { session: Uuid },
}

#[derive(Default)]
struct RumorBuffer {
    next_id: i64,
    batch: MessageBatch,
}

#[derive(Default)]
struct Inner {
    peers: HashMap<Uuid, GreetServerParams>,
    greeted: HashSet<Uuid>,
    pending: HashMap<i64, PendingQuery>,
    rumor: RumorBuffer,
}

#[derive(Clone, Default)]
pub struct PeerState {
    inner: Arc<Mutex<Inner>>,
    next_query_id: Arc<AtomicI64>,
}

impl PeerState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Records the peer info announced by a session. Returns `true` the first
    /// time the session greets.
    pub fn record_peer(&self, session: Uuid, info: GreetServerParams) -> bool {
        self.lock().peers.insert(session, info).is_none()
    }

    /// Marks that our own greeting went out to `session`. Returns `true`
    /// only the first time, so greetings are sent at most once per peer.
    pub fn mark_greeted(&self, session: Uuid) -> bool {
        self.lock().greeted.insert(session)
    }

    pub fn remove_session(&self, session: Uuid) {
        let mut inner = self.lock();
        inner.peers.remove(&session);
        inner.greeted.remove(&session);
        inner.pending.retain(|_, query| match query {
            PendingQuery::GetMessagesById { session: s } => *s != session,
        });
    }

    pub fn peer(&self, session: Uuid) -> Option<GreetServerParams> {
        self.lock().peers.get(&session).cloned()
    }

    /// Client addresses of every greeted peer, deduplicated and sorted.
    pub fn peer_client_addresses(&self) -> Vec<String> {
        let inner = self.lock();
        let mut addresses: Vec<String> = inner
            .peers
            .values()
            .map(|p| p.client_address.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        addresses.sort();
        addresses
    }

    pub fn next_query_id(&self) -> i64 {
        self.next_query_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn add_pending(&self, id: i64, query: PendingQuery) {
        self.lock().pending.insert(id, query);
    }

    pub fn take_pending(&self, id: i64) -> Option<PendingQuery> {
        self.lock().pending.remove(&id)
    }

    /// Sets the id the next outgoing rumor will carry.
    pub fn set_next_rumor_id(&self, next_id: i64) {
        self.lock().rumor.next_id = next_id;
    }

    /// Queues a locally accepted message for the next outgoing rumor.
    pub fn buffer_rumor_message(&self, channel: &str, message: Message) {
        self.lock()
            .rumor
            .batch
            .entry(channel.to_string())
            .or_default()
            .push(message);
    }

    /// Takes the buffered batch with a fresh rumor id, or `None` if nothing
    /// is buffered.
    pub fn take_rumor(&self) -> Option<(i64, MessageBatch)> {
        let mut inner = self.lock();
        if inner.rumor.batch.is_empty() {
            return None;
        }
        let batch = std::mem::take(&mut inner.rumor.batch);
        let id = inner.rumor.next_id;
        inner.rumor.next_id += 1;
        Some((id, batch))
    }
}
