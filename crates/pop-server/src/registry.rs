//! In-memory index of channels, sessions and subscriptions.

use pop_types::jsonrpc::{Method, PublishParams, Query};
use pop_types::{ChannelPath, Message, PopError};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Which endpoint a session came through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    Client,
    Server,
}

struct Session {
    kind: ConnectionKind,
    sender: mpsc::Sender<String>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<Uuid, Session>,
    /// Declared channel -> subscribed sessions.
    channels: HashMap<String, HashSet<Uuid>>,
}

/// Channel and subscriber registry shared by every connection.
///
/// Uses `std::sync::RwLock`: every acquisition is a short map operation that
/// never spans an `.await`, and the dispatcher calls in from blocking tasks.
/// Subscribe, unsubscribe and add-channel take the write path; broadcasts
/// take the read path.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a connection and returns its session id.
    pub fn add_session(&self, kind: ConnectionKind, sender: mpsc::Sender<String>) -> Uuid {
        let id = Uuid::new_v4();
        self.write().sessions.insert(id, Session { kind, sender });
        id
    }

    /// Drops a session and all of its subscriptions.
    pub fn remove_session(&self, id: Uuid) {
        let mut inner = self.write();
        inner.sessions.remove(&id);
        for subscribers in inner.channels.values_mut() {
            subscribers.remove(&id);
        }
    }

    pub fn session_kind(&self, id: Uuid) -> Option<ConnectionKind> {
        self.read().sessions.get(&id).map(|s| s.kind)
    }

    /// Declares a channel. Returns `false` if it was already known.
    pub fn add_channel(&self, path: &str) -> bool {
        let mut inner = self.write();
        if inner.channels.contains_key(path) {
            return false;
        }
        inner.channels.insert(path.to_string(), HashSet::new());
        true
    }

    pub fn has_channel(&self, path: &str) -> bool {
        self.read().channels.contains_key(path)
    }

    pub fn subscribe(&self, id: Uuid, channel: &str) -> Result<(), PopError> {
        if ChannelPath::new(channel).is_root() {
            return Err(PopError::invalid_resource("cannot subscribe to the root channel"));
        }
        let mut inner = self.write();
        let subscribers = inner
            .channels
            .get_mut(channel)
            .ok_or_else(|| PopError::invalid_resource(format!("unknown channel {channel}")))?;
        subscribers.insert(id);
        Ok(())
    }

    pub fn unsubscribe(&self, id: Uuid, channel: &str) -> Result<(), PopError> {
        if ChannelPath::new(channel).is_root() {
            return Err(PopError::invalid_resource(
                "cannot unsubscribe from the root channel",
            ));
        }
        let mut inner = self.write();
        let subscribers = inner
            .channels
            .get_mut(channel)
            .ok_or_else(|| PopError::invalid_resource(format!("unknown channel {channel}")))?;
        if !subscribers.remove(&id) {
            return Err(PopError::invalid_resource(format!(
                "not subscribed to {channel}"
            )));
        }
        Ok(())
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.read().channels.get(channel).map_or(0, HashSet::len)
    }

    fn fan_out(&self, channel: &str, text: &str) -> usize {
        let inner = self.read();
        let Some(subscribers) = inner.channels.get(channel) else {
            return 0;
        };
        let mut delivered = 0;
        for id in subscribers {
            if let Some(session) = inner.sessions.get(id) {
                match session.sender.try_send(text.to_string()) {
                    Ok(()) => delivered += 1,
                    Err(e) => tracing::warn!(
                        session = %id,
                        channel = %channel,
                        "dropping broadcast for slow consumer: {}",
                        e
                    ),
                }
            }
        }
        delivered
    }

    /// Sends a `broadcast` notification for `message` to every subscriber
    /// of `channel`.
    pub fn broadcast(&self, channel: &str, message: &Message) -> usize {
        let query = Query::new(
            None,
            Method::Broadcast(PublishParams {
                channel: channel.to_string(),
                message: message.clone(),
            }),
        );
        match query.to_json() {
            Ok(text) => self.fan_out(channel, &text),
            Err(e) => {
                tracing::error!(channel = %channel, "failed to serialize broadcast: {}", e);
                0
            }
        }
    }

    /// Publishes `message` on `channel` to the subscribed sessions, which are
    /// expected to be peer servers owning that channel.
    pub fn publish_to(&self, channel: &str, message: &Message, query_id: i64) -> usize {
        let query = Query::new(
            Some(query_id),
            Method::Publish(PublishParams {
                channel: channel.to_string(),
                message: message.clone(),
            }),
        );
        match query.to_json() {
            Ok(text) => self.fan_out(channel, &text),
            Err(e) => {
                tracing::error!(channel = %channel, "failed to serialize publish: {}", e);
                0
            }
        }
    }

    /// Sends a raw frame to one session.
    pub fn send_to(&self, id: Uuid, text: String) -> bool {
        let inner = self.read();
        let Some(session) = inner.sessions.get(&id) else {
            return false;
        };
        match session.sender.try_send(text) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(session = %id, "dropping direct frame for slow consumer: {}", e);
                false
            }
        }
    }

    /// Sends a raw frame to every server session except `except`.
    pub fn send_to_servers(&self, text: &str, except: Option<Uuid>) -> usize {
        let inner = self.read();
        let mut delivered = 0;
        for (id, session) in &inner.sessions {
            if session.kind != ConnectionKind::Server || Some(*id) == except {
                continue;
            }
            match session.sender.try_send(text.to_string()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(session = %id, "dropping frame for slow peer: {}", e)
                }
            }
        }
        delivered
    }

    pub fn server_sessions(&self) -> Vec<Uuid> {
        self.read()
            .sessions
            .iter()
            .filter(|(_, s)| s.kind == ConnectionKind::Server)
            .map(|(id, _)| *id)
            .collect()
    }
}
