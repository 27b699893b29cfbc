#![allow(dead_code)]

use pop_crypto::KeyPair;
use pop_server::config::Config;
use pop_server::dispatcher::Handled;
use pop_server::outbound::LinkRequest;
use pop_server::AppState;
use pop_types::channel::lao_channel;
use pop_types::data::{LaoCreate, RollCallClose, RollCallCreate, RollCallOpen};
use pop_types::{hash, Message, MessageData, PopError, ROOT_CHANNEL};
use std::sync::Arc;
use tokio::sync::mpsc;

pub fn memory_state_with(config: &Config) -> (Arc<AppState>, mpsc::Receiver<LinkRequest>) {
    let pool = pop_db::create_pool(":memory:", pop_db::DbRuntimeSettings::default()).unwrap();
    {
        let conn = pool.get().unwrap();
        pop_db::run_migrations(&conn).unwrap();
    }
    let (state, links) = AppState::new(pool, config).unwrap();
    (Arc::new(state), links)
}

pub fn memory_state() -> Arc<AppState> {
    memory_state_with(&Config::default()).0
}

pub fn sign(keys: &KeyPair, data: MessageData) -> Message {
    keys.sign_message(&data).unwrap()
}

pub fn publish(state: &AppState, channel: &str, message: &Message) -> Result<Handled, PopError> {
    state.dispatcher.handle(channel, message, false)
}

/// Messages stored on a channel, in storage order.
pub fn catchup(state: &AppState, channel: &str) -> Vec<Message> {
    let conn = state.pool.get().unwrap();
    pop_channels::catchup(&conn, channel).unwrap()
}

pub fn actions(messages: &[Message]) -> Vec<(&'static str, &'static str)> {
    messages
        .iter()
        .map(|m| m.parse_data().unwrap().object_action())
        .collect()
}

/// A LAO created by a fresh organizer.
pub struct TestLao {
    pub organizer: KeyPair,
    pub id: String,
    pub path: String,
    pub creation: i64,
}

impl TestLao {
    pub fn new(name: &str, creation: i64, witnesses: Vec<String>) -> (Self, Message) {
        let organizer = KeyPair::generate();
        let id = hash(&[
            organizer.public_key().as_str(),
            creation.to_string().as_str(),
            name,
        ]);
        let create = sign(
            &organizer,
            MessageData::LaoCreate(LaoCreate {
                id: id.clone(),
                name: name.to_string(),
                creation,
                organizer: organizer.public_key(),
                witnesses,
            }),
        );
        let lao = Self {
            organizer,
            path: lao_channel(&id),
            id,
            creation,
        };
        (lao, create)
    }

    /// Creates the LAO on `state` through `/root`.
    pub fn create(state: &AppState, name: &str) -> Self {
        let (lao, create) = Self::new(name, 1_000, Vec::new());
        publish(state, ROOT_CHANNEL, &create).unwrap();
        lao
    }

    pub fn roll_call_create(&self, name: &str, creation: i64) -> (String, Message) {
        let id = hash(&[
            "R",
            self.id.as_str(),
            creation.to_string().as_str(),
            name,
        ]);
        let message = sign(
            &self.organizer,
            MessageData::RollCallCreate(RollCallCreate {
                id: id.clone(),
                name: name.to_string(),
                creation,
                proposed_start: creation,
                proposed_end: creation + 3_600,
                location: "hall".to_string(),
                description: None,
            }),
        );
        (id, message)
    }

    fn roll_call_update_id(&self, previous: &str, at: i64) -> String {
        hash(&["R", self.id.as_str(), previous, at.to_string().as_str()])
    }

    pub fn roll_call_open(&self, opens: &str, opened_at: i64, reopen: bool) -> (String, Message) {
        let update_id = self.roll_call_update_id(opens, opened_at);
        let open = RollCallOpen {
            update_id: update_id.clone(),
            opens: opens.to_string(),
            opened_at,
        };
        let data = if reopen {
            MessageData::RollCallReopen(open)
        } else {
            MessageData::RollCallOpen(open)
        };
        (update_id, sign(&self.organizer, data))
    }

    pub fn roll_call_close(
        &self,
        closes: &str,
        closed_at: i64,
        attendees: &[&KeyPair],
    ) -> (String, Message) {
        let update_id = self.roll_call_update_id(closes, closed_at);
        let message = sign(
            &self.organizer,
            MessageData::RollCallClose(RollCallClose {
                update_id: update_id.clone(),
                closes: closes.to_string(),
                closed_at,
                attendees: attendees.iter().map(|k| k.public_key()).collect(),
            }),
        );
        (update_id, message)
    }

    /// Runs a full roll call admitting `attendees`.
    pub fn admit(&self, state: &AppState, attendees: &[&KeyPair]) {
        let (id, create) = self.roll_call_create("admission", 1_100);
        publish(state, &self.path, &create).unwrap();
        let (opened, open) = self.roll_call_open(&id, 1_200, false);
        publish(state, &self.path, &open).unwrap();
        let (_, close) = self.roll_call_close(&opened, 1_300, attendees);
        publish(state, &self.path, &close).unwrap();
    }
}

/// Serves `state` on an ephemeral local port.
pub async fn spawn_server(state: Arc<AppState>) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, pop_server::app(state)).await.unwrap();
    });
    addr
}

/// Polls `condition` until it holds, for up to five seconds.
pub async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..50 {
        if condition() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    condition()
}
