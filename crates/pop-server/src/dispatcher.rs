//! Message dispatch.
//!
//! A published message goes through verification, channel-type resolution,
//! payload decoding and its channel handler. The handler only validates and
//! describes what should happen as [`Effects`]; the dispatcher then applies
//! every write in one SQLite transaction and, once committed, registers new
//! channels and fans out broadcasts. Subscribers therefore never observe a
//! half-created channel.

use crate::handlers::{self, HandlerContext};
use crate::outbound::LinkRequest;
use crate::peers::PeerState;
use crate::registry::ChannelRegistry;
use crate::verifier::{self, Verification};
use pop_channels::{
    channel_type, get_lao, insert_channel, insert_lao, store_message, ChannelError, LaoRecord,
    NewChannel,
};
use pop_crypto::KeyPair;
use pop_db::DbPool;
use pop_election::{insert_election, ElectionRecord};
use pop_federation::{consume_challenge, insert_challenge, ChallengeRecord};
use pop_types::channel::{federation_channel, lao_channel};
use pop_types::{ChannelPath, ChannelType, Message, MessageData, PopError};
use rusqlite::Connection;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Settings the handlers need from the server configuration.
#[derive(Debug, Clone, Default)]
pub struct DispatchSettings {
    /// When set, only this key may create LAOs.
    pub owner_public_key: Option<String>,
    /// Address clients use to reach this server, announced in `lao#greet`.
    pub client_address: String,
    /// Address peers use to reach this server.
    pub server_address: String,
    pub challenge_ttl_secs: i64,
}

/// What happens to the dispatched message itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    StoreAndBroadcast(String),
    StoreOnly(String),
    Discard,
}

impl Disposition {
    fn channel(&self) -> Option<&str> {
        match self {
            Self::StoreAndBroadcast(channel) | Self::StoreOnly(channel) => Some(channel),
            Self::Discard => None,
        }
    }
}

/// A storage write performed in the message's transaction.
#[derive(Debug, Clone)]
pub enum Write {
    Message { channel: String, message: Message },
    Channel(NewChannel),
    Lao(LaoRecord),
    Election(ElectionRecord),
    Challenge(ChallengeRecord),
    /// Deletes an outstanding challenge; fails if it was already consumed.
    ConsumeChallenge(String),
}

/// Everything a handler asks for on success.
#[derive(Debug, Clone)]
pub struct Effects {
    pub disposition: Disposition,
    pub writes: Vec<Write>,
    /// Derived messages broadcast after commit.
    pub broadcasts: Vec<(String, Message)>,
    /// Channels owned by peers, registered so their servers can subscribe.
    pub remote_channels: Vec<String>,
    /// Messages published to peer servers subscribed to a remote channel.
    pub remote_publishes: Vec<(String, Message)>,
    pub link: Option<LinkRequest>,
}

impl Effects {
    fn with_disposition(disposition: Disposition) -> Self {
        Self {
            disposition,
            writes: Vec::new(),
            broadcasts: Vec::new(),
            remote_channels: Vec::new(),
            remote_publishes: Vec::new(),
            link: None,
        }
    }

    pub fn store_and_broadcast(channel: impl Into<String>) -> Self {
        Self::with_disposition(Disposition::StoreAndBroadcast(channel.into()))
    }

    pub fn store_only(channel: impl Into<String>) -> Self {
        Self::with_disposition(Disposition::StoreOnly(channel.into()))
    }

    pub fn discard() -> Self {
        Self::with_disposition(Disposition::Discard)
    }

    pub fn write(mut self, write: Write) -> Self {
        self.writes.push(write);
        self
    }

    pub fn channel(self, channel: NewChannel) -> Self {
        self.write(Write::Channel(channel))
    }

    /// Stores a server-generated message and broadcasts it after commit.
    pub fn derived(mut self, channel: &str, message: Message) -> Self {
        self.broadcasts.push((channel.to_string(), message.clone()));
        self.write(Write::Message {
            channel: channel.to_string(),
            message,
        })
    }

    pub fn remote_channel(mut self, channel: String) -> Self {
        self.remote_channels.push(channel);
        self
    }

    pub fn remote_publish(mut self, channel: String, message: Message) -> Self {
        self.remote_publishes.push((channel, message));
        self
    }

    pub fn link(mut self, link: LinkRequest) -> Self {
        self.link = Some(link);
        self
    }
}

/// Successful dispatch outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    /// The message was applied; `stored_on` names the channel it was
    /// persisted on, if any.
    Applied { stored_on: Option<String> },
    /// The message was already stored; nothing happened.
    AlreadyReceived,
}

/// Verifies, validates, persists and fans out published messages.
#[derive(Clone)]
pub struct Dispatcher {
    pool: DbPool,
    registry: ChannelRegistry,
    peers: PeerState,
    server_key: Arc<KeyPair>,
    settings: Arc<DispatchSettings>,
    links: Option<mpsc::Sender<LinkRequest>>,
}

impl Dispatcher {
    pub fn new(
        pool: DbPool,
        registry: ChannelRegistry,
        peers: PeerState,
        server_key: Arc<KeyPair>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            pool,
            registry,
            peers,
            server_key,
            settings: Arc::new(settings),
            links: None,
        }
    }

    /// Routes outbound link requests (from `federation#init`) to `links`.
    pub fn with_links(mut self, links: mpsc::Sender<LinkRequest>) -> Self {
        self.links = Some(links);
        self
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Dispatches one message published on `channel`.
    ///
    /// In retry context (convergence, peer broadcasts) a message that is
    /// already stored counts as success; otherwise it is a
    /// `duplicate_resource` error. Blocks on storage, so async callers run it
    /// in `spawn_blocking`.
    pub fn handle(&self, channel: &str, message: &Message, retry: bool) -> Result<Handled, PopError> {
        let mut conn = self
            .pool
            .get()
            .map_err(|e| PopError::query_database(e).wrap("dispatch"))?;
        let now = chrono::Utc::now().timestamp();

        match self.apply(&mut conn, channel, message, now)? {
            Handled::AlreadyReceived if !retry => Err(PopError::duplicate_resource(format!(
                "message {} was already received",
                message.message_id
            ))),
            handled => Ok(handled),
        }
    }

    fn apply(
        &self,
        conn: &mut Connection,
        channel: &str,
        message: &Message,
        now: i64,
    ) -> Result<Handled, PopError> {
        let payload = match verifier::verify(conn, message)? {
            Verification::Fresh(payload) => payload,
            Verification::AlreadyReceived => return Ok(Handled::AlreadyReceived),
        };

        // An unknown channel is reported before a malformed payload.
        let decoded = MessageData::from_slice(&payload);
        let channel_type = match (&decoded, resolve_channel_type(conn, channel)) {
            // lao#create is stored on the channel it creates, so peers replay
            // it there.
            (Ok(MessageData::LaoCreate(create)), _) if channel == lao_channel(&create.id) => {
                ChannelType::Root
            }
            (_, resolved) => resolved?,
        };
        let data = decoded?;
        let (object, action) = data.object_action();

        let effects = {
            let ctx = HandlerContext {
                conn,
                channel: ChannelPath::new(channel),
                message,
                settings: &self.settings,
                server_key: &self.server_key,
                peers: &self.peers,
                now,
            };
            handlers::handle(&ctx, channel_type, data)?
        };

        if !commit(conn, message, &effects)? {
            tracing::debug!(
                channel = %channel,
                message_id = %message.message_id,
                "lost storage race, message already received"
            );
            return Ok(Handled::AlreadyReceived);
        }

        tracing::debug!(
            channel = %channel,
            message_id = %message.message_id,
            object,
            action,
            "message applied"
        );

        let stored_on = effects.disposition.channel().map(str::to_string);
        self.publish_effects(message, effects);
        Ok(Handled::Applied { stored_on })
    }

    fn publish_effects(&self, message: &Message, effects: Effects) {
        for write in &effects.writes {
            if let Write::Channel(channel) = write {
                self.registry.add_channel(&channel.path);
                if channel.channel_type == ChannelType::Lao {
                    if let Some(lao_id) = ChannelPath::new(&channel.path).lao_id() {
                        self.registry.add_channel(&federation_channel(lao_id));
                    }
                }
            }
        }
        for channel in &effects.remote_channels {
            self.registry.add_channel(channel);
        }

        if let Disposition::StoreAndBroadcast(channel) = &effects.disposition {
            self.registry.broadcast(channel, message);
        }
        for (channel, derived) in &effects.broadcasts {
            self.registry.broadcast(channel, derived);
        }

        for (channel, remote) in &effects.remote_publishes {
            let delivered = self
                .registry
                .publish_to(channel, remote, self.peers.next_query_id());
            if delivered == 0 {
                tracing::warn!(channel = %channel, "no peer subscribed to remote channel");
            }
        }

        if let Some(link) = effects.link {
            match &self.links {
                Some(links) => {
                    if let Err(e) = links.try_send(link) {
                        tracing::warn!("failed to queue outbound link request: {}", e);
                    }
                }
                None => tracing::warn!(
                    address = %link.server_address,
                    "outbound links are disabled, dropping link request"
                ),
            }
        }
    }
}

/// Resolves the declared type of `channel`.
///
/// `/root` is implicit; federation channels of known LAOs resolve without a
/// channel row.
pub fn resolve_channel_type(conn: &Connection, channel: &str) -> Result<ChannelType, PopError> {
    let path = ChannelPath::new(channel);
    if path.is_root() {
        return Ok(ChannelType::Root);
    }

    if let Some(declared) = channel_type(conn, channel).map_err(PopError::from)? {
        return Ok(declared);
    }

    if path.is_federation() {
        if let Some(lao_path) = path.lao_path() {
            if get_lao(conn, &lao_path).map_err(PopError::from)?.is_some() {
                return Ok(ChannelType::Federation);
            }
        }
    }

    Err(PopError::invalid_resource(format!("unknown channel {channel}")))
}

/// Applies all writes in one transaction. Returns `false`, without writing
/// anything, if the original message lost a uniqueness race.
fn commit(conn: &mut Connection, message: &Message, effects: &Effects) -> Result<bool, PopError> {
    let tx = conn
        .transaction()
        .map_err(|e| PopError::store_database(e).wrap("commit"))?;

    if let Some(channel) = effects.disposition.channel() {
        match store_message(&tx, channel, message) {
            Ok(()) => {}
            Err(ChannelError::DuplicateMessage(_)) => return Ok(false),
            Err(e) => return Err(PopError::store_database(e).wrap("commit")),
        }
    }

    for write in &effects.writes {
        apply_write(&tx, write).map_err(|e| e.wrap("commit"))?;
    }

    tx.commit()
        .map_err(|e| PopError::store_database(e).wrap("commit"))?;
    Ok(true)
}

fn apply_write(conn: &Connection, write: &Write) -> Result<(), PopError> {
    match write {
        Write::Message { channel, message } => {
            store_message(conn, channel, message).map_err(PopError::store_database)
        }
        Write::Channel(channel) => insert_channel(conn, channel)
            .map(|_| ())
            .map_err(PopError::store_database),
        Write::Lao(lao) => insert_lao(conn, lao).map_err(PopError::store_database),
        Write::Election(election) => {
            insert_election(conn, election).map_err(PopError::store_database)
        }
        Write::Challenge(challenge) => {
            insert_challenge(conn, challenge).map_err(PopError::store_database)
        }
        Write::ConsumeChallenge(value) => {
            let removed = consume_challenge(conn, value).map_err(PopError::store_database)?;
            if removed == 0 {
                return Err(PopError::invalid_field(format!(
                    "challenge {value} was already consumed"
                )));
            }
            Ok(())
        }
    }
}
