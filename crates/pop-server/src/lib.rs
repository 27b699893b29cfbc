//! Pop server library logic.
//!
//! Clients and peer servers speak JSON-RPC over WebSocket. Published
//! messages go through the [`dispatcher::Dispatcher`]; messages from peers go
//! through [`convergence::converge`] first.

pub mod api_ws;
pub mod background;
pub mod config;
pub mod convergence;
pub mod dispatcher;
mod handlers;
pub mod keys;
pub mod outbound;
pub mod peers;
pub mod registry;
pub mod verifier;

use axum::{routing::get, Extension, Json, Router};
use config::Config;
use convergence::Blacklist;
use dispatcher::{DispatchSettings, Dispatcher};
use keys::{load_or_create_server_key, KeyError};
use outbound::LinkRequest;
use peers::PeerState;
use pop_channels::{list_channels, messages_with_action, ChannelError};
use pop_crypto::KeyPair;
use pop_db::DbPool;
use pop_federation::{max_rumor_id, FederationError};
use pop_types::channel::federation_channel;
use pop_types::jsonrpc::GreetServerParams;
use pop_types::{ChannelPath, MessageData, ROOT_CHANNEL};
use registry::ChannelRegistry;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

/// Pending link requests before handlers start dropping them.
const LINK_QUEUE_CAPACITY: usize = 32;

/// Application state shared across all connections and tasks.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    pub registry: ChannelRegistry,
    pub peers: PeerState,
    pub blacklist: Blacklist,
    pub dispatcher: Dispatcher,
    /// The server signing key.
    pub server_key: Arc<KeyPair>,
    /// Our own `greet_server` parameters.
    pub greeting: GreetServerParams,
}

/// Errors raised while building the application state.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to get a database connection: {0}")]
    Pool(String),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Federation(#[from] FederationError),
}

impl AppState {
    /// Loads the server key and rebuilds the in-memory registry from storage.
    ///
    /// Returns the state and the receiver of link requests raised by
    /// `federation#init`, to be served by [`outbound::run_link_requests`].
    pub fn new(
        pool: DbPool,
        config: &Config,
    ) -> Result<(Self, mpsc::Receiver<LinkRequest>), StartupError> {
        let registry = ChannelRegistry::new();
        let peers = PeerState::new();

        let server_key = {
            let conn = pool.get().map_err(|e| StartupError::Pool(e.to_string()))?;
            let server_key = load_or_create_server_key(&conn)?;
            let channels = restore_channels(&conn, &registry)?;
            let next_rumor_id =
                max_rumor_id(&conn, &server_key.public_key())?.map_or(0, |id| id + 1);
            peers.set_next_rumor_id(next_rumor_id);
            tracing::info!(channels, next_rumor_id, "restored server state");
            Arc::new(server_key)
        };

        let base = config.server.public_address();
        let settings = DispatchSettings {
            owner_public_key: config.protocol.owner_public_key.clone(),
            client_address: format!("{base}/client"),
            server_address: format!("{base}/server"),
            challenge_ttl_secs: config.protocol.challenge_ttl_secs,
        };
        let greeting = GreetServerParams {
            public_key: server_key.public_key(),
            server_address: settings.server_address.clone(),
            client_address: settings.client_address.clone(),
        };

        let (links_tx, links_rx) = mpsc::channel(LINK_QUEUE_CAPACITY);
        let dispatcher = Dispatcher::new(
            pool.clone(),
            registry.clone(),
            peers.clone(),
            server_key.clone(),
            settings,
        )
        .with_links(links_tx);

        let state = Self {
            pool,
            registry,
            peers,
            blacklist: Blacklist::new(),
            dispatcher,
            server_key,
            greeting,
        };
        Ok((state, links_rx))
    }
}

/// Registers every persisted channel, the virtual federation channel of each
/// LAO and the remote federation channels its `expect` messages named.
fn restore_channels(
    conn: &rusqlite::Connection,
    registry: &ChannelRegistry,
) -> Result<usize, ChannelError> {
    registry.add_channel(ROOT_CHANNEL);
    let channels = list_channels(conn)?;
    for path in &channels {
        registry.add_channel(path);

        let channel = ChannelPath::new(path);
        let Some(lao_id) = channel.lao_id().filter(|_| channel.depth() == 2) else {
            continue;
        };
        let federation = federation_channel(lao_id);
        registry.add_channel(&federation);
        for stored in messages_with_action(conn, &federation, "federation", "expect")? {
            if let Ok(MessageData::FederationExpect(expect)) = stored.parse_data() {
                registry.add_channel(&federation_channel(&expect.lao_id));
            }
        }
    }
    Ok(channels.len())
}

/// Spawns the background tasks and outbound links.
pub fn start_tasks(state: Arc<AppState>, config: &Config, links: mpsc::Receiver<LinkRequest>) {
    tokio::spawn(background::start_heartbeat_task(
        state.clone(),
        config.protocol.heartbeat_interval_secs,
    ));
    tokio::spawn(background::start_rumor_task(
        state.clone(),
        config.protocol.rumor_interval_secs,
    ));
    tokio::spawn(outbound::run_link_requests(state.clone(), links));
    if !config.federation.peers.is_empty() {
        tokio::spawn(outbound::connect_configured_peers(
            state,
            config.federation.peers.clone(),
        ));
    }
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/client", get(api_ws::client_ws_handler))
        .route("/server", get(api_ws::server_ws_handler))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(state))
}
