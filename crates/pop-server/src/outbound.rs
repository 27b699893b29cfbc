//! Connections this server opens to peer servers.
//!
//! A link behaves like an inbound `/server` session once established: the
//! same frame handling applies to whatever the peer sends back.

use crate::api_ws::{handle_frame, send_query, SEND_QUEUE_CAPACITY};
use crate::registry::ConnectionKind;
use crate::AppState;
use futures_util::{SinkExt, StreamExt};
use pop_types::jsonrpc::{ChannelParams, Method, PublishParams, Query};
use pop_types::Message;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use uuid::Uuid;

/// A request to open a link to a peer and issue some queries on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRequest {
    /// The peer's `/server` WebSocket URL.
    pub server_address: String,
    /// Channels to subscribe to on the peer.
    pub subscribe: Vec<String>,
    /// A message to publish on the peer once subscribed.
    pub publish: Option<(String, Message)>,
}

impl LinkRequest {
    /// A plain link with no queries beyond the greeting.
    pub fn to(server_address: impl Into<String>) -> Self {
        Self {
            server_address: server_address.into(),
            subscribe: Vec::new(),
            publish: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum OutboundError {
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },
    #[error("peer session {0} closed before the link was set up")]
    Closed(Uuid),
}

/// Connects to a peer, greets it and sends the requested queries. The link
/// keeps running in the background; returns its session id.
pub async fn connect_peer(state: Arc<AppState>, link: LinkRequest) -> Result<Uuid, OutboundError> {
    let (stream, _) = connect_async(link.server_address.as_str())
        .await
        .map_err(|source| OutboundError::Connect {
            address: link.server_address.clone(),
            source,
        })?;
    let (mut sink, mut source) = stream.split();

    let (tx, mut rx) = mpsc::channel::<String>(SEND_QUEUE_CAPACITY);
    let session = state.registry.add_session(ConnectionKind::Server, tx);
    // We speak first, so the peer's greeting needs no reply.
    state.peers.mark_greeted(session);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(WsMessage::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    let mut queries = vec![Query::new(None, Method::GreetServer(state.greeting.clone()))];
    for channel in link.subscribe {
        queries.push(Query::new(
            Some(state.peers.next_query_id()),
            Method::Subscribe(ChannelParams { channel }),
        ));
    }
    if let Some((channel, message)) = link.publish {
        queries.push(Query::new(
            Some(state.peers.next_query_id()),
            Method::Publish(PublishParams { channel, message }),
        ));
    }
    for query in &queries {
        if !send_query(&state, session, query) {
            state.registry.remove_session(session);
            send_task.abort();
            return Err(OutboundError::Closed(session));
        }
    }

    tracing::info!(session = %session, peer = %link.server_address, "linked to peer server");

    let address = link.server_address;
    tokio::spawn(async move {
        while let Some(Ok(frame)) = source.next().await {
            match frame {
                WsMessage::Text(text) => {
                    handle_frame(&state, session, ConnectionKind::Server, text.to_string()).await
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
        state.registry.remove_session(session);
        state.peers.remove_session(session);
        send_task.abort();
        tracing::info!(session = %session, peer = %address, "peer link closed");
    });

    Ok(session)
}

/// Serves link requests raised while handling messages.
pub async fn run_link_requests(state: Arc<AppState>, mut requests: mpsc::Receiver<LinkRequest>) {
    while let Some(link) = requests.recv().await {
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = connect_peer(state, link).await {
                tracing::warn!("outbound link failed: {}", e);
            }
        });
    }
}

/// Dials the peers listed in the configuration.
pub async fn connect_configured_peers(state: Arc<AppState>, peers: Vec<String>) {
    for address in peers {
        match connect_peer(state.clone(), LinkRequest::to(address.as_str())).await {
            Ok(_) => {}
            Err(e) => tracing::warn!(peer = %address, "could not reach configured peer: {}", e),
        }
    }
}
