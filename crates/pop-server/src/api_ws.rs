//! JSON-RPC over WebSocket for clients (`/client`) and peer servers
//! (`/server`).

use crate::convergence::{converge, ConvergenceReport};
use crate::dispatcher::Handled;
use crate::peers::PendingQuery;
use crate::registry::ConnectionKind;
use crate::AppState;
use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        Extension, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use pop_channels::{catchup, messages_by_ids, missing_ids};
use pop_federation::{store_rumor, store_unprocessed};
use pop_types::jsonrpc::{
    Answer, ChannelParams, GreetServerParams, Incoming, Method, PublishParams, Query, RumorParams,
};
use pop_types::{ChannelPath, IdsByChannel, Message, MessageBatch, PopError};
use rusqlite::Connection;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Outgoing frames buffered per connection before a slow consumer starts
/// losing them.
pub const SEND_QUEUE_CAPACITY: usize = 256;

pub async fn client_ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, ConnectionKind::Client))
}

pub async fn server_ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, ConnectionKind::Server))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, kind: ConnectionKind) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(SEND_QUEUE_CAPACITY);
    let session = state.registry.add_session(kind, tx);
    tracing::debug!(session = %session, ?kind, "websocket connected");

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(AxumMessage::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            AxumMessage::Text(text) => {
                handle_frame(&state, session, kind, text.to_string()).await
            }
            AxumMessage::Close(_) => break,
            _ => {}
        }
    }

    state.registry.remove_session(session);
    state.peers.remove_session(session);
    send_task.abort();
    tracing::debug!(session = %session, "websocket disconnected");
}

/// Handles one text frame from a session of either kind.
pub(crate) async fn handle_frame(
    state: &Arc<AppState>,
    session: Uuid,
    kind: ConnectionKind,
    text: String,
) {
    let incoming = match Incoming::parse(&text) {
        Ok(incoming) => incoming,
        Err(e) => {
            // Answer with the id if the frame carried one.
            let id = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.get("id").and_then(Value::as_i64));
            tracing::debug!(session = %session, "rejecting malformed frame: {}", e);
            reply(state, session, Answer::error(id, &e));
            return;
        }
    };

    match incoming {
        Incoming::Query(query) => {
            let id = query.id;
            let method = query.method.name();
            match handle_query(state, session, kind, query.method).await {
                Ok(Some(result)) if id.is_some() => {
                    reply(state, session, Answer::result(id, result))
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(session = %session, method, "query failed: {}", e);
                    if id.is_some() {
                        reply(state, session, Answer::error(id, &e));
                    }
                }
            }
        }
        Incoming::Answer(answer) => handle_answer(state, session, answer).await,
    }
}

fn reply(state: &AppState, session: Uuid, answer: Answer) {
    match answer.to_json() {
        Ok(text) => {
            state.registry.send_to(session, text);
        }
        Err(e) => tracing::error!(session = %session, "failed to serialize answer: {}", e),
    }
}

/// Sends a query to one session.
pub(crate) fn send_query(state: &AppState, session: Uuid, query: &Query) -> bool {
    match query.to_json() {
        Ok(text) => state.registry.send_to(session, text),
        Err(e) => {
            tracing::error!(session = %session, "failed to serialize query: {}", e);
            false
        }
    }
}

/// Runs a storage closure on a pooled connection off the async runtime.
pub(crate) async fn with_conn<T, F>(state: &AppState, f: F) -> Result<T, PopError>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> Result<T, PopError> + Send + 'static,
{
    let pool = state.pool.clone();
    tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(PopError::query_database)?;
        f(&conn)
    })
    .await
    .map_err(|e| PopError::internal(e).wrap("storage task"))?
}

/// Applies a batch of peer messages and persists what is left pending.
pub(crate) async fn converge_batch(
    state: &Arc<AppState>,
    batch: MessageBatch,
) -> ConvergenceReport {
    let dispatcher = state.dispatcher.clone();
    let blacklist = state.blacklist.clone();
    let task = tokio::task::spawn_blocking(move || converge(&dispatcher, &blacklist, batch));
    let report = match task.await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("convergence task failed: {}", e);
            return ConvergenceReport::default();
        }
    };

    if !report.pending.is_empty() {
        let pending = report.pending.clone();
        let stored = with_conn(state, move |conn| {
            for item in &pending {
                store_unprocessed(conn, &item.channel, &item.message, &item.error.to_string())?;
            }
            Ok(())
        })
        .await;
        if let Err(e) = stored {
            tracing::warn!("failed to persist pending messages: {}", e);
        }
    }

    tracing::debug!(
        processed = report.processed.len(),
        pending = report.pending.len(),
        blacklisted = report.blacklisted.len(),
        "converged batch"
    );
    report
}

async fn dispatch(
    state: &AppState,
    channel: String,
    message: Message,
    retry: bool,
) -> Result<Handled, PopError> {
    let dispatcher = state.dispatcher.clone();
    tokio::task::spawn_blocking(move || dispatcher.handle(&channel, &message, retry))
        .await
        .map_err(|e| PopError::internal(e).wrap("dispatch task"))?
}

async fn handle_query(
    state: &Arc<AppState>,
    session: Uuid,
    kind: ConnectionKind,
    method: Method,
) -> Result<Option<Value>, PopError> {
    if kind == ConnectionKind::Client
        && (method.is_server_only() || matches!(method, Method::Broadcast(_)))
    {
        return Err(PopError::invalid_action(format!(
            "{} is reserved for peer servers",
            method.name()
        )));
    }

    match method {
        Method::Subscribe(ChannelParams { channel }) => {
            state.registry.subscribe(session, &channel)?;
            Ok(Some(Value::from(0)))
        }
        Method::Unsubscribe(ChannelParams { channel }) => {
            state.registry.unsubscribe(session, &channel)?;
            Ok(Some(Value::from(0)))
        }
        Method::Publish(PublishParams { channel, message }) => {
            publish(state, kind, channel, message).await?;
            Ok(Some(Value::from(0)))
        }
        Method::Broadcast(PublishParams { channel, message }) => {
            let message_id = message.message_id.clone();
            if let Err(e) = dispatch(state, channel.clone(), message, true).await {
                tracing::debug!(
                    channel = %channel,
                    message_id = %message_id,
                    "ignoring peer broadcast: {}",
                    e
                );
            }
            Ok(None)
        }
        Method::Catchup(ChannelParams { channel }) => {
            if !state.registry.has_channel(&channel) {
                return Err(PopError::invalid_resource(format!("unknown channel {channel}")));
            }
            let messages = with_conn(state, move |conn| Ok(catchup(conn, &channel)?)).await?;
            Ok(Some(serde_json::to_value(messages).map_err(PopError::internal)?))
        }
        Method::Heartbeat(ids) => {
            heartbeat(state, session, ids).await?;
            Ok(Some(Value::from(0)))
        }
        Method::GetMessagesById(ids) => {
            let batch = with_conn(state, move |conn| Ok(messages_by_ids(conn, &ids)?)).await?;
            Ok(Some(serde_json::to_value(batch).map_err(PopError::internal)?))
        }
        Method::GreetServer(params) => {
            greet_server(state, session, params);
            Ok(Some(Value::from(0)))
        }
        Method::Rumor(params) => {
            rumor(state, session, params).await?;
            Ok(Some(Value::from(0)))
        }
    }
}

async fn publish(
    state: &Arc<AppState>,
    kind: ConnectionKind,
    channel: String,
    message: Message,
) -> Result<(), PopError> {
    let handled = dispatch(state, channel, message.clone(), false).await?;

    // Only first-hand publishes are gossiped; peers already relay theirs.
    // A rumor names the channel the message was stored on.
    if let (Handled::Applied { stored_on: Some(stored) }, ConnectionKind::Client) =
        (&handled, kind)
    {
        if !ChannelPath::new(stored).is_federation() {
            state.peers.buffer_rumor_message(stored, message);
        }
    }
    Ok(())
}

/// Requests whatever a peer advertises that is missing here.
async fn heartbeat(state: &Arc<AppState>, session: Uuid, ids: IdsByChannel) -> Result<(), PopError> {
    let offered = state.blacklist.filter(&ids);
    if offered.is_empty() {
        return Ok(());
    }
    let missing = with_conn(state, move |conn| Ok(missing_ids(conn, &offered)?)).await?;
    if missing.is_empty() {
        return Ok(());
    }

    let id = state.peers.next_query_id();
    state
        .peers
        .add_pending(id, PendingQuery::GetMessagesById { session });
    let count: usize = missing.values().map(Vec::len).sum();
    tracing::debug!(session = %session, count, "requesting missing messages");
    send_query(state, session, &Query::new(Some(id), Method::GetMessagesById(missing)));
    Ok(())
}

fn greet_server(state: &AppState, session: Uuid, params: GreetServerParams) {
    let address = params.server_address.clone();
    if state.peers.record_peer(session, params) {
        tracing::info!(session = %session, peer = %address, "peer server greeted");
    }
    if state.peers.mark_greeted(session) {
        send_query(
            state,
            session,
            &Query::new(None, Method::GreetServer(state.greeting.clone())),
        );
    }
}

/// Applies a rumor once, then relays it to the other peers.
async fn rumor(state: &Arc<AppState>, session: Uuid, params: RumorParams) -> Result<(), PopError> {
    let record = params.clone();
    let fresh = with_conn(state, move |conn| Ok(store_rumor(conn, &record)?)).await?;
    if !fresh {
        tracing::debug!(
            sender = %params.sender_id,
            rumor_id = params.rumor_id,
            "rumor already processed"
        );
        return Ok(());
    }

    let report = converge_batch(state, params.messages.clone()).await;
    tracing::debug!(
        sender = %params.sender_id,
        rumor_id = params.rumor_id,
        processed = report.processed.len(),
        "rumor applied"
    );

    let relay = Query::new(Some(state.peers.next_query_id()), Method::Rumor(params));
    match relay.to_json() {
        Ok(text) => {
            state.registry.send_to_servers(&text, Some(session));
        }
        Err(e) => tracing::error!("failed to serialize rumor relay: {}", e),
    }
    Ok(())
}

async fn handle_answer(state: &Arc<AppState>, session: Uuid, answer: Answer) {
    let Some(id) = answer.id else {
        return;
    };
    let Some(PendingQuery::GetMessagesById { .. }) = state.peers.take_pending(id) else {
        if let Some(error) = answer.error {
            tracing::debug!(
                session = %session,
                id,
                code = error.code,
                "peer rejected query: {}",
                error.description
            );
        }
        return;
    };

    if let Some(error) = answer.error {
        tracing::warn!(session = %session, id, "get_messages_by_id failed: {}", error.description);
        return;
    }
    let parsed = answer
        .result
        .map(serde_json::from_value::<MessageBatch>)
        .transpose();
    let batch = match parsed {
        Ok(batch) => batch.unwrap_or_default(),
        Err(e) => {
            tracing::warn!(session = %session, id, "malformed get_messages_by_id answer: {}", e);
            return;
        }
    };
    converge_batch(state, batch).await;
}
