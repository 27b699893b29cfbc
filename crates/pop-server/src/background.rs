//! Background tasks for the pop server.
//!
//! Includes:
//! - Periodic heartbeats to peer servers, which also retry messages left
//!   pending by earlier convergence runs.
//! - Flushing locally accepted messages to peers as this server's rumors.

use crate::api_ws::{converge_batch, with_conn};
use crate::AppState;
use pop_channels::ids_by_channel;
use pop_federation::{delete_unprocessed, list_unprocessed, store_rumor};
use pop_types::jsonrpc::{Method, Query, RumorParams};
use pop_types::{MessageBatch, PopError};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// Starts the heartbeat task.
///
/// Every tick sends the ids of all stored messages to every peer session,
/// then replays persisted unprocessed messages.
pub async fn start_heartbeat_task(state: Arc<AppState>, interval_secs: u64) {
    if interval_secs == 0 {
        tracing::warn!("heartbeat task disabled (interval=0)");
        return;
    }
    let interval = Duration::from_secs(interval_secs);
    tracing::info!(interval_secs, "starting heartbeat task");

    loop {
        sleep(interval).await;

        if !state.registry.server_sessions().is_empty() {
            match with_conn(&state, |conn| Ok(ids_by_channel(conn)?)).await {
                Ok(ids) if !ids.is_empty() => {
                    let query = Query::new(None, Method::Heartbeat(ids));
                    match query.to_json() {
                        Ok(text) => {
                            let peers = state.registry.send_to_servers(&text, None);
                            tracing::debug!(peers, "sent heartbeat");
                        }
                        Err(e) => tracing::error!("failed to serialize heartbeat: {}", e),
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!("failed to collect heartbeat ids: {}", e),
            }
        }

        retry_unprocessed(&state).await;
    }
}

/// Feeds persisted pending messages back through convergence. Whatever is
/// still pending afterwards is stored again by the convergence run.
async fn retry_unprocessed(state: &Arc<AppState>) {
    let taken = with_conn(state, |conn| {
        let pending = list_unprocessed(conn)?;
        for item in &pending {
            delete_unprocessed(conn, &item.message.message_id)?;
        }
        Ok(pending)
    })
    .await;

    let pending = match taken {
        Ok(pending) if pending.is_empty() => return,
        Ok(pending) => pending,
        Err(e) => {
            tracing::error!("failed to load unprocessed messages: {}", e);
            return;
        }
    };

    let count = pending.len();
    let mut batch = MessageBatch::new();
    for item in pending {
        batch.entry(item.channel).or_default().push(item.message);
    }
    let report = converge_batch(state, batch).await;
    tracing::info!(
        retried = count,
        processed = report.processed.len(),
        still_pending = report.pending.len(),
        "retried unprocessed messages"
    );
}

/// Starts the rumor task, which gossips messages accepted from this
/// server's own clients.
pub async fn start_rumor_task(state: Arc<AppState>, interval_secs: u64) {
    if interval_secs == 0 {
        tracing::warn!("rumor task disabled (interval=0)");
        return;
    }
    let interval = Duration::from_secs(interval_secs);
    tracing::info!(interval_secs, "starting rumor task");

    loop {
        sleep(interval).await;

        let Some((rumor_id, messages)) = state.peers.take_rumor() else {
            continue;
        };
        let params = RumorParams {
            sender_id: state.server_key.public_key(),
            rumor_id,
            messages,
        };

        // Record our own rumor so the id sequence survives restarts and
        // peers relaying it back are ignored.
        let record = params.clone();
        if let Err(e) = with_conn(&state, move |conn| {
            store_rumor(conn, &record)?;
            Ok::<_, PopError>(())
        })
        .await
        {
            tracing::error!(rumor_id, "failed to store outgoing rumor: {}", e);
        }

        let query = Query::new(Some(state.peers.next_query_id()), Method::Rumor(params));
        match query.to_json() {
            Ok(text) => {
                let peers = state.registry.send_to_servers(&text, None);
                tracing::debug!(rumor_id, peers, "sent rumor");
            }
            Err(e) => tracing::error!(rumor_id, "failed to serialize rumor: {}", e),
        }
    }
}
