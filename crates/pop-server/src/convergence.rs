//! Applies batches of messages received from peers, whose arrival order
//! says nothing about their dependencies.
//!
//! Shorter channel paths sort first, so a LAO exists before its elections
//! and social channels. Dependencies within one channel (roll-call
//! chains, setup before votes) resolve over repeated passes.

use crate::dispatcher::{Dispatcher, Handled};
use pop_types::{IdsByChannel, Message, MessageBatch, PopError};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

/// Passes over one batch. A pass that applies nothing does not end the run,
/// since storage errors such as a busy database clear on their own.
pub const MAX_RETRY: usize = 10;

/// Ids of messages that failed permanently. They are never fetched or
/// dispatched again.
#[derive(Clone, Default)]
pub struct Blacklist {
    ids: Arc<RwLock<HashSet<String>>>,
}

impl Blacklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.ids
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(message_id)
    }

    pub fn insert(&self, message_id: &str) -> bool {
        self.ids
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(message_id.to_string())
    }

    pub fn len(&self) -> usize {
        self.ids.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes blacklisted ids from a heartbeat, dropping emptied channels.
    pub fn filter(&self, ids: &IdsByChannel) -> IdsByChannel {
        let blacklisted = self.ids.read().unwrap_or_else(|e| e.into_inner());
        ids.iter()
            .filter_map(|(channel, ids)| {
                let kept: Vec<String> = ids
                    .iter()
                    .filter(|id| !blacklisted.contains(id.as_str()))
                    .cloned()
                    .collect();
                (!kept.is_empty()).then(|| (channel.clone(), kept))
            })
            .collect()
    }
}

/// A message left over with a retryable error.
#[derive(Debug, Clone)]
pub struct PendingMessage {
    pub channel: String,
    pub message: Message,
    pub error: PopError,
}

#[derive(Debug, Default)]
pub struct ConvergenceReport {
    /// Ids newly applied by this run.
    pub processed: Vec<String>,
    pub pending: Vec<PendingMessage>,
    pub blacklisted: Vec<String>,
}

struct Work {
    channel: String,
    message: Message,
    error: Option<PopError>,
}

fn channel_order(a: &Work, b: &Work) -> std::cmp::Ordering {
    a.channel
        .len()
        .cmp(&b.channel.len())
        .then_with(|| a.channel.cmp(&b.channel))
}

/// Dispatches every message of `batch` in retry context until all succeed
/// or [`MAX_RETRY`] passes ran.
///
/// Blocks on storage; async callers run it in `spawn_blocking`.
pub fn converge(dispatcher: &Dispatcher, blacklist: &Blacklist, batch: MessageBatch) -> ConvergenceReport {
    let mut report = ConvergenceReport::default();

    let mut work: Vec<Work> = batch
        .into_iter()
        .flat_map(|(channel, messages)| {
            messages.into_iter().map(move |message| Work {
                channel: channel.clone(),
                message,
                error: None,
            })
        })
        .filter(|w| !blacklist.contains(&w.message.message_id))
        .collect();

    for pass in 0..MAX_RETRY {
        if work.is_empty() {
            break;
        }
        // Stable: messages of one channel keep their batch order.
        work.sort_by(channel_order);

        let mut retry = Vec::new();
        for mut item in work {
            match dispatcher.handle(&item.channel, &item.message, true) {
                Ok(Handled::Applied { .. }) => report.processed.push(item.message.message_id),
                Ok(Handled::AlreadyReceived) => {}
                Err(e) => {
                    item.error = Some(e);
                    retry.push(item);
                }
            }
        }
        work = retry;

        tracing::debug!(pass, remaining = work.len(), "convergence pass done");
    }

    for item in work {
        let Some(error) = item.error else { continue };
        if error.is_retryable() {
            tracing::warn!(
                channel = %item.channel,
                message_id = %item.message.message_id,
                "message left pending: {}",
                error
            );
            report.pending.push(PendingMessage {
                channel: item.channel,
                message: item.message,
                error,
            });
        } else {
            tracing::warn!(
                channel = %item.channel,
                message_id = %item.message.message_id,
                "blacklisting message: {}",
                error
            );
            blacklist.insert(&item.message.message_id);
            report.blacklisted.push(item.message.message_id);
        }
    }

    report
}
