//! Channel and message persistence.
//!
//! Channels are created once and never deleted. Messages are stored in an
//! append-only log with a storage sequence number; `message_id` is unique
//! across the whole log, which is what makes duplicate deliveries safe.
//!
//! This crate also owns LAO records and the roll-call queries that gate
//! voting and social actions.

mod channels;
mod lao;
mod messages;

pub use channels::{channel_exists, channel_type, insert_channel, list_channels, NewChannel};
pub use lao::{current_attendees, get_lao, insert_lao, last_roll_call, LaoRecord};
pub use messages::{
    catchup, get_message, has_message, ids_by_channel, last_message_with_actions,
    messages_by_ids, messages_with_action, missing_ids, store_message, StoredMessage,
};

use pop_types::PopError;
use thiserror::Error;

/// Errors that can occur during channel and message operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message already stored: {0}")]
    DuplicateMessage(String),
    #[error("stored payload is malformed: {0}")]
    MalformedPayload(String),
}

impl From<ChannelError> for PopError {
    fn from(e: ChannelError) -> Self {
        match e {
            ChannelError::DuplicateMessage(id) => {
                PopError::duplicate_resource(format!("message {id} already stored"))
            }
            other => PopError::query_database(other),
        }
    }
}
