//! Federation and gossip persistence.
//!
//! Two organizer servers link their LAOs through a single challenge/result
//! exchange. This crate mints challenges and keeps the outstanding ones
//! until they are consumed, exactly once.
//!
//! It also owns rumor bookkeeping: which `(sender_id, rumor_id)` pairs were
//! already applied, and which gossiped messages are still waiting on a
//! retryable failure.

mod challenges;
mod rumors;

pub use challenges::{
    challenge_valid, consume_challenge, insert_challenge, mint_challenge, ChallengeRecord,
};
pub use rumors::{
    delete_unprocessed, has_rumor, list_unprocessed, max_rumor_id, store_rumor, store_unprocessed,
    UnprocessedMessage,
};

use pop_types::PopError;
use thiserror::Error;

/// Errors from federation and rumor storage.
#[derive(Debug, Error)]
pub enum FederationError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<FederationError> for PopError {
    fn from(e: FederationError) -> Self {
        PopError::query_database(e)
    }
}
