//! Elections: persisted election records and the end-of-election tally.
//!
//! An election lives on its own channel below its LAO. The setup message
//! fixes the questions and ballot version; the server holds an ElGamal
//! keypair per election so secret ballots can be decrypted at tally time.

mod store;
mod tally;

pub use store::{election_status, get_election, insert_election, ElectionRecord, ElectionStatus};
pub use tally::{ElectionTally, ValidVote};

use pop_channels::ChannelError;
use pop_crypto::CryptoError;
use pop_types::PopError;
use thiserror::Error;

/// Errors raised while loading or tallying an election.
#[derive(Debug, Error)]
pub enum ElectionError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("stored election key is unusable: {0}")]
    Key(#[from] CryptoError),
    #[error("stored vote is malformed: {0}")]
    MalformedVote(String),
    #[error("registered votes mismatch: expected {expected}, got {actual}")]
    RegisteredVotesMismatch { expected: String, actual: String },
}

impl From<ElectionError> for PopError {
    fn from(e: ElectionError) -> Self {
        match e {
            ElectionError::RegisteredVotesMismatch { .. } => PopError::invalid_field(e.to_string()),
            other => PopError::query_database(other),
        }
    }
}
