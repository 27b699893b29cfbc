//! Structural, signature and identity checks on a single message.

use pop_channels::has_message;
use pop_crypto::verify_signature;
use pop_types::{Message, PopError};
use rusqlite::Connection;

/// Outcome of a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// The message is new; carries the decoded payload bytes.
    Fresh(Vec<u8>),
    /// A message with this id is already stored.
    AlreadyReceived,
}

/// Checks that a message decodes, is signed by its sender and carries the
/// id derived from its data and signature. Returns the decoded payload.
///
/// Used directly for messages embedded in other payloads, which are never
/// looked up in storage.
pub fn check_integrity(message: &Message) -> Result<Vec<u8>, PopError> {
    let payload = message.payload()?;

    verify_signature(&message.sender, &payload, &message.signature)
        .map_err(|e| PopError::invalid_field(format!("invalid message signature: {e}")))?;

    let expected = Message::compute_id(&message.data, &message.signature);
    if expected != message.message_id {
        return Err(PopError::invalid_field(format!(
            "message_id mismatch: expected {expected}, got {}",
            message.message_id
        )));
    }

    Ok(payload)
}

/// Full verification: integrity, then a storage lookup for duplicates.
/// Has no side effects.
pub fn verify(conn: &Connection, message: &Message) -> Result<Verification, PopError> {
    let payload = check_integrity(message)?;

    if has_message(conn, &message.message_id).map_err(|e| PopError::from(e).wrap("verify"))? {
        return Ok(Verification::AlreadyReceived);
    }

    Ok(Verification::Fresh(payload))
}
