//! The signed message envelope.

use crate::data::MessageData;
use crate::error::PopError;
use crate::hash::{decode_base64, hash};
use serde::{Deserialize, Serialize};

/// A witness attestation attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessSignature {
    pub witness: String,
    pub signature: String,
}

/// A signed protocol message.
///
/// `data` is the base64 JSON payload, `signature` the sender's signature over
/// the decoded payload, and `message_id` is `hash(data, signature)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub data: String,
    pub sender: String,
    pub signature: String,
    pub message_id: String,
    #[serde(default)]
    pub witness_signatures: Vec<WitnessSignature>,
}

impl Message {
    /// Computes the id a message with this payload and signature must carry.
    pub fn compute_id(data: &str, signature: &str) -> String {
        hash(&[data, signature])
    }

    /// Decodes the raw JSON payload bytes.
    pub fn payload(&self) -> Result<Vec<u8>, PopError> {
        decode_base64(&self.data)
            .map_err(|e| PopError::invalid_field(format!("failed to decode data: {e}")))
    }

    /// Decodes and parses the payload into its typed form.
    pub fn parse_data(&self) -> Result<MessageData, PopError> {
        MessageData::from_slice(&self.payload()?)
    }
}
