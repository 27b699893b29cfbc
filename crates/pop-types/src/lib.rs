//! Shared protocol types for the pop server workspace.
//!
//! This crate defines the signed message envelope, the identifier hash used
//! throughout the protocol, channel paths and types, the closed set of
//! message payloads (`MessageData`), JSON-RPC envelopes, and the protocol
//! error taxonomy (`PopError`).
//!
//! Every other crate in the workspace depends on `pop-types`; it depends on
//! nothing internal.

pub mod channel;
pub mod data;
pub mod error;
pub mod hash;
pub mod jsonrpc;
pub mod message;

pub use channel::{ChannelPath, ChannelType, ROOT_CHANNEL};
pub use data::MessageData;
pub use error::{ErrorKind, PopError};
pub use hash::{decode_base64, encode_base64, hash};
pub use message::{Message, WitnessSignature};

/// Batch of messages grouped by channel path, as exchanged by
/// `get_messages_by_id` answers and rumors.
pub type MessageBatch = std::collections::BTreeMap<String, Vec<Message>>;

/// Message ids grouped by channel path, as exchanged by heartbeats.
pub type IdsByChannel = std::collections::BTreeMap<String, Vec<String>>;
