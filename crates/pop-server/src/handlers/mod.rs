//! Per-channel-type message handlers.
//!
//! Each handler matches the payload variants its channel type accepts and
//! returns the [`Effects`] of a valid message. Handlers read storage but
//! never write it; anything else on the channel is `invalid_action`.

mod authentication;
mod coin;
mod consensus;
mod election;
mod federation;
mod lao;
mod root;
mod social;

use crate::dispatcher::{DispatchSettings, Effects};
use crate::peers::PeerState;
use pop_channels::{current_attendees, get_lao, LaoRecord};
use pop_crypto::{decode_public_key, KeyPair};
use pop_types::{ChannelPath, ChannelType, Message, MessageData, PopError};
use rusqlite::Connection;

/// Everything a handler may consult while validating one message.
pub struct HandlerContext<'a> {
    pub conn: &'a Connection,
    pub channel: ChannelPath<'a>,
    pub message: &'a Message,
    pub settings: &'a DispatchSettings,
    pub server_key: &'a KeyPair,
    pub peers: &'a PeerState,
    /// Current unix time in seconds.
    pub now: i64,
}

impl HandlerContext<'_> {
    pub fn sender(&self) -> &str {
        &self.message.sender
    }

    /// Loads the LAO owning this channel.
    pub fn lao(&self) -> Result<LaoRecord, PopError> {
        let lao_path = self
            .channel
            .lao_path()
            .ok_or_else(|| PopError::invalid_resource(format!("{} has no lao", self.channel)))?;
        get_lao(self.conn, &lao_path)
            .map_err(PopError::from)?
            .ok_or_else(|| PopError::invalid_resource(format!("unknown lao {lao_path}")))
    }

    /// Signs a server-generated payload.
    pub fn sign(&self, data: &MessageData) -> Result<Message, PopError> {
        self.server_key.sign_message(data)
    }

    pub fn require_organizer(&self, lao: &LaoRecord) -> Result<(), PopError> {
        if self.sender() != lao.organizer {
            return Err(PopError::access_denied(
                "sender is not the organizer of the lao",
            ));
        }
        Ok(())
    }

    /// Attendees of the LAO's last closed roll call.
    pub fn attendees(&self, lao: &LaoRecord) -> Result<Vec<String>, PopError> {
        current_attendees(self.conn, &lao.path).map_err(PopError::from)
    }
}

pub fn handle(
    ctx: &HandlerContext<'_>,
    channel_type: ChannelType,
    data: MessageData,
) -> Result<Effects, PopError> {
    let result = match channel_type {
        ChannelType::Root => root::handle(ctx, data),
        ChannelType::Lao => lao::handle(ctx, data),
        ChannelType::Election => election::handle(ctx, data),
        ChannelType::Chirp => social::handle_chirp(ctx, data),
        ChannelType::Reaction => social::handle_reaction(ctx, data),
        ChannelType::Coin => coin::handle(ctx, data),
        ChannelType::Consensus => consensus::handle(ctx, data),
        ChannelType::Authentication => authentication::handle(ctx, data),
        ChannelType::Federation => federation::handle(ctx, data),
    };
    result.map_err(|e| e.wrap(channel_type.as_str()))
}

/// The error for a payload the channel type does not accept.
fn not_allowed(channel: ChannelPath<'_>, data: &MessageData) -> PopError {
    let (object, action) = data.object_action();
    PopError::invalid_action(format!("{object}#{action} is not allowed on {channel}"))
}

fn expect_id(what: &str, expected: &str, actual: &str) -> Result<(), PopError> {
    if expected != actual {
        return Err(PopError::invalid_field(format!(
            "invalid {what}: expected {expected}, got {actual}"
        )));
    }
    Ok(())
}

fn require_key(what: &str, key: &str) -> Result<(), PopError> {
    decode_public_key(key)
        .map(|_| ())
        .map_err(|e| PopError::invalid_field(format!("invalid {what}: {e}")))
}

fn require_non_negative(what: &str, value: i64) -> Result<(), PopError> {
    if value < 0 {
        return Err(PopError::invalid_field(format!("{what} must not be negative")));
    }
    Ok(())
}

fn require_not_before(what: &str, value: i64, bound_name: &str, bound: i64) -> Result<(), PopError> {
    if value < bound {
        return Err(PopError::invalid_field(format!(
            "{what} ({value}) is before {bound_name} ({bound})"
        )));
    }
    Ok(())
}
