//! Chirps, chirp notifications and reactions.
//!
//! Every attendee owns a chirp channel named after their pop token. Accepted
//! chirps and deletions are mirrored as server-signed notifications on the
//! LAO's aggregate `social/chirps` channel.

use super::{not_allowed, HandlerContext};
use crate::dispatcher::Effects;
use pop_channels::{get_message, StoredMessage};
use pop_types::channel::chirps_channel;
use pop_types::data::{ChirpAdd, ChirpDelete, ChirpNotify, ReactionAdd, ReactionDelete};
use pop_types::{MessageData, PopError};

pub const MAX_CHIRP_CHARS: usize = 300;

pub fn handle_chirp(ctx: &HandlerContext<'_>, data: MessageData) -> Result<Effects, PopError> {
    let lao = ctx.lao()?;
    let aggregate = chirps_channel(&lao.lao_id);
    let is_aggregate = ctx.channel.as_str() == aggregate;

    match data {
        MessageData::ChirpAdd(add) if !is_aggregate => chirp_add(ctx, &aggregate, add),
        MessageData::ChirpDelete(delete) if !is_aggregate => chirp_delete(ctx, &aggregate, delete),
        MessageData::ChirpNotifyAdd(notify) | MessageData::ChirpNotifyDelete(notify)
            if is_aggregate =>
        {
            chirp_notify(&lao.path, &aggregate, notify)
        }
        other => Err(not_allowed(ctx.channel, &other)),
    }
}

fn require_channel_owner(ctx: &HandlerContext<'_>) -> Result<(), PopError> {
    if ctx.sender() != ctx.channel.last_segment() {
        return Err(PopError::access_denied(
            "only the owner of a chirp channel may post on it",
        ));
    }
    Ok(())
}

fn chirp_add(ctx: &HandlerContext<'_>, aggregate: &str, add: ChirpAdd) -> Result<Effects, PopError> {
    require_channel_owner(ctx)?;

    let chars = add.text.chars().count();
    if chars > MAX_CHIRP_CHARS {
        return Err(PopError::invalid_field(format!(
            "chirp text is {chars} characters, the limit is {MAX_CHIRP_CHARS}"
        )));
    }

    let notify = ctx.sign(&MessageData::ChirpNotifyAdd(ChirpNotify {
        chirp_id: ctx.message.message_id.clone(),
        channel: ctx.channel.to_string(),
        timestamp: add.timestamp,
    }))?;
    Ok(Effects::store_and_broadcast(ctx.channel.as_str()).derived(aggregate, notify))
}

fn chirp_delete(
    ctx: &HandlerContext<'_>,
    aggregate: &str,
    delete: ChirpDelete,
) -> Result<Effects, PopError> {
    require_channel_owner(ctx)?;

    let target = stored(ctx, &delete.chirp_id)?;
    if target.channel != ctx.channel.as_str()
        || (target.object.as_str(), target.action.as_str()) != ("chirp", "add")
    {
        return Err(PopError::invalid_resource(format!(
            "no chirp {} on {}",
            delete.chirp_id, ctx.channel
        )));
    }

    let notify = ctx.sign(&MessageData::ChirpNotifyDelete(ChirpNotify {
        chirp_id: delete.chirp_id,
        channel: ctx.channel.to_string(),
        timestamp: delete.timestamp,
    }))?;
    Ok(Effects::store_and_broadcast(ctx.channel.as_str()).derived(aggregate, notify))
}

/// Notifications relayed from the server that accepted the chirp.
fn chirp_notify(lao_path: &str, aggregate: &str, notify: ChirpNotify) -> Result<Effects, PopError> {
    let social_prefix = format!("{lao_path}/social/");
    if !notify.channel.starts_with(&social_prefix) {
        return Err(PopError::invalid_field(format!(
            "notification for {} does not belong to {lao_path}",
            notify.channel
        )));
    }
    Ok(Effects::store_and_broadcast(aggregate))
}

pub fn handle_reaction(ctx: &HandlerContext<'_>, data: MessageData) -> Result<Effects, PopError> {
    match data {
        MessageData::ReactionAdd(add) => reaction_add(ctx, add),
        MessageData::ReactionDelete(delete) => reaction_delete(ctx, delete),
        other => Err(not_allowed(ctx.channel, &other)),
    }
}

fn reaction_add(ctx: &HandlerContext<'_>, add: ReactionAdd) -> Result<Effects, PopError> {
    let lao = ctx.lao()?;
    if !ctx.attendees(&lao)?.iter().any(|a| a == ctx.sender()) {
        return Err(PopError::access_denied("only roll-call attendees may react"));
    }
    if add.reaction_codepoint.is_empty() {
        return Err(PopError::invalid_field("reaction codepoint must not be empty"));
    }

    let chirp = stored(ctx, &add.chirp_id)?;
    if (chirp.object.as_str(), chirp.action.as_str()) != ("chirp", "add") {
        return Err(PopError::invalid_resource(format!(
            "{} is not a chirp",
            add.chirp_id
        )));
    }
    Ok(Effects::store_and_broadcast(ctx.channel.as_str()))
}

fn reaction_delete(ctx: &HandlerContext<'_>, delete: ReactionDelete) -> Result<Effects, PopError> {
    let reaction = stored(ctx, &delete.reaction_id)?;
    if reaction.channel != ctx.channel.as_str()
        || (reaction.object.as_str(), reaction.action.as_str()) != ("reaction", "add")
    {
        return Err(PopError::invalid_resource(format!(
            "no reaction {} on {}",
            delete.reaction_id, ctx.channel
        )));
    }
    if reaction.message.sender != ctx.sender() {
        return Err(PopError::access_denied("only the author may delete a reaction"));
    }
    Ok(Effects::store_and_broadcast(ctx.channel.as_str()))
}

fn stored(ctx: &HandlerContext<'_>, message_id: &str) -> Result<StoredMessage, PopError> {
    get_message(ctx.conn, message_id)
        .map_err(PopError::from)?
        .ok_or_else(|| PopError::invalid_resource(format!("unknown message {message_id}")))
}
