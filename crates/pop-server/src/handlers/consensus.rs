use super::{not_allowed, require_non_negative, HandlerContext};
use crate::dispatcher::Effects;
use pop_channels::get_message;
use pop_types::data::{ConsensusElect, ConsensusElectAccept};
use pop_types::{MessageData, PopError};

pub fn handle(ctx: &HandlerContext<'_>, data: MessageData) -> Result<Effects, PopError> {
    require_member(ctx)?;
    match data {
        MessageData::ConsensusElect(elect) => consensus_elect(ctx, elect),
        MessageData::ConsensusElectAccept(accept) => consensus_elect_accept(ctx, accept),
        other => Err(not_allowed(ctx.channel, &other)),
    }
}

/// Organizer, witnesses and attendees of the last closed roll call.
fn require_member(ctx: &HandlerContext<'_>) -> Result<(), PopError> {
    let lao = ctx.lao()?;
    let sender = ctx.sender();
    if sender == lao.organizer
        || lao.witnesses.iter().any(|w| w == sender)
        || ctx.attendees(&lao)?.iter().any(|a| a == sender)
    {
        return Ok(());
    }
    Err(PopError::access_denied("sender is not a member of the lao"))
}

fn consensus_elect(ctx: &HandlerContext<'_>, elect: ConsensusElect) -> Result<Effects, PopError> {
    if elect.instance_id.is_empty() {
        return Err(PopError::invalid_field("instance_id must not be empty"));
    }
    require_non_negative("created_at", elect.created_at)?;
    Ok(Effects::store_and_broadcast(ctx.channel.as_str()))
}

fn consensus_elect_accept(
    ctx: &HandlerContext<'_>,
    accept: ConsensusElectAccept,
) -> Result<Effects, PopError> {
    let elect = get_message(ctx.conn, &accept.message_id)
        .map_err(PopError::from)?
        .filter(|m| m.channel == ctx.channel.as_str() && m.action == "elect")
        .ok_or_else(|| {
            PopError::invalid_resource(format!("no elect message {}", accept.message_id))
        })?;

    match elect.parse_data()? {
        MessageData::ConsensusElect(original) if original.instance_id == accept.instance_id => {
            Ok(Effects::store_and_broadcast(ctx.channel.as_str()))
        }
        _ => Err(PopError::invalid_field(format!(
            "elect {} belongs to another instance",
            accept.message_id
        ))),
    }
}
