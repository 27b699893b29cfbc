use super::{not_allowed, HandlerContext};
use crate::dispatcher::Effects;
use pop_crypto::verify_signature;
use pop_types::data::PopchaAuthenticate;
use pop_types::{MessageData, PopError};

pub fn handle(ctx: &HandlerContext<'_>, data: MessageData) -> Result<Effects, PopError> {
    match data {
        MessageData::PopchaAuthenticate(auth) => authenticate(ctx, auth),
        other => Err(not_allowed(ctx.channel, &other)),
    }
}

/// Stored for auditing, never broadcast: the proof is meant for the
/// authentication server at `popcha_address`.
fn authenticate(ctx: &HandlerContext<'_>, auth: PopchaAuthenticate) -> Result<Effects, PopError> {
    if auth.client_id.is_empty() || auth.nonce.is_empty() {
        return Err(PopError::invalid_field("client_id and nonce are required"));
    }
    verify_signature(&auth.identifier, auth.nonce.as_bytes(), &auth.identifier_proof)
        .map_err(|e| PopError::invalid_field(format!("invalid identifier proof: {e}")))?;

    tracing::debug!(
        client_id = %auth.client_id,
        popcha_address = %auth.popcha_address,
        "popcha authentication accepted"
    );
    Ok(Effects::store_only(ctx.channel.as_str()))
}
