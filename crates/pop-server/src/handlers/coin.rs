use super::{not_allowed, require_key, HandlerContext};
use crate::dispatcher::Effects;
use pop_types::data::PostTransaction;
use pop_types::{decode_base64, MessageData, PopError};

const SIGNATURE_LEN: usize = 64;

pub fn handle(ctx: &HandlerContext<'_>, data: MessageData) -> Result<Effects, PopError> {
    match data {
        MessageData::PostTransaction(post) => post_transaction(ctx, post),
        other => Err(not_allowed(ctx.channel, &other)),
    }
}

fn post_transaction(ctx: &HandlerContext<'_>, post: PostTransaction) -> Result<Effects, PopError> {
    let tx = &post.transaction;
    if tx.inputs.is_empty() {
        return Err(PopError::invalid_field("transaction has no inputs"));
    }
    if tx.outputs.is_empty() {
        return Err(PopError::invalid_field("transaction has no outputs"));
    }

    for input in &tx.inputs {
        require_key("input public key", &input.script.pubkey)?;
        let signature = decode_base64(&input.script.sig)
            .map_err(|e| PopError::invalid_field(format!("invalid input signature: {e}")))?;
        if signature.len() != SIGNATURE_LEN {
            return Err(PopError::invalid_field(format!(
                "input signature must be {SIGNATURE_LEN} bytes, got {}",
                signature.len()
            )));
        }
    }
    if let Some(output) = tx.outputs.iter().find(|o| o.value < 0) {
        return Err(PopError::invalid_field(format!(
            "negative output value {}",
            output.value
        )));
    }

    Ok(Effects::store_and_broadcast(ctx.channel.as_str()))
}
