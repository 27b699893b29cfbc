use super::{expect_id, not_allowed, require_key, require_non_negative, HandlerContext};
use crate::dispatcher::{Effects, Write};
use pop_channels::{channel_exists, LaoRecord, NewChannel};
use pop_types::channel::{lao_channel, lao_sub_channels};
use pop_types::data::{LaoCreate, LaoGreet, PeerAddress};
use pop_types::{hash, ChannelType, MessageData, PopError};

pub fn handle(ctx: &HandlerContext<'_>, data: MessageData) -> Result<Effects, PopError> {
    match data {
        MessageData::LaoCreate(create) => lao_create(ctx, create),
        other => Err(not_allowed(ctx.channel, &other)),
    }
}

fn lao_create(ctx: &HandlerContext<'_>, create: LaoCreate) -> Result<Effects, PopError> {
    if ctx.sender() != create.organizer {
        return Err(PopError::access_denied("sender must be the lao organizer"));
    }
    if let Some(owner) = &ctx.settings.owner_public_key {
        if owner != &create.organizer {
            return Err(PopError::access_denied(
                "only the server owner may create a lao",
            ));
        }
    }

    if create.name.is_empty() {
        return Err(PopError::invalid_field("lao name must not be empty"));
    }
    require_non_negative("creation", create.creation)?;
    for witness in &create.witnesses {
        require_key("witness key", witness)?;
    }

    let expected = hash(&[
        create.organizer.as_str(),
        create.creation.to_string().as_str(),
        create.name.as_str(),
    ]);
    expect_id("lao id", &expected, &create.id)?;

    let lao_path = lao_channel(&create.id);
    if channel_exists(ctx.conn, &lao_path).map_err(PopError::from)? {
        return Err(PopError::duplicate_resource(format!(
            "lao {} already exists",
            create.id
        )));
    }

    let greet = ctx.sign(&MessageData::LaoGreet(LaoGreet {
        lao: create.id.clone(),
        frontend: create.organizer.clone(),
        address: ctx.settings.client_address.clone(),
        peers: ctx
            .peers
            .peer_client_addresses()
            .into_iter()
            .map(|address| PeerAddress { address })
            .collect(),
    }))?;

    let mut effects = Effects::store_only(lao_path.clone())
        .write(Write::Lao(LaoRecord {
            path: lao_path.clone(),
            lao_id: create.id.clone(),
            organizer: create.organizer,
            witnesses: create.witnesses,
            creation: create.creation,
        }))
        .channel(NewChannel::new(lao_path.clone(), ChannelType::Lao, None));

    for (path, channel_type) in lao_sub_channels(&create.id) {
        effects = effects.channel(NewChannel::new(path, channel_type, Some(&lao_path)));
    }

    Ok(effects.derived(&lao_path, greet))
}
