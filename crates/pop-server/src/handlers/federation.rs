//! The federation handshake between two LAOs hosted on different servers.
//!
//! The organizer of the local LAO asks for a challenge, then announces the
//! remote LAO it expects with `expect`. The remote organizer answers by
//! sending the same challenge, signed by itself, through its server. A
//! matching `challenge` is consumed once and produces a `result` for both
//! sides. `init` is the remote half: it makes this server open the link.

use super::{expect_id, not_allowed, require_key, HandlerContext};
use crate::dispatcher::{Effects, Write};
use crate::outbound::LinkRequest;
use crate::verifier::check_integrity;
use pop_channels::{messages_with_action, LaoRecord};
use pop_federation::{challenge_valid, mint_challenge, ChallengeRecord};
use pop_types::channel::federation_channel;
use pop_types::data::{
    Challenge, ChallengeRequest, FederationLink, FederationResult, FEDERATION_SUCCESS,
};
use pop_types::{Message, MessageData, PopError};

pub fn handle(ctx: &HandlerContext<'_>, data: MessageData) -> Result<Effects, PopError> {
    let lao = ctx.lao()?;
    match data {
        MessageData::ChallengeRequest(request) => challenge_request(ctx, &lao, request),
        MessageData::FederationExpect(expect) => federation_expect(ctx, &lao, expect),
        MessageData::Challenge(challenge) => remote_challenge(ctx, challenge),
        MessageData::FederationResult(result) => federation_result(ctx, &lao, result),
        MessageData::FederationInit(init) => federation_init(ctx, &lao, init),
        other => Err(not_allowed(ctx.channel, &other)),
    }
}

/// Verifies a challenge message embedded in another payload.
fn embedded_challenge(message: &Message) -> Result<Challenge, PopError> {
    check_integrity(message).map_err(|e| e.wrap("embedded challenge"))?;
    match message.parse_data()? {
        MessageData::Challenge(challenge) => Ok(challenge),
        other => {
            let (object, action) = other.object_action();
            Err(PopError::invalid_field(format!(
                "expected an embedded federation#challenge, got {object}#{action}"
            )))
        }
    }
}

/// Stored federation links of one kind on this channel.
fn stored_links(ctx: &HandlerContext<'_>, action: &str) -> Result<Vec<FederationLink>, PopError> {
    let mut links = Vec::new();
    for stored in messages_with_action(ctx.conn, ctx.channel.as_str(), "federation", action)
        .map_err(PopError::from)?
    {
        match stored.parse_data()? {
            MessageData::FederationExpect(link) | MessageData::FederationInit(link) => {
                links.push(link)
            }
            _ => {}
        }
    }
    Ok(links)
}

fn challenge_request(
    ctx: &HandlerContext<'_>,
    lao: &LaoRecord,
    request: ChallengeRequest,
) -> Result<Effects, PopError> {
    ctx.require_organizer(lao)?;

    let challenge = mint_challenge(ctx.now, ctx.settings.challenge_ttl_secs);
    tracing::debug!(
        channel = %ctx.channel,
        requested_at = request.timestamp,
        valid_until = challenge.valid_until,
        "minted federation challenge"
    );

    let record = ChallengeRecord {
        value: challenge.value.clone(),
        channel: ctx.channel.to_string(),
        valid_until: challenge.valid_until,
    };
    let signed = ctx.sign(&MessageData::Challenge(challenge))?;

    Ok(Effects::discard()
        .write(Write::Challenge(record))
        .derived(ctx.channel.as_str(), signed))
}

fn federation_expect(
    ctx: &HandlerContext<'_>,
    lao: &LaoRecord,
    expect: FederationLink,
) -> Result<Effects, PopError> {
    ctx.require_organizer(lao)?;
    require_key("remote organizer key", &expect.public_key)?;
    if expect.lao_id.is_empty() || expect.server_address.is_empty() {
        return Err(PopError::invalid_field("lao_id and server_address are required"));
    }

    let challenge = embedded_challenge(&expect.challenge)?;
    if expect.challenge.sender != lao.organizer {
        return Err(PopError::invalid_field(
            "embedded challenge is not signed by the organizer",
        ));
    }
    if !challenge_valid(ctx.conn, &challenge.value, ctx.channel.as_str(), ctx.now)? {
        return Err(PopError::invalid_field(format!(
            "challenge {} is unknown or expired",
            challenge.value
        )));
    }

    Ok(Effects::store_and_broadcast(ctx.channel.as_str())
        .remote_channel(federation_channel(&expect.lao_id)))
}

/// A challenge forwarded by the remote organizer's server.
fn remote_challenge(ctx: &HandlerContext<'_>, challenge: Challenge) -> Result<Effects, PopError> {
    let mut matching = None;
    for expect in stored_links(ctx, "expect")? {
        if expect.public_key != ctx.sender() {
            continue;
        }
        if let Ok(MessageData::Challenge(expected)) = expect.challenge.parse_data() {
            if expected == challenge {
                matching = Some(expect);
                break;
            }
        }
    }
    let Some(expect) = matching else {
        return Err(PopError::invalid_field(
            "no federation expect matches this challenge",
        ));
    };

    if challenge.valid_until < ctx.now {
        return Err(PopError::access_denied(format!(
            "challenge {} expired at {}",
            challenge.value, challenge.valid_until
        )));
    }

    let result = ctx.sign(&MessageData::FederationResult(FederationResult {
        status: FEDERATION_SUCCESS.to_string(),
        reason: String::new(),
        public_key: ctx.sender().to_string(),
        challenge: expect.challenge,
    }))?;

    Ok(Effects::store_and_broadcast(ctx.channel.as_str())
        .write(Write::ConsumeChallenge(challenge.value))
        .derived(ctx.channel.as_str(), result.clone())
        .remote_publish(federation_channel(&expect.lao_id), result))
}

/// The outcome of a handshake, published by the server that consumed the
/// challenge.
fn federation_result(
    ctx: &HandlerContext<'_>,
    lao: &LaoRecord,
    result: FederationResult,
) -> Result<Effects, PopError> {
    let challenge = embedded_challenge(&result.challenge)?;
    if result.status != FEDERATION_SUCCESS {
        return Err(PopError::invalid_field(format!(
            "federation failed: {} {}",
            result.status, result.reason
        )));
    }
    expect_id("federated organizer", &lao.organizer, &result.public_key)?;

    let remote_organizer = &result.challenge.sender;
    let initiated = stored_links(ctx, "init")?.into_iter().any(|init| {
        &init.public_key == remote_organizer
            && matches!(
                init.challenge.parse_data(),
                Ok(MessageData::Challenge(sent)) if sent.value == challenge.value
            )
    });
    if !initiated {
        return Err(PopError::invalid_field(
            "no federation init matches this result",
        ));
    }

    tracing::info!(channel = %ctx.channel, remote = %remote_organizer, "federation established");
    Ok(Effects::store_and_broadcast(ctx.channel.as_str()))
}

fn federation_init(
    ctx: &HandlerContext<'_>,
    lao: &LaoRecord,
    init: FederationLink,
) -> Result<Effects, PopError> {
    ctx.require_organizer(lao)?;
    require_key("remote organizer key", &init.public_key)?;
    if init.lao_id.is_empty() || init.server_address.is_empty() {
        return Err(PopError::invalid_field("lao_id and server_address are required"));
    }

    embedded_challenge(&init.challenge)?;
    if init.challenge.sender != lao.organizer {
        return Err(PopError::invalid_field(
            "embedded challenge is not signed by the organizer",
        ));
    }

    let link = LinkRequest {
        server_address: init.server_address,
        subscribe: vec![federation_channel(&lao.lao_id)],
        publish: Some((federation_channel(&init.lao_id), init.challenge)),
    };
    Ok(Effects::store_and_broadcast(ctx.channel.as_str()).link(link))
}
