use super::{expect_id, not_allowed, require_non_negative, require_not_before, HandlerContext};
use crate::dispatcher::Effects;
use pop_channels::LaoRecord;
use pop_crypto::CIPHERTEXT_LEN;
use pop_election::{election_status, get_election, ElectionRecord, ElectionStatus, ElectionTally};
use pop_types::data::{CastVote, ElectionEnd, ElectionKey, ElectionOpen, ElectionResult, VoteChoice};
use pop_types::{decode_base64, hash, MessageData, PopError};

pub fn handle(ctx: &HandlerContext<'_>, data: MessageData) -> Result<Effects, PopError> {
    let lao = ctx.lao()?;
    let election = get_election(ctx.conn, ctx.channel.as_str())?.ok_or_else(|| {
        PopError::invalid_resource(format!("unknown election {}", ctx.channel))
    })?;

    match data {
        MessageData::ElectionOpen(open) => election_open(ctx, &lao, &election, open),
        MessageData::CastVote(cast) => cast_vote(ctx, &lao, &election, cast),
        MessageData::ElectionEnd(end) => election_end(ctx, &lao, &election, end),
        MessageData::ElectionKey(key) => election_key(&election, key),
        MessageData::ElectionResult(result) => election_result(ctx, &election, result),
        other => Err(not_allowed(ctx.channel, &other)),
    }
}

fn expect_election(
    lao: &LaoRecord,
    election: &ElectionRecord,
    lao_id: &str,
    election_id: &str,
) -> Result<(), PopError> {
    expect_id("lao id", &lao.lao_id, lao_id)?;
    expect_id("election id", &election.election_id, election_id)
}

fn status(ctx: &HandlerContext<'_>, election: &ElectionRecord) -> Result<ElectionStatus, PopError> {
    Ok(election_status(ctx.conn, &election.path)?)
}

fn require_open(ctx: &HandlerContext<'_>, election: &ElectionRecord) -> Result<(), PopError> {
    match status(ctx, election)? {
        ElectionStatus::Open => Ok(()),
        ElectionStatus::Created => Err(PopError::invalid_action("election is not open")),
        ElectionStatus::Ended => Err(PopError::invalid_action("election has ended")),
    }
}

fn election_open(
    ctx: &HandlerContext<'_>,
    lao: &LaoRecord,
    election: &ElectionRecord,
    open: ElectionOpen,
) -> Result<Effects, PopError> {
    ctx.require_organizer(lao)?;
    expect_election(lao, election, &open.lao, &open.election)?;

    match status(ctx, election)? {
        ElectionStatus::Created => {}
        ElectionStatus::Open => return Err(PopError::invalid_action("election is already open")),
        ElectionStatus::Ended => return Err(PopError::invalid_action("election has ended")),
    }
    require_not_before("opened_at", open.opened_at, "election creation", election.created_at)?;

    Ok(Effects::store_and_broadcast(&election.path))
}

fn cast_vote(
    ctx: &HandlerContext<'_>,
    lao: &LaoRecord,
    election: &ElectionRecord,
    cast: CastVote,
) -> Result<Effects, PopError> {
    if ctx.sender() != lao.organizer && !ctx.attendees(lao)?.iter().any(|a| a == ctx.sender()) {
        return Err(PopError::access_denied(
            "only the organizer and roll-call attendees may vote",
        ));
    }
    expect_election(lao, election, &cast.lao, &cast.election)?;
    require_open(ctx, election)?;
    require_non_negative("created_at", cast.created_at)?;
    require_not_before("created_at", cast.created_at, "election creation", election.created_at)?;

    for vote in &cast.votes {
        if election.question(&vote.question).is_none() {
            return Err(PopError::invalid_field(format!(
                "unknown question {}",
                vote.question
            )));
        }

        match (&vote.vote, election.is_secret_ballot()) {
            (VoteChoice::Index(_), false) => {}
            (VoteChoice::Encrypted(ciphertext), true) => {
                let bytes = decode_base64(ciphertext)
                    .map_err(|e| PopError::invalid_field(format!("invalid encrypted vote: {e}")))?;
                if bytes.len() != CIPHERTEXT_LEN {
                    return Err(PopError::invalid_field(format!(
                        "encrypted vote must be {CIPHERTEXT_LEN} bytes, got {}",
                        bytes.len()
                    )));
                }
            }
            (_, true) => {
                return Err(PopError::invalid_field(
                    "secret ballot votes must be encrypted",
                ))
            }
            (_, false) => {
                return Err(PopError::invalid_field(
                    "open ballot votes must be option indexes",
                ))
            }
        }

        let choice = vote.vote.id_component();
        let expected = hash(&[
            "Vote",
            election.election_id.as_str(),
            vote.question.as_str(),
            choice.as_str(),
        ]);
        expect_id("vote id", &expected, &vote.id)?;
    }

    Ok(Effects::store_and_broadcast(&election.path))
}

fn election_end(
    ctx: &HandlerContext<'_>,
    lao: &LaoRecord,
    election: &ElectionRecord,
    end: ElectionEnd,
) -> Result<Effects, PopError> {
    ctx.require_organizer(lao)?;
    expect_election(lao, election, &end.lao, &end.election)?;
    require_open(ctx, election)?;
    require_not_before("created_at", end.created_at, "election creation", election.created_at)?;

    let tally = ElectionTally::load(ctx.conn, election)?;
    tally.verify_registered(&end.registered_votes)?;

    let result = ctx.sign(&MessageData::ElectionResult(tally.result()))?;
    tracing::info!(
        election = %election.path,
        votes = tally.votes().count(),
        "election ended"
    );

    Ok(Effects::store_and_broadcast(&election.path).derived(&election.path, result))
}

/// A secret-ballot key announced by the server hosting the election.
fn election_key(election: &ElectionRecord, key: ElectionKey) -> Result<Effects, PopError> {
    expect_id("election id", &election.election_id, &key.election)?;
    if !election.is_secret_ballot() {
        return Err(PopError::invalid_action("open ballot elections have no key"));
    }
    Ok(Effects::store_and_broadcast(&election.path))
}

/// A result tallied by a peer server.
fn election_result(
    ctx: &HandlerContext<'_>,
    election: &ElectionRecord,
    result: ElectionResult,
) -> Result<Effects, PopError> {
    if status(ctx, election)? != ElectionStatus::Ended {
        return Err(PopError::invalid_action("election has not ended"));
    }
    for question in &result.questions {
        if election.question(&question.id).is_none() {
            return Err(PopError::invalid_field(format!(
                "unknown question {}",
                question.id
            )));
        }
    }
    Ok(Effects::store_and_broadcast(&election.path))
}
