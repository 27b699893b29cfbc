use super::{
    expect_id, not_allowed, require_key, require_non_negative, require_not_before, HandlerContext,
};
use crate::dispatcher::{Effects, Write};
use pop_channels::{
    channel_exists, get_message, last_roll_call, LaoRecord, NewChannel, StoredMessage,
};
use pop_crypto::{verify_signature, ElectionKeyPair};
use pop_election::ElectionRecord;
use pop_types::channel::{election_channel, social_channel};
use pop_types::data::{
    ElectionKey, ElectionSetup, LaoGreet, LaoState, LaoUpdate, MeetingCreate, MeetingState,
    MessageWitness, ModificationSignature, RollCallClose, RollCallCreate, RollCallOpen, APPROVAL,
    OPEN_BALLOT, PLURALITY, SECRET_BALLOT,
};
use pop_types::{decode_base64, hash, ChannelType, MessageData, PopError};
use std::collections::HashSet;

pub fn handle(ctx: &HandlerContext<'_>, data: MessageData) -> Result<Effects, PopError> {
    let lao = ctx.lao()?;
    match data {
        MessageData::LaoState(state) => lao_state(ctx, &lao, state),
        MessageData::LaoUpdate(update) => lao_update(ctx, &lao, update),
        MessageData::LaoGreet(greet) => lao_greet(&lao, greet),
        MessageData::MeetingCreate(create) => meeting_create(ctx, &lao, create),
        MessageData::MeetingState(state) => meeting_state(ctx, &lao, state),
        MessageData::MessageWitness(witness) => message_witness(ctx, &lao, witness),
        MessageData::RollCallCreate(create) => roll_call_create(ctx, &lao, create),
        MessageData::RollCallOpen(open) => roll_call_open(ctx, &lao, open, false),
        MessageData::RollCallReopen(open) => roll_call_open(ctx, &lao, open, true),
        MessageData::RollCallClose(close) => roll_call_close(ctx, &lao, close),
        MessageData::ElectionSetup(setup) => election_setup(ctx, &lao, setup),
        other => Err(not_allowed(ctx.channel, &other)),
    }
}

fn lao_state(ctx: &HandlerContext<'_>, lao: &LaoRecord, state: LaoState) -> Result<Effects, PopError> {
    ctx.require_organizer(lao)?;
    expect_id("lao id", &lao.lao_id, &state.id)?;

    modification_of(ctx, lao, &state.modification_id)?;
    let signed = witnesses_signing(lao, &state.modification_id, &state.modification_signatures)?;
    if signed != lao.witnesses.len() {
        return Err(PopError::invalid_field(format!(
            "expected {} witness signatures, got {}",
            lao.witnesses.len(),
            signed
        )));
    }

    Ok(Effects::store_and_broadcast(&lao.path))
}

/// Loads the message a state refers to, which must live on the LAO channel.
fn modification_of(
    ctx: &HandlerContext<'_>,
    lao: &LaoRecord,
    modification_id: &str,
) -> Result<StoredMessage, PopError> {
    match get_message(ctx.conn, modification_id).map_err(PopError::from)? {
        Some(stored) if stored.channel == lao.path => Ok(stored),
        _ => Err(PopError::invalid_field(format!(
            "modification {modification_id} is not a message of {}",
            lao.path
        ))),
    }
}

/// Verifies that each entry is a distinct LAO witness signing
/// `modification_id`. Returns how many witnesses signed.
fn witnesses_signing(
    lao: &LaoRecord,
    modification_id: &str,
    signatures: &[ModificationSignature],
) -> Result<usize, PopError> {
    let signed_bytes = decode_base64(modification_id)
        .map_err(|e| PopError::invalid_field(format!("invalid modification_id: {e}")))?;

    let mut signed = HashSet::new();
    for entry in signatures {
        if !lao.witnesses.contains(&entry.witness) {
            return Err(PopError::invalid_field(format!(
                "{} is not a witness of the lao",
                entry.witness
            )));
        }
        verify_signature(&entry.witness, &signed_bytes, &entry.signature).map_err(|e| {
            PopError::invalid_field(format!("invalid witness signature from {}: {e}", entry.witness))
        })?;
        if !signed.insert(entry.witness.as_str()) {
            return Err(PopError::invalid_field(format!(
                "witness {} signed more than once",
                entry.witness
            )));
        }
    }
    Ok(signed.len())
}

fn lao_update(ctx: &HandlerContext<'_>, lao: &LaoRecord, update: LaoUpdate) -> Result<Effects, PopError> {
    ctx.require_organizer(lao)?;
    expect_id("lao id", &lao.lao_id, &update.id)?;
    if update.name.is_empty() {
        return Err(PopError::invalid_field("lao name must not be empty"));
    }
    require_not_before("last_modified", update.last_modified, "creation", lao.creation)?;
    for witness in &update.witnesses {
        require_key("witness key", witness)?;
    }
    Ok(Effects::store_and_broadcast(&lao.path))
}

/// Greetings signed by peer servers for a LAO they also host.
fn lao_greet(lao: &LaoRecord, greet: LaoGreet) -> Result<Effects, PopError> {
    expect_id("lao id", &lao.lao_id, &greet.lao)?;
    if greet.frontend != lao.organizer {
        return Err(PopError::invalid_field("greet frontend is not the lao organizer"));
    }
    Ok(Effects::store_and_broadcast(&lao.path))
}

fn meeting_create(
    ctx: &HandlerContext<'_>,
    lao: &LaoRecord,
    create: MeetingCreate,
) -> Result<Effects, PopError> {
    ctx.require_organizer(lao)?;
    let expected = hash(&[
        "M",
        lao.lao_id.as_str(),
        create.creation.to_string().as_str(),
        create.name.as_str(),
    ]);
    expect_id("meeting id", &expected, &create.id)?;
    if create.name.is_empty() {
        return Err(PopError::invalid_field("meeting name must not be empty"));
    }
    require_not_before("creation", create.creation, "lao creation", lao.creation)?;
    require_not_before("start", create.start, "creation", create.creation)?;
    if let Some(end) = create.end {
        require_not_before("end", end, "start", create.start)?;
    }
    Ok(Effects::store_and_broadcast(&lao.path))
}

/// A witnessed snapshot of a meeting. The modification must be an earlier
/// create or state of the same meeting.
fn meeting_state(
    ctx: &HandlerContext<'_>,
    lao: &LaoRecord,
    state: MeetingState,
) -> Result<Effects, PopError> {
    ctx.require_organizer(lao)?;
    let modification = modification_of(ctx, lao, &state.modification_id)?;
    let meeting_id = match modification.parse_data()? {
        MessageData::MeetingCreate(create) => create.id,
        MessageData::MeetingState(previous) => previous.id,
        other => {
            let (object, action) = other.object_action();
            return Err(PopError::invalid_field(format!(
                "modification {} is a {object}#{action}, not a meeting",
                state.modification_id
            )));
        }
    };
    expect_id("meeting id", &meeting_id, &state.id)?;
    require_not_before("last_modified", state.last_modified, "creation", state.creation)?;
    if let Some(end) = state.end {
        require_not_before("end", end, "start", state.start)?;
    }
    witnesses_signing(lao, &state.modification_id, &state.modification_signatures)?;
    Ok(Effects::store_and_broadcast(&lao.path))
}

/// A late witness signature over a message of the LAO channel.
fn message_witness(
    ctx: &HandlerContext<'_>,
    lao: &LaoRecord,
    witness: MessageWitness,
) -> Result<Effects, PopError> {
    if !lao.witnesses.iter().any(|w| w == ctx.sender()) {
        return Err(PopError::access_denied("sender is not a witness of the lao"));
    }
    modification_of(ctx, lao, &witness.message_id)?;
    witnesses_signing(
        lao,
        &witness.message_id,
        &[ModificationSignature {
            witness: ctx.sender().to_string(),
            signature: witness.signature,
        }],
    )?;
    Ok(Effects::store_and_broadcast(&lao.path))
}

/// Where the LAO's roll-call state machine currently stands.
enum RollCallState {
    None,
    Created { id: String },
    Opened { update_id: String },
    Closed { update_id: String },
}

fn roll_call_state(ctx: &HandlerContext<'_>, lao: &LaoRecord) -> Result<RollCallState, PopError> {
    let Some(last) = last_roll_call(ctx.conn, &lao.path).map_err(PopError::from)? else {
        return Ok(RollCallState::None);
    };
    Ok(match last.parse_data()? {
        MessageData::RollCallCreate(create) => RollCallState::Created { id: create.id },
        MessageData::RollCallOpen(open) | MessageData::RollCallReopen(open) => {
            RollCallState::Opened {
                update_id: open.update_id,
            }
        }
        MessageData::RollCallClose(close) => RollCallState::Closed {
            update_id: close.update_id,
        },
        other => {
            let (object, action) = other.object_action();
            return Err(PopError::internal(format!(
                "unexpected {object}#{action} in roll-call history"
            )));
        }
    })
}

fn roll_call_create(
    ctx: &HandlerContext<'_>,
    lao: &LaoRecord,
    create: RollCallCreate,
) -> Result<Effects, PopError> {
    ctx.require_organizer(lao)?;

    let creation = create.creation.to_string();
    let expected = hash(&["R", lao.lao_id.as_str(), creation.as_str(), create.name.as_str()]);
    expect_id("roll call id", &expected, &create.id)?;

    require_non_negative("creation", create.creation)?;
    require_not_before("proposed_start", create.proposed_start, "creation", create.creation)?;
    require_not_before(
        "proposed_end",
        create.proposed_end,
        "proposed_start",
        create.proposed_start,
    )?;

    match roll_call_state(ctx, lao)? {
        RollCallState::None | RollCallState::Closed { .. } => {}
        _ => {
            return Err(PopError::invalid_action(
                "a roll call is already in progress",
            ))
        }
    }

    Ok(Effects::store_and_broadcast(&lao.path))
}

fn roll_call_open(
    ctx: &HandlerContext<'_>,
    lao: &LaoRecord,
    open: RollCallOpen,
    reopen: bool,
) -> Result<Effects, PopError> {
    ctx.require_organizer(lao)?;
    require_non_negative("opened_at", open.opened_at)?;

    let opened_at = open.opened_at.to_string();
    let expected = hash(&["R", lao.lao_id.as_str(), open.opens.as_str(), opened_at.as_str()]);
    expect_id("roll call update id", &expected, &open.update_id)?;

    let previous = match (roll_call_state(ctx, lao)?, reopen) {
        (RollCallState::Created { id }, false) => id,
        (RollCallState::Closed { update_id }, true) => update_id,
        (_, false) => return Err(PopError::invalid_action("no created roll call to open")),
        (_, true) => return Err(PopError::invalid_action("no closed roll call to reopen")),
    };
    if open.opens != previous {
        return Err(PopError::invalid_field(format!(
            "opens {} does not reference the last roll call transition {previous}",
            open.opens
        )));
    }

    Ok(Effects::store_and_broadcast(&lao.path))
}

fn roll_call_close(
    ctx: &HandlerContext<'_>,
    lao: &LaoRecord,
    close: RollCallClose,
) -> Result<Effects, PopError> {
    ctx.require_organizer(lao)?;
    require_non_negative("closed_at", close.closed_at)?;

    let closed_at = close.closed_at.to_string();
    let expected = hash(&["R", lao.lao_id.as_str(), close.closes.as_str(), closed_at.as_str()]);
    expect_id("roll call update id", &expected, &close.update_id)?;

    let RollCallState::Opened { update_id } = roll_call_state(ctx, lao)? else {
        return Err(PopError::invalid_action("no open roll call to close"));
    };
    if close.closes != update_id {
        return Err(PopError::invalid_field(format!(
            "closes {} does not reference the open roll call {update_id}",
            close.closes
        )));
    }

    let mut effects = Effects::store_and_broadcast(&lao.path);
    for attendee in &close.attendees {
        require_key("attendee", attendee)?;
        effects = effects.channel(NewChannel::new(
            social_channel(&lao.lao_id, attendee),
            ChannelType::Chirp,
            Some(&lao.path),
        ));
    }
    Ok(effects)
}

fn election_setup(
    ctx: &HandlerContext<'_>,
    lao: &LaoRecord,
    setup: ElectionSetup,
) -> Result<Effects, PopError> {
    ctx.require_organizer(lao)?;
    expect_id("lao id", &lao.lao_id, &setup.lao)?;

    let created_at = setup.created_at.to_string();
    let expected = hash(&[
        "Election",
        lao.lao_id.as_str(),
        created_at.as_str(),
        setup.name.as_str(),
    ]);
    expect_id("election id", &expected, &setup.id)?;

    if setup.name.is_empty() {
        return Err(PopError::invalid_field("election name must not be empty"));
    }
    require_non_negative("created_at", setup.created_at)?;
    require_not_before("start_time", setup.start_time, "created_at", setup.created_at)?;
    require_not_before("end_time", setup.end_time, "start_time", setup.start_time)?;

    if setup.version != OPEN_BALLOT && setup.version != SECRET_BALLOT {
        return Err(PopError::invalid_field(format!(
            "unknown election version {}",
            setup.version
        )));
    }
    if setup.questions.is_empty() {
        return Err(PopError::invalid_field("an election needs at least one question"));
    }
    for question in &setup.questions {
        let expected = hash(&["Question", setup.id.as_str(), question.question.as_str()]);
        expect_id("question id", &expected, &question.id)?;
        if question.voting_method != PLURALITY && question.voting_method != APPROVAL {
            return Err(PopError::invalid_field(format!(
                "unknown voting method {}",
                question.voting_method
            )));
        }
        if question.ballot_options.is_empty() {
            return Err(PopError::invalid_field(format!(
                "question {} has no ballot options",
                question.id
            )));
        }
    }

    let path = election_channel(&lao.lao_id, &setup.id);
    if channel_exists(ctx.conn, &path).map_err(PopError::from)? {
        return Err(PopError::duplicate_resource(format!(
            "election {} already exists",
            setup.id
        )));
    }

    let record = ElectionRecord {
        path: path.clone(),
        lao_path: lao.path.clone(),
        election_id: setup.id.clone(),
        version: setup.version.clone(),
        created_at: setup.created_at,
        questions: setup.questions,
        keys: ElectionKeyPair::generate(),
    };

    let mut effects = Effects::store_and_broadcast(&lao.path).channel(NewChannel::new(
        path.clone(),
        ChannelType::Election,
        Some(&lao.path),
    ));

    if record.is_secret_ballot() {
        let key = ctx.sign(&MessageData::ElectionKey(ElectionKey {
            election: setup.id,
            election_key: record.keys.public_key(),
        }))?;
        effects = effects.derived(&path, key);
    }

    Ok(effects.write(Write::Election(record)))
}
