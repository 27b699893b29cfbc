mod common;

use common::{actions, catchup, memory_state, sign, TestLao};
use pop_crypto::KeyPair;
use pop_server::convergence::converge;
use pop_server::AppState;
use pop_types::channel::{election_channel, social_channel};
use pop_types::data::{
    CastVote, ChirpAdd, ElectionOpen, ElectionQuestion, ElectionSetup, Vote, VoteChoice,
    OPEN_BALLOT, PLURALITY,
};
use pop_types::{hash, IdsByChannel, Message, MessageBatch, MessageData, ROOT_CHANNEL};

/// A LAO history produced elsewhere: the LAO channel messages in causal
/// order, plus one chirp by the admitted attendee.
struct History {
    lao: TestLao,
    lao_messages: Vec<Message>,
    chirp_channel: String,
    chirp: Message,
}

fn history() -> History {
    let (lao, create) = TestLao::new("Assembly", 1_000, Vec::new());
    let alice = KeyPair::generate();

    let (id, roll_call) = lao.roll_call_create("admission", 1_100);
    let (opened, open) = lao.roll_call_open(&id, 1_200, false);
    let (_, close) = lao.roll_call_close(&opened, 1_300, &[&alice]);

    let chirp = sign(
        &alice,
        MessageData::ChirpAdd(ChirpAdd {
            text: "first!".to_string(),
            parent_id: None,
            timestamp: 1_400,
        }),
    );

    History {
        chirp_channel: social_channel(&lao.id, &alice.public_key()),
        lao_messages: vec![create, roll_call, open, close],
        chirp,
        lao,
    }
}

fn batch(history: &History, lao_messages: Vec<Message>) -> MessageBatch {
    MessageBatch::from([
        (history.lao.path.clone(), lao_messages),
        (history.chirp_channel.clone(), vec![history.chirp.clone()]),
    ])
}

fn assert_converged(state: &AppState, history: &History) {
    let lao_channel = catchup(state, &history.lao.path);
    assert_eq!(
        actions(&lao_channel),
        vec![
            ("lao", "create"),
            ("lao", "greet"),
            ("roll_call", "create"),
            ("roll_call", "open"),
            ("roll_call", "close"),
        ]
    );
    assert_eq!(catchup(state, &history.chirp_channel), vec![history.chirp.clone()]);
}

#[test]
fn converges_whatever_the_arrival_order() {
    let history = history();
    let mut orders = Vec::new();
    for shift in 0..history.lao_messages.len() {
        let mut order = history.lao_messages.clone();
        order.rotate_left(shift);
        orders.push(order.clone());
        order.reverse();
        orders.push(order);
    }

    for order in orders {
        let state = memory_state();
        let report = converge(&state.dispatcher, &state.blacklist, batch(&history, order));

        assert_eq!(report.processed.len(), 5);
        assert!(report.pending.is_empty());
        assert!(report.blacklisted.is_empty());
        assert_converged(&state, &history);
    }
}

#[test]
fn replaying_a_batch_is_a_no_op() {
    let history = history();
    let state = memory_state();

    let first = converge(
        &state.dispatcher,
        &state.blacklist,
        batch(&history, history.lao_messages.clone()),
    );
    assert_eq!(first.processed.len(), 5);

    let again = converge(
        &state.dispatcher,
        &state.blacklist,
        batch(&history, history.lao_messages.clone()),
    );
    assert!(again.processed.is_empty());
    assert!(again.pending.is_empty());
    assert!(again.blacklisted.is_empty());
    assert_converged(&state, &history);
}

#[test]
fn invalid_messages_are_blacklisted_and_skipped() {
    let history = history();
    let state = memory_state();

    // A roll call created by someone other than the organizer can never
    // become valid.
    let (_, forged) = history.lao.roll_call_create("forged", 1_050);
    let forged = sign(&KeyPair::generate(), forged.parse_data().unwrap());
    let mut tampered = history.lao_messages[1].clone();
    tampered.signature = history.lao_messages[2].signature.clone();
    tampered.message_id = Message::compute_id(&tampered.data, &tampered.signature);

    let incoming = MessageBatch::from([(
        history.lao.path.clone(),
        vec![
            history.lao_messages[0].clone(),
            forged.clone(),
            tampered.clone(),
        ],
    )]);
    let report = converge(&state.dispatcher, &state.blacklist, incoming);

    assert_eq!(report.processed, vec![history.lao_messages[0].message_id.clone()]);
    assert!(report.pending.is_empty());
    assert_eq!(report.blacklisted.len(), 2);
    assert!(state.blacklist.contains(&forged.message_id));
    assert!(state.blacklist.contains(&tampered.message_id));

    // Blacklisted ids are neither retried nor requested again.
    let report = converge(
        &state.dispatcher,
        &state.blacklist,
        MessageBatch::from([(history.lao.path.clone(), vec![forged.clone()])]),
    );
    assert!(report.processed.is_empty());
    assert!(report.blacklisted.is_empty());

    let offered = IdsByChannel::from([(
        history.lao.path.clone(),
        vec![forged.message_id.clone(), history.lao_messages[1].message_id.clone()],
    )]);
    assert_eq!(
        state.blacklist.filter(&offered),
        IdsByChannel::from([(
            history.lao.path.clone(),
            vec![history.lao_messages[1].message_id.clone()],
        )])
    );
}

/// Every ordering of `items`.
fn permutations(items: &[Message]) -> Vec<Vec<Message>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut all = Vec::new();
    for (i, first) in items.iter().enumerate() {
        let mut rest = items.to_vec();
        rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, first.clone());
            all.push(tail);
        }
    }
    all
}

/// A LAO with one open-ballot election, opened and voted on by the organizer.
struct ElectionHistory {
    lao: TestLao,
    create: Message,
    setup: Message,
    election_path: String,
    open: Message,
    vote: Message,
}

fn election_history() -> ElectionHistory {
    let (lao, create) = TestLao::new("Assembly", 1_000, Vec::new());
    let created_at = 2_000;
    let name = "Chair";
    let election_id = hash(&[
        "Election",
        lao.id.as_str(),
        created_at.to_string().as_str(),
        name,
    ]);
    let question_id = hash(&["Question", election_id.as_str(), "Who leads?"]);

    let setup = sign(
        &lao.organizer,
        MessageData::ElectionSetup(ElectionSetup {
            id: election_id.clone(),
            lao: lao.id.clone(),
            name: name.to_string(),
            version: OPEN_BALLOT.to_string(),
            created_at,
            start_time: created_at,
            end_time: created_at + 3_600,
            questions: vec![ElectionQuestion {
                id: question_id.clone(),
                question: "Who leads?".to_string(),
                voting_method: PLURALITY.to_string(),
                ballot_options: vec!["Ada".to_string(), "Grace".to_string()],
                write_in: false,
            }],
        }),
    );
    let open = sign(
        &lao.organizer,
        MessageData::ElectionOpen(ElectionOpen {
            lao: lao.id.clone(),
            election: election_id.clone(),
            opened_at: created_at + 10,
        }),
    );
    let choice = VoteChoice::Index(0);
    let vote = sign(
        &lao.organizer,
        MessageData::CastVote(CastVote {
            lao: lao.id.clone(),
            election: election_id.clone(),
            created_at: created_at + 20,
            votes: vec![Vote {
                id: hash(&[
                    "Vote",
                    election_id.as_str(),
                    question_id.as_str(),
                    choice.id_component().as_str(),
                ]),
                question: question_id,
                vote: choice,
            }],
        }),
    );

    ElectionHistory {
        election_path: election_channel(&lao.id, &election_id),
        lao,
        create,
        setup,
        open,
        vote,
    }
}

/// Client-signed messages of a channel, by id; the server's own greet
/// differs between servers.
fn client_ids(state: &AppState, channel: &str) -> Vec<String> {
    let server = state.server_key.public_key();
    catchup(state, channel)
        .into_iter()
        .filter(|m| m.sender != server)
        .map(|m| m.message_id)
        .collect()
}

#[test]
fn election_history_converges_whatever_the_arrival_order() {
    let history = election_history();
    let lao_path = history.lao.path.clone();

    // Where lao#create is offered: on /root, on its own channel, or both.
    let placements = [(true, false), (false, true), (true, true)];
    let mut outcomes = Vec::new();

    for (on_root, on_lao) in placements {
        let mut lao_messages = vec![history.setup.clone()];
        if on_lao {
            lao_messages.push(history.create.clone());
        }
        for lao_order in permutations(&lao_messages) {
            for election_order in permutations(&[history.open.clone(), history.vote.clone()]) {
                let mut incoming = MessageBatch::from([
                    (lao_path.clone(), lao_order.clone()),
                    (history.election_path.clone(), election_order),
                ]);
                if on_root {
                    incoming.insert(ROOT_CHANNEL.to_string(), vec![history.create.clone()]);
                }

                let state = memory_state();
                let report = converge(&state.dispatcher, &state.blacklist, incoming);
                assert_eq!(report.processed.len(), 4);
                assert!(report.pending.is_empty());
                assert!(report.blacklisted.is_empty());
                assert!(state.blacklist.is_empty());

                assert_eq!(
                    actions(&catchup(&state, &lao_path)),
                    vec![("lao", "create"), ("lao", "greet"), ("election", "setup")]
                );
                outcomes.push((
                    client_ids(&state, &lao_path),
                    client_ids(&state, &history.election_path),
                ));
            }
        }
    }

    let expected = (
        vec![history.create.message_id.clone(), history.setup.message_id.clone()],
        vec![history.open.message_id.clone(), history.vote.message_id.clone()],
    );
    for outcome in &outcomes {
        assert_eq!(outcome, &expected);
    }
}
