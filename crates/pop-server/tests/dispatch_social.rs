mod common;

use common::{actions, catchup, memory_state, publish, sign, TestLao};
use pop_crypto::KeyPair;
use pop_types::channel::{chirps_channel, reactions_channel, social_channel};
use pop_types::data::{
    ChirpAdd, ChirpDelete, ChirpNotify, ConsensusElect, ConsensusElectAccept, ConsensusKey,
    InputScript, OutputScript, PopchaAuthenticate, PostTransaction, ReactionAdd, ReactionDelete,
    Transaction, TxInput, TxOutput,
};
use pop_types::{encode_base64, ErrorKind, MessageData};

fn chirp(keys: &KeyPair, text: &str, timestamp: i64) -> pop_types::Message {
    sign(
        keys,
        MessageData::ChirpAdd(ChirpAdd {
            text: text.to_string(),
            parent_id: None,
            timestamp,
        }),
    )
}

#[test]
fn chirps_are_mirrored_on_the_aggregate_channel() {
    let state = memory_state();
    let lao = TestLao::create(&state, "Assembly");
    let alice = KeyPair::generate();
    lao.admit(&state, &[&alice]);

    let own = social_channel(&lao.id, &alice.public_key());
    let aggregate = chirps_channel(&lao.id);

    let add = chirp(&alice, "hello", 3_000);
    publish(&state, &own, &add).unwrap();

    let notifications = catchup(&state, &aggregate);
    assert_eq!(actions(&notifications), vec![("chirp", "notify_add")]);
    assert_eq!(notifications[0].sender, state.server_key.public_key());
    match notifications[0].parse_data().unwrap() {
        MessageData::ChirpNotifyAdd(notify) => {
            assert_eq!(notify.chirp_id, add.message_id);
            assert_eq!(notify.channel, own);
            assert_eq!(notify.timestamp, 3_000);
        }
        other => panic!("unexpected {other:?}"),
    }

    let delete = sign(
        &alice,
        MessageData::ChirpDelete(ChirpDelete {
            chirp_id: add.message_id.clone(),
            timestamp: 3_100,
        }),
    );
    publish(&state, &own, &delete).unwrap();
    assert_eq!(
        actions(&catchup(&state, &aggregate)),
        vec![("chirp", "notify_add"), ("chirp", "notify_delete")]
    );
    assert_eq!(
        actions(&catchup(&state, &own)),
        vec![("chirp", "add"), ("chirp", "delete")]
    );
}

#[test]
fn chirp_rules() {
    let state = memory_state();
    let lao = TestLao::create(&state, "Assembly");
    let alice = KeyPair::generate();
    let mallory = KeyPair::generate();
    lao.admit(&state, &[&alice, &mallory]);
    let own = social_channel(&lao.id, &alice.public_key());

    let err = publish(&state, &own, &chirp(&mallory, "not mine", 3_000)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccessDenied);

    let long = "x".repeat(301);
    let err = publish(&state, &own, &chirp(&alice, &long, 3_000)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidMessageField);
    publish(&state, &own, &chirp(&alice, &"x".repeat(300), 3_000)).unwrap();

    // Clients cannot post chirps on the aggregate channel directly.
    let err = publish(&state, &chirps_channel(&lao.id), &chirp(&alice, "hi", 3_001))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidAction);

    let dangling = sign(
        &alice,
        MessageData::ChirpDelete(ChirpDelete {
            chirp_id: "missing".to_string(),
            timestamp: 3_100,
        }),
    );
    let err = publish(&state, &own, &dangling).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidResource);

    let foreign = sign(
        &KeyPair::generate(),
        MessageData::ChirpNotifyAdd(ChirpNotify {
            chirp_id: "c".to_string(),
            channel: "/root/elsewhere/social/x".to_string(),
            timestamp: 1,
        }),
    );
    let err = publish(&state, &chirps_channel(&lao.id), &foreign).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidMessageField);
}

#[test]
fn reactions_need_an_attendee_and_a_chirp() {
    let state = memory_state();
    let lao = TestLao::create(&state, "Assembly");
    let alice = KeyPair::generate();
    let bob = KeyPair::generate();
    lao.admit(&state, &[&alice, &bob]);
    let reactions = reactions_channel(&lao.id);

    let add = chirp(&alice, "vote on friday", 3_000);
    publish(&state, &social_channel(&lao.id, &alice.public_key()), &add).unwrap();

    let react = |keys: &KeyPair, chirp_id: &str| {
        sign(
            keys,
            MessageData::ReactionAdd(ReactionAdd {
                reaction_codepoint: "👍".to_string(),
                chirp_id: chirp_id.to_string(),
                timestamp: 3_050,
            }),
        )
    };

    let err = publish(&state, &reactions, &react(&KeyPair::generate(), &add.message_id))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccessDenied);

    let err = publish(&state, &reactions, &react(&bob, "missing")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidResource);

    let reaction = react(&bob, &add.message_id);
    publish(&state, &reactions, &reaction).unwrap();

    let undo = |keys: &KeyPair| {
        sign(
            keys,
            MessageData::ReactionDelete(ReactionDelete {
                reaction_id: reaction.message_id.clone(),
                timestamp: 3_060,
            }),
        )
    };
    let err = publish(&state, &reactions, &undo(&alice)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccessDenied);
    publish(&state, &reactions, &undo(&bob)).unwrap();

    assert_eq!(
        actions(&catchup(&state, &reactions)),
        vec![("reaction", "add"), ("reaction", "delete")]
    );
}

fn transaction(keys: &KeyPair, value: i64) -> MessageData {
    MessageData::PostTransaction(PostTransaction {
        transaction_id: "tx-1".to_string(),
        transaction: Transaction {
            version: 1,
            inputs: vec![TxInput {
                tx_out_hash: "genesis".to_string(),
                tx_out_index: 0,
                script: InputScript {
                    kind: "P2PKH".to_string(),
                    pubkey: keys.public_key(),
                    sig: keys.sign(b"tx"),
                },
            }],
            outputs: vec![TxOutput {
                value,
                script: OutputScript {
                    kind: "P2PKH".to_string(),
                    pubkey_hash: "h".to_string(),
                },
            }],
            lock_time: 0,
        },
    })
}

#[test]
fn coin_transactions_are_checked_structurally() {
    let state = memory_state();
    let lao = TestLao::create(&state, "Assembly");
    let coin = format!("{}/coin", lao.path);

    let err = publish(&state, &coin, &sign(&lao.organizer, transaction(&lao.organizer, -5)))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidMessageField);

    publish(&state, &coin, &sign(&lao.organizer, transaction(&lao.organizer, 5))).unwrap();
    assert_eq!(actions(&catchup(&state, &coin)), vec![("coin", "post_transaction")]);
}

#[test]
fn consensus_accepts_reference_an_elect() {
    let state = memory_state();
    let lao = TestLao::create(&state, "Assembly");
    let consensus = format!("{}/consensus", lao.path);

    let elect = sign(
        &lao.organizer,
        MessageData::ConsensusElect(ConsensusElect {
            instance_id: "instance-1".to_string(),
            created_at: 4_000,
            key: ConsensusKey {
                kind: "election".to_string(),
                id: "e".to_string(),
                property: "state".to_string(),
            },
            value: "started".to_string(),
        }),
    );
    let err = publish(&state, &consensus, &sign(&KeyPair::generate(), elect.parse_data().unwrap()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccessDenied);
    publish(&state, &consensus, &elect).unwrap();

    let accept = |instance_id: &str| {
        sign(
            &lao.organizer,
            MessageData::ConsensusElectAccept(ConsensusElectAccept {
                instance_id: instance_id.to_string(),
                message_id: elect.message_id.clone(),
                accept: true,
            }),
        )
    };
    let err = publish(&state, &consensus, &accept("instance-2")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidMessageField);
    publish(&state, &consensus, &accept("instance-1")).unwrap();
}

#[test]
fn popcha_is_stored_without_broadcast() {
    let state = memory_state();
    let lao = TestLao::create(&state, "Assembly");
    let channel = format!("{}/authentication", lao.path);
    let token = KeyPair::generate();

    let auth = |proof: String| {
        sign(
            &token,
            MessageData::PopchaAuthenticate(PopchaAuthenticate {
                client_id: "client".to_string(),
                nonce: "nonce-1".to_string(),
                identifier: token.public_key(),
                identifier_proof: proof,
                state: None,
                response_mode: "query".to_string(),
                popcha_address: "auth.example.org".to_string(),
            }),
        )
    };

    let err = publish(&state, &channel, &auth(encode_base64([0u8; 64]))).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidMessageField);

    publish(&state, &channel, &auth(token.sign(b"nonce-1"))).unwrap();
    assert_eq!(
        actions(&catchup(&state, &channel)),
        vec![("popcha", "authenticate")]
    );
}
