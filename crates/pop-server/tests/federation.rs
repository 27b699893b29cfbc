mod common;

use common::{
    actions, catchup, memory_state, memory_state_with, publish, sign, spawn_server, wait_for,
    TestLao,
};
use pop_crypto::KeyPair;
use pop_server::config::Config;
use pop_server::dispatcher::Handled;
use pop_server::outbound::LinkRequest;
use pop_server::{start_tasks, AppState};
use pop_types::channel::federation_channel;
use pop_types::data::{
    Challenge, ChallengeRequest, FederationLink, FederationResult, FEDERATION_SUCCESS,
};
use pop_types::{encode_base64, ErrorKind, Message, MessageData};
use std::time::Duration;

/// Asks the server for a challenge on the LAO's federation channel.
fn request_challenge(state: &AppState, lao: &TestLao) -> Challenge {
    let channel = federation_channel(&lao.id);
    let request = sign(
        &lao.organizer,
        MessageData::ChallengeRequest(ChallengeRequest { timestamp: 1 }),
    );
    let handled = publish(state, &channel, &request).unwrap();
    assert_eq!(handled, Handled::Applied { stored_on: None });

    let stored = catchup(state, &channel);
    let minted = stored.last().unwrap();
    assert_eq!(minted.sender, state.server_key.public_key());
    match minted.parse_data().unwrap() {
        MessageData::Challenge(challenge) => challenge,
        other => panic!("expected federation#challenge, got {other:?}"),
    }
}

fn link(lao_id: &str, public_key: String, challenge: Message) -> FederationLink {
    FederationLink {
        lao_id: lao_id.to_string(),
        server_address: "ws://peer.example.org/server".to_string(),
        public_key,
        challenge,
    }
}

/// Signs `data` over a differently formatted payload, giving a new message
/// id for the same content.
fn resign_pretty(keys: &KeyPair, data: &MessageData) -> Message {
    let payload = serde_json::to_vec_pretty(&data.to_json().unwrap()).unwrap();
    let data = encode_base64(&payload);
    let signature = keys.sign(&payload);
    Message {
        message_id: Message::compute_id(&data, &signature),
        data,
        sender: keys.public_key(),
        signature,
        witness_signatures: Vec::new(),
    }
}

#[test]
fn challenge_is_consumed_once() {
    let state = memory_state();
    let lao = TestLao::create(&state, "Local");
    let remote_organizer = KeyPair::generate();
    let remote_lao = "remote-lao";
    let channel = federation_channel(&lao.id);

    let challenge = request_challenge(&state, &lao);
    let embedded = sign(&lao.organizer, MessageData::Challenge(challenge.clone()));
    let expect = sign(
        &lao.organizer,
        MessageData::FederationExpect(link(
            remote_lao,
            remote_organizer.public_key(),
            embedded.clone(),
        )),
    );
    publish(&state, &channel, &expect).unwrap();
    assert!(state.registry.has_channel(&federation_channel(remote_lao)));

    // Only the expected organizer may answer.
    let stranger = sign(&KeyPair::generate(), MessageData::Challenge(challenge.clone()));
    let err = publish(&state, &channel, &stranger).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidMessageField);

    let answer = sign(&remote_organizer, MessageData::Challenge(challenge.clone()));
    publish(&state, &channel, &answer).unwrap();

    let stored = catchup(&state, &channel);
    assert_eq!(
        actions(&stored),
        vec![
            ("federation", "challenge"),
            ("federation", "expect"),
            ("federation", "challenge"),
            ("federation", "result"),
        ]
    );
    match stored[3].parse_data().unwrap() {
        MessageData::FederationResult(result) => {
            assert_eq!(result.status, FEDERATION_SUCCESS);
            assert_eq!(result.public_key, remote_organizer.public_key());
            assert_eq!(result.challenge, embedded);
        }
        other => panic!("unexpected {other:?}"),
    }

    let replay = resign_pretty(&remote_organizer, &MessageData::Challenge(challenge));
    assert_ne!(replay.message_id, answer.message_id);
    let err = publish(&state, &channel, &replay).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidMessageField);
    assert_eq!(err.code(), -4);
}

#[test]
fn expect_needs_an_outstanding_challenge_signed_by_the_organizer() {
    let state = memory_state();
    let lao = TestLao::create(&state, "Local");
    let remote_organizer = KeyPair::generate();
    let channel = federation_channel(&lao.id);

    let made_up = Challenge {
        value: "00".repeat(32),
        valid_until: i64::MAX,
    };
    let expect = sign(
        &lao.organizer,
        MessageData::FederationExpect(link(
            "remote-lao",
            remote_organizer.public_key(),
            sign(&lao.organizer, MessageData::Challenge(made_up)),
        )),
    );
    let err = publish(&state, &channel, &expect).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidMessageField);

    let challenge = request_challenge(&state, &lao);
    let expect = sign(
        &lao.organizer,
        MessageData::FederationExpect(link(
            "remote-lao",
            remote_organizer.public_key(),
            sign(&remote_organizer, MessageData::Challenge(challenge)),
        )),
    );
    let err = publish(&state, &channel, &expect).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidMessageField);

    let request = sign(
        &remote_organizer,
        MessageData::ChallengeRequest(ChallengeRequest { timestamp: 2 }),
    );
    let err = publish(&state, &channel, &request).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccessDenied);
}

#[test]
fn expired_challenge_is_refused() {
    let mut config = Config::default();
    config.protocol.challenge_ttl_secs = 1;
    let (state, _links) = memory_state_with(&config);
    let lao = TestLao::create(&state, "Local");
    let remote_organizer = KeyPair::generate();
    let channel = federation_channel(&lao.id);

    let challenge = request_challenge(&state, &lao);
    let expect = sign(
        &lao.organizer,
        MessageData::FederationExpect(link(
            "remote-lao",
            remote_organizer.public_key(),
            sign(&lao.organizer, MessageData::Challenge(challenge.clone())),
        )),
    );
    publish(&state, &channel, &expect).unwrap();

    std::thread::sleep(Duration::from_millis(2_100));
    let answer = sign(&remote_organizer, MessageData::Challenge(challenge));
    let err = publish(&state, &channel, &answer).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccessDenied);
}

#[test]
fn init_requests_a_link_and_result_closes_the_handshake() {
    let (state, mut links) = memory_state_with(&Config::default());
    let lao = TestLao::create(&state, "Local");
    let remote_organizer = KeyPair::generate();
    let channel = federation_channel(&lao.id);

    let challenge = Challenge {
        value: "ab".repeat(32),
        valid_until: 10_000_000_000,
    };
    let embedded = sign(&lao.organizer, MessageData::Challenge(challenge.clone()));
    let init = sign(
        &lao.organizer,
        MessageData::FederationInit(link(
            "remote-lao",
            remote_organizer.public_key(),
            embedded.clone(),
        )),
    );
    publish(&state, &channel, &init).unwrap();

    assert_eq!(
        links.try_recv().unwrap(),
        LinkRequest {
            server_address: "ws://peer.example.org/server".to_string(),
            subscribe: vec![channel.clone()],
            publish: Some((federation_channel("remote-lao"), embedded)),
        }
    );

    let remote_server = KeyPair::generate();
    let result = |status: &str, public_key: String, signer: &KeyPair| {
        sign(
            &remote_server,
            MessageData::FederationResult(FederationResult {
                status: status.to_string(),
                reason: String::new(),
                public_key,
                challenge: sign(signer, MessageData::Challenge(challenge.clone())),
            }),
        )
    };

    let err = publish(
        &state,
        &channel,
        &result("failure", lao.organizer.public_key(), &remote_organizer),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidMessageField);

    let err = publish(
        &state,
        &channel,
        &result(FEDERATION_SUCCESS, remote_organizer.public_key(), &remote_organizer),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidMessageField);

    let err = publish(
        &state,
        &channel,
        &result(FEDERATION_SUCCESS, lao.organizer.public_key(), &KeyPair::generate()),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidMessageField);

    publish(
        &state,
        &channel,
        &result(FEDERATION_SUCCESS, lao.organizer.public_key(), &remote_organizer),
    )
    .unwrap();
    assert_eq!(
        actions(&catchup(&state, &channel)),
        vec![("federation", "init"), ("federation", "result")]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_servers_complete_the_handshake() {
    let config = Config::default();
    let (local, local_links) = memory_state_with(&config);
    let (remote, remote_links) = memory_state_with(&config);
    start_tasks(local.clone(), &config, local_links);
    start_tasks(remote.clone(), &config, remote_links);
    let remote_addr = spawn_server(remote.clone()).await;

    let lao = TestLao::create(&local, "Local");
    let remote_lao = TestLao::create(&remote, "Remote");
    let local_channel = federation_channel(&lao.id);
    let remote_channel = federation_channel(&remote_lao.id);

    // The remote organizer expects the local LAO.
    let challenge = request_challenge(&remote, &remote_lao);
    let expect = sign(
        &remote_lao.organizer,
        MessageData::FederationExpect(link(
            &lao.id,
            lao.organizer.public_key(),
            sign(&remote_lao.organizer, MessageData::Challenge(challenge.clone())),
        )),
    );
    publish(&remote, &remote_channel, &expect).unwrap();

    // The local organizer received the challenge out of band.
    let init = sign(
        &lao.organizer,
        MessageData::FederationInit(FederationLink {
            lao_id: remote_lao.id.clone(),
            server_address: format!("ws://{remote_addr}/server"),
            public_key: remote_lao.organizer.public_key(),
            challenge: sign(&lao.organizer, MessageData::Challenge(challenge)),
        }),
    );
    publish(&local, &local_channel, &init).unwrap();

    let has_result = |state: &AppState, channel: &str| {
        actions(&catchup(state, channel))
            .iter()
            .any(|action| *action == ("federation", "result"))
    };
    assert!(wait_for(|| has_result(&remote, &remote_channel)).await);
    assert!(wait_for(|| has_result(&local, &local_channel)).await);

    assert_eq!(
        actions(&catchup(&local, &local_channel)),
        vec![("federation", "init"), ("federation", "result")]
    );
}
