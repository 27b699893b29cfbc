use pop_channels::{
    catchup, channel_type, current_attendees, get_lao, has_message, ids_by_channel, insert_channel,
    insert_lao, last_roll_call, list_channels, messages_by_ids, messages_with_action,
    missing_ids, store_message, ChannelError, LaoRecord, NewChannel,
};
use pop_crypto::KeyPair;
use pop_types::data::{RollCallClose, RollCallOpen};
use pop_types::{ChannelType, IdsByChannel, Message, MessageData};
use rusqlite::Connection;

fn setup() -> Connection {
    let conn = Connection::open_in_memory().expect("open db");
    pop_db::run_migrations(&conn).expect("migrations");
    conn
}

fn open_msg(keys: &KeyPair, opened_at: i64) -> Message {
    keys.sign_message(&MessageData::RollCallOpen(RollCallOpen {
        update_id: format!("u{opened_at}"),
        opens: "rc".to_string(),
        opened_at,
    }))
    .expect("sign")
}

#[test]
fn channels_are_created_once() {
    let conn = setup();
    let lao = NewChannel::new("/root/lao", ChannelType::Lao, None);
    assert!(insert_channel(&conn, &lao).expect("insert"));
    assert!(!insert_channel(&conn, &lao).expect("second insert"));

    assert_eq!(
        channel_type(&conn, "/root/lao").expect("lookup"),
        Some(ChannelType::Lao)
    );
    assert_eq!(channel_type(&conn, "/root/other").expect("lookup"), None);
    assert_eq!(list_channels(&conn).expect("list"), vec!["/root/lao"]);
}

#[test]
fn duplicate_message_is_reported_as_such() {
    let conn = setup();
    let keys = KeyPair::generate();
    let msg = open_msg(&keys, 1);

    store_message(&conn, "/root/lao", &msg).expect("first store");
    assert!(has_message(&conn, &msg.message_id).expect("lookup"));

    match store_message(&conn, "/root/lao", &msg) {
        Err(ChannelError::DuplicateMessage(id)) => assert_eq!(id, msg.message_id),
        other => panic!("expected duplicate, got {other:?}"),
    }
    assert_eq!(catchup(&conn, "/root/lao").expect("catchup"), vec![msg]);
}

#[test]
fn heartbeat_helpers_report_missing_ids() {
    let conn = setup();
    let keys = KeyPair::generate();
    let first = open_msg(&keys, 1);
    let second = open_msg(&keys, 2);
    store_message(&conn, "/root/lao", &first).expect("store");
    store_message(&conn, "/root/lao", &second).expect("store");

    let ids = ids_by_channel(&conn).expect("ids");
    assert_eq!(
        ids["/root/lao"],
        vec![first.message_id.clone(), second.message_id.clone()]
    );

    let offered = IdsByChannel::from([(
        "/root/lao".to_string(),
        vec![first.message_id.clone(), "unknown".to_string()],
    )]);
    let missing = missing_ids(&conn, &offered).expect("missing");
    assert_eq!(missing["/root/lao"], vec!["unknown".to_string()]);

    let found = messages_by_ids(&conn, &offered).expect("by ids");
    assert_eq!(found["/root/lao"], vec![first]);
}

#[test]
fn federation_channels_stay_out_of_heartbeats() {
    let conn = setup();
    let keys = KeyPair::generate();
    let shared = open_msg(&keys, 1);
    let handshake = open_msg(&keys, 2);
    store_message(&conn, "/root/lao", &shared).expect("store");
    store_message(&conn, "/root/lao/federation", &handshake).expect("store");

    let ids = ids_by_channel(&conn).expect("ids");
    assert_eq!(ids.len(), 1);
    assert!(!ids.contains_key("/root/lao/federation"));

    let asked = IdsByChannel::from([
        ("/root/lao".to_string(), vec![shared.message_id.clone()]),
        (
            "/root/lao/federation".to_string(),
            vec![handshake.message_id.clone(), "remote".to_string()],
        ),
    ]);
    let found = messages_by_ids(&conn, &asked).expect("by ids");
    assert_eq!(found.len(), 1);
    assert_eq!(found["/root/lao"], vec![shared]);

    let missing = missing_ids(&conn, &asked).expect("missing");
    assert!(missing.is_empty());
}

#[test]
fn roll_call_queries_follow_storage_order() {
    let conn = setup();
    let keys = KeyPair::generate();
    insert_lao(
        &conn,
        &LaoRecord {
            path: "/root/lao".to_string(),
            lao_id: "lao".to_string(),
            organizer: keys.public_key(),
            witnesses: vec!["w1".to_string()],
            creation: 5,
        },
    )
    .expect("insert lao");
    let lao = get_lao(&conn, "/root/lao").expect("get").expect("exists");
    assert_eq!(lao.witnesses, vec!["w1"]);

    assert!(current_attendees(&conn, "/root/lao").expect("attendees").is_empty());

    let open = open_msg(&keys, 1);
    store_message(&conn, "/root/lao", &open).expect("store open");
    let close = keys
        .sign_message(&MessageData::RollCallClose(RollCallClose {
            update_id: "c".to_string(),
            closes: "u1".to_string(),
            closed_at: 2,
            attendees: vec!["a".to_string(), "b".to_string()],
        }))
        .expect("sign");
    store_message(&conn, "/root/lao", &close).expect("store close");

    let last = last_roll_call(&conn, "/root/lao").expect("query").expect("exists");
    assert_eq!(last.action, "close");
    assert_eq!(current_attendees(&conn, "/root/lao").expect("attendees"), vec!["a", "b"]);

    let opens = messages_with_action(&conn, "/root/lao", "roll_call", "open").expect("opens");
    assert_eq!(opens.len(), 1);
    assert_eq!(opens[0].message, open);
}
