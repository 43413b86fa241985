use anyhow::Result;
use serde_json::json;
use test_utils::session_json;
use test_utils::text_part_json;
use test_utils::user_message_json;

use super::SessionStore;
use crate::domain::models::Message;
use crate::domain::models::Part;
use crate::domain::models::RunStatus;
use crate::domain::models::Session;

fn message(session_id: &str, id: &str) -> Message {
    return serde_json::from_value(user_message_json(session_id, id)).unwrap();
}

fn part(session_id: &str, message_id: &str, id: &str, text: &str) -> Part {
    return serde_json::from_value(text_part_json(session_id, message_id, id, text)).unwrap();
}

fn session(id: &str, updated: f64) -> Session {
    return serde_json::from_value(session_json(id, id, updated)).unwrap();
}

fn message_ids(store: &SessionStore, session_id: &str) -> Vec<String> {
    return store
        .messages(session_id)
        .iter()
        .map(|message| return message.id().to_string())
        .collect();
}

#[test]
fn it_orders_messages_by_id() {
    let mut store = SessionStore::default();
    store.upsert_message(message("ses_1", "msg_3"));
    store.upsert_message(message("ses_1", "msg_1"));
    store.upsert_message(message("ses_1", "msg_2"));

    insta::assert_debug_snapshot!(message_ids(&store, "ses_1"), @r###"
    [
        "msg_1",
        "msg_2",
        "msg_3",
    ]
    "###);
}

#[test]
fn it_replaces_messages_in_place() -> Result<()> {
    let mut store = SessionStore::default();
    store.upsert_message(message("ses_1", "msg_1"));
    store.upsert_message(message("ses_1", "msg_2"));

    let mut payload = user_message_json("ses_1", "msg_1");
    payload["agent"] = json!("plan");
    store.upsert_message(serde_json::from_value(payload)?);

    assert_eq!(message_ids(&store, "ses_1"), vec!["msg_1", "msg_2"]);
    assert_eq!(store.message("ses_1", "msg_1").unwrap().agent(), "plan");

    return Ok(());
}

#[test]
fn it_keeps_part_arrival_order() {
    let mut store = SessionStore::default();
    store.upsert_part(part("ses_1", "msg_1", "prt_b", "first"));
    store.upsert_part(part("ses_1", "msg_1", "prt_a", "second"));
    let replaced = store.upsert_part(part("ses_1", "msg_1", "prt_b", "first, updated"));

    assert_eq!(replaced.unwrap().text(), Some("first"));

    let texts = store
        .parts("ses_1", "msg_1")
        .iter()
        .map(|part| return part.text().unwrap().to_string())
        .collect::<Vec<String>>();
    assert_eq!(texts, vec!["first, updated", "second"]);
}

#[test]
fn it_sorts_sessions_by_last_update() {
    let mut store = SessionStore::default();
    store.upsert_session(session("ses_old", 1.0));
    store.upsert_session(session("ses_new", 5.0));
    store.upsert_session(session("ses_mid", 3.0));

    let ids = store
        .sessions()
        .iter()
        .map(|session| return session.id.to_string())
        .collect::<Vec<String>>();
    assert_eq!(ids, vec!["ses_new", "ses_mid", "ses_old"]);
}

#[test]
fn it_defaults_status_to_idle() {
    let mut store = SessionStore::default();
    assert_eq!(store.status("ses_1"), RunStatus::Idle);

    store.set_status("ses_1", RunStatus::Running);
    assert_eq!(store.status("ses_1"), RunStatus::Running);
}

#[test]
fn it_cascades_session_removal() {
    let mut store = SessionStore::default();
    store.upsert_session(session("ses_1", 1.0));
    store.upsert_session(session("ses_2", 1.0));
    store.upsert_message(message("ses_1", "msg_1"));
    store.upsert_message(message("ses_2", "msg_9"));
    store.upsert_part(part("ses_1", "msg_1", "prt_1", "hi"));
    store.upsert_part(part("ses_2", "msg_9", "prt_9", "other"));
    store.set_status("ses_1", RunStatus::Running);

    store.remove_session("ses_1");

    assert!(store.session("ses_1").is_none());
    assert!(store.messages("ses_1").is_empty());
    assert!(store.parts("ses_1", "msg_1").is_empty());
    assert!(store.session_parts("ses_1").is_empty());
    assert_eq!(store.status("ses_1"), RunStatus::Idle);

    assert!(store.session("ses_2").is_some());
    assert_eq!(store.parts("ses_2", "msg_9").len(), 1);
}

#[test]
fn it_removes_messages_with_their_parts() {
    let mut store = SessionStore::default();
    store.upsert_message(message("ses_1", "msg_1"));
    store.upsert_message(message("ses_1", "msg_2"));
    store.upsert_part(part("ses_1", "msg_1", "prt_1", "hi"));

    store.remove_message("ses_1", "msg_1");
    store.remove_message("ses_1", "msg_missing");

    assert_eq!(message_ids(&store, "ses_1"), vec!["msg_2"]);
    assert!(store.parts("ses_1", "msg_1").is_empty());
}

#[test]
fn it_scopes_session_parts() {
    let mut store = SessionStore::default();
    store.upsert_part(part("ses_a", "msg_1", "prt_1", "a1"));
    store.upsert_part(part("ses_b", "msg_1", "prt_2", "b1"));
    store.upsert_part(part("ses_a", "msg_2", "prt_3", "a2"));

    let parts = store.session_parts("ses_a");
    assert_eq!(parts.len(), 2);
    assert_eq!(parts["msg_1"][0].text(), Some("a1"));
    assert_eq!(parts["msg_2"][0].text(), Some("a2"));
}

#[test]
fn it_hydrates_sorted_messages() {
    let mut store = SessionStore::default();
    store.replace_messages(
        "ses_1",
        vec![message("ses_1", "msg_2"), message("ses_1", "msg_1")],
    );
    store.replace_parts("ses_1", "msg_1", vec![part("ses_1", "msg_1", "prt_1", "x")]);

    assert_eq!(message_ids(&store, "ses_1"), vec!["msg_1", "msg_2"]);
    assert_eq!(store.part("ses_1", "msg_1", "prt_1").unwrap().text(), Some("x"));
    assert!(!store.is_empty());
}
