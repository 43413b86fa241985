use std::time::Duration;

use anyhow::Result;
use mockito::Matcher;
use serde_json::json;
use serde_json::Value;
use test_utils::assistant_message_json;
use test_utils::event_json;
use test_utils::question_json;
use test_utils::session_json;
use test_utils::sse_body;
use test_utils::text_part_json;
use test_utils::user_message_json;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

use super::SyncFacade;
use super::SyncOptions;
use crate::domain::models::ModelSelection;
use crate::domain::models::RunStatus;
use crate::domain::models::ServerEvent;
use crate::infrastructure::opencode::ReconnectPolicy;
use crate::infrastructure::opencode::TransportOptions;

fn facade_for(url: &str) -> SyncFacade {
    let transport = TransportOptions::new(url).with_reconnect(ReconnectPolicy {
        base_delay: Duration::from_secs(60),
        max_attempts: 10,
    });
    let options = SyncOptions {
        api_ready_retries: 1,
        api_ready_delay: Duration::from_millis(1),
        ..SyncOptions::default()
    };

    return SyncFacade::new(transport, options);
}

fn connected_facade(url: &str, session_id: &str) -> SyncFacade {
    let mut facade = facade_for(url);
    facade.connected = true;
    facade.current_session_id = Some(session_id.to_string());
    return facade;
}

fn event(kind: &str, properties: Value) -> ServerEvent {
    return ServerEvent::parse(&event_json(kind, properties).to_string()).unwrap();
}

fn session_error(session_id: &str, message: &str) -> ServerEvent {
    return event(
        "session.error",
        json!({
            "sessionID": session_id,
            "error": {
                "name": "APIError",
                "data": { "message": message, "providerID": "opencode" }
            }
        }),
    );
}

async fn closed_port_url() -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    return Ok(format!("http://{addr}"));
}

/// Answers every request with an event stream that stays open.
async fn open_feed_server() -> Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        let mut held = vec![];
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0_u8; 4096];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\n\r\n")
                .await;
            held.push(socket);
        }
    });

    return Ok(format!("http://{addr}"));
}

#[tokio::test]
async fn it_does_not_create_sessions_while_disconnected() -> Result<()> {
    let mut facade = facade_for(&closed_port_url().await?);

    let session = facade.create_session().await;

    assert!(session.is_none());
    assert!(facade.store().is_empty());
    assert_eq!(facade.snapshot().current_session_id, None);

    return Ok(());
}

#[tokio::test]
async fn it_syncs_after_connecting() -> Result<()> {
    let feed = sse_body(&[
        event_json("server.connected", json!({})),
        event_json(
            "message.part.updated",
            json!({ "part": text_part_json("ses_new", "msg_2", "prt_2", "Chapter 2 argues") }),
        ),
        event_json(
            "message.part.updated",
            json!({ "part": text_part_json("ses_old", "msg_9", "prt_9", "Elsewhere") }),
        ),
    ]);

    let mut server = mockito::Server::new();
    let event_mock = server
        .mock("GET", "/event")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(feed)
        .create();
    let sessions_mock = server
        .mock("GET", "/session")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!([
                session_json("ses_old", "Outline", 1.0),
                session_json("ses_new", "Chapter 2", 5.0)
            ])
            .to_string(),
        )
        .expect(2)
        .create();
    let messages_mock = server
        .mock("GET", "/session/ses_new/message")
        .with_status(200)
        .with_body(
            json!([
                {
                    "info": user_message_json("ses_new", "msg_1"),
                    "parts": [text_part_json("ses_new", "msg_1", "prt_1", "Summarize chapter 2")]
                },
                { "info": assistant_message_json("ses_new", "msg_2", "msg_1") }
            ])
            .to_string(),
        )
        .create();
    let parts_mock = server
        .mock("GET", "/session/ses_new/message/msg_2/part")
        .with_status(200)
        .with_body(json!([text_part_json("ses_new", "msg_2", "prt_2", "Chapter")]).to_string())
        .create();
    let agents_mock = server
        .mock("GET", "/agent")
        .with_status(200)
        .with_body(json!([{ "name": "plan" }, { "name": "build" }]).to_string())
        .create();
    let providers_mock = server
        .mock("GET", "/provider")
        .with_status(200)
        .with_body(
            json!({
                "all": [{
                    "id": "anthropic",
                    "name": "Anthropic",
                    "models": [{ "id": "claude-sonnet-4", "name": "Claude Sonnet 4" }]
                }],
                "connected": ["anthropic"]
            })
            .to_string(),
        )
        .create();

    let mut facade = facade_for(&server.url());
    let snapshots = facade.subscribe();
    facade.connect();
    assert!(snapshots.borrow().connecting);

    assert!(facade.pump().await);

    sessions_mock.assert();
    messages_mock.assert();
    parts_mock.assert();
    agents_mock.assert();
    providers_mock.assert();

    let snapshot = facade.snapshot();
    assert!(snapshot.connected);
    assert!(!snapshot.connecting);
    assert_eq!(snapshot.sessions.len(), 2);
    assert_eq!(snapshot.current_session_id.as_deref(), Some("ses_new"));
    assert_eq!(snapshot.current_session.unwrap().title, "Chapter 2");
    assert_eq!(snapshot.messages.len(), 2);
    assert_eq!(snapshot.parts["msg_2"][0].text(), Some("Chapter"));
    assert_eq!(snapshot.agents.len(), 2);
    // Restored from the last prompt rather than the first agent.
    assert_eq!(snapshot.selected_agent.as_deref(), Some("build"));
    assert_eq!(
        snapshot.selected_model,
        Some(ModelSelection::new("anthropic", "claude-sonnet-4"))
    );

    // server.connected plus both part updates.
    for _ in 0..3 {
        assert!(facade.pump().await);
    }

    assert_eq!(facade.parts_for_message("msg_2")[0].text(), Some("Chapter 2 argues"));
    let snapshot = snapshots.borrow().clone();
    assert!(!snapshot.parts.contains_key("msg_9"));
    assert_eq!(facade.store().parts("ses_old", "msg_9").len(), 1);

    assert!(facade.pump().await);
    assert!(!facade.snapshot().connected);

    facade.disconnect();
    event_mock.assert();

    return Ok(());
}

#[tokio::test]
async fn it_flags_exhausted_reconnects() -> Result<()> {
    let transport =
        TransportOptions::new(&closed_port_url().await?).with_reconnect(ReconnectPolicy {
            base_delay: Duration::from_millis(1),
            max_attempts: 2,
        });
    let mut facade = SyncFacade::new(transport, SyncOptions::default());
    facade.connect();

    while !facade.snapshot().max_reconnect_failed {
        assert!(facade.pump().await);
    }

    let snapshot = facade.snapshot();
    assert!(!snapshot.connected);
    assert!(!snapshot.connecting);
    assert!(snapshot.error.unwrap().contains("Max reconnection attempts"));

    facade.reset_reconnect_state();
    let snapshot = facade.snapshot();
    assert!(!snapshot.max_reconnect_failed);
    assert_eq!(snapshot.error, None);

    facade.disconnect();

    return Ok(());
}

#[tokio::test]
async fn it_hydrates_selected_sessions() -> Result<()> {
    let mut server = mockito::Server::new();
    let session_mock = server
        .mock("GET", "/session/ses_1")
        .with_status(200)
        .with_body(session_json("ses_1", "Draft", 2.0).to_string())
        .create();
    let messages_mock = server
        .mock("GET", "/session/ses_1/message")
        .with_status(200)
        .with_body(
            json!([
                {
                    "info": assistant_message_json("ses_1", "msg_2", "msg_1"),
                    "parts": [text_part_json("ses_1", "msg_2", "prt_2", "Answer")]
                },
                {
                    "info": user_message_json("ses_1", "msg_1"),
                    "parts": [text_part_json("ses_1", "msg_1", "prt_1", "Question")]
                }
            ])
            .to_string(),
        )
        .create();

    let mut facade = facade_for(&server.url());
    facade.select_session("ses_1").await;

    session_mock.assert();
    messages_mock.assert();

    let snapshot = facade.snapshot();
    let ids = snapshot
        .messages
        .iter()
        .map(|message| return message.id().to_string())
        .collect::<Vec<String>>();
    assert_eq!(ids, vec!["msg_1", "msg_2"]);
    assert_eq!(facade.parts_for_message("msg_1")[0].text(), Some("Question"));
    assert_eq!(snapshot.current_session.unwrap().title, "Draft");

    return Ok(());
}

#[tokio::test]
async fn it_scopes_parts_to_the_selected_session() -> Result<()> {
    let mut facade = facade_for(&closed_port_url().await?);
    facade.current_session_id = Some("ses_a".to_string());

    facade
        .handle_event(event(
            "message.part.updated",
            json!({ "part": text_part_json("ses_b", "msg_1", "prt_1", "other session") }),
        ))
        .await;

    assert!(facade.parts_for_message("msg_1").is_empty());
    assert!(facade.snapshot().parts.is_empty());

    facade
        .handle_event(event(
            "message.part.updated",
            json!({ "part": text_part_json("ses_a", "msg_1", "prt_2", "mine") }),
        ))
        .await;

    assert_eq!(facade.parts_for_message("msg_1")[0].text(), Some("mine"));

    return Ok(());
}

#[tokio::test]
async fn it_creates_and_selects_sessions() -> Result<()> {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/session")
        .with_status(200)
        .with_body(session_json("ses_2", "", 9.0).to_string())
        .create();

    let mut facade = connected_facade(&server.url(), "ses_1");
    let session = facade.create_session().await;

    mock.assert();
    assert_eq!(session.unwrap().id, "ses_2");
    assert_eq!(facade.snapshot().current_session_id.as_deref(), Some("ses_2"));
    assert!(facade.store().session("ses_2").is_some());

    return Ok(());
}

#[tokio::test]
async fn it_records_failed_session_creation() -> Result<()> {
    let mut server = mockito::Server::new();
    let mock = server.mock("POST", "/session").with_status(500).create();

    let mut facade = connected_facade(&server.url(), "ses_1");
    let session = facade.create_session().await;

    mock.assert();
    assert!(session.is_none());
    assert!(facade
        .snapshot()
        .error
        .unwrap()
        .starts_with("Failed to create session"));

    return Ok(());
}

#[tokio::test]
async fn it_sends_messages_optimistically() -> Result<()> {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/session/ses_1/message")
        .match_body(Matcher::Json(json!({
            "parts": [
                { "type": "file", "url": "file:///tmp/figure.png", "mime": "image/png" },
                { "type": "text", "text": "Describe this figure" }
            ],
            "agent": "build",
            "model": { "providerID": "anthropic", "modelID": "claude-sonnet-4" }
        })))
        .with_status(200)
        .with_body("")
        .create();

    let mut facade = connected_facade(&server.url(), "ses_1");
    facade.set_agent(Some("build".to_string()));
    facade.set_model(Some(ModelSelection::new("anthropic", "claude-sonnet-4")));

    let files = vec![crate::domain::models::FileAttachment {
        url: "file:///tmp/figure.png".to_string(),
        mime: "image/png".to_string(),
        filename: None,
    }];
    let sent = facade.send_message("Describe this figure", &files).await;

    mock.assert();
    assert!(sent);
    assert_eq!(facade.snapshot().status, RunStatus::Running);

    facade
        .handle_event(event(
            "session.status",
            json!({ "sessionID": "ses_1", "status": { "type": "idle" } }),
        ))
        .await;
    assert_eq!(facade.snapshot().status, RunStatus::Idle);

    return Ok(());
}

#[tokio::test]
async fn it_resets_status_when_sending_fails() -> Result<()> {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/session/ses_1/message")
        .with_status(400)
        .with_body("bad request")
        .create();

    let mut facade = connected_facade(&server.url(), "ses_1");
    let sent = facade.send_message("hello", &[]).await;

    mock.assert();
    assert!(!sent);

    let snapshot = facade.snapshot();
    assert_eq!(snapshot.status, RunStatus::Idle);
    assert!(snapshot.error.unwrap().starts_with("Failed to send message"));

    return Ok(());
}

#[tokio::test]
async fn it_requires_a_selected_session_to_send() -> Result<()> {
    let mut facade = facade_for(&closed_port_url().await?);
    facade.connected = true;

    assert!(!facade.send_message("hello", &[]).await);
    assert_eq!(facade.snapshot().error.as_deref(), Some("No session selected"));

    return Ok(());
}

#[tokio::test]
async fn it_deletes_the_selected_session() -> Result<()> {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("DELETE", "/session/ses_1")
        .with_status(200)
        .with_body("true")
        .create();

    let mut facade = connected_facade(&server.url(), "ses_1");
    facade
        .handle_event(event(
            "session.updated",
            json!({ "info": session_json("ses_1", "Draft", 1.0) }),
        ))
        .await;

    facade.delete_session("ses_1").await;

    mock.assert();
    let snapshot = facade.snapshot();
    assert_eq!(snapshot.current_session_id, None);
    assert!(snapshot.sessions.is_empty());
    assert!(snapshot.messages.is_empty());

    return Ok(());
}

#[tokio::test]
async fn it_reports_billing_errors() -> Result<()> {
    let mut facade = connected_facade(&closed_port_url().await?, "ses_1");

    facade
        .handle_event(session_error(
            "ses_1",
            r#"CreditsError: {"error":{"message":"Insufficient balance"}}"#,
        ))
        .await;

    assert_eq!(
        facade.snapshot().error.as_deref(),
        Some("Insufficient balance (Provider: opencode)")
    );

    return Ok(());
}

#[tokio::test]
async fn it_recovers_from_session_errors() -> Result<()> {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/session")
        .with_status(200)
        .with_body(session_json("ses_2", "", 9.0).to_string())
        .create();

    let mut facade = connected_facade(&server.url(), "ses_1");
    facade
        .handle_event(session_error("ses_1", "Tool execution aborted"))
        .await;

    mock.assert();
    let snapshot = facade.snapshot();
    assert_eq!(snapshot.current_session_id.as_deref(), Some("ses_2"));
    assert_eq!(snapshot.error, None);

    return Ok(());
}

#[tokio::test]
async fn it_gives_up_after_repeated_session_errors() -> Result<()> {
    let mut facade = connected_facade(&closed_port_url().await?, "ses_1");
    facade.error_recoveries = 3;

    facade
        .handle_event(session_error("ses_1", "Tool execution aborted"))
        .await;

    assert_eq!(
        facade.snapshot().error.as_deref(),
        Some("Session keeps failing. Please restart OpenCode.")
    );
    assert_eq!(facade.snapshot().current_session_id.as_deref(), Some("ses_1"));

    return Ok(());
}

#[tokio::test]
async fn it_ignores_errors_of_other_sessions() -> Result<()> {
    let mut facade = connected_facade(&closed_port_url().await?, "ses_1");

    facade
        .handle_event(session_error("ses_2", "CreditsError"))
        .await;

    assert_eq!(facade.snapshot().error, None);

    return Ok(());
}

#[tokio::test]
async fn it_drops_signals_queued_before_disconnecting() -> Result<()> {
    let mut facade = facade_for(&open_feed_server().await?);
    let client = facade.client();
    facade.connect();

    for _ in 0..200 {
        if client.is_connected() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(client.is_connected());
    // Leave the Connected signal sitting in the channel.
    tokio::time::sleep(Duration::from_millis(50)).await;

    facade.disconnect();

    assert_eq!(facade.drain().await, 0);
    let snapshot = facade.snapshot();
    assert!(!snapshot.connected);
    assert!(!snapshot.connecting);
    assert!(!client.is_connected());
    assert!(facade.create_session().await.is_none());

    return Ok(());
}

#[tokio::test]
async fn it_ignores_connect_while_connected_or_connecting() -> Result<()> {
    let mut facade = connected_facade(&closed_port_url().await?, "ses_1");

    facade.connect();
    assert!(facade.connected);
    assert!(!facade.connecting);

    let mut facade = facade_for(&closed_port_url().await?);
    facade.connecting = true;
    facade.error = Some("Failed to load sessions".to_string());

    facade.connect();
    assert_eq!(facade.error.as_deref(), Some("Failed to load sessions"));

    return Ok(());
}

#[tokio::test]
async fn it_aborts_the_selected_session() -> Result<()> {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/session/ses_1/abort")
        .with_status(200)
        .with_body("true")
        .expect(1)
        .create();

    let mut facade = facade_for(&server.url());
    facade.connected = true;
    // Nothing selected, nothing to abort.
    facade.abort().await;

    facade.current_session_id = Some("ses_1".to_string());
    facade.abort().await;

    mock.assert();
    assert_eq!(facade.snapshot().error, None);

    return Ok(());
}

#[tokio::test]
async fn it_reports_failed_aborts() -> Result<()> {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/session/ses_1/abort")
        .with_status(500)
        .with_body("no run in progress")
        .create();

    let mut facade = connected_facade(&server.url(), "ses_1");
    facade.abort().await;

    mock.assert();
    let error = facade.snapshot().error.unwrap();
    assert!(error.starts_with("Failed to abort"));
    assert!(error.contains("no run in progress"));

    return Ok(());
}

#[tokio::test]
async fn it_shows_questions_of_the_selected_session() -> Result<()> {
    let mut facade = connected_facade(&closed_port_url().await?, "ses_1");

    facade
        .handle_event(event("question.asked", question_json("ses_2", "que_2")))
        .await;
    assert_eq!(facade.snapshot().current_question, None);

    facade
        .handle_event(event("question.asked", question_json("ses_1", "que_1")))
        .await;
    let question = facade.snapshot().current_question.unwrap();
    assert_eq!(question.id, "que_1");
    assert_eq!(question.questions[0].header, "Citations");

    facade.current_session_id = Some("ses_2".to_string());
    facade.publish();
    assert_eq!(facade.snapshot().current_question, None);

    return Ok(());
}

#[tokio::test]
async fn it_answers_questions() -> Result<()> {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/question/que_1/reply")
        .match_body(Matcher::Json(json!({ "answers": [["APA"]] })))
        .with_status(200)
        .with_body("true")
        .create();

    let mut facade = connected_facade(&server.url(), "ses_1");
    facade
        .handle_event(event("question.asked", question_json("ses_1", "que_1")))
        .await;

    let answered = facade
        .answer_question("que_1", vec![vec!["APA".to_string()]])
        .await;

    mock.assert();
    assert!(answered);
    assert_eq!(facade.snapshot().current_question, None);
    assert_eq!(facade.snapshot().error, None);

    return Ok(());
}

#[tokio::test]
async fn it_keeps_the_question_when_answering_fails() -> Result<()> {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/question/que_1/reply")
        .with_status(500)
        .with_body("internal error")
        .create();

    let mut facade = connected_facade(&server.url(), "ses_1");
    facade
        .handle_event(event("question.asked", question_json("ses_1", "que_1")))
        .await;

    let answered = facade
        .answer_question("que_1", vec![vec!["Chicago".to_string()]])
        .await;

    mock.assert();
    assert!(!answered);
    let snapshot = facade.snapshot();
    assert!(snapshot.error.unwrap().starts_with("Failed to answer question"));
    assert_eq!(snapshot.current_question.unwrap().id, "que_1");

    return Ok(());
}

#[tokio::test]
async fn it_does_not_answer_questions_while_disconnected() -> Result<()> {
    let mut facade = facade_for(&closed_port_url().await?);

    let answered = facade
        .answer_question("que_1", vec![vec!["APA".to_string()]])
        .await;

    assert!(!answered);
    assert_eq!(facade.snapshot().error, None);

    return Ok(());
}
