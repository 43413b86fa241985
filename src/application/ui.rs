#[cfg(test)]
#[path = "ui_test.rs"]
mod tests;

use std::collections::HashMap;
use std::collections::HashSet;
use std::io::Write;

use anyhow::bail;
use anyhow::Result;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use yansi::Paint;

use crate::configuration::Config;
use crate::configuration::ConfigKey;
use crate::domain::models::answer_text;
use crate::domain::models::FeedSignal;
use crate::domain::models::Message;
use crate::domain::models::ModelSelection;
use crate::domain::models::PartKind;
use crate::domain::models::RunStatus;
use crate::domain::services::SyncFacade;
use crate::domain::services::SyncSnapshot;
use crate::infrastructure::opencode::OpenCodeClient;

const HELP_TEXT: &str = "Commands: /new, /abort, /agent <name>, /model <provider/model>, /quit";
const ANSWER_HINT: &str =
    "Answer with option numbers or your own text. Separate questions with ';' and multiple picks with ','.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Chunk {
    Text(String),
    Tool(String),
    Status(String),
    Error(String),
    Question(String),
}

/// Turns successive snapshots into terminal output, printing only what has
/// not been printed yet. Text parts grow while streaming, so each part
/// remembers how much of it is already on screen.
#[derive(Default)]
pub struct ChatRenderer {
    printed: HashMap<String, usize>,
    tool_states: HashMap<String, String>,
    failed_messages: HashSet<String>,
    last_status: RunStatus,
    last_error: Option<String>,
    last_question: Option<String>,
}

impl ChatRenderer {
    pub fn render(&mut self, snapshot: &SyncSnapshot) -> Vec<Chunk> {
        let mut chunks = vec![];

        for message in snapshot.messages.iter() {
            let assistant = match message {
                Message::Assistant(assistant) => assistant,
                Message::User(_) => continue,
            };

            let parts = snapshot
                .parts
                .get(message.id())
                .map(|parts| return parts.as_slice())
                .unwrap_or_default();

            for part in parts {
                match &part.kind {
                    PartKind::Text { text, .. } if !part.is_synthetic() => {
                        let printed = self.printed.entry(part.id.to_string()).or_insert(0);
                        if let Some(rest) = text.get(*printed..) {
                            if !rest.is_empty() {
                                chunks.push(Chunk::Text(rest.to_string()));
                                *printed = text.len();
                            }
                        }
                    }
                    PartKind::Tool { tool, state, .. } => {
                        let name = state.name();
                        if self.tool_states.get(&part.id).map(|s| return s.as_str()) != Some(name) {
                            self.tool_states.insert(part.id.to_string(), name.to_string());
                            chunks.push(Chunk::Tool(format!("{tool}: {name}")));
                        }
                    }
                    _ => {}
                }
            }

            if let Some(error) = &assistant.error {
                if self.failed_messages.insert(assistant.id.to_string()) {
                    chunks.push(Chunk::Error(error.message()));
                }
            }
        }

        if snapshot.status != self.last_status {
            match &snapshot.status {
                RunStatus::Idle => chunks.push(Chunk::Status("done".to_string())),
                RunStatus::Retry { .. } => chunks.push(Chunk::Status(snapshot.status.label())),
                RunStatus::Running => {}
            }
            self.last_status = snapshot.status.clone();
        }

        let question_id = snapshot
            .current_question
            .as_ref()
            .map(|question| return question.id.to_string());
        if question_id != self.last_question {
            if let Some(question) = &snapshot.current_question {
                chunks.push(Chunk::Question(question.describe()));
            }
            self.last_question = question_id;
        }

        if snapshot.error != self.last_error {
            if let Some(error) = &snapshot.error {
                chunks.push(Chunk::Error(error.to_string()));
            }
            self.last_error = snapshot.error.clone();
        }

        return chunks;
    }
}

fn print_chunks(chunks: Vec<Chunk>) {
    for chunk in chunks {
        match chunk {
            Chunk::Text(text) => print!("{text}"),
            Chunk::Tool(text) => print!("\n{}\n", Paint::cyan(format!("[{text}]"))),
            Chunk::Status(text) => print!("\n{}\n> ", Paint::new(format!("({text})")).dimmed()),
            Chunk::Error(text) => print!("\n{}\n", Paint::red(text)),
            Chunk::Question(text) => print!(
                "\n{}\n{}\n{}\n> ",
                Paint::yellow("The assistant is asking:").bold(),
                text,
                Paint::new(ANSWER_HINT).dimmed()
            ),
        }
    }

    let _ = std::io::stdout().flush();
}

fn print_header(snapshot: &SyncSnapshot) {
    let title = snapshot
        .current_session
        .as_ref()
        .map(|session| return session.display_title())
        .unwrap_or_else(|| return "New session".to_string());
    let agent = snapshot.selected_agent.clone().unwrap_or_default();
    let model = snapshot
        .selected_model
        .as_ref()
        .map(|model| return model.to_string())
        .unwrap_or_default();

    println!("{}", Paint::new(title).bold());
    println!(
        "{}",
        Paint::new(format!("agent: {agent}, model: {model}")).dimmed()
    );
    println!("{}\n", Paint::new(HELP_TEXT).dimmed());
}

fn print_history(snapshot: &SyncSnapshot) {
    for message in snapshot.messages.iter() {
        let parts = snapshot
            .parts
            .get(message.id())
            .map(|parts| return parts.as_slice())
            .unwrap_or_default();
        let text = answer_text(parts);
        if text.is_empty() {
            continue;
        }

        if message.is_user() {
            println!("{}", Paint::green(format!("> {text}")));
        } else {
            println!("{text}\n");
        }
    }
}

async fn wait_for_connection(facade: &mut SyncFacade) -> Result<()> {
    loop {
        if !facade.pump().await {
            bail!("The OpenCode transport shut down");
        }

        let snapshot = facade.snapshot();
        if snapshot.max_reconnect_failed {
            bail!(snapshot.error.unwrap_or_default());
        }
        if snapshot.connected {
            if let Some(error) = snapshot.error {
                bail!(error);
            }
            return Ok(());
        }
    }
}

fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    return rx;
}

/// Runs a line based chat against the selected session, streaming the
/// assistant's reply as it arrives.
pub async fn start() -> Result<()> {
    let mut facade = SyncFacade::new(Config::transport_options()?, Config::sync_options()?);
    facade.connect();
    wait_for_connection(&mut facade).await?;

    let session_id = Config::get(ConfigKey::SessionID);
    if !session_id.is_empty() {
        facade.select_session(&session_id).await;
    }
    if facade.snapshot().current_session_id.is_none() {
        facade.create_session().await;
    }

    let snapshot = facade.snapshot();
    if snapshot.current_session_id.is_none() {
        bail!(snapshot
            .error
            .unwrap_or_else(|| return "Unable to open a session".to_string()));
    }

    let mut renderer = ChatRenderer::default();
    print_header(&snapshot);
    print_history(&snapshot);
    renderer.render(&snapshot);
    print!("> ");
    let _ = std::io::stdout().flush();

    let mut lines = spawn_stdin_reader();
    loop {
        tokio::select! {
            line = lines.recv() => {
                let line = match line {
                    Some(line) => line,
                    None => break,
                };

                let input = line.trim();
                if input == "/quit" || input == "/exit" {
                    break;
                } else if input == "/abort" {
                    facade.abort().await;
                } else if input == "/new" {
                    if facade.create_session().await.is_some() {
                        renderer = ChatRenderer::default();
                        print_header(&facade.snapshot());
                    }
                } else if let Some(agent) = input.strip_prefix("/agent ") {
                    facade.set_agent(Some(agent.trim().to_string()));
                } else if let Some(model) = input.strip_prefix("/model ") {
                    match ModelSelection::parse(model) {
                        Ok(model) => facade.set_model(Some(model)),
                        Err(err) => println!("{}", Paint::red(err)),
                    }
                } else if input.starts_with('/') {
                    println!("{HELP_TEXT}");
                } else if !input.is_empty() {
                    match facade.snapshot().current_question {
                        Some(question) => {
                            let answers = question.parse_answers(input);
                            facade.answer_question(&question.id, answers).await;
                        }
                        None => {
                            facade.send_message(input, &[]).await;
                        }
                    }
                }
            }
            signal = facade.next_signal() => {
                let signal = match signal {
                    Some(signal) => signal,
                    None => break,
                };
                facade.apply_signal(signal).await;
            }
        }

        print_chunks(renderer.render(&facade.snapshot()));
    }

    facade.disconnect();
    return Ok(());
}

/// Prints the raw event feed until the server goes away for good.
pub async fn watch() -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<FeedSignal>();
    let client = OpenCodeClient::new(Config::transport_options()?, tx);
    client.connect();

    while let Some(signal) = rx.recv().await {
        match signal {
            FeedSignal::Connected => println!("{}", Paint::green("connected")),
            FeedSignal::Disconnected => println!("{}", Paint::yellow("disconnected")),
            FeedSignal::MaxReconnectAttempts(attempts) => {
                client.disconnect();
                bail!(format!("Gave up after {attempts} reconnect attempts"));
            }
            FeedSignal::Event(event) => {
                println!(
                    "{} {}",
                    Paint::new(event.kind()).bold(),
                    event.session_id().unwrap_or("-")
                );
            }
        }
    }

    return Ok(());
}
