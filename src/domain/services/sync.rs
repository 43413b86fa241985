#[cfg(test)]
#[path = "sync_test.rs"]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::watch;

use super::EventReducer;
use super::SessionStore;
use crate::domain::models::Agent;
use crate::domain::models::FeedSignal;
use crate::domain::models::FileAttachment;
use crate::domain::models::Message;
use crate::domain::models::MessageError;
use crate::domain::models::ModelSelection;
use crate::domain::models::Part;
use crate::domain::models::PromptRequest;
use crate::domain::models::Provider;
use crate::domain::models::Question;
use crate::domain::models::RunStatus;
use crate::domain::models::ServerEvent;
use crate::domain::models::Session;
use crate::infrastructure::opencode::OpenCodeClient;
use crate::infrastructure::opencode::TransportOptions;

/// Errors that a fresh session will not fix.
const NON_RECOVERABLE_ERRORS: [&str; 5] = [
    "CreditsError",
    "No payment method",
    "billing",
    "quota",
    "rate limit",
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncOptions {
    /// Agent to use when the server still offers it.
    pub agent: Option<String>,
    /// Model to use when the server still offers it.
    pub model: Option<ModelSelection>,
    pub api_ready_retries: u32,
    pub api_ready_delay: Duration,
    /// Consecutive session errors recovered by starting a new session.
    pub max_error_recoveries: u32,
    /// Select the most recently updated session after connecting.
    pub select_latest_session: bool,
}

impl Default for SyncOptions {
    fn default() -> SyncOptions {
        return SyncOptions {
            agent: None,
            model: None,
            api_ready_retries: 5,
            api_ready_delay: Duration::from_millis(500),
            max_error_recoveries: 3,
            select_latest_session: true,
        };
    }
}

/// Everything a UI renders, scoped to the selected session.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SyncSnapshot {
    pub connected: bool,
    pub connecting: bool,
    pub error: Option<String>,
    pub max_reconnect_failed: bool,
    pub sessions: Vec<Session>,
    pub current_session_id: Option<String>,
    pub current_session: Option<Session>,
    pub messages: Vec<Message>,
    /// Parts of the selected session keyed by message id.
    pub parts: HashMap<String, Vec<Part>>,
    pub status: RunStatus,
    pub agents: Vec<Agent>,
    pub providers: Vec<Provider>,
    pub selected_agent: Option<String>,
    pub selected_model: Option<ModelSelection>,
    /// A question the selected session's run is waiting on.
    pub current_question: Option<Question>,
}

/// Pulls `{"error": {"message": ..}}` out of provider errors that embed the
/// raw JSON response in their message.
fn extract_nested_message(message: &str) -> Option<String> {
    let start = message.find('{')?;
    let end = message.rfind('}')?;
    if end <= start {
        return None;
    }

    let parsed = serde_json::from_str::<Value>(&message[start..=end]).ok()?;
    return parsed
        .get("error")
        .and_then(|err| return err.get("message"))
        .and_then(|msg| return msg.as_str())
        .map(|msg| return msg.to_string());
}

fn is_recoverable(message: &str) -> bool {
    return !NON_RECOVERABLE_ERRORS
        .iter()
        .any(|keyword| return message.contains(keyword));
}

/// The controller UI code talks to. It owns the transport and the store,
/// applies feed signals through `pump`/`drain`, and republishes a
/// `SyncSnapshot` after every change.
pub struct SyncFacade {
    client: Arc<OpenCodeClient>,
    signals: mpsc::UnboundedReceiver<FeedSignal>,
    store: SessionStore,
    options: SyncOptions,
    snapshot_tx: watch::Sender<SyncSnapshot>,
    current_session_id: Option<String>,
    connected: bool,
    connecting: bool,
    error: Option<String>,
    max_reconnect_failed: bool,
    agents: Vec<Agent>,
    providers: Vec<Provider>,
    selected_agent: Option<String>,
    selected_model: Option<ModelSelection>,
    current_question: Option<Question>,
    error_recoveries: u32,
}

impl SyncFacade {
    pub fn new(transport: TransportOptions, options: SyncOptions) -> SyncFacade {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel::<FeedSignal>();
        let (snapshot_tx, _) = watch::channel(SyncSnapshot::default());

        return SyncFacade {
            client: Arc::new(OpenCodeClient::new(transport, signal_tx)),
            signals: signal_rx,
            store: SessionStore::default(),
            options,
            snapshot_tx,
            current_session_id: None,
            connected: false,
            connecting: false,
            error: None,
            max_reconnect_failed: false,
            agents: vec![],
            providers: vec![],
            selected_agent: None,
            selected_model: None,
            current_question: None,
            error_recoveries: 0,
        };
    }

    /// The shared transport, e.g. to disconnect from another task.
    pub fn client(&self) -> Arc<OpenCodeClient> {
        return self.client.clone();
    }

    pub fn store(&self) -> &SessionStore {
        return &self.store;
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        return self.snapshot_tx.subscribe();
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        return self.snapshot_tx.borrow().clone();
    }

    fn build_snapshot(&self) -> SyncSnapshot {
        let mut snapshot = SyncSnapshot {
            connected: self.connected,
            connecting: self.connecting,
            error: self.error.clone(),
            max_reconnect_failed: self.max_reconnect_failed,
            sessions: self.store.sessions(),
            current_session_id: self.current_session_id.clone(),
            agents: self.agents.clone(),
            providers: self.providers.clone(),
            selected_agent: self.selected_agent.clone(),
            selected_model: self.selected_model.clone(),
            ..SyncSnapshot::default()
        };

        if let Some(session_id) = self.current_session_id.as_deref() {
            snapshot.current_session = self.store.session(session_id).cloned();
            snapshot.messages = self.store.messages(session_id).to_vec();
            snapshot.parts = self.store.session_parts(session_id);
            snapshot.status = self.store.status(session_id);
            snapshot.current_question = self
                .current_question
                .clone()
                .filter(|question| return question.session_id == session_id);
        }

        return snapshot;
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.build_snapshot());
    }

    fn fail(&mut self, message: String) {
        tracing::error!(error = message, "Sync operation failed");
        self.error = Some(message);
        self.publish();
    }

    /// Starts the transport unless it is already up or on its way.
    pub fn connect(&mut self) {
        if self.connected || self.connecting {
            tracing::debug!(
                connected = self.connected,
                connecting = self.connecting,
                "Already connected"
            );
            return;
        }

        self.connecting = true;
        self.error = None;
        self.client.connect();
        self.publish();
    }

    /// Stops the transport. Signals the feed queued before the disconnect are
    /// dropped, they describe a connection that no longer exists.
    pub fn disconnect(&mut self) {
        self.client.disconnect();

        let mut dropped = 0;
        while self.signals.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            tracing::debug!(dropped, "Dropped stale feed signals");
        }

        self.connected = false;
        self.connecting = false;
        self.publish();
    }

    /// Waits for the next transport signal and applies it. Returns false once
    /// the transport is gone.
    pub async fn pump(&mut self) -> bool {
        let signal = match self.next_signal().await {
            Some(signal) => signal,
            None => return false,
        };

        self.apply_signal(signal).await;
        return true;
    }

    /// Cancel safe half of `pump`, for use in `select!` loops.
    pub async fn next_signal(&mut self) -> Option<FeedSignal> {
        return self.signals.recv().await;
    }

    /// Applies every signal that is already queued without waiting for more.
    pub async fn drain(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(signal) = self.signals.try_recv() {
            self.apply_signal(signal).await;
            handled += 1;
        }

        return handled;
    }

    pub async fn apply_signal(&mut self, signal: FeedSignal) {
        match signal {
            FeedSignal::Connected => {
                self.connected = true;
                self.connecting = false;
                self.error = None;
                self.max_reconnect_failed = false;
                self.publish();
                self.load_initial_data().await;
            }
            FeedSignal::Disconnected => {
                self.connected = false;
                self.publish();
            }
            FeedSignal::MaxReconnectAttempts(attempts) => {
                self.connected = false;
                self.connecting = false;
                self.max_reconnect_failed = true;
                self.fail(format!(
                    "Max reconnection attempts ({attempts}) reached, OpenCode is unreachable"
                ));
            }
            FeedSignal::Event(event) => self.handle_event(event).await,
        }
    }

    async fn handle_event(&mut self, event: ServerEvent) {
        let is_current = event.session_id().is_some()
            && event.session_id() == self.current_session_id.as_deref();

        match &event {
            ServerEvent::QuestionAsked(question) if is_current => {
                tracing::info!(
                    session_id = question.session_id,
                    question_id = question.id,
                    "Question asked"
                );
                self.current_question = Some(question.clone());
                self.publish();
                return;
            }
            ServerEvent::SessionError {
                error: Some(error), ..
            } if is_current => {
                let error = error.clone();
                self.handle_session_error(&error).await;
                return;
            }
            ServerEvent::MessageUpdated(Message::Assistant(message))
                if is_current && message.time.completed.is_some() && message.error.is_none() =>
            {
                self.error_recoveries = 0;
            }
            _ => {}
        }

        if EventReducer::apply(&mut self.store, event) {
            self.publish();
        }
    }

    async fn handle_session_error(&mut self, error: &MessageError) {
        let mut message = error.message();
        tracing::warn!(error = message, "Session error");

        if !is_recoverable(&message) {
            if let Some(nested) = extract_nested_message(&message) {
                message = nested;
            }
            if let Some(provider_id) = error.provider_id() {
                message = format!("{message} (Provider: {provider_id})");
            }

            self.fail(message);
            return;
        }

        self.error_recoveries += 1;
        if self.error_recoveries > self.options.max_error_recoveries {
            self.error_recoveries = 0;
            self.fail("Session keeps failing. Please restart OpenCode.".to_string());
            return;
        }

        tracing::info!(
            attempt = self.error_recoveries,
            max = self.options.max_error_recoveries,
            "Recovering from session error with a new session"
        );
        self.error = None;
        if self.create_session().await.is_none() && self.error.is_some() {
            self.fail("Session error. Please try again.".to_string());
        }
    }

    async fn load_initial_data(&mut self) {
        let ready = self
            .client
            .wait_for_api_ready(self.options.api_ready_retries, self.options.api_ready_delay)
            .await;
        if !ready {
            self.fail("OpenCode API is not responding".to_string());
            return;
        }

        self.load_agents_and_providers().await;
        self.load_sessions().await;
    }

    async fn load_sessions(&mut self) {
        let sessions = match self.client.list_sessions().await {
            Ok(sessions) => sessions,
            Err(err) => {
                self.fail(format!("Failed to load sessions: {err}"));
                return;
            }
        };

        for session in sessions {
            self.store.upsert_session(session);
        }

        if self.current_session_id.is_none() && self.options.select_latest_session {
            if let Some(latest) = self.store.sessions().first() {
                self.select_session(&latest.id).await;
                return;
            }
        }

        self.publish();
    }

    async fn load_agents_and_providers(&mut self) {
        match self.client.list_agents().await {
            Ok(agents) => self.agents = agents,
            Err(err) => tracing::warn!(error = ?err, "Failed to load agents"),
        }

        match self.client.list_providers().await {
            Ok(providers) => self.providers = providers,
            Err(err) => tracing::warn!(error = ?err, "Failed to load providers"),
        }

        let has_agent = |id: &String| return self.agents.iter().any(|agent| return &agent.id == id);
        let agent = self
            .selected_agent
            .clone()
            .filter(has_agent)
            .or_else(|| return self.options.agent.clone().filter(has_agent))
            .or_else(|| return self.agents.first().map(|agent| return agent.id.to_string()));

        let model = self
            .selected_model
            .clone()
            .filter(|model| return model.is_available(&self.providers))
            .or_else(|| {
                return self
                    .options
                    .model
                    .clone()
                    .filter(|model| return model.is_available(&self.providers));
            })
            .or_else(|| return ModelSelection::pick_default(&self.providers));

        tracing::debug!(
            agents = self.agents.len(),
            providers = self.providers.len(),
            agent = ?agent,
            model = ?model,
            "Loaded agents and providers"
        );

        if agent.is_some() {
            self.selected_agent = agent;
        }
        if model.is_some() {
            self.selected_model = model;
        }
        self.publish();
    }

    /// Creates a session and selects it. Returns `None` when disconnected,
    /// cancelled or failed, the latter recorded in `error`.
    pub async fn create_session(&mut self) -> Option<Session> {
        if !self.connected {
            tracing::warn!("Cannot create a session while disconnected");
            return None;
        }

        let session = match self.client.create_session().await {
            Ok(Some(session)) => session,
            Ok(None) => return None,
            Err(err) => {
                self.fail(format!("Failed to create session: {err}"));
                return None;
            }
        };

        tracing::info!(session_id = session.id, "Session created");
        self.store.upsert_session(session.clone());
        self.current_session_id = Some(session.id.to_string());
        self.publish();

        return Some(session);
    }

    /// Moves the cursor and hydrates the session's history from the server.
    pub async fn select_session(&mut self, session_id: &str) {
        self.current_session_id = Some(session_id.to_string());
        self.publish();

        if self.store.session(session_id).is_none() {
            match self.client.get_session(session_id).await {
                Ok(Some(session)) => self.store.upsert_session(session),
                Ok(None) => {}
                Err(err) => tracing::warn!(error = ?err, session_id, "Failed to load session"),
            }
        }

        let entries = match self.client.list_messages(session_id).await {
            Ok(entries) => entries,
            Err(err) => {
                self.fail(format!("Failed to load messages: {err}"));
                return;
            }
        };

        let mut messages = vec![];
        for entry in entries {
            let message_id = entry.info.id().to_string();
            let parts = match entry.parts {
                Some(parts) => parts,
                None => self
                    .client
                    .list_parts(session_id, &message_id)
                    .await
                    .unwrap_or_else(|err| {
                        tracing::warn!(error = ?err, message_id, "Failed to load parts");
                        return vec![];
                    }),
            };

            self.store.replace_parts(session_id, &message_id, parts);
            messages.push(entry.info);
        }

        self.store.replace_messages(session_id, messages);
        self.restore_selection(session_id);
        self.publish();
    }

    /// Picks up the agent and model of the session's last prompt.
    fn restore_selection(&mut self, session_id: &str) {
        let last_user = self
            .store
            .messages(session_id)
            .iter()
            .rev()
            .find_map(|message| {
                if let Message::User(user) = message {
                    return Some(user.clone());
                }
                return None;
            });

        let last_user = match last_user {
            Some(last_user) => last_user,
            None => return,
        };

        if !last_user.agent.is_empty() {
            self.selected_agent = Some(last_user.agent);
        }
        if !last_user.model.is_empty() {
            self.selected_model = Some(last_user.model);
        }
    }

    pub async fn delete_session(&mut self, session_id: &str) {
        if let Err(err) = self.client.delete_session(session_id).await {
            self.fail(format!("Failed to delete session: {err}"));
            return;
        }

        self.store.remove_session(session_id);
        if self.current_session_id.as_deref() == Some(session_id) {
            self.current_session_id = None;
        }
        self.publish();
    }

    /// Sends a prompt to the selected session. The session shows as running
    /// until the server reports its status. Returns whether the prompt was
    /// accepted.
    pub async fn send_message(&mut self, content: &str, files: &[FileAttachment]) -> bool {
        let session_id = match self.current_session_id.clone() {
            Some(session_id) => session_id,
            None => {
                self.fail("No session selected".to_string());
                return false;
            }
        };

        if !self.connected {
            self.fail("Not connected to OpenCode".to_string());
            return false;
        }

        let agent = self
            .selected_agent
            .clone()
            .or_else(|| return self.agents.first().map(|agent| return agent.id.to_string()));
        let prompt = PromptRequest::new(content, files)
            .with_agent(agent)
            .with_model(self.selected_model.clone());
        if prompt.parts.is_empty() {
            return false;
        }

        self.error = None;
        self.store.set_status(&session_id, RunStatus::Running);
        self.publish();

        if let Err(err) = self.client.send_message(&session_id, &prompt).await {
            self.store.set_status(&session_id, RunStatus::Idle);
            self.fail(format!("Failed to send message: {err}"));
            return false;
        }

        return true;
    }

    pub async fn abort(&mut self) {
        let session_id = match self.current_session_id.clone() {
            Some(session_id) => session_id,
            None => return,
        };

        if let Err(err) = self.client.abort(&session_id).await {
            self.fail(format!("Failed to abort: {err}"));
        }
    }

    /// Replies to the pending question and clears it. Returns whether the
    /// server took the answer.
    pub async fn answer_question(&mut self, question_id: &str, answers: Vec<Vec<String>>) -> bool {
        if !self.connected {
            tracing::warn!(question_id, "Cannot answer a question while disconnected");
            return false;
        }

        if let Err(err) = self.client.answer_question(question_id, &answers).await {
            self.fail(format!("Failed to answer question: {err}"));
            return false;
        }

        self.current_question = None;
        self.publish();
        return true;
    }

    /// Parts of a message in the selected session.
    pub fn parts_for_message(&self, message_id: &str) -> &[Part] {
        return match self.current_session_id.as_deref() {
            Some(session_id) => self.store.parts(session_id, message_id),
            None => &[],
        };
    }

    pub fn reset_reconnect_state(&mut self) {
        self.max_reconnect_failed = false;
        self.error = None;
        self.publish();
    }

    pub fn set_agent(&mut self, agent: Option<String>) {
        self.selected_agent = agent;
        self.publish();
    }

    pub fn set_model(&mut self, model: Option<ModelSelection>) {
        self.selected_model = model;
        self.publish();
    }
}
