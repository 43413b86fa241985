#[cfg(test)]
#[path = "client_test.rs"]
mod tests;

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use reqwest::header;
use reqwest::Method;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde_json::json;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::FeedWorker;
use super::TransportOptions;
use crate::domain::models::Agent;
use crate::domain::models::FeedSignal;
use crate::domain::models::MessageWithParts;
use crate::domain::models::Part;
use crate::domain::models::PromptRequest;
use crate::domain::models::Provider;
use crate::domain::models::Session;

pub const DIRECTORY_HEADER: &str = "x-opencode-directory";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    return mutex
        .lock()
        .unwrap_or_else(|poisoned| return poisoned.into_inner());
}

/// Adds the project directory to a request, both as query parameter and as
/// percent-encoded header.
pub(super) fn scope_to_directory(req: RequestBuilder, directory: &Option<String>) -> RequestBuilder {
    if let Some(dir) = directory {
        return req
            .query(&[("directory", dir)])
            .header(DIRECTORY_HEADER, urlencoding::encode(dir).to_string());
    }

    return req;
}

fn decode<T: DeserializeOwned>(operation: &str, body: &str) -> Result<T> {
    return serde_json::from_str::<T>(body)
        .with_context(|| return format!("Invalid response from OpenCode to {operation}"));
}

async fn execute(operation: &str, req: RequestBuilder) -> Result<String> {
    let res = req
        .send()
        .await
        .with_context(|| return format!("Failed to {operation}"))?;

    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        tracing::error!(
            operation,
            status = status.as_u16(),
            body,
            "OpenCode request failed"
        );
        bail!(format!("Failed to {operation}: {status} {body}"));
    }

    return Ok(res.text().await?);
}

/// Request/response access to an OpenCode server plus ownership of its event
/// feed. Share it through an `Arc` when another task needs to disconnect while
/// a request is in flight.
pub struct OpenCodeClient {
    options: TransportOptions,
    http: reqwest::Client,
    cancel: Mutex<CancellationToken>,
    feed: Mutex<Option<JoinHandle<()>>>,
    connected: Arc<AtomicBool>,
    signals: mpsc::UnboundedSender<FeedSignal>,
}

impl OpenCodeClient {
    pub fn new(
        options: TransportOptions,
        signals: mpsc::UnboundedSender<FeedSignal>,
    ) -> OpenCodeClient {
        return OpenCodeClient {
            options,
            http: reqwest::Client::new(),
            cancel: Mutex::new(CancellationToken::new()),
            feed: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            signals,
        };
    }

    pub fn options(&self) -> &TransportOptions {
        return &self.options;
    }

    pub fn is_connected(&self) -> bool {
        return self.connected.load(Ordering::SeqCst);
    }

    fn token(&self) -> CancellationToken {
        return lock(&self.cancel).clone();
    }

    /// Starts the event feed. Does nothing while a feed worker is already
    /// connecting or connected.
    pub fn connect(&self) {
        let mut feed = lock(&self.feed);
        if let Some(handle) = feed.as_ref() {
            if !handle.is_finished() {
                tracing::debug!("Event feed already running");
                return;
            }
        }

        let worker = FeedWorker::new(
            self.http.clone(),
            &self.options,
            self.token(),
            self.signals.clone(),
            self.connected.clone(),
        );

        *feed = Some(tokio::spawn(worker.run()));
    }

    /// Stops the feed, abandons every in-flight request and cancels any
    /// pending reconnect. Later calls get a fresh cancellation token.
    pub fn disconnect(&self) {
        let previous = std::mem::replace(&mut *lock(&self.cancel), CancellationToken::new());
        previous.cancel();

        if let Some(handle) = lock(&self.feed).take() {
            handle.abort();
        }

        self.connected.store(false, Ordering::SeqCst);
        tracing::info!("Disconnected from OpenCode");
    }

    fn build(&self, method: Method, path: &str) -> RequestBuilder {
        let req = self
            .http
            .request(method, self.options.url(path))
            .header(header::ACCEPT, "application/json");

        return scope_to_directory(req, &self.options.directory);
    }

    /// Runs a request unless the client is disconnected first. `None` means
    /// the request was cancelled.
    async fn request(
        &self,
        operation: &str,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Option<String>> {
        let token = self.token();
        let mut req = self.build(method, path);
        if let Some(body) = body {
            req = req.json(&body);
        }

        tokio::select! {
            _ = token.cancelled() => {
                tracing::debug!(operation, "Request cancelled");
                return Ok(None);
            }
            res = execute(operation, req) => {
                return res.map(Some);
            }
        }
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        let operation = "list sessions";
        return match self.request(operation, Method::GET, "/session", None).await? {
            Some(body) => decode(operation, &body),
            None => Ok(vec![]),
        };
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let operation = "get session";
        let path = format!("/session/{session_id}");
        return match self.request(operation, Method::GET, &path, None).await? {
            Some(body) => decode(operation, &body).map(Some),
            None => Ok(None),
        };
    }

    pub async fn create_session(&self) -> Result<Option<Session>> {
        let operation = "create session";
        let res = self
            .request(operation, Method::POST, "/session", Some(json!({})))
            .await?;

        return match res {
            Some(body) => decode(operation, &body).map(Some),
            None => Ok(None),
        };
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        let path = format!("/session/{session_id}");
        self.request("delete session", Method::DELETE, &path, None)
            .await?;

        return Ok(());
    }

    pub async fn list_messages(&self, session_id: &str) -> Result<Vec<MessageWithParts>> {
        let operation = "list messages";
        let path = format!("/session/{session_id}/message");
        return match self.request(operation, Method::GET, &path, None).await? {
            Some(body) => decode(operation, &body),
            None => Ok(vec![]),
        };
    }

    pub async fn list_parts(&self, session_id: &str, message_id: &str) -> Result<Vec<Part>> {
        let operation = "list parts";
        let path = format!("/session/{session_id}/message/{message_id}/part");
        return match self.request(operation, Method::GET, &path, None).await? {
            Some(body) => decode(operation, &body),
            None => Ok(vec![]),
        };
    }

    /// Posts a prompt. The server answers once the turn has been accepted,
    /// with the created message when it has one.
    pub async fn send_message(
        &self,
        session_id: &str,
        prompt: &PromptRequest,
    ) -> Result<Option<MessageWithParts>> {
        let operation = "send message";
        let path = format!("/session/{session_id}/message");
        let body = serde_json::to_value(prompt)?;
        let res = self
            .request(operation, Method::POST, &path, Some(body))
            .await?;

        return match res {
            Some(body) if body.trim().is_empty() => Ok(None),
            Some(body) => Ok(serde_json::from_str::<MessageWithParts>(&body).ok()),
            None => Ok(None),
        };
    }

    pub async fn abort(&self, session_id: &str) -> Result<()> {
        let path = format!("/session/{session_id}/abort");
        self.request("abort session", Method::POST, &path, None)
            .await?;

        return Ok(());
    }

    /// Replies to a pending question, one list of chosen labels per question.
    pub async fn answer_question(&self, question_id: &str, answers: &[Vec<String>]) -> Result<()> {
        let path = format!("/question/{question_id}/reply");
        let body = json!({ "answers": answers });
        self.request("answer question", Method::POST, &path, Some(body))
            .await?;

        return Ok(());
    }

    pub async fn list_agents(&self) -> Result<Vec<Agent>> {
        let operation = "list agents";
        return match self.request(operation, Method::GET, "/agent", None).await? {
            Some(body) => Ok(Agent::list_from_value(&decode::<Value>(operation, &body)?)),
            None => Ok(vec![]),
        };
    }

    pub async fn list_providers(&self) -> Result<Vec<Provider>> {
        let operation = "list providers";
        return match self.request(operation, Method::GET, "/provider", None).await? {
            Some(body) => Ok(Provider::list_from_value(&decode::<Value>(
                operation, &body,
            )?)),
            None => Ok(vec![]),
        };
    }

    async fn probe(&self) -> bool {
        let res = match self.build(Method::GET, "/session").send().await {
            Ok(res) => res,
            Err(err) => {
                tracing::debug!(error = ?err, "OpenCode API not reachable yet");
                return false;
            }
        };

        let is_json = res
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|val| return val.to_str().ok())
            .map(|val| return val.contains("application/json"))
            .unwrap_or(false);

        return res.status().is_success() && is_json;
    }

    /// The server accepts connections before its API routes are mounted, so
    /// poll until `/session` answers with JSON. Sleeps `initial_delay * 2^i`
    /// between tries.
    pub async fn wait_for_api_ready(&self, retries: u32, initial_delay: Duration) -> bool {
        let token = self.token();
        for attempt in 0..retries {
            let ready = tokio::select! {
                _ = token.cancelled() => return false,
                ready = self.probe() => ready,
            };

            if ready {
                tracing::debug!(attempt, "OpenCode API is ready");
                return true;
            }

            if attempt + 1 < retries {
                let delay = initial_delay.saturating_mul(2_u32.saturating_pow(attempt));
                tokio::select! {
                    _ = token.cancelled() => return false,
                    _ = tokio::time::sleep(delay) => {},
                }
            }
        }

        tracing::warn!(retries, "OpenCode API did not become ready");
        return false;
    }
}
