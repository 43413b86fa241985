#[cfg(test)]
#[path = "feed_test.rs"]
mod tests;

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::bail;
use anyhow::Result;
use futures::stream::TryStreamExt;
use reqwest::header;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use super::client::scope_to_directory;
use super::ReconnectPolicy;
use super::TransportOptions;
use crate::domain::models::FeedSignal;
use crate::domain::models::ServerEvent;

fn convert_err(err: reqwest::Error) -> std::io::Error {
    let err_msg = err.to_string();
    return std::io::Error::new(std::io::ErrorKind::Interrupted, err_msg);
}

/// Reassembles server-sent events from a line stream. `data:` lines are
/// collected until a blank line ends the event. Comments and the other SSE
/// fields carry nothing this client uses.
#[derive(Debug, Default)]
pub struct SseDecoder {
    data: Vec<String>,
}

impl SseDecoder {
    /// Feeds one line, without its line ending. Returns the event payload once
    /// a blank line completes it.
    pub fn push_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            if self.data.is_empty() {
                return None;
            }

            let payload = self.data.join("\n");
            self.data.clear();
            return Some(payload);
        }

        if line.starts_with(':') {
            return None;
        }

        if let Some(value) = line.strip_prefix("data:") {
            self.data
                .push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }

        return None;
    }
}

/// Background task owning the `/event` stream. It only reports through
/// `FeedSignal`s and never touches session state.
pub struct FeedWorker {
    http: reqwest::Client,
    url: String,
    directory: Option<String>,
    policy: ReconnectPolicy,
    token: CancellationToken,
    signals: mpsc::UnboundedSender<FeedSignal>,
    connected: Arc<AtomicBool>,
}

impl FeedWorker {
    pub fn new(
        http: reqwest::Client,
        options: &TransportOptions,
        token: CancellationToken,
        signals: mpsc::UnboundedSender<FeedSignal>,
        connected: Arc<AtomicBool>,
    ) -> FeedWorker {
        return FeedWorker {
            http,
            url: options.url("/event"),
            directory: options.directory.clone(),
            policy: options.reconnect.clone(),
            token,
            signals,
            connected,
        };
    }

    fn send(&self, signal: FeedSignal) -> bool {
        return self.signals.send(signal).is_ok();
    }

    pub async fn run(self) {
        let mut attempt: u32 = 0;

        loop {
            let res = tokio::select! {
                _ = self.token.cancelled() => return,
                res = self.stream(&mut attempt) => res,
            };

            self.connected.store(false, Ordering::SeqCst);
            match res {
                Ok(()) => tracing::info!("Event feed closed by server"),
                Err(err) => tracing::warn!(error = ?err, attempt, "Event feed failed"),
            }

            if !self.send(FeedSignal::Disconnected) {
                return;
            }

            if attempt >= self.policy.max_attempts {
                tracing::error!(attempt, "Giving up on the event feed");
                self.send(FeedSignal::MaxReconnectAttempts(attempt));
                return;
            }

            let delay = self.policy.delay_for(attempt);
            attempt += 1;
            tracing::info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting event feed"
            );

            tokio::select! {
                _ = self.token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {},
            }
        }
    }

    async fn stream(&self, attempt: &mut u32) -> Result<()> {
        let req = self
            .http
            .get(&self.url)
            .header(header::ACCEPT, "text/event-stream");

        let res = scope_to_directory(req, &self.directory).send().await?;
        if !res.status().is_success() {
            bail!(format!(
                "Event feed answered with status {}",
                res.status().as_u16()
            ));
        }

        *attempt = 0;
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!(url = self.url, "Event feed connected");
        if !self.send(FeedSignal::Connected) {
            return Ok(());
        }

        let stream = res.bytes_stream().map_err(convert_err);
        let mut lines_reader = StreamReader::new(stream).lines();
        let mut decoder = SseDecoder::default();

        while let Some(line) = lines_reader.next_line().await? {
            let payload = match decoder.push_line(&line) {
                Some(payload) => payload,
                None => continue,
            };

            let event = match ServerEvent::parse(&payload) {
                Ok(event) => event,
                Err(err) => {
                    tracing::warn!(error = ?err, payload, "Skipping malformed event");
                    continue;
                }
            };

            tracing::debug!(kind = event.kind(), "Event received");
            if !self.send(FeedSignal::Event(event)) {
                return Ok(());
            }
        }

        return Ok(());
    }
}
