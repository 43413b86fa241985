#[cfg(test)]
#[path = "ask_test.rs"]
mod tests;

use std::time::Duration;

use anyhow::bail;
use anyhow::Result;
use tokio::time::Instant;

use crate::domain::models::answer_text;
use crate::domain::models::MessageWithParts;
use crate::domain::models::ModelSelection;
use crate::domain::models::PromptRequest;
use crate::infrastructure::opencode::OpenCodeClient;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AskOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub agent: Option<String>,
    pub model: Option<ModelSelection>,
}

impl Default for AskOptions {
    fn default() -> AskOptions {
        return AskOptions {
            timeout: Duration::from_secs(90),
            poll_interval: Duration::from_millis(500),
            agent: None,
            model: None,
        };
    }
}

/// Newest assistant reply to `parent_id`, or its error.
fn find_reply(entries: &[MessageWithParts], parent_id: Option<&str>) -> Result<Option<String>> {
    for entry in entries.iter().rev() {
        let assistant = match entry.info.as_assistant() {
            Some(assistant) => assistant,
            None => continue,
        };

        if let Some(parent_id) = parent_id {
            if !assistant.parent_id.is_empty() && assistant.parent_id != parent_id {
                continue;
            }
        }

        let text = answer_text(entry.parts.as_deref().unwrap_or_default());
        if !text.is_empty() {
            return Ok(Some(text));
        }

        if let Some(error) = &assistant.error {
            bail!(error.message());
        }
    }

    return Ok(None);
}

/// One-shot prompts in a throwaway session, without the event feed.
pub struct AskService {}

impl AskService {
    /// Runs `prompt` in a fresh session and returns the assistant's text. The
    /// session is deleted afterwards whether or not an answer arrived.
    pub async fn ask(client: &OpenCodeClient, prompt: &str, options: &AskOptions) -> Result<String> {
        let session = match client.create_session().await? {
            Some(session) => session,
            None => bail!("Request was cancelled"),
        };

        tracing::debug!(session_id = session.id, "Created throwaway session");
        let res = AskService::answer(client, &session.id, prompt, options).await;

        if let Err(err) = client.delete_session(&session.id).await {
            tracing::warn!(error = ?err, session_id = session.id, "Failed to delete throwaway session");
        }

        return res;
    }

    async fn answer(
        client: &OpenCodeClient,
        session_id: &str,
        prompt: &str,
        options: &AskOptions,
    ) -> Result<String> {
        let request = PromptRequest::new(prompt, &[])
            .with_agent(options.agent.clone())
            .with_model(options.model.clone())
            .with_no_reply(false);

        let deadline = Instant::now() + options.timeout;
        let mut parent_id = None;

        if let Some(response) = client.send_message(session_id, &request).await? {
            if response.info.is_user() {
                parent_id = Some(response.info.id().to_string());
            } else if let Some(text) = find_reply(&[response], None)? {
                return Ok(text);
            }
        }

        while Instant::now() < deadline {
            let entries = client.list_messages(session_id).await?;
            if let Some(text) = find_reply(&entries, parent_id.as_deref())? {
                return Ok(text);
            }

            tracing::debug!(session_id, "Waiting for the assistant to answer");
            tokio::time::sleep(options.poll_interval).await;
        }

        bail!("OpenCode returned an empty response");
    }
}
