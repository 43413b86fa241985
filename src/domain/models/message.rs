#[cfg(test)]
#[path = "message_test.rs"]
mod tests;

use serde_derive::Deserialize;
use serde_derive::Serialize;

use super::ModelSelection;
use super::Part;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageTime {
    #[serde(default)]
    pub created: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FileDiff {
    pub file: String,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default)]
    pub diffs: Vec<FileDiff>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheTokens {
    #[serde(default)]
    pub read: u64,
    #[serde(default)]
    pub write: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Tokens {
    #[serde(default)]
    pub input: u64,
    #[serde(default)]
    pub output: u64,
    #[serde(default)]
    pub reasoning: u64,
    #[serde(default)]
    pub cache: CacheTokens,
}

impl Tokens {
    pub fn total(&self) -> u64 {
        return self.input + self.output + self.reasoning;
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageErrorData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "providerID", default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

/// Terminal failure of an assistant turn, or the payload of a `session.error`
/// event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageError {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<MessageErrorData>,
}

impl MessageError {
    /// The human readable message, falling back to the error name.
    pub fn message(&self) -> String {
        if let Some(message) = self.data.as_ref().and_then(|data| return data.message.clone()) {
            if !message.is_empty() {
                return message;
            }
        }

        if !self.name.is_empty() {
            return self.name.to_string();
        }

        return "Unknown error".to_string();
    }

    pub fn provider_id(&self) -> Option<String> {
        return self.data.as_ref().and_then(|data| return data.provider_id.clone());
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub id: String,
    #[serde(rename = "sessionID")]
    pub session_id: String,
    #[serde(default)]
    pub time: MessageTime,
    #[serde(default)]
    pub agent: String,
    #[serde(default)]
    pub model: ModelSelection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<MessageSummary>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub id: String,
    #[serde(rename = "sessionID")]
    pub session_id: String,
    #[serde(default)]
    pub time: MessageTime,
    #[serde(rename = "parentID", default)]
    pub parent_id: String,
    #[serde(rename = "modelID", default)]
    pub model_id: String,
    #[serde(rename = "providerID", default)]
    pub provider_id: String,
    #[serde(default)]
    pub agent: String,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub tokens: Tokens,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<MessageError>,
}

impl AssistantMessage {
    pub fn is_completed(&self) -> bool {
        return self.time.completed.is_some() || self.error.is_some();
    }
}

/// One turn in a session. Ids increase in creation order, so sorting by id is
/// sorting by time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    User(UserMessage),
    Assistant(AssistantMessage),
}

impl Message {
    pub fn id(&self) -> &str {
        match self {
            Message::User(msg) => return &msg.id,
            Message::Assistant(msg) => return &msg.id,
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            Message::User(msg) => return &msg.session_id,
            Message::Assistant(msg) => return &msg.session_id,
        }
    }

    pub fn agent(&self) -> &str {
        match self {
            Message::User(msg) => return &msg.agent,
            Message::Assistant(msg) => return &msg.agent,
        }
    }

    pub fn is_user(&self) -> bool {
        return matches!(self, Message::User(_));
    }

    pub fn as_assistant(&self) -> Option<&AssistantMessage> {
        if let Message::Assistant(msg) = self {
            return Some(msg);
        }

        return None;
    }
}

/// One entry of `GET /session/{id}/message`. Older servers leave out the
/// parts, which then have to be fetched separately.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageWithParts {
    pub info: Message,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parts: Option<Vec<Part>>,
}
