#[cfg(test)]
#[path = "event_test.rs"]
mod tests;

use anyhow::Context;
use anyhow::Result;
use serde::de::DeserializeOwned;
use serde_derive::Deserialize;
use serde_json::Value;

use super::Message;
use super::MessageError;
use super::Part;
use super::Question;
use super::RunStatus;
use super::Session;

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    properties: Value,
}

#[derive(Deserialize)]
struct InfoProperties<T> {
    info: T,
}

#[derive(Deserialize)]
struct StatusProperties {
    #[serde(rename = "sessionID")]
    session_id: String,
    status: RunStatus,
}

#[derive(Deserialize)]
struct SessionIdProperties {
    #[serde(rename = "sessionID")]
    session_id: String,
}

#[derive(Deserialize)]
struct SessionErrorProperties {
    #[serde(rename = "sessionID", default)]
    session_id: Option<String>,
    #[serde(default)]
    error: Option<MessageError>,
}

#[derive(Deserialize)]
struct MessageRemovedProperties {
    #[serde(rename = "sessionID")]
    session_id: String,
    #[serde(rename = "messageID")]
    message_id: String,
}

#[derive(Deserialize)]
struct PartUpdatedProperties {
    part: Part,
    #[serde(default)]
    delta: Option<String>,
}

#[derive(Deserialize)]
struct PartRemovedProperties {
    #[serde(rename = "sessionID")]
    session_id: String,
    #[serde(rename = "messageID")]
    message_id: String,
    #[serde(rename = "partID")]
    part_id: String,
}

/// A decoded `{type, properties}` envelope from the `/event` feed.
#[derive(Clone, Debug, PartialEq)]
pub enum ServerEvent {
    ServerConnected,
    ServerHeartbeat,
    SessionUpdated(Session),
    SessionDeleted(Session),
    SessionStatus {
        session_id: String,
        status: RunStatus,
    },
    SessionIdle {
        session_id: String,
    },
    SessionError {
        session_id: Option<String>,
        error: Option<MessageError>,
    },
    MessageUpdated(Message),
    MessageRemoved {
        session_id: String,
        message_id: String,
    },
    PartUpdated {
        part: Part,
        delta: Option<String>,
    },
    PartRemoved {
        session_id: String,
        message_id: String,
        part_id: String,
    },
    /// The run is waiting for the user to answer.
    QuestionAsked(Question),
    /// Any event type this client does not understand. Carries the type name.
    Unknown(String),
}

fn properties<T: DeserializeOwned>(kind: &str, properties: Value) -> Result<T> {
    return serde_json::from_value::<T>(properties)
        .with_context(|| return format!("Invalid properties for event {kind}"));
}

impl ServerEvent {
    pub fn parse(data: &str) -> Result<ServerEvent> {
        let envelope: Envelope =
            serde_json::from_str(data).context("Event is not a valid JSON envelope")?;

        return ServerEvent::from_envelope(envelope);
    }

    fn from_envelope(envelope: Envelope) -> Result<ServerEvent> {
        let kind = envelope.kind.as_str();
        let props = envelope.properties;

        let event = match kind {
            "server.connected" => ServerEvent::ServerConnected,
            "server.heartbeat" => ServerEvent::ServerHeartbeat,
            "session.created" | "session.updated" => {
                let res: InfoProperties<Session> = properties(kind, props)?;
                ServerEvent::SessionUpdated(res.info)
            }
            "session.deleted" => {
                let res: InfoProperties<Session> = properties(kind, props)?;
                ServerEvent::SessionDeleted(res.info)
            }
            "session.status" => {
                let res: StatusProperties = properties(kind, props)?;
                ServerEvent::SessionStatus {
                    session_id: res.session_id,
                    status: res.status,
                }
            }
            "session.idle" => {
                let res: SessionIdProperties = properties(kind, props)?;
                ServerEvent::SessionIdle {
                    session_id: res.session_id,
                }
            }
            "session.error" => {
                let res: SessionErrorProperties = properties(kind, props)?;
                ServerEvent::SessionError {
                    session_id: res.session_id,
                    error: res.error,
                }
            }
            "message.updated" => {
                let res: InfoProperties<Message> = properties(kind, props)?;
                ServerEvent::MessageUpdated(res.info)
            }
            "message.removed" => {
                let res: MessageRemovedProperties = properties(kind, props)?;
                ServerEvent::MessageRemoved {
                    session_id: res.session_id,
                    message_id: res.message_id,
                }
            }
            "message.part.updated" => {
                let res: PartUpdatedProperties = properties(kind, props)?;
                ServerEvent::PartUpdated {
                    part: res.part,
                    delta: res.delta,
                }
            }
            "message.part.removed" => {
                let res: PartRemovedProperties = properties(kind, props)?;
                ServerEvent::PartRemoved {
                    session_id: res.session_id,
                    message_id: res.message_id,
                    part_id: res.part_id,
                }
            }
            "question.asked" => ServerEvent::QuestionAsked(properties(kind, props)?),
            _ => ServerEvent::Unknown(kind.to_string()),
        };

        return Ok(event);
    }

    pub fn kind(&self) -> &str {
        match self {
            ServerEvent::ServerConnected => return "server.connected",
            ServerEvent::ServerHeartbeat => return "server.heartbeat",
            ServerEvent::SessionUpdated(_) => return "session.updated",
            ServerEvent::SessionDeleted(_) => return "session.deleted",
            ServerEvent::SessionStatus { .. } => return "session.status",
            ServerEvent::SessionIdle { .. } => return "session.idle",
            ServerEvent::SessionError { .. } => return "session.error",
            ServerEvent::MessageUpdated(_) => return "message.updated",
            ServerEvent::MessageRemoved { .. } => return "message.removed",
            ServerEvent::PartUpdated { .. } => return "message.part.updated",
            ServerEvent::PartRemoved { .. } => return "message.part.removed",
            ServerEvent::QuestionAsked(_) => return "question.asked",
            ServerEvent::Unknown(kind) => return kind,
        }
    }

    /// The session an event belongs to, if it is scoped to one.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            ServerEvent::SessionUpdated(session) => return Some(&session.id),
            ServerEvent::SessionDeleted(session) => return Some(&session.id),
            ServerEvent::SessionStatus { session_id, .. } => return Some(session_id),
            ServerEvent::SessionIdle { session_id } => return Some(session_id),
            ServerEvent::SessionError { session_id, .. } => return session_id.as_deref(),
            ServerEvent::MessageUpdated(message) => return Some(message.session_id()),
            ServerEvent::MessageRemoved { session_id, .. } => return Some(session_id),
            ServerEvent::PartUpdated { part, .. } => return Some(&part.session_id),
            ServerEvent::PartRemoved { session_id, .. } => return Some(session_id),
            ServerEvent::QuestionAsked(question) => return Some(&question.session_id),
            _ => return None,
        }
    }
}

/// Everything the feed worker reports back to its owner.
#[derive(Clone, Debug, PartialEq)]
pub enum FeedSignal {
    Connected,
    Disconnected,
    Event(ServerEvent),
    /// The reconnect budget is spent, the feed stays down until the next
    /// explicit connect.
    MaxReconnectAttempts(u32),
}
