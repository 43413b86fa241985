#[cfg(test)]
#[path = "part_test.rs"]
mod tests;

use serde_derive::Deserialize;
use serde_derive::Serialize;
use serde_json::Map;
use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ToolState {
    Pending {
        #[serde(default)]
        input: Map<String, Value>,
    },
    Running {
        #[serde(default)]
        input: Map<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Map<String, Value>>,
    },
    Completed {
        #[serde(default)]
        input: Map<String, Value>,
        #[serde(default)]
        output: String,
        #[serde(default)]
        title: String,
        #[serde(default)]
        metadata: Map<String, Value>,
    },
    Error {
        #[serde(default)]
        input: Map<String, Value>,
        #[serde(default)]
        error: String,
    },
}

impl ToolState {
    pub fn name(&self) -> &'static str {
        match self {
            ToolState::Pending { .. } => return "pending",
            ToolState::Running { .. } => return "running",
            ToolState::Completed { .. } => return "completed",
            ToolState::Error { .. } => return "error",
        }
    }

    pub fn input(&self) -> &Map<String, Value> {
        match self {
            ToolState::Pending { input } => return input,
            ToolState::Running { input, .. } => return input,
            ToolState::Completed { input, .. } => return input,
            ToolState::Error { input, .. } => return input,
        }
    }

    pub fn is_terminal(&self) -> bool {
        return matches!(self, ToolState::Completed { .. } | ToolState::Error { .. });
    }

    /// Legal moves are pending -> running -> completed | error. Repeating a
    /// state is allowed since running updates stream in, and the server may
    /// skip running entirely for fast tools.
    pub fn can_transition_to(&self, next: &ToolState) -> bool {
        if self.name() == next.name() {
            return true;
        }

        match self {
            ToolState::Pending { .. } => return true,
            ToolState::Running { .. } => return next.is_terminal(),
            ToolState::Completed { .. } | ToolState::Error { .. } => return false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PartKind {
    Text {
        #[serde(default)]
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        synthetic: Option<bool>,
    },
    Reasoning {
        #[serde(default)]
        text: String,
    },
    File {
        #[serde(default)]
        mime: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
        #[serde(default)]
        url: String,
    },
    Tool {
        #[serde(rename = "callID", default)]
        call_id: String,
        tool: String,
        state: ToolState,
    },
    /// Step markers, patches, snapshots and anything newer than this client.
    #[serde(other)]
    Other,
}

/// A fragment of a message's content, streamed and updated in place while the
/// assistant works.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub id: String,
    #[serde(rename = "sessionID")]
    pub session_id: String,
    #[serde(rename = "messageID")]
    pub message_id: String,
    #[serde(flatten)]
    pub kind: PartKind,
}

impl Part {
    pub fn text(&self) -> Option<&str> {
        if let PartKind::Text { text, .. } = &self.kind {
            return Some(text);
        }

        return None;
    }

    /// Synthetic text is injected by the server (e.g. file contents) and is
    /// not part of the assistant's answer.
    pub fn is_synthetic(&self) -> bool {
        if let PartKind::Text { synthetic, .. } = &self.kind {
            return synthetic.unwrap_or(false);
        }

        return false;
    }

    pub fn tool_state(&self) -> Option<&ToolState> {
        if let PartKind::Tool { state, .. } = &self.kind {
            return Some(state);
        }

        return None;
    }
}

/// Joins the displayable text parts of a message.
pub fn answer_text(parts: &[Part]) -> String {
    return parts
        .iter()
        .filter(|part| return !part.is_synthetic())
        .filter_map(|part| return part.text())
        .collect::<Vec<&str>>()
        .join("\n")
        .trim()
        .to_string();
}
