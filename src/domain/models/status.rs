use serde_derive::Deserialize;
use serde_derive::Serialize;

/// Whether the assistant is working on a session. Entirely server driven.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Idle,
    #[serde(alias = "busy")]
    Running,
    Retry {
        #[serde(default)]
        attempt: u32,
        #[serde(default)]
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next: Option<f64>,
    },
}

impl RunStatus {
    pub fn is_idle(&self) -> bool {
        return *self == RunStatus::Idle;
    }

    pub fn label(&self) -> String {
        match self {
            RunStatus::Idle => return "idle".to_string(),
            RunStatus::Running => return "running".to_string(),
            RunStatus::Retry { attempt, message, .. } => {
                return format!("retrying (attempt {attempt}): {message}");
            }
        }
    }
}
