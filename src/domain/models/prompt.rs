use serde_derive::Deserialize;
use serde_derive::Serialize;

use super::ModelSelection;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttachment {
    pub url: String,
    pub mime: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PromptPart {
    Text {
        text: String,
    },
    File {
        url: String,
        mime: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
}

/// Body of `POST /session/{id}/message`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptRequest {
    pub parts: Vec<PromptPart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelSelection>,
    #[serde(rename = "noReply", default, skip_serializing_if = "Option::is_none")]
    pub no_reply: Option<bool>,
}

impl PromptRequest {
    /// Attachments go first, then the text. Blank text is left out so an
    /// image-only prompt stays image-only.
    pub fn new(content: &str, files: &[FileAttachment]) -> PromptRequest {
        let mut parts = files
            .iter()
            .map(|file| {
                return PromptPart::File {
                    url: file.url.to_string(),
                    mime: file.mime.to_string(),
                    filename: file.filename.clone(),
                };
            })
            .collect::<Vec<PromptPart>>();

        if !content.trim().is_empty() {
            parts.push(PromptPart::Text {
                text: content.to_string(),
            });
        }

        return PromptRequest {
            parts,
            agent: None,
            model: None,
            no_reply: None,
        };
    }

    pub fn with_agent(mut self, agent: Option<String>) -> PromptRequest {
        self.agent = agent;
        return self;
    }

    pub fn with_model(mut self, model: Option<ModelSelection>) -> PromptRequest {
        self.model = model;
        return self;
    }

    pub fn with_no_reply(mut self, no_reply: bool) -> PromptRequest {
        self.no_reply = Some(no_reply);
        return self;
    }
}
