#[cfg(test)]
#[path = "question_test.rs"]
mod tests;

use serde_derive::Deserialize;
use serde_derive::Serialize;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionInfo {
    pub question: String,
    #[serde(default)]
    pub header: String,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    #[serde(default, alias = "multiSelect")]
    pub multiple: bool,
}

impl QuestionInfo {
    /// Resolves one typed answer. Numbers pick options (1 based), anything
    /// else is taken as a custom answer. Single choice questions keep the
    /// first pick only.
    fn resolve(&self, input: &str) -> Vec<String> {
        let mut picks = input
            .split(',')
            .map(|pick| return pick.trim())
            .filter(|pick| return !pick.is_empty())
            .map(|pick| {
                let option = pick
                    .parse::<usize>()
                    .ok()
                    .and_then(|idx| return idx.checked_sub(1))
                    .and_then(|idx| return self.options.get(idx));

                return match option {
                    Some(option) => option.label.to_string(),
                    None => pick.to_string(),
                };
            })
            .collect::<Vec<String>>();

        if !self.multiple {
            picks.truncate(1);
        }

        return picks;
    }
}

/// A run paused on user input, announced by `question.asked`. Answered through
/// `POST /question/{id}/reply`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    #[serde(rename = "sessionID")]
    pub session_id: String,
    #[serde(default)]
    pub questions: Vec<QuestionInfo>,
}

impl Question {
    /// Splits a typed reply into one answer list per question. Answers to
    /// separate questions are separated by `;`, multiple picks by `,`.
    pub fn parse_answers(&self, input: &str) -> Vec<Vec<String>> {
        let mut replies = input.split(';');

        return self
            .questions
            .iter()
            .map(|info| return info.resolve(replies.next().unwrap_or_default()))
            .collect();
    }

    pub fn describe(&self) -> String {
        let mut lines = vec![];
        for info in self.questions.iter() {
            if info.header.is_empty() {
                lines.push(info.question.to_string());
            } else {
                lines.push(format!("{}: {}", info.header, info.question));
            }

            for (idx, option) in info.options.iter().enumerate() {
                match &option.description {
                    Some(description) => {
                        lines.push(format!("  {}. {} ({description})", idx + 1, option.label))
                    }
                    None => lines.push(format!("  {}. {}", idx + 1, option.label)),
                }
            }
        }

        return lines.join("\n");
    }
}
