#[cfg(test)]
#[path = "store_test.rs"]
mod tests;

use std::collections::HashMap;

use crate::domain::models::Message;
use crate::domain::models::Part;
use crate::domain::models::RunStatus;
use crate::domain::models::Session;

type PartKey = (String, String);

fn part_key(session_id: &str, message_id: &str) -> PartKey {
    return (session_id.to_string(), message_id.to_string());
}

fn sort_messages(messages: &mut [Message]) {
    messages.sort_by(|a, b| return a.id().cmp(b.id()));
}

/// The in-memory read model. Only ever mutated by the reducer and by
/// hydration, never performs I/O.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionStore {
    sessions: HashMap<String, Session>,
    messages: HashMap<String, Vec<Message>>,
    parts: HashMap<PartKey, Vec<Part>>,
    statuses: HashMap<String, RunStatus>,
}

impl SessionStore {
    /// Most recently updated first.
    pub fn sessions(&self) -> Vec<Session> {
        let mut sessions = self.sessions.values().cloned().collect::<Vec<Session>>();
        sessions.sort_by(|a, b| {
            return b
                .time
                .updated
                .total_cmp(&a.time.updated)
                .then_with(|| return a.id.cmp(&b.id));
        });

        return sessions;
    }

    pub fn session(&self, session_id: &str) -> Option<&Session> {
        return self.sessions.get(session_id);
    }

    pub fn messages(&self, session_id: &str) -> &[Message] {
        return self
            .messages
            .get(session_id)
            .map(|messages| return messages.as_slice())
            .unwrap_or_default();
    }

    pub fn message(&self, session_id: &str, message_id: &str) -> Option<&Message> {
        return self
            .messages(session_id)
            .iter()
            .find(|message| return message.id() == message_id);
    }

    pub fn parts(&self, session_id: &str, message_id: &str) -> &[Part] {
        return self
            .parts
            .get(&part_key(session_id, message_id))
            .map(|parts| return parts.as_slice())
            .unwrap_or_default();
    }

    pub fn part(&self, session_id: &str, message_id: &str, part_id: &str) -> Option<&Part> {
        return self
            .parts(session_id, message_id)
            .iter()
            .find(|part| return part.id == part_id);
    }

    /// Every part list of a session, keyed by message id.
    pub fn session_parts(&self, session_id: &str) -> HashMap<String, Vec<Part>> {
        return self
            .parts
            .iter()
            .filter(|((part_session_id, _), _)| return part_session_id == session_id)
            .map(|((_, message_id), parts)| return (message_id.to_string(), parts.clone()))
            .collect();
    }

    pub fn status(&self, session_id: &str) -> RunStatus {
        return self.statuses.get(session_id).cloned().unwrap_or_default();
    }

    pub fn upsert_session(&mut self, session: Session) {
        self.sessions.insert(session.id.to_string(), session);
    }

    /// Drops the session along with everything scoped to it.
    pub fn remove_session(&mut self, session_id: &str) {
        self.sessions.remove(session_id);
        self.messages.remove(session_id);
        self.statuses.remove(session_id);
        self.parts
            .retain(|(part_session_id, _), _| return part_session_id != session_id);
    }

    pub fn set_status(&mut self, session_id: &str, status: RunStatus) {
        self.statuses.insert(session_id.to_string(), status);
    }

    /// Replaces in place when the id is known, otherwise appends and re-sorts
    /// by id so arrival order never leaks into display order.
    pub fn upsert_message(&mut self, message: Message) {
        let messages = self
            .messages
            .entry(message.session_id().to_string())
            .or_default();

        if let Some(existing) = messages.iter_mut().find(|m| return m.id() == message.id()) {
            *existing = message;
            return;
        }

        messages.push(message);
        sort_messages(messages);
    }

    pub fn remove_message(&mut self, session_id: &str, message_id: &str) {
        if let Some(messages) = self.messages.get_mut(session_id) {
            messages.retain(|message| return message.id() != message_id);
        }
        self.parts.remove(&part_key(session_id, message_id));
    }

    /// Replaces in place when the id is known, otherwise appends. Parts keep
    /// their arrival order. Returns the replaced part.
    pub fn upsert_part(&mut self, part: Part) -> Option<Part> {
        let parts = self
            .parts
            .entry(part_key(&part.session_id, &part.message_id))
            .or_default();

        if let Some(existing) = parts.iter_mut().find(|p| return p.id == part.id) {
            return Some(std::mem::replace(existing, part));
        }

        parts.push(part);
        return None;
    }

    pub fn remove_part(&mut self, session_id: &str, message_id: &str, part_id: &str) {
        if let Some(parts) = self.parts.get_mut(&part_key(session_id, message_id)) {
            parts.retain(|part| return part.id != part_id);
        }
    }

    /// Hydration: swaps in the full message history of a session.
    pub fn replace_messages(&mut self, session_id: &str, mut messages: Vec<Message>) {
        sort_messages(&mut messages);
        self.messages.insert(session_id.to_string(), messages);
    }

    /// Hydration: swaps in the full part list of a message.
    pub fn replace_parts(&mut self, session_id: &str, message_id: &str, parts: Vec<Part>) {
        self.parts.insert(part_key(session_id, message_id), parts);
    }

    pub fn is_empty(&self) -> bool {
        return self.sessions.is_empty()
            && self.messages.is_empty()
            && self.parts.is_empty()
            && self.statuses.is_empty();
    }
}
